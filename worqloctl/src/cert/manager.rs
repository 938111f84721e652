//! Certificate lifecycle for one domain:
//! `Unconfigured > Validating > ChallengePending > Issued > Configured`, then
//! periodically `Renewing > Configured`.
//!
//! Every step after DNS validation aborts on failure with operator guidance.
//! Nothing is rolled back; each step is safe to repeat, so the fix for a
//! failed run is to correct the cause and run setup again.

use std::fmt;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::{
    base_url::{BaseUrl, Scheme},
    cert::{
        acme::{InstalledCertificate, install_certificate, normalize_domain},
        dns::{
            DnsCheck, DnsResolver, Operator, PublicIpSource, check_dns,
            join_ips,
        },
        record::{CertStatus, CertificateRecord},
        renewal::{RenewalSchedule, write_renewal},
    },
    cli::{
        proxy::ProxyToggles,
        specs::{
            CommandRunner,
            certbot_spec::{certonly_webroot_spec, renew_spec},
            proxy_reload_spec,
        },
        stack::{
            ensure_prerequisites, restart_stack, stack_up, wait_for_services,
        },
        utils::resolve_project_name,
    },
    cleanup::RunMarker,
    config::DeployConfig,
    constants::{OBSERVABILITY_TRUSTED_ORIGIN, SSL_EMAIL},
    derive::DerivedUrls,
    env_store::{BatchOutcome, EnvStore},
    error::DeployError,
    health::{HealthProbe, HealthReport},
    nginx::{self, NginxProfile, NginxSelection},
    overlay::{OverlayChain, OverlayToggles, select_overlays},
};

/// External collaborators of the manager.
#[derive(Clone, Copy)]
pub struct CertPorts<'a> {
    pub runner: &'a dyn CommandRunner,
    pub resolver: &'a dyn DnsResolver,
    pub public_ip: &'a dyn PublicIpSource,
    pub operator: &'a dyn Operator,
}

impl fmt::Debug for CertPorts<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertPorts").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct SetupRequest {
    pub domain: String,
    pub email: String,
    pub observability: bool,
    /// Continue when DNS points elsewhere, without asking.
    pub allow_dns_mismatch: bool,
    /// Skip confirmation prompts; implies `allow_dns_mismatch`.
    pub assume_yes: bool,
    pub toggles: OverlayToggles,
}

#[derive(Debug, Clone)]
pub struct SetupReport {
    pub record: CertificateRecord,
    pub dns: DnsCheck,
    pub selection: NginxSelection,
    pub persisted: BatchOutcome,
    pub renewal: RenewalSchedule,
    pub health: HealthReport,
    pub chain: OverlayChain,
}

pub struct CertificateManager<'a> {
    config: &'a DeployConfig,
    store: &'a EnvStore,
    ports: CertPorts<'a>,
}

impl fmt::Debug for CertificateManager<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateManager")
            .field("deploy_root", &self.config.deploy_root)
            .field("env_file", &self.store.path())
            .finish_non_exhaustive()
    }
}

impl<'a> CertificateManager<'a> {
    pub fn new(
        config: &'a DeployConfig,
        store: &'a EnvStore,
        ports: CertPorts<'a>,
    ) -> Self {
        Self {
            config,
            store,
            ports,
        }
    }

    /// DNS must publish an A record for `domain`. A record pointing elsewhere
    /// needs the operator's consent, either up front (`allow_mismatch`) or at
    /// an interactive prompt.
    pub async fn validate_domain(
        &self,
        domain: &str,
        allow_mismatch: bool,
    ) -> Result<DnsCheck> {
        let check =
            check_dns(domain, self.ports.resolver, self.ports.public_ip).await?;
        match &check {
            DnsCheck::Matched { ip } => {
                info!(domain, %ip, "DNS points at this server");
            }
            DnsCheck::Unverified { resolved } => {
                warn!(
                    domain,
                    resolved = %join_ips(resolved),
                    "Could not determine this server's public IP; DNS match not verified"
                );
            }
            DnsCheck::Mismatch {
                resolved,
                public_ip,
            } => {
                let resolved = join_ips(resolved);
                warn!(
                    domain,
                    %resolved,
                    %public_ip,
                    "DNS does not point at this server; the HTTP challenge will likely fail"
                );
                let accepted = allow_mismatch
                    || (self.ports.operator.is_interactive()
                        && self.ports.operator.confirm(&format!(
                            "{domain} resolves to {resolved}, not {public_ip}. Continue anyway?"
                        ))?);
                if !accepted {
                    return Err(DeployError::DnsMismatchRejected {
                        domain: domain.to_string(),
                        resolved,
                        public_ip: *public_ip,
                    }
                    .into());
                }
            }
        }
        Ok(check)
    }

    /// HTTP-01 in webroot mode through the running proxy, then install the
    /// issued files.
    pub async fn obtain_certificate(
        &self,
        domain: &str,
        email: &str,
    ) -> Result<InstalledCertificate> {
        let challenge_dir =
            self.config.webroot_dir.join(".well-known/acme-challenge");
        std::fs::create_dir_all(&challenge_dir).with_context(|| {
            format!("failed to create {}", challenge_dir.display())
        })?;

        let spec = certonly_webroot_spec(self.config, domain, email);
        info!(domain, "Requesting certificate");
        let out = self.ports.runner.run(&spec).await?;
        if !out.success {
            return Err(DeployError::ChallengeFailed {
                domain: domain.to_string(),
                status: out.status_text(),
            }
            .into());
        }
        install_certificate(
            &self.config.letsencrypt_dir,
            domain,
            &self.config.cert_dir,
        )
    }

    pub fn select_nginx_config(
        &self,
        domain: &str,
        observability: bool,
    ) -> Result<NginxSelection> {
        nginx::select_nginx_config(
            &self.config.nginx_dir,
            NginxProfile::select(true, observability),
            Some(domain),
        )
    }

    /// Write the selected proxy config, the https bundle for `domain`, the TLS
    /// settings and the observability toggle in one store replacement.
    pub fn persist_selection(
        &self,
        selection: &NginxSelection,
        domain: &str,
        email: &str,
    ) -> Result<BatchOutcome> {
        let base = BaseUrl::new(Scheme::Https, domain, None);
        let derived = DerivedUrls::derive(&base);
        let toggles = ProxyToggles {
            tls_domain: Some(domain.to_string()),
            observability: selection.profile.has_observability(),
        };
        let mut pairs = derived.to_env_pairs();
        pairs.extend(toggles.env_pairs(self.config, selection));
        pairs.extend([
            (SSL_EMAIL, email.to_string()),
            (OBSERVABILITY_TRUSTED_ORIGIN, base.origin()),
        ]);

        let outcome = self.store.set_many(&pairs)?;
        if outcome.skipped_missing_store {
            warn!(
                env_file = %self.store.path().display(),
                "Env file missing; TLS settings were not persisted. Run `worqloctl configure` first."
            );
        } else {
            info!(
                env_file = %self.store.path().display(),
                nginx_config = %selection.mount_path(&self.config.deploy_root),
                changed = outcome.appended.len() + outcome.replaced.len(),
                "Persisted TLS configuration"
            );
        }
        Ok(outcome)
    }

    pub async fn restart_stack(&self, chain: &OverlayChain) -> Result<()> {
        restart_stack(self.config, chain, self.ports.runner).await?;
        Ok(())
    }

    pub fn schedule_renewal(
        &self,
        chain: &OverlayChain,
        domain: &str,
    ) -> Result<RenewalSchedule> {
        write_renewal(
            self.config,
            chain,
            &resolve_project_name(self.config),
            domain,
        )
    }

    pub fn status(&self) -> Result<Option<CertificateRecord>> {
        CertificateRecord::load(&self.config.cert_record_path())
    }

    /// Full first-time (or repeated) setup for `request.domain`.
    pub async fn setup(&self, request: &SetupRequest) -> Result<SetupReport> {
        let _marker = RunMarker::acquire(self.config.cert_lock_path())?;
        let domain = normalize_domain(&request.domain)?;
        let record_path = self.config.cert_record_path();

        ensure_prerequisites(self.config, self.ports.runner).await?;

        let dns = self
            .validate_domain(
                &domain,
                request.allow_dns_mismatch || request.assume_yes,
            )
            .await?;

        // A failed DNS check leaves any existing record as it was.
        let mut record = CertificateRecord::load_for(
            &record_path,
            &domain,
            &self.config.cert_dir,
        )?;
        record.transition(CertStatus::Validating)?;
        record.email = Some(request.email.clone());
        record.save(&record_path)?;

        let toggles = OverlayToggles {
            observability: request.observability,
            ..request.toggles
        };
        let chain = select_overlays(toggles, &self.config.deploy_root);

        // The proxy serves the challenge from the shared webroot.
        stack_up(self.config, &chain, self.ports.runner).await?;
        let proxy = self.config.proxy_service.as_str();
        if !wait_for_services(
            self.config,
            &chain,
            self.ports.runner,
            &[proxy],
            &self.config.readiness_policy,
        )
        .await
        {
            bail!(
                "proxy service `{proxy}` did not start; check `docker compose ps` and its logs, then re-run"
            );
        }

        record.transition(CertStatus::ChallengePending)?;
        record.save(&record_path)?;
        let installed = self.obtain_certificate(&domain, &request.email).await?;

        record.transition(CertStatus::Issued)?;
        record.cert_paths = installed.paths.clone();
        record.fingerprint = Some(installed.fingerprint.clone());
        record.save(&record_path)?;

        let selection =
            self.select_nginx_config(&domain, request.observability)?;
        let persisted =
            self.persist_selection(&selection, &domain, &request.email)?;
        self.restart_stack(&chain).await?;

        record.transition(CertStatus::Configured)?;
        record.save(&record_path)?;

        let renewal = self.schedule_renewal(&chain, &domain)?;
        let health = HealthProbe::new(
            self.config.health_url.clone(),
            self.config.health_policy,
        )?
        .wait_until_healthy()
        .await;

        info!(
            domain = %domain,
            profile = selection.profile.file_name(),
            "TLS setup complete"
        );
        Ok(SetupReport {
            record,
            dns,
            selection,
            persisted,
            renewal,
            health,
            chain,
        })
    }

    /// Renew the configured certificate, re-install it and reload the proxy.
    pub async fn renew(
        &self,
        domain: &str,
        chain: &OverlayChain,
    ) -> Result<CertificateRecord> {
        let _marker = RunMarker::acquire(self.config.cert_lock_path())?;
        let domain = normalize_domain(domain)?;
        let record_path = self.config.cert_record_path();

        let mut record = match CertificateRecord::load(&record_path)? {
            Some(record) if record.domain == domain && record.is_serving() => {
                record
            }
            _ => bail!(
                "no configured certificate for {domain}; run `worqloctl cert setup {domain}` first"
            ),
        };

        record.transition(CertStatus::Renewing)?;
        record.save(&record_path)?;

        let renew = renew_spec(self.config, &domain);
        let out = self.ports.runner.run(&renew).await?;
        if !out.success {
            return Err(DeployError::ChallengeFailed {
                domain: domain.clone(),
                status: out.status_text(),
            }
            .into());
        }
        let installed = install_certificate(
            &self.config.letsencrypt_dir,
            &domain,
            &self.config.cert_dir,
        )?;

        let reload = proxy_reload_spec(
            self.config,
            chain,
            &resolve_project_name(self.config),
        );
        let out = self.ports.runner.run(&reload).await?;
        if !out.success {
            bail!(
                "proxy reload failed ({}); the renewed certificate is installed but not yet served. Run `worqloctl stack restart`.",
                out.status_text()
            );
        }

        if record.fingerprint.as_deref() == Some(installed.fingerprint.as_str()) {
            info!(domain = %domain, "Certificate not yet due for renewal");
        }
        record.fingerprint = Some(installed.fingerprint);
        record.cert_paths = installed.paths;
        record.transition(CertStatus::Configured)?;
        record.save(&record_path)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, net::Ipv4Addr, path::Path, time::Duration};

    use super::*;
    use crate::{
        cert::{
            acme::testing::fake_issued,
            dns::testing::{FixedPublicIp, ScriptedOperator, StaticResolver},
        },
        cli::specs::{CommandOutput, testing::RecordingRunner},
        overlay::ArchFallback,
        retry::RetryPolicy,
    };

    const HOST: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 7);
    const DOMAIN: &str = "app.example.com";

    const TEMPLATE: &str = "\
server {
    listen 443 ssl;
    server_name _;
}
";

    fn deployment(root: &Path) -> DeployConfig {
        fs::write(root.join("docker-compose.yml"), "services: {}\n")
            .expect("compose");
        fs::write(root.join("docker-compose.observability.yml"), "")
            .expect("overlay");
        fs::create_dir_all(root.join("nginx")).expect("nginx dir");
        for name in ["nginx.ssl.conf", "nginx.ssl.observability.conf"] {
            fs::write(root.join("nginx").join(name), TEMPLATE).expect("template");
        }
        fs::write(root.join(".env"), "SECRET=keep\nAPI_URL=http://old/api\n")
            .expect("env");

        let mut cfg = DeployConfig::defaults(root);
        cfg.health_url = "http://127.0.0.1:9/api/health".into();
        cfg.health_policy = RetryPolicy::new(1, Duration::from_millis(1));
        cfg.readiness_policy = RetryPolicy::new(2, Duration::from_millis(1));
        cfg
    }

    /// Succeeds everything, reports the proxy running, and leaves issued
    /// files behind when the agent is asked for a certificate.
    fn issuing_runner(letsencrypt_dir: &Path) -> RecordingRunner {
        let le = letsencrypt_dir.to_path_buf();
        RecordingRunner::with(move |spec| {
            if spec.args.iter().any(|a| a == "certonly" || a == "renew") {
                fake_issued(&le, DOMAIN);
            }
            CommandOutput::ok("nginx\n")
        })
    }

    fn request(observability: bool) -> SetupRequest {
        SetupRequest {
            domain: DOMAIN.into(),
            email: "ops@example.com".into(),
            observability,
            allow_dns_mismatch: false,
            assume_yes: false,
            toggles: OverlayToggles {
                arch_fallback: ArchFallback::Off,
                ..OverlayToggles::default()
            },
        }
    }

    #[tokio::test]
    async fn setup_runs_full_lifecycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = deployment(dir.path());
        let store = cfg.env_store();
        let runner = issuing_runner(&cfg.letsencrypt_dir);
        let resolver = StaticResolver(vec![HOST]);
        let public_ip = FixedPublicIp(Some(HOST));
        let operator = ScriptedOperator::new(false, false);
        let manager = CertificateManager::new(
            &cfg,
            &store,
            CertPorts {
                runner: &runner,
                resolver: &resolver,
                public_ip: &public_ip,
                operator: &operator,
            },
        );

        let report = manager.setup(&request(true)).await.expect("setup");
        assert_eq!(report.record.status, CertStatus::Configured);
        assert_eq!(report.dns, DnsCheck::Matched { ip: HOST });
        assert_eq!(
            report.selection.profile.file_name(),
            "nginx.ssl.observability.conf"
        );
        assert!(!report.health.is_healthy());
        assert_eq!(report.chain.to_string(), "base > observability");

        let env = store.load_all().expect("load");
        assert_eq!(env["SECRET"], "keep");
        assert_eq!(env["API_URL"], "https://app.example.com/api");
        assert_eq!(env["WS_URL"], "wss://app.example.com/ws");
        assert_eq!(env["SSL_ENABLED"], "true");
        assert_eq!(env["SSL_DOMAIN"], DOMAIN);
        assert_eq!(
            env["NGINX_CONFIG"],
            "./nginx/generated/nginx.ssl.observability.conf"
        );
        assert_eq!(env["OBSERVABILITY_TRUSTED_ORIGIN"], "https://app.example.com");
        assert_eq!(env["OBSERVABILITY_COOKIE_SECURE"], "true");
        assert_eq!(env["OBSERVABILITY_ENABLED"], "true");

        let rendered = fs::read_to_string(&report.selection.rendered).expect("read");
        assert!(rendered.contains("server_name app.example.com;"));
        assert!(cfg.cert_dir.join("fullchain.pem").is_file());
        assert!(report.renewal.script.is_file());
        assert!(!cfg.cert_lock_path().exists());

        let lines = runner.command_lines();
        let certonly = lines
            .iter()
            .position(|l| l.contains("certonly"))
            .expect("certonly issued");
        let first_up = lines.iter().position(|l| l.ends_with("up -d")).expect("up");
        let down = lines
            .iter()
            .position(|l| l.ends_with("down --remove-orphans"))
            .expect("restart");
        assert!(first_up < certonly && certonly < down);
        assert!(lines.last().expect("last").ends_with("up -d"));

        let saved = manager.status().expect("status").expect("record");
        assert_eq!(saved, report.record);
    }

    #[tokio::test]
    async fn setup_is_repeatable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = deployment(dir.path());
        let store = cfg.env_store();
        let runner = issuing_runner(&cfg.letsencrypt_dir);
        let resolver = StaticResolver(vec![HOST]);
        let public_ip = FixedPublicIp(Some(HOST));
        let operator = ScriptedOperator::new(false, false);
        let ports = CertPorts {
            runner: &runner,
            resolver: &resolver,
            public_ip: &public_ip,
            operator: &operator,
        };
        let manager = CertificateManager::new(&cfg, &store, ports);

        manager.setup(&request(false)).await.expect("first");
        let before = fs::read_to_string(store.path()).expect("env");
        manager.setup(&request(false)).await.expect("second");
        let after = fs::read_to_string(store.path()).expect("env");
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn dns_mismatch_needs_consent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = deployment(dir.path());
        let store = cfg.env_store();
        let runner = issuing_runner(&cfg.letsencrypt_dir);
        let resolver = StaticResolver(vec![Ipv4Addr::new(198, 51, 100, 1)]);
        let public_ip = FixedPublicIp(Some(HOST));

        let declined = ScriptedOperator::new(true, false);
        let manager = CertificateManager::new(
            &cfg,
            &store,
            CertPorts {
                runner: &runner,
                resolver: &resolver,
                public_ip: &public_ip,
                operator: &declined,
            },
        );
        let err = manager.setup(&request(false)).await.expect_err("declined");
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::DnsMismatchRejected { .. })
        ));
        assert_eq!(declined.prompt_count(), 1);
        assert!(!runner.command_lines().iter().any(|l| l.contains("certonly")));
        assert!(!cfg.cert_lock_path().exists());
        assert_eq!(manager.status().expect("status"), None);

        let headless = ScriptedOperator::new(false, true);
        let manager = CertificateManager::new(
            &cfg,
            &store,
            CertPorts {
                runner: &runner,
                resolver: &resolver,
                public_ip: &public_ip,
                operator: &headless,
            },
        );
        let mut req = request(false);
        req.assume_yes = true;
        let report = manager.setup(&req).await.expect("override");
        assert!(matches!(report.dns, DnsCheck::Mismatch { .. }));
        assert_eq!(headless.prompt_count(), 0);
    }

    #[tokio::test]
    async fn dns_failure_leaves_record_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = deployment(dir.path());
        let store = cfg.env_store();
        let runner = issuing_runner(&cfg.letsencrypt_dir);
        let resolver = StaticResolver(Vec::new());
        let public_ip = FixedPublicIp(Some(HOST));
        let operator = ScriptedOperator::new(false, false);
        let manager = CertificateManager::new(
            &cfg,
            &store,
            CertPorts {
                runner: &runner,
                resolver: &resolver,
                public_ip: &public_ip,
                operator: &operator,
            },
        );

        let err = manager.setup(&request(false)).await.expect_err("no DNS");
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::DnsNoRecord { .. })
        ));
        assert_eq!(manager.status().expect("status"), None);

        let mut serving = CertificateRecord::new(DOMAIN, &cfg.cert_dir);
        serving.status = CertStatus::Configured;
        serving.save(&cfg.cert_record_path()).expect("save");
        manager.setup(&request(false)).await.expect_err("no DNS again");
        assert_eq!(manager.status().expect("status"), Some(serving));
        assert!(!runner.command_lines().iter().any(|l| l.contains("up -d")));
    }

    #[tokio::test]
    async fn challenge_failure_leaves_record_pending() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = deployment(dir.path());
        let store = cfg.env_store();
        let runner = RecordingRunner::with(|spec| {
            if spec.args.iter().any(|a| a == "certonly") {
                CommandOutput::failed(1)
            } else {
                CommandOutput::ok("nginx\n")
            }
        });
        let resolver = StaticResolver(vec![HOST]);
        let public_ip = FixedPublicIp(Some(HOST));
        let operator = ScriptedOperator::new(false, false);
        let manager = CertificateManager::new(
            &cfg,
            &store,
            CertPorts {
                runner: &runner,
                resolver: &resolver,
                public_ip: &public_ip,
                operator: &operator,
            },
        );

        let err = manager.setup(&request(false)).await.expect_err("challenge");
        assert!(err.to_string().contains("ports 80/443"));
        let record = manager.status().expect("status").expect("record");
        assert_eq!(record.status, CertStatus::ChallengePending);
        assert_eq!(store.get("SSL_ENABLED").expect("get"), None);
        assert!(!cfg.cert_lock_path().exists());
    }

    #[tokio::test]
    async fn renew_requires_configured_record_then_reloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = deployment(dir.path());
        let store = cfg.env_store();
        let runner = issuing_runner(&cfg.letsencrypt_dir);
        let resolver = StaticResolver(vec![HOST]);
        let public_ip = FixedPublicIp(Some(HOST));
        let operator = ScriptedOperator::new(false, false);
        let manager = CertificateManager::new(
            &cfg,
            &store,
            CertPorts {
                runner: &runner,
                resolver: &resolver,
                public_ip: &public_ip,
                operator: &operator,
            },
        );
        let chain = OverlayChain::base_only();

        let err = manager.renew(DOMAIN, &chain).await.expect_err("no record");
        assert!(err.to_string().contains("cert setup"));

        manager.setup(&request(false)).await.expect("setup");
        let renewed = manager.renew(DOMAIN, &chain).await.expect("renew");
        assert_eq!(renewed.status, CertStatus::Configured);
        let lines = runner.command_lines();
        assert!(lines.iter().any(|l| l.contains("renew --cert-name")));
        assert!(lines.last().expect("last").ends_with("nginx -s reload"));
    }
}
