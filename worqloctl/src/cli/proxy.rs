//! Proxy profile and observability toggle as persisted in the env store.
//!
//! `cert setup`, `configure` and the stack commands all read and write the
//! same three keys (`SSL_ENABLED`, `SSL_DOMAIN`, `OBSERVABILITY_ENABLED`), so
//! the overlay chain and `NGINX_CONFIG` always describe the same deployment.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::{
    config::DeployConfig,
    constants::{
        NGINX_CONFIG, OBSERVABILITY_ENABLED, SSL_DOMAIN, SSL_ENABLED,
    },
    env_store::{BatchOutcome, EnvStore, EnvStoreError},
    nginx::{self, NginxProfile, NginxSelection},
};

/// Toggles that pick the proxy profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyToggles {
    /// Domain served over TLS; `None` means plain HTTP.
    pub tls_domain: Option<String>,
    pub observability: bool,
}

impl ProxyToggles {
    /// Read the persisted toggles. TLS counts only when `SSL_ENABLED` is true
    /// and `SSL_DOMAIN` names a domain. A missing store yields the defaults.
    pub fn load(store: &EnvStore) -> Result<Self, EnvStoreError> {
        let env = store.load_all()?;
        let enabled = |key: &str| {
            env.get(key)
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
        };
        let tls_domain = env
            .get(SSL_DOMAIN)
            .map(|d| d.trim().to_string())
            .filter(|d| enabled(SSL_ENABLED) && !d.is_empty());
        Ok(Self {
            tls_domain,
            observability: enabled(OBSERVABILITY_ENABLED),
        })
    }

    pub fn profile(&self) -> NginxProfile {
        NginxProfile::select(self.tls_domain.is_some(), self.observability)
    }

    /// Key/value pairs recording these toggles and `selection`.
    pub fn env_pairs(
        &self,
        config: &DeployConfig,
        selection: &NginxSelection,
    ) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (NGINX_CONFIG, selection.mount_path(&config.deploy_root)),
            (SSL_ENABLED, self.tls_domain.is_some().to_string()),
        ];
        if let Some(domain) = &self.tls_domain {
            pairs.push((SSL_DOMAIN, domain.clone()));
        }
        pairs.push((OBSERVABILITY_ENABLED, self.observability.to_string()));
        pairs
    }
}

#[derive(Debug, Clone)]
/// What [`apply_proxy_profile`] selected and wrote.
pub struct ProxyUpdate {
    pub selection: NginxSelection,
    pub outcome: BatchOutcome,
}

/// Select the profile for `toggles`, render it when it is a TLS profile, and
/// persist `NGINX_CONFIG` together with the toggles in one store replacement.
pub fn apply_proxy_profile(
    config: &DeployConfig,
    store: &EnvStore,
    toggles: &ProxyToggles,
) -> Result<ProxyUpdate> {
    let selection = nginx::select_nginx_config(
        &config.nginx_dir,
        toggles.profile(),
        toggles.tls_domain.as_deref(),
    )?;
    let outcome = store.set_many(&toggles.env_pairs(config, &selection))?;
    if outcome.skipped_missing_store {
        warn!(
            env_file = %store.path().display(),
            "Env file missing; proxy profile not persisted. Run `worqloctl configure` first."
        );
    } else if outcome.changed() {
        info!(
            profile = selection.profile.file_name(),
            nginx_config = %selection.mount_path(&config.deploy_root),
            "Selected proxy profile"
        );
    } else {
        debug!(
            profile = selection.profile.file_name(),
            "Proxy profile unchanged"
        );
    }
    Ok(ProxyUpdate { selection, outcome })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const TLS_TEMPLATE: &str = "server {\n    listen 443 ssl;\n    server_name _;\n}\n";

    fn deployment(root: &std::path::Path) -> DeployConfig {
        let cfg = DeployConfig::defaults(root);
        fs::create_dir_all(&cfg.nginx_dir).expect("nginx dir");
        for profile in [
            NginxProfile::Plain,
            NginxProfile::PlainObservability,
            NginxProfile::Ssl,
            NginxProfile::SslObservability,
        ] {
            fs::write(cfg.nginx_dir.join(profile.file_name()), TLS_TEMPLATE)
                .expect("template");
        }
        fs::write(&cfg.env_file, "SECRET=keep\n").expect("env");
        cfg
    }

    #[test]
    fn load_requires_flag_and_domain_for_tls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EnvStore::new(dir.path().join(".env"));
        assert_eq!(
            ProxyToggles::load(&store).expect("missing store"),
            ProxyToggles::default()
        );

        fs::write(
            store.path(),
            "SSL_ENABLED=false\nSSL_DOMAIN=app.example.com\nOBSERVABILITY_ENABLED=TRUE\n",
        )
        .expect("write");
        let toggles = ProxyToggles::load(&store).expect("load");
        assert_eq!(toggles.tls_domain, None);
        assert!(toggles.observability);
        assert_eq!(toggles.profile(), NginxProfile::PlainObservability);

        fs::write(store.path(), "SSL_ENABLED=true\nSSL_DOMAIN=\n").expect("write");
        assert_eq!(
            ProxyToggles::load(&store).expect("load").profile(),
            NginxProfile::Plain
        );
    }

    #[test]
    fn plain_observability_is_selected_and_persisted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = deployment(dir.path());
        let store = cfg.env_store();
        let toggles = ProxyToggles {
            tls_domain: None,
            observability: true,
        };

        let update =
            apply_proxy_profile(&cfg, &store, &toggles).expect("apply");
        assert_eq!(update.selection.profile, NginxProfile::PlainObservability);
        let env = store.load_all().expect("load");
        assert_eq!(env["NGINX_CONFIG"], "./nginx/nginx.observability.conf");
        assert_eq!(env["SSL_ENABLED"], "false");
        assert_eq!(env["OBSERVABILITY_ENABLED"], "true");
        assert_eq!(env["SECRET"], "keep");
        assert_eq!(ProxyToggles::load(&store).expect("reload"), toggles);

        let again =
            apply_proxy_profile(&cfg, &store, &toggles).expect("reapply");
        assert!(!again.outcome.changed());
    }

    #[test]
    fn every_combination_points_at_its_profile() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = deployment(dir.path());
        let store = cfg.env_store();
        for (domain, observability, expected) in [
            (None, false, "./nginx/nginx.conf"),
            (None, true, "./nginx/nginx.observability.conf"),
            (Some("app.example.com"), false, "./nginx/generated/nginx.ssl.conf"),
            (
                Some("app.example.com"),
                true,
                "./nginx/generated/nginx.ssl.observability.conf",
            ),
        ] {
            let toggles = ProxyToggles {
                tls_domain: domain.map(str::to_string),
                observability,
            };
            apply_proxy_profile(&cfg, &store, &toggles).expect("apply");
            assert_eq!(
                store.get("NGINX_CONFIG").expect("get").as_deref(),
                Some(expected)
            );
            assert_eq!(ProxyToggles::load(&store).expect("load"), toggles);
        }
    }
}
