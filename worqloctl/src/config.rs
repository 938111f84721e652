//! Settings for the tool itself: where a deployment checkout keeps its files
//! and how long to wait for things.
//!
//! Layering, lowest to highest: built-in defaults, `worqlo-deploy.toml` in the
//! deploy root, `WORQLO_*` environment variables, CLI flags (applied by the
//! binary after [`DeployConfig::load`]).

use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::debug;

use crate::{
    constants::{
        CERT_LOCK_FILE, CERT_RECORD_FILE, DEFAULT_CERT_DIR,
        DEFAULT_CERTBOT_IMAGE, DEFAULT_CONFIG_FILE, DEFAULT_ENV_FILE,
        DEFAULT_HEALTH_URL, DEFAULT_LETSENCRYPT_DIR, DEFAULT_NGINX_DIR,
        DEFAULT_PROXY_SERVICE, DEFAULT_WEBROOT_DIR, DNS_PORT,
        PUBLIC_DNS_SERVERS, PUBLIC_IP_ENDPOINTS, RENEW_SCRIPT,
    },
    env_store::EnvStore,
    retry::{RetryPolicy, RetryPolicyFile},
};

/// Resolved settings. All paths are absolute or relative to the process
/// working directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployConfig {
    pub deploy_root: PathBuf,
    pub env_file: PathBuf,
    pub nginx_dir: PathBuf,
    /// Where `fullchain.pem`, `privkey.pem` and `chain.pem` are installed.
    pub cert_dir: PathBuf,
    /// Challenge directory shared by the proxy and the certificate agent.
    pub webroot_dir: PathBuf,
    /// Certificate agent state (`/etc/letsencrypt` inside its container).
    pub letsencrypt_dir: PathBuf,
    pub health_url: String,
    pub compose_program: String,
    pub certbot_image: String,
    pub proxy_service: String,
    pub project_name: Option<String>,
    pub health_policy: RetryPolicy,
    pub readiness_policy: RetryPolicy,
    pub public_ip_endpoints: Vec<String>,
    /// Nameservers asked during DNS validation, bypassing the host resolver.
    pub dns_servers: Vec<SocketAddr>,
}

/// Shape of `worqlo-deploy.toml`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployConfigFile {
    pub env_file: Option<PathBuf>,
    pub nginx_dir: Option<PathBuf>,
    pub cert_dir: Option<PathBuf>,
    pub webroot_dir: Option<PathBuf>,
    pub letsencrypt_dir: Option<PathBuf>,
    pub health_url: Option<String>,
    pub compose_program: Option<String>,
    pub certbot_image: Option<String>,
    pub proxy_service: Option<String>,
    pub project_name: Option<String>,
    pub public_ip_endpoints: Option<Vec<String>>,
    /// `"ip"` or `"ip:port"`; port 53 when omitted.
    pub dns_servers: Option<Vec<String>>,
    #[serde(default)]
    pub health: RetryPolicyFile,
    #[serde(default)]
    pub readiness: RetryPolicyFile,
}

impl DeployConfig {
    /// Built-in defaults rooted at `deploy_root`.
    pub fn defaults(deploy_root: impl Into<PathBuf>) -> Self {
        let root = deploy_root.into();
        Self {
            env_file: root.join(DEFAULT_ENV_FILE),
            nginx_dir: root.join(DEFAULT_NGINX_DIR),
            cert_dir: root.join(DEFAULT_CERT_DIR),
            webroot_dir: root.join(DEFAULT_WEBROOT_DIR),
            letsencrypt_dir: root.join(DEFAULT_LETSENCRYPT_DIR),
            health_url: DEFAULT_HEALTH_URL.to_string(),
            compose_program: "docker".to_string(),
            certbot_image: DEFAULT_CERTBOT_IMAGE.to_string(),
            proxy_service: DEFAULT_PROXY_SERVICE.to_string(),
            project_name: None,
            health_policy: RetryPolicy::health_default(),
            readiness_policy: RetryPolicy::readiness_default(),
            public_ip_endpoints: PUBLIC_IP_ENDPOINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            dns_servers: PUBLIC_DNS_SERVERS
                .iter()
                .map(|ip| SocketAddr::new(IpAddr::V4(*ip), DNS_PORT))
                .collect(),
            deploy_root: root,
        }
    }

    /// Defaults, then the optional TOML file, then environment overrides.
    pub fn load(deploy_root: impl Into<PathBuf>) -> Result<Self> {
        let root = deploy_root.into();
        let mut config = Self::defaults(&root);

        let file_path = root.join(DEFAULT_CONFIG_FILE);
        if file_path.is_file() {
            let raw = fs::read_to_string(&file_path).with_context(|| {
                format!("failed to read {}", file_path.display())
            })?;
            let file: DeployConfigFile = toml::from_str(&raw)
                .with_context(|| format!("invalid {}", file_path.display()))?;
            config.apply_file(file).with_context(|| {
                format!("invalid settings in {}", file_path.display())
            })?;
            debug!(path = %file_path.display(), "Loaded deploy config file");
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_file(&mut self, file: DeployConfigFile) -> Result<()> {
        let root = self.deploy_root.clone();
        let under_root = |p: PathBuf| resolve_under(&root, p);

        if let Some(p) = file.env_file {
            self.env_file = under_root(p);
        }
        if let Some(p) = file.nginx_dir {
            self.nginx_dir = under_root(p);
        }
        if let Some(p) = file.cert_dir {
            self.cert_dir = under_root(p);
        }
        if let Some(p) = file.webroot_dir {
            self.webroot_dir = under_root(p);
        }
        if let Some(p) = file.letsencrypt_dir {
            self.letsencrypt_dir = under_root(p);
        }
        if let Some(url) = file.health_url {
            self.health_url = url;
        }
        if let Some(program) = file.compose_program {
            self.compose_program = program;
        }
        if let Some(image) = file.certbot_image {
            self.certbot_image = image;
        }
        if let Some(service) = file.proxy_service {
            self.proxy_service = service;
        }
        if let Some(name) = file.project_name {
            self.project_name = Some(name);
        }
        if let Some(endpoints) = file.public_ip_endpoints {
            self.public_ip_endpoints = endpoints;
        }
        if let Some(servers) = file.dns_servers {
            if servers.is_empty() {
                bail!("dns_servers must list at least one nameserver");
            }
            self.dns_servers = servers
                .iter()
                .map(|raw| parse_nameserver(raw))
                .collect::<Result<_>>()?;
        }
        self.health_policy = file.health.apply_to(self.health_policy)?;
        self.readiness_policy = file.readiness.apply_to(self.readiness_policy)?;
        Ok(())
    }

    /// Apply `WORQLO_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(p) = get("WORQLO_ENV_FILE") {
            self.set_env_file(p);
        }
        if let Some(url) = get("WORQLO_HEALTH_URL") {
            self.health_url = url;
        }
        if let Some(program) = get("WORQLO_COMPOSE_CMD") {
            self.compose_program = program;
        }
        if let Some(name) = get("WORQLO_PROJECT_NAME") {
            self.project_name = Some(name);
        }
    }

    /// Point at another env file; relative paths are taken under the deploy
    /// root, like every other path setting.
    pub fn set_env_file(&mut self, path: impl Into<PathBuf>) {
        self.env_file = resolve_under(&self.deploy_root, path.into());
    }

    pub fn env_store(&self) -> EnvStore {
        EnvStore::new(&self.env_file)
    }

    pub fn cert_record_path(&self) -> PathBuf {
        self.cert_dir.join(CERT_RECORD_FILE)
    }

    pub fn cert_lock_path(&self) -> PathBuf {
        self.deploy_root.join(CERT_LOCK_FILE)
    }

    pub fn renew_script_path(&self) -> PathBuf {
        self.deploy_root.join(RENEW_SCRIPT)
    }
}

fn parse_nameserver(raw: &str) -> Result<SocketAddr> {
    let raw = raw.trim();
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let ip: IpAddr = raw
        .parse()
        .with_context(|| format!("invalid nameserver `{raw}`"))?;
    Ok(SocketAddr::new(ip, DNS_PORT))
}

fn resolve_under(root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}
