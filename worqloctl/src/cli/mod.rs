//! Operations behind the `worqloctl` subcommands that are not certificate
//! specific: deriving the access URLs into `.env`, proxy profile selection,
//! and stack control.

pub mod options;
pub mod proxy;
pub mod specs;
pub mod stack;
pub mod utils;

use anyhow::{Context, Result, bail};
use tracing::info;

pub use options::*;

use crate::{
    base_url::{BaseUrl, Scheme},
    cert::CertificateRecord,
    cli::proxy::{ProxyToggles, ProxyUpdate, apply_proxy_profile},
    config::DeployConfig,
    constants::LLM_PROVIDER,
    derive::{DerivedUrls, derive_and_persist},
    env_store::{BatchOutcome, SetOutcome},
};

#[derive(Debug, Clone)]
/// What `configure` wrote.
pub struct ConfigureReport {
    pub created_store: bool,
    pub derived: DerivedUrls,
    pub outcome: BatchOutcome,
    pub proxy: ProxyUpdate,
    pub llm_provider: Option<String>,
}

/// Create the env file when absent, derive every access URL from the access
/// point and persist them, point the proxy at the matching profile, and set
/// the optional LLM provider.
///
/// The TLS profile stays selected only for an https access point whose host
/// holds a serving certificate; anything else selects a plain profile. The
/// persisted observability toggle is kept.
pub fn configure(
    config: &DeployConfig,
    opts: &ConfigureOptions,
) -> Result<ConfigureReport> {
    let base = BaseUrl::from_access_point(opts.access_point.as_deref())
        .with_context(|| {
            format!(
                "invalid access point `{}`",
                opts.access_point.as_deref().unwrap_or_default()
            )
        })?;

    let store = config.env_store();
    let created_store = store.create_if_missing()?;
    if created_store {
        info!(env_file = %store.path().display(), "Created env file");
    }

    let (derived, outcome) = derive_and_persist(&store, &base)?;

    let tls_domain = match base.scheme() {
        Scheme::Https => certified_domain(config, base.host())?,
        Scheme::Http => None,
    };
    if base.scheme() == Scheme::Https && tls_domain.is_none() {
        info!(
            host = base.host(),
            "No certificate for this host yet; run `worqloctl cert setup` to serve TLS"
        );
    }
    let proxy = apply_proxy_profile(
        config,
        &store,
        &ProxyToggles {
            tls_domain,
            observability: ProxyToggles::load(&store)?.observability,
        },
    )?;

    let llm_provider = match opts.llm_provider.as_deref().map(str::trim) {
        Some("") => bail!("--llm-provider must not be empty"),
        Some(provider) => {
            if store.set(LLM_PROVIDER, provider)? != SetOutcome::Unchanged {
                info!(provider, "Set LLM provider");
            }
            Some(provider.to_string())
        }
        None => None,
    };

    Ok(ConfigureReport {
        created_store,
        derived,
        outcome,
        proxy,
        llm_provider,
    })
}

/// `host` when the certificate record serves it.
fn certified_domain(
    config: &DeployConfig,
    host: &str,
) -> Result<Option<String>> {
    let record = CertificateRecord::load(&config.cert_record_path())?;
    Ok(record
        .filter(|r| r.is_serving() && r.domain.eq_ignore_ascii_case(host))
        .map(|r| r.domain))
}
