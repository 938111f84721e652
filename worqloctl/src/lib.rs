//! Deployment configuration and TLS lifecycle for Worqlo.
//!
//! This crate owns a deployment's `.env` store, derives every externally
//! visible URL from a single access point, runs the certificate lifecycle
//! (DNS validation, webroot issuance, proxy configuration, renewal) and
//! drives the compose stack through an ordered overlay chain. The
//! `worqloctl` binary is a thin clap front end over these modules.

pub mod base_url;
pub mod cert;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod constants;
pub mod derive;
pub mod env_store;
pub mod error;
pub mod health;
pub mod nginx;
pub mod overlay;
pub mod retry;

pub use base_url::{BaseUrl, BaseUrlError, Scheme};
pub use config::DeployConfig;
pub use derive::{DerivedUrls, derive_and_persist};
pub use env_store::{BatchOutcome, EnvStore, EnvStoreError, SetOutcome};
pub use error::DeployError;
pub use health::{HealthProbe, HealthReport};
pub use nginx::{NginxProfile, NginxSelection};
pub use overlay::{
    ArchFallback, Overlay, OverlayChain, OverlayToggles, select_overlays,
};
pub use retry::{Polled, RetryPolicy};
