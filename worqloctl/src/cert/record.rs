//! Persisted lifecycle record of the deployment's certificate.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DeployError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertStatus {
    Unconfigured,
    Validating,
    ChallengePending,
    Issued,
    Configured,
    Renewing,
}

impl CertStatus {
    /// Forward-only lifecycle. Setup may restart from any state, which is
    /// what makes re-running it after a failure safe.
    pub fn can_transition_to(self, next: CertStatus) -> bool {
        use CertStatus::*;
        matches!(
            (self, next),
            (_, Validating)
                | (Validating, ChallengePending)
                | (ChallengePending, Issued)
                | (Issued, Configured)
                | (Configured, Renewing)
                | (Renewing, Renewing)
                | (Renewing, Configured)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CertStatus::Unconfigured => "unconfigured",
            CertStatus::Validating => "validating",
            CertStatus::ChallengePending => "challenge_pending",
            CertStatus::Issued => "issued",
            CertStatus::Configured => "configured",
            CertStatus::Renewing => "renewing",
        }
    }
}

impl fmt::Display for CertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installed certificate files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertPaths {
    pub fullchain: PathBuf,
    pub privkey: PathBuf,
    pub chain: PathBuf,
}

impl CertPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            fullchain: dir.join("fullchain.pem"),
            privkey: dir.join("privkey.pem"),
            chain: dir.join("chain.pem"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        [&self.fullchain, &self.privkey, &self.chain]
            .into_iter()
            .map(PathBuf::as_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub domain: String,
    pub status: CertStatus,
    pub cert_paths: CertPaths,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// SHA-256 of the installed full chain, hex encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CertificateRecord {
    pub fn new(domain: impl Into<String>, cert_dir: &Path) -> Self {
        Self {
            domain: domain.into(),
            status: CertStatus::Unconfigured,
            cert_paths: CertPaths::in_dir(cert_dir),
            email: None,
            fingerprint: None,
            updated_at: Utc::now(),
        }
    }

    pub fn transition(&mut self, next: CertStatus) -> Result<(), DeployError> {
        if !self.status.can_transition_to(next) {
            return Err(DeployError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        debug!(domain = %self.domain, from = %self.status, to = %next, "Certificate state");
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Installed and mounted by the proxy.
    pub fn is_serving(&self) -> bool {
        matches!(self.status, CertStatus::Configured | CertStatus::Renewing)
    }

    /// `None` when no record has been written yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let record = serde_json::from_str(&raw).with_context(|| {
            format!("invalid certificate record {}", path.display())
        })?;
        Ok(Some(record))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create {}", parent.display())
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json + "\n")
            .with_context(|| format!("failed to write {}", path.display()))
    }

    /// Record for `domain`, reusing the stored one when it belongs to the same
    /// domain. A record for another domain starts over.
    pub fn load_for(path: &Path, domain: &str, cert_dir: &Path) -> Result<Self> {
        match Self::load(path)? {
            Some(record) if record.domain == domain => Ok(record),
            _ => Ok(Self::new(domain, cert_dir)),
        }
    }
}
