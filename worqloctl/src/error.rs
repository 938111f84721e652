use std::{net::Ipv4Addr, path::PathBuf};

use thiserror::Error;

use crate::{cert::CertStatus, env_store::EnvStoreError};

fn expected_record(ip: &Option<Ipv4Addr>) -> String {
    match ip {
        Some(ip) => format!("an A record pointing to {ip}"),
        None => "an A record pointing to this server's public IP".to_string(),
    }
}

/// Failures of the deployment workflow that carry operator guidance.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("{what} is not available. {guidance}")]
    PrerequisiteMissing { what: String, guidance: String },

    #[error(
        "no DNS record found for {domain}. Create {} at your DNS provider, wait for it to propagate, then re-run.",
        expected_record(.expected)
    )]
    DnsNoRecord {
        domain: String,
        expected: Option<Ipv4Addr>,
    },

    #[error(
        "{domain} resolves to {resolved} but this server's public IP is {public_ip}; aborted without override"
    )]
    DnsMismatchRejected {
        domain: String,
        resolved: String,
        public_ip: Ipv4Addr,
    },

    #[error(
        "certificate request for {domain} failed ({status}). Most likely causes:\n  \
         1. ports 80/443 are not reachable from the internet\n  \
         2. DNS for {domain} has not propagated to this server yet\n  \
         3. a firewall or cloud security group blocks inbound HTTP"
    )]
    ChallengeFailed { domain: String, status: String },

    #[error("`{domain}` is not a valid DNS name for a certificate")]
    InvalidDomain { domain: String },

    #[error("certificate state cannot move from {from} to {to}")]
    InvalidTransition { from: CertStatus, to: CertStatus },

    #[error("issued certificate file missing at {path}")]
    CertificateMissing { path: PathBuf },

    #[error(transparent)]
    Store(#[from] EnvStoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_record_message_names_expected_value() {
        let err = DeployError::DnsNoRecord {
            domain: "app.example.com".into(),
            expected: Some(Ipv4Addr::new(203, 0, 113, 7)),
        };
        let text = err.to_string();
        assert!(text.contains("app.example.com"));
        assert!(text.contains("A record pointing to 203.0.113.7"));
    }

    #[test]
    fn challenge_failure_lists_likely_causes() {
        let err = DeployError::ChallengeFailed {
            domain: "app.example.com".into(),
            status: "exit status: 1".into(),
        };
        let text = err.to_string();
        assert!(text.contains("ports 80/443"));
        assert!(text.contains("DNS"));
        assert!(text.contains("firewall"));
    }
}
