//! Domain checks and installation of certificate files issued by the agent.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::{cert::record::CertPaths, error::DeployError};

/// Normalize `domain` and make sure a CA could issue for it: a dotted DNS
/// name, not an IP literal, no wildcard.
pub fn normalize_domain(domain: &str) -> Result<String, DeployError> {
    let candidate = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    let invalid = || DeployError::InvalidDomain {
        domain: domain.to_string(),
    };
    if candidate.is_empty()
        || candidate.len() > 253
        || !candidate.contains('.')
        || candidate.contains('*')
    {
        return Err(invalid());
    }
    let labels_ok = candidate.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    if !labels_ok {
        return Err(invalid());
    }
    match url::Host::parse(&candidate) {
        Ok(url::Host::Domain(_)) => Ok(candidate),
        _ => Err(invalid()),
    }
}

/// Files installed into the proxy's certificate directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledCertificate {
    pub paths: CertPaths,
    pub fingerprint: String,
}

/// Copy `live/<domain>/{fullchain,privkey,chain}.pem` from the agent's state
/// directory into `cert_dir`, world-readable so the proxy's unprivileged
/// worker can load them.
pub fn install_certificate(
    letsencrypt_dir: &Path,
    domain: &str,
    cert_dir: &Path,
) -> Result<InstalledCertificate> {
    let live = CertPaths::in_dir(&letsencrypt_dir.join("live").join(domain));
    if let Some(missing) = live.iter().find(|p| !p.is_file()) {
        return Err(DeployError::CertificateMissing {
            path: missing.to_path_buf(),
        }
        .into());
    }

    fs::create_dir_all(cert_dir)
        .with_context(|| format!("failed to create {}", cert_dir.display()))?;
    let installed = CertPaths::in_dir(cert_dir);
    for (from, to) in live.iter().zip(installed.iter()) {
        fs::copy(from, to).with_context(|| {
            format!("failed to copy {} to {}", from.display(), to.display())
        })?;
        set_world_readable(to)?;
    }

    let fingerprint = fingerprint_file(&installed.fullchain)?;
    info!(
        domain,
        cert_dir = %cert_dir.display(),
        fingerprint = %fingerprint,
        "Installed certificate"
    );
    Ok(InstalledCertificate {
        paths: installed,
        fingerprint,
    })
}

/// Hex SHA-256 of a file's bytes.
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

#[cfg(unix)]
fn set_world_readable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
        .with_context(|| format!("failed to chmod {}", path.display()))
}

#[cfg(not(unix))]
fn set_world_readable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;

    /// Lay out what the agent leaves behind after a successful issuance.
    pub(crate) fn fake_issued(letsencrypt_dir: &Path, domain: &str) {
        let live = letsencrypt_dir.join("live").join(domain);
        std::fs::create_dir_all(&live).expect("live dir");
        for name in ["fullchain.pem", "privkey.pem", "chain.pem"] {
            std::fs::write(live.join(name), format!("{domain} {name}\n"))
                .expect("write pem");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_normalization() {
        assert_eq!(
            normalize_domain(" App.Example.COM. ").expect("valid"),
            "app.example.com"
        );
        for bad in [
            "",
            "localhost",
            "203.0.113.7",
            "*.example.com",
            "bad_host.example.com",
            "-a.example.com",
            "a..example.com",
            "https://app.example.com",
        ] {
            assert!(normalize_domain(bad).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn installs_copies_with_fingerprint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let le = dir.path().join("conf");
        let ssl = dir.path().join("ssl");
        testing::fake_issued(&le, "app.example.com");

        let installed =
            install_certificate(&le, "app.example.com", &ssl).expect("install");
        assert_eq!(installed.paths, CertPaths::in_dir(&ssl));
        assert_eq!(installed.fingerprint.len(), 64);
        assert_eq!(
            fs::read_to_string(&installed.paths.privkey).expect("read"),
            "app.example.com privkey.pem\n"
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&installed.paths.fullchain)
                .expect("meta")
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o644);
        }
    }

    #[test]
    fn missing_issued_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = install_certificate(
            &dir.path().join("conf"),
            "app.example.com",
            &dir.path().join("ssl"),
        )
        .expect_err("nothing issued");
        let deploy = err.downcast_ref::<DeployError>().expect("typed");
        assert!(matches!(deploy, DeployError::CertificateMissing { .. }));
    }
}
