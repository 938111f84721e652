//! Renewal procedure for an external scheduler: a shell script that renews
//! the certificate, re-installs the files and reloads the proxy, plus the
//! cron line that runs it.

use std::{fmt::Write as _, fs, path::PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::{
    cli::specs::{
        CommandSpec, certbot_spec::renew_spec, compose_base_spec,
        proxy_reload_spec,
    },
    config::DeployConfig,
    overlay::OverlayChain,
};

/// Twice a day, as the CA recommends; renew is a no-op until expiry is near.
const CRON_SCHEDULE: &str = "17 3,15 * * *";
const RENEW_LOG: &str = "certbot/renew.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalSchedule {
    pub script: PathBuf,
    pub cron_line: String,
    /// False when the script on disk already had this content.
    pub changed: bool,
}

/// POSIX shell quoting; safe words are left bare.
fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word.chars().all(|c| {
            c.is_ascii_alphanumeric() || "-_./:=,@%+".contains(c)
        });
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn shell_line(spec: &CommandSpec) -> String {
    let mut line = String::new();
    for (key, value) in &spec.env {
        let _ = write!(line, "{key}={} ", shell_quote(value));
    }
    line.push_str(&shell_quote(&spec.program));
    for arg in &spec.args {
        line.push(' ');
        line.push_str(&shell_quote(arg));
    }
    line
}

pub fn render_renew_script(
    config: &DeployConfig,
    chain: &OverlayChain,
    project_name: &str,
    domain: &str,
) -> String {
    let live = config.letsencrypt_dir.join("live").join(domain);
    let cert_dir = config.cert_dir.display().to_string();
    let reload = proxy_reload_spec(config, chain, project_name);
    // A stopped proxy cannot reload; start it instead.
    let up_proxy = compose_base_spec(config, chain, project_name).args([
        "up",
        "-d",
        config.proxy_service.as_str(),
    ]);

    format!(
        "#!/bin/sh
# Renew the TLS certificate for {domain} and reload the proxy.
# Generated by worqloctl; re-running `worqloctl cert schedule` overwrites it.
set -eu
cd {root}

{renew}

for f in fullchain.pem privkey.pem chain.pem; do
    cp -L {live}/\"$f\" {cert_dir}/\"$f\"
    chmod 644 {cert_dir}/\"$f\"
done

{reload} || {up_proxy}
",
        root = shell_quote(&config.deploy_root.display().to_string()),
        renew = shell_line(&renew_spec(config, domain)),
        live = shell_quote(&live.display().to_string()),
        cert_dir = shell_quote(&cert_dir),
        reload = shell_line(&reload),
        up_proxy = shell_line(&up_proxy),
    )
}

pub fn cron_line(config: &DeployConfig) -> String {
    let script = config.renew_script_path();
    let log = config.deploy_root.join(RENEW_LOG);
    format!(
        "{CRON_SCHEDULE} {} >> {} 2>&1",
        shell_quote(&script.display().to_string()),
        shell_quote(&log.display().to_string())
    )
}

/// Write the renewal script (mode 0755) and return the cron line to install.
/// Regenerating with the same inputs leaves the file untouched.
pub fn write_renewal(
    config: &DeployConfig,
    chain: &OverlayChain,
    project_name: &str,
    domain: &str,
) -> Result<RenewalSchedule> {
    let script = config.renew_script_path();
    let contents = render_renew_script(config, chain, project_name, domain);
    let changed = fs::read_to_string(&script).ok().as_deref()
        != Some(contents.as_str());

    if changed {
        if let Some(parent) = script.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create {}", parent.display())
            })?;
        }
        fs::write(&script, &contents)
            .with_context(|| format!("failed to write {}", script.display()))?;
        info!(script = %script.display(), domain, "Wrote renewal script");
    }
    make_executable(&script)?;

    Ok(RenewalSchedule {
        cron_line: cron_line(config),
        script,
        changed,
    })
}

#[cfg(unix)]
fn make_executable(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("failed to chmod {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(shell_quote("/srv/worqlo/.env"), "/srv/worqlo/.env");
        assert_eq!(shell_quote("/srv/my app"), "'/srv/my app'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn script_renews_copies_and_reloads() {
        let cfg = DeployConfig::defaults("/srv/worqlo");
        let script = render_renew_script(
            &cfg,
            &OverlayChain::base_only(),
            "worqlo",
            "app.example.com",
        );
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("renew --cert-name app.example.com"));
        assert!(
            script.contains("cp -L /srv/worqlo/certbot/conf/live/app.example.com/\"$f\" /srv/worqlo/nginx/ssl/\"$f\"")
        );
        assert!(script.contains("exec -T nginx nginx -s reload"));
        assert!(script.contains("COMPOSE_PROJECT_NAME=worqlo docker compose"));
    }

    #[test]
    fn write_is_idempotent_and_executable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = DeployConfig::defaults(dir.path());
        let chain = OverlayChain::base_only();

        let first =
            write_renewal(&cfg, &chain, "worqlo", "app.example.com").expect("write");
        assert!(first.changed);
        assert!(first.cron_line.starts_with("17 3,15 * * * "));
        assert!(first.cron_line.contains("renew-certificate.sh"));

        let second =
            write_renewal(&cfg, &chain, "worqlo", "app.example.com").expect("write");
        assert!(!second.changed);
        assert_eq!(first.cron_line, second.cron_line);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&first.script)
                .expect("meta")
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }
}
