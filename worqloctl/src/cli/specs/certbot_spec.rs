//! Certificate agent invocations. The agent runs as a throwaway container
//! sharing the challenge webroot with the live proxy, so issuance never binds
//! port 80 itself.

use crate::{cli::specs::CommandSpec, config::DeployConfig};

/// Mount point of the challenge webroot inside the agent container. The
/// proxy serves `/.well-known/acme-challenge/` from the same directory.
pub const CONTAINER_WEBROOT: &str = "/var/www/certbot";
const CONTAINER_STATE: &str = "/etc/letsencrypt";

fn certbot_base_spec(config: &DeployConfig) -> CommandSpec {
    let mut spec = CommandSpec::new(&config.compose_program).args([
        "run".to_string(),
        "--rm".to_string(),
        "-v".to_string(),
        format!(
            "{}:{CONTAINER_STATE}",
            config.letsencrypt_dir.display()
        ),
        "-v".to_string(),
        format!("{}:{CONTAINER_WEBROOT}", config.webroot_dir.display()),
        config.certbot_image.clone(),
    ]);
    spec.cwd = Some(config.deploy_root.clone());
    spec.inherit_stdio = true;
    spec
}

/// HTTP-01 issuance in webroot mode. `--keep-until-expiring` makes a re-run
/// with a valid certificate a no-op at the CA.
pub fn certonly_webroot_spec(
    config: &DeployConfig,
    domain: &str,
    email: &str,
) -> CommandSpec {
    certbot_base_spec(config).args([
        "certonly",
        "--webroot",
        "-w",
        CONTAINER_WEBROOT,
        "-d",
        domain,
        "--email",
        email,
        "--agree-tos",
        "--no-eff-email",
        "--non-interactive",
        "--keep-until-expiring",
    ])
}

pub fn renew_spec(config: &DeployConfig, domain: &str) -> CommandSpec {
    certbot_base_spec(config).args([
        "renew",
        "--cert-name",
        domain,
        "--webroot",
        "-w",
        CONTAINER_WEBROOT,
        "--non-interactive",
    ])
}
