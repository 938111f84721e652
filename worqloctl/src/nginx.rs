//! Reverse-proxy profile selection and server-name rendering.
//!
//! Four profile templates live in the nginx directory, keyed by
//! `(ssl, observability)`. TLS templates ship with `server_name _;`. Instead
//! of substituting that sentinel in place (which only works once), the
//! configured domain is applied as a field: every `server_name` directive in
//! the pristine template is set to the domain and the result is written to
//! `generated/`. Rendering is therefore idempotent and also handles a domain
//! change.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::{debug, info, warn};

static SERVER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?P<indent>[ \t]*server_name)[ \t]+[^;\n]*;")
        .expect("static regex")
});

/// Placeholder server name shipped in the TLS templates.
const SERVER_NAME_SENTINEL: &str = "_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NginxProfile {
    Plain,
    PlainObservability,
    Ssl,
    SslObservability,
}

impl NginxProfile {
    pub fn select(ssl: bool, observability: bool) -> Self {
        match (ssl, observability) {
            (false, false) => NginxProfile::Plain,
            (false, true) => NginxProfile::PlainObservability,
            (true, false) => NginxProfile::Ssl,
            (true, true) => NginxProfile::SslObservability,
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            NginxProfile::Plain => "nginx.conf",
            NginxProfile::PlainObservability => "nginx.observability.conf",
            NginxProfile::Ssl => "nginx.ssl.conf",
            NginxProfile::SslObservability => "nginx.ssl.observability.conf",
        }
    }

    pub fn is_tls(self) -> bool {
        matches!(self, NginxProfile::Ssl | NginxProfile::SslObservability)
    }

    pub fn has_observability(self) -> bool {
        matches!(
            self,
            NginxProfile::PlainObservability | NginxProfile::SslObservability
        )
    }
}

/// Profile chosen for a domain and where its rendered file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NginxSelection {
    pub profile: NginxProfile,
    pub template: PathBuf,
    /// File the proxy mounts: the rendered copy for TLS profiles, the
    /// template itself for plain ones.
    pub rendered: PathBuf,
    pub configured_domain: Option<String>,
}

impl NginxSelection {
    /// Path of the rendered file relative to `root`, in the `./`-prefixed form
    /// compose expects for bind mounts.
    pub fn mount_path(&self, root: &Path) -> String {
        match self.rendered.strip_prefix(root) {
            Ok(rel) => format!("./{}", rel.display()),
            Err(_) => self.rendered.display().to_string(),
        }
    }
}

/// Set every `server_name` directive to `domain`. Fails when the template has
/// no directive at all, since the proxy would then answer for any host.
pub fn render_server_name(template: &str, domain: &str) -> Result<String> {
    if !SERVER_NAME.is_match(template) {
        bail!("template has no server_name directive");
    }
    let replacement = format!("${{indent}} {domain};");
    Ok(SERVER_NAME
        .replace_all(template, replacement.as_str())
        .into_owned())
}

/// Domain currently configured in a rendered file, if any directive holds a
/// value other than the sentinel.
pub fn configured_server_name(rendered: &str) -> Option<String> {
    rendered.lines().find_map(|line| {
        let rest = line
            .trim_start()
            .strip_prefix("server_name")
            .filter(|rest| rest.starts_with([' ', '\t']))?;
        let value = rest.trim().trim_end_matches(';').trim();
        (!value.is_empty() && value != SERVER_NAME_SENTINEL)
            .then(|| value.to_string())
    })
}

/// Resolve `profile` to the file the proxy should mount. TLS profiles need
/// `domain` and are rendered under `nginx_dir/generated/`; plain profiles
/// answer for any host and are mounted as shipped.
pub fn select_nginx_config(
    nginx_dir: &Path,
    profile: NginxProfile,
    domain: Option<&str>,
) -> Result<NginxSelection> {
    let template = nginx_dir.join(profile.file_name());
    if !profile.is_tls() {
        if !template.is_file() {
            warn!(
                template = %template.display(),
                "Nginx template missing; the proxy will not start until it exists"
            );
        }
        return Ok(NginxSelection {
            profile,
            rendered: template.clone(),
            template,
            configured_domain: None,
        });
    }

    let Some(domain) = domain else {
        bail!(
            "{} needs a domain; run `worqloctl cert setup <domain>` first",
            profile.file_name()
        );
    };
    let raw = fs::read_to_string(&template).with_context(|| {
        format!("failed to read nginx template {}", template.display())
    })?;
    let rendered = render_server_name(&raw, domain)
        .with_context(|| format!("cannot render {}", template.display()))?;

    let out_dir = nginx_dir.join("generated");
    fs::create_dir_all(&out_dir).with_context(|| {
        format!("failed to create {}", out_dir.display())
    })?;
    let out = out_dir.join(profile.file_name());

    let current = fs::read_to_string(&out).ok();
    if current.as_deref() == Some(rendered.as_str()) {
        debug!(path = %out.display(), domain, "Nginx config already rendered");
    } else {
        fs::write(&out, &rendered)
            .with_context(|| format!("failed to write {}", out.display()))?;
        let previous = current.as_deref().and_then(configured_server_name);
        info!(
            profile = profile.file_name(),
            path = %out.display(),
            domain,
            previous = previous.as_deref().unwrap_or("-"),
            "Rendered nginx config"
        );
    }

    Ok(NginxSelection {
        profile,
        template,
        rendered: out,
        configured_domain: Some(domain.to_string()),
    })
}
