//! Parsing of the single user-supplied access point.
//!
//! Accepted inputs are an optional `http://`/`https://` prefix, a host (IPv4,
//! domain, or `localhost`), and an optional `:port`, with at most one trailing
//! slash. The host/port split uses the last colon; bracketed IPv6 literals are
//! refused with [`BaseUrlError::BracketedIpv6`] instead of being split into a
//! garbage host.

use std::{fmt, str::FromStr};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BaseUrlError {
    #[error("access point is empty")]
    Empty,
    #[error("unsupported scheme in `{input}` (use http:// or https://)")]
    UnsupportedScheme { input: String },
    #[error("access point `{input}` must not contain a path")]
    UnexpectedPath { input: String },
    #[error(
        "bracketed IPv6 literal `{input}` is not supported; use a DNS name or an IPv4 address"
    )]
    BracketedIpv6 { input: String },
    #[error("invalid host `{host}`")]
    InvalidHost {
        host: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid port `{port}`")]
    InvalidPort { port: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// WebSocket scheme paired with this HTTP scheme.
    pub fn websocket(self) -> &'static str {
        match self {
            Scheme::Http => "ws",
            Scheme::Https => "wss",
        }
    }

    pub fn is_secure(self) -> bool {
        matches!(self, Scheme::Https)
    }
}

/// Canonical `scheme://host[:port]` access point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaseUrl {
    scheme: Scheme,
    host: String,
    port: Option<u16>,
}

impl BaseUrl {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
        }
    }

    /// Access point used when the caller supplies none.
    pub fn localhost() -> Self {
        Self::new(Scheme::Http, "localhost", None)
    }

    /// `None` or a blank string means localhost.
    pub fn from_access_point(raw: Option<&str>) -> Result<Self, BaseUrlError> {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Self::parse(raw),
            None => Ok(Self::localhost()),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, BaseUrlError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BaseUrlError::Empty);
        }
        let input = trimmed.strip_suffix('/').unwrap_or(trimmed);

        let (scheme, rest) = if let Some(rest) = strip_prefix_ci(input, "https://")
        {
            (Scheme::Https, rest)
        } else if let Some(rest) = strip_prefix_ci(input, "http://") {
            (Scheme::Http, rest)
        } else {
            (Scheme::Http, input)
        };

        if rest.contains("://") {
            return Err(BaseUrlError::UnsupportedScheme {
                input: raw.to_string(),
            });
        }
        if rest.starts_with('[') {
            return Err(BaseUrlError::BracketedIpv6 {
                input: raw.to_string(),
            });
        }
        if rest.contains('/') {
            return Err(BaseUrlError::UnexpectedPath {
                input: raw.to_string(),
            });
        }

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => (host, Some(parse_port(port)?)),
            None => (rest, None),
        };
        if host.is_empty() {
            return Err(BaseUrlError::InvalidHost {
                host: host.to_string(),
                source: url::ParseError::EmptyHost,
            });
        }
        url::Host::parse(host).map_err(|source| BaseUrlError::InvalidHost {
            host: host.to_string(),
            source,
        })?;

        Ok(Self::new(scheme, host, port))
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Same host and port under another scheme.
    pub fn with_scheme(&self, scheme: Scheme) -> Self {
        Self {
            scheme,
            ..self.clone()
        }
    }

    /// `host[:port]`
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.host),
            None => self.host.clone(),
        }
    }

    /// `scheme://host[:port]` with no trailing slash.
    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.authority())
    }

    /// Join a path (with or without a leading slash) onto the origin.
    pub fn join(&self, path: &str) -> String {
        format!("{}/{}", self.origin(), path.trim_start_matches('/'))
    }
}

impl fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.origin())
    }
}

impl FromStr for BaseUrl {
    type Err = BaseUrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn strip_prefix_ci<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    let head = input.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&input[prefix.len()..])
    } else {
        None
    }
}

fn parse_port(raw: &str) -> Result<u16, BaseUrlError> {
    match raw.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(BaseUrlError::InvalidPort {
            port: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_http_without_prefix() {
        let url = BaseUrl::parse("app.example.com").expect("parse");
        assert_eq!(url.scheme(), Scheme::Http);
        assert_eq!(url.host(), "app.example.com");
        assert_eq!(url.port(), None);
        assert_eq!(url.origin(), "http://app.example.com");
    }

    #[test]
    fn splits_port_on_last_colon() {
        let url = BaseUrl::parse("https://app.example.com:8443/").expect("parse");
        assert_eq!(url.scheme(), Scheme::Https);
        assert_eq!(url.host(), "app.example.com");
        assert_eq!(url.port(), Some(8443));
        assert_eq!(url.origin(), "https://app.example.com:8443");
    }

    #[test]
    fn strips_only_one_trailing_slash() {
        assert_eq!(
            BaseUrl::parse("https://a.example.com/").expect("parse"),
            BaseUrl::parse("https://a.example.com").expect("parse"),
        );
        assert!(matches!(
            BaseUrl::parse("https://a.example.com//"),
            Err(BaseUrlError::UnexpectedPath { .. })
        ));
    }

    #[test]
    fn prefix_match_ignores_case() {
        let url = BaseUrl::parse("HTTPS://Example.com").expect("parse");
        assert_eq!(url.scheme(), Scheme::Https);
    }

    #[test]
    fn empty_access_point_means_localhost() {
        assert_eq!(
            BaseUrl::from_access_point(None).expect("localhost"),
            BaseUrl::localhost()
        );
        assert_eq!(
            BaseUrl::from_access_point(Some("  ")).expect("localhost"),
            BaseUrl::localhost()
        );
    }

    #[test]
    fn rejects_bad_ports() {
        for raw in ["host:", "host:0", "host:70000", "host:http"] {
            assert!(
                matches!(
                    BaseUrl::parse(raw),
                    Err(BaseUrlError::InvalidPort { .. })
                ),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_foreign_schemes_and_paths() {
        assert!(matches!(
            BaseUrl::parse("ftp://host"),
            Err(BaseUrlError::UnsupportedScheme { .. })
        ));
        assert!(matches!(
            BaseUrl::parse("http://host/app"),
            Err(BaseUrlError::UnexpectedPath { .. })
        ));
    }

    #[test]
    fn rejects_invalid_hosts() {
        assert!(matches!(
            BaseUrl::parse("http://:8080"),
            Err(BaseUrlError::InvalidHost { .. })
        ));
        assert!(matches!(
            BaseUrl::parse("bad host"),
            Err(BaseUrlError::InvalidHost { .. })
        ));
    }

    // Last-colon splitting cannot handle IPv6 literals; they are refused
    // outright rather than silently producing a wrong host/port pair.
    #[test]
    fn bracketed_ipv6_is_a_documented_limitation() {
        for raw in ["http://[::1]:8080", "[2001:db8::1]", "https://[::1]"] {
            assert!(
                matches!(
                    BaseUrl::parse(raw),
                    Err(BaseUrlError::BracketedIpv6 { .. })
                ),
                "{raw} should be refused"
            );
        }
    }
}
