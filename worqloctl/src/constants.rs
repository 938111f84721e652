//! Environment keys written by `worqloctl` and the fixed file layout of a
//! deployment checkout.

use std::net::Ipv4Addr;

/// API base (`{base}/api`).
pub const API_URL: &str = "API_URL";
/// WebSocket endpoint (`ws(s)://host[:port]/ws`).
pub const WS_URL: &str = "WS_URL";
/// Primary frontend URL.
pub const APP_URL: &str = "APP_URL";
/// Auth library base URL; mirrors `APP_URL`.
pub const AUTH_URL: &str = "NEXTAUTH_URL";
pub const PASSWORD_RESET_URL: &str = "PASSWORD_RESET_URL";
pub const LOGIN_URL: &str = "LOGIN_URL";
/// Comma separated origin list.
pub const CORS_ORIGINS: &str = "CORS_ORIGINS";
pub const S3_PUBLIC_ENDPOINT: &str = "S3_PUBLIC_ENDPOINT";
pub const HUBSPOT_REDIRECT_URI: &str = "HUBSPOT_REDIRECT_URI";
pub const SALESFORCE_REDIRECT_URI: &str = "SALESFORCE_REDIRECT_URI";
pub const OBSERVABILITY_URL: &str = "OBSERVABILITY_URL";
pub const OBSERVABILITY_TRUSTED_ORIGIN: &str = "OBSERVABILITY_TRUSTED_ORIGIN";
pub const OBSERVABILITY_COOKIE_SECURE: &str = "OBSERVABILITY_COOKIE_SECURE";

pub const SSL_ENABLED: &str = "SSL_ENABLED";
pub const SSL_DOMAIN: &str = "SSL_DOMAIN";
pub const SSL_EMAIL: &str = "SSL_EMAIL";
/// Whether the observability overlay and proxy profile are active. Stack
/// commands fall back to it when no flag is given.
pub const OBSERVABILITY_ENABLED: &str = "OBSERVABILITY_ENABLED";
pub const NGINX_CONFIG: &str = "NGINX_CONFIG";
pub const LLM_PROVIDER: &str = "LLM_PROVIDER";

/// Every key the base URL derivation owns. A derivation always writes all of
/// them in one store replacement.
pub const DERIVED_KEYS: &[&str] = &[
    API_URL,
    WS_URL,
    APP_URL,
    AUTH_URL,
    PASSWORD_RESET_URL,
    LOGIN_URL,
    CORS_ORIGINS,
    S3_PUBLIC_ENDPOINT,
    HUBSPOT_REDIRECT_URI,
    SALESFORCE_REDIRECT_URI,
    OBSERVABILITY_URL,
    OBSERVABILITY_COOKIE_SECURE,
];

/// Third-party integrations that receive an OAuth callback URI.
pub const OAUTH_INTEGRATIONS: [&str; 2] = ["hubspot", "salesforce"];

/// Object storage port exposed when the stack runs without TLS.
pub const PLAIN_S3_PORT: u16 = 9000;
/// Frontend dev server port allowed as a CORS origin on plain HTTP.
pub const DEV_FRONTEND_PORT: u16 = 3000;

pub const DEFAULT_ENV_FILE: &str = ".env";
pub const DEFAULT_CONFIG_FILE: &str = "worqlo-deploy.toml";
pub const DEFAULT_NGINX_DIR: &str = "nginx";
pub const DEFAULT_CERT_DIR: &str = "nginx/ssl";
pub const DEFAULT_WEBROOT_DIR: &str = "certbot/www";
pub const DEFAULT_LETSENCRYPT_DIR: &str = "certbot/conf";
pub const DEFAULT_HEALTH_URL: &str = "http://localhost/api/health";
pub const DEFAULT_PROXY_SERVICE: &str = "nginx";
pub const DEFAULT_CERTBOT_IMAGE: &str = "certbot/certbot:latest";
pub const RENEW_SCRIPT: &str = "scripts/renew-certificate.sh";
pub const CERT_RECORD_FILE: &str = "certificate.json";
pub const CERT_LOCK_FILE: &str = ".worqlo-cert.lock";

/// Nameservers asked for a domain's public A record.
pub const PUBLIC_DNS_SERVERS: [Ipv4Addr; 2] =
    [Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(8, 8, 8, 8)];
pub const DNS_PORT: u16 = 53;

/// Public IP echo services, tried in order.
pub const PUBLIC_IP_ENDPOINTS: &[&str] = &[
    "https://api.ipify.org",
    "https://ifconfig.me/ip",
    "https://icanhazip.com",
];
