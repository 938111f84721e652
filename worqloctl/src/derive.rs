//! Derivation of every URL-shaped setting from one [`BaseUrl`].
//!
//! [`DerivedUrls::derive`] is pure; [`derive_and_persist`] writes the whole
//! bundle through [`EnvStore::set_many`] so a derivation is never observed
//! half-applied.

use tracing::info;

use crate::{
    base_url::{BaseUrl, Scheme},
    constants::{
        API_URL, APP_URL, AUTH_URL, CORS_ORIGINS, DEV_FRONTEND_PORT,
        HUBSPOT_REDIRECT_URI, LOGIN_URL, OAUTH_INTEGRATIONS,
        OBSERVABILITY_COOKIE_SECURE, OBSERVABILITY_URL, PASSWORD_RESET_URL,
        PLAIN_S3_PORT, S3_PUBLIC_ENDPOINT, SALESFORCE_REDIRECT_URI, WS_URL,
    },
    env_store::{BatchOutcome, EnvStore, EnvStoreError},
};

/// Consistent set of URLs for one access point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedUrls {
    pub base: BaseUrl,
    pub api_url: String,
    pub ws_url: String,
    pub app_url: String,
    pub password_reset_url: String,
    pub login_url: String,
    pub cors_origins: Vec<String>,
    pub s3_public_endpoint: String,
    pub hubspot_redirect_uri: String,
    pub salesforce_redirect_uri: String,
    pub observability_url: String,
    pub observability_cookie_secure: bool,
}

impl DerivedUrls {
    pub fn derive(base: &BaseUrl) -> Self {
        let scheme = base.scheme();
        let ws_url =
            format!("{}://{}/ws", scheme.websocket(), base.authority());

        let mut cors_origins = vec![base.origin()];
        if scheme == Scheme::Http {
            // Port 80 is the scheme default, so browsers send it bare.
            for extra in [
                BaseUrl::new(Scheme::Http, base.host(), None),
                BaseUrl::new(
                    Scheme::Http,
                    base.host(),
                    Some(DEV_FRONTEND_PORT),
                ),
            ] {
                let origin = extra.origin();
                if !cors_origins.contains(&origin) {
                    cors_origins.push(origin);
                }
            }
        }

        let s3_public_endpoint = if scheme.is_secure() {
            base.join("s3")
        } else {
            format!("http://{}:{PLAIN_S3_PORT}", base.host())
        };

        let [hubspot, salesforce] = OAUTH_INTEGRATIONS
            .map(|name| base.join(&format!("integrations/{name}/callback")));

        Self {
            base: base.clone(),
            api_url: base.join("api"),
            ws_url,
            app_url: base.origin(),
            password_reset_url: base.join("reset-password"),
            login_url: base.join("login"),
            cors_origins,
            s3_public_endpoint,
            hubspot_redirect_uri: hubspot,
            salesforce_redirect_uri: salesforce,
            observability_url: base.join("observability"),
            observability_cookie_secure: scheme.is_secure(),
        }
    }

    /// Key/value pairs in the order they are written to the env file.
    pub fn to_env_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (APP_URL, self.app_url.clone()),
            (AUTH_URL, self.app_url.clone()),
            (API_URL, self.api_url.clone()),
            (WS_URL, self.ws_url.clone()),
            (LOGIN_URL, self.login_url.clone()),
            (PASSWORD_RESET_URL, self.password_reset_url.clone()),
            (CORS_ORIGINS, self.cors_origins.join(",")),
            (S3_PUBLIC_ENDPOINT, self.s3_public_endpoint.clone()),
            (HUBSPOT_REDIRECT_URI, self.hubspot_redirect_uri.clone()),
            (SALESFORCE_REDIRECT_URI, self.salesforce_redirect_uri.clone()),
            (OBSERVABILITY_URL, self.observability_url.clone()),
            (
                OBSERVABILITY_COOKIE_SECURE,
                self.observability_cookie_secure.to_string(),
            ),
        ]
    }
}

/// Derive the bundle for `base` and write it in one store replacement.
pub fn derive_and_persist(
    store: &EnvStore,
    base: &BaseUrl,
) -> Result<(DerivedUrls, BatchOutcome), EnvStoreError> {
    let derived = DerivedUrls::derive(base);
    let outcome = store.set_many(&derived.to_env_pairs())?;
    if !outcome.skipped_missing_store {
        info!(
            env_file = %store.path().display(),
            base = %base,
            changed = outcome.appended.len() + outcome.replaced.len(),
            "Derived access URLs"
        );
    }
    Ok((derived, outcome))
}
