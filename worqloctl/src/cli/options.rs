use crate::{
    cli::proxy::ProxyToggles,
    env_store::{EnvStore, EnvStoreError},
    overlay::{ArchFallback, OverlayToggles},
};

#[derive(Debug, Clone, Default)]
/// User-facing options for stack up/down/restart.
pub struct StackOptions {
    /// `None` keeps the persisted `OBSERVABILITY_ENABLED` setting.
    pub observability: Option<bool>,
    pub prebuilt: bool,
    pub arch_fallback: ArchFallback,
}

impl StackOptions {
    pub fn toggles(&self, saved_observability: bool) -> OverlayToggles {
        OverlayToggles {
            observability: self.observability.unwrap_or(saved_observability),
            prebuilt: self.prebuilt,
            arch_fallback: self.arch_fallback,
        }
    }

    /// Persisted proxy toggles with the observability flag applied, and the
    /// overlay toggles that agree with them.
    pub fn resolve(
        &self,
        store: &EnvStore,
    ) -> Result<(ProxyToggles, OverlayToggles), EnvStoreError> {
        let mut proxy = ProxyToggles::load(store)?;
        let overlays = self.toggles(proxy.observability);
        proxy.observability = overlays.observability;
        Ok((proxy, overlays))
    }
}

#[derive(Debug, Clone, Default)]
/// Options for `configure`.
pub struct ConfigureOptions {
    /// URL, domain, or IP; `None` means localhost.
    pub access_point: Option<String>,
    pub llm_provider: Option<String>,
}
