//! Compose overlay chain selection.
//!
//! Compose merges `-f` files left to right and the later file wins on
//! overlapping keys, so the order of the chain is part of its meaning:
//! base, observability, pre-built images, architecture fallback.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Overlay {
    Base,
    Observability,
    Prebuilt,
    ArchFallback,
}

impl Overlay {
    pub fn file_name(self) -> &'static str {
        match self {
            Overlay::Base => "docker-compose.yml",
            Overlay::Observability => "docker-compose.observability.yml",
            Overlay::Prebuilt => "docker-compose.prebuilt.yml",
            Overlay::ArchFallback => "docker-compose.arm64.yml",
        }
    }
}

impl fmt::Display for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Overlay::Base => "base",
            Overlay::Observability => "observability",
            Overlay::Prebuilt => "prebuilt",
            Overlay::ArchFallback => "arch-fallback",
        };
        f.write_str(name)
    }
}

/// Whether the architecture fallback overlay applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchFallback {
    /// Apply on Apple Silicon hosts only.
    #[default]
    Auto,
    On,
    Off,
}

impl ArchFallback {
    pub fn needed(self) -> bool {
        match self {
            ArchFallback::Auto => host_needs_arch_fallback(),
            ArchFallback::On => true,
            ArchFallback::Off => false,
        }
    }
}

/// Images are published for amd64 only; Apple Silicon runs them emulated.
pub fn host_needs_arch_fallback() -> bool {
    cfg!(all(target_os = "macos", target_arch = "aarch64"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OverlayToggles {
    pub observability: bool,
    pub prebuilt: bool,
    pub arch_fallback: ArchFallback,
}

/// Ordered overlays; later entries override earlier ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayChain {
    overlays: Vec<Overlay>,
}

impl OverlayChain {
    pub fn base_only() -> Self {
        Self {
            overlays: vec![Overlay::Base],
        }
    }

    pub fn overlays(&self) -> &[Overlay] {
        &self.overlays
    }

    pub fn contains(&self, overlay: Overlay) -> bool {
        self.overlays.contains(&overlay)
    }

    /// Compose file paths under `root`, in merge order.
    pub fn files(&self, root: &Path) -> Vec<PathBuf> {
        self.overlays
            .iter()
            .map(|overlay| root.join(overlay.file_name()))
            .collect()
    }
}

impl fmt::Display for OverlayChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> =
            self.overlays.iter().map(ToString::to_string).collect();
        f.write_str(&names.join(" > "))
    }
}

/// Build the chain for `toggles`, keeping only overlays whose file exists
/// under `root`. The base file is always listed; compose reports its absence.
pub fn select_overlays(toggles: OverlayToggles, root: &Path) -> OverlayChain {
    let mut chain = OverlayChain::base_only();
    let wanted = [
        (Overlay::Observability, toggles.observability),
        (Overlay::Prebuilt, toggles.prebuilt),
        (Overlay::ArchFallback, toggles.arch_fallback.needed()),
    ];
    for (overlay, enabled) in wanted {
        if !enabled {
            continue;
        }
        let file = root.join(overlay.file_name());
        if file.is_file() {
            chain.overlays.push(overlay);
        } else if overlay == Overlay::ArchFallback {
            warn!(
                file = %file.display(),
                "Architecture fallback needed but overlay file is missing"
            );
        } else {
            debug!(overlay = %overlay, file = %file.display(), "Overlay file absent; skipping");
        }
    }
    chain
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn root_with(files: &[Overlay]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        for overlay in files {
            fs::write(dir.path().join(overlay.file_name()), "services: {}\n")
                .expect("write overlay");
        }
        dir
    }

    const ALL: [Overlay; 4] = [
        Overlay::Base,
        Overlay::Observability,
        Overlay::Prebuilt,
        Overlay::ArchFallback,
    ];

    #[test]
    fn everything_enabled_keeps_precedence_order() {
        let root = root_with(&ALL);
        let chain = select_overlays(
            OverlayToggles {
                observability: true,
                prebuilt: true,
                arch_fallback: ArchFallback::On,
            },
            root.path(),
        );
        assert_eq!(chain.overlays(), &ALL);
        assert_eq!(
            chain.to_string(),
            "base > observability > prebuilt > arch-fallback"
        );
    }

    #[test]
    fn base_is_always_first_even_with_nothing_on_disk() {
        let root = root_with(&[]);
        let chain = select_overlays(
            OverlayToggles {
                observability: true,
                prebuilt: true,
                arch_fallback: ArchFallback::On,
            },
            root.path(),
        );
        assert_eq!(chain, OverlayChain::base_only());
    }

    #[test]
    fn disabled_toggles_are_skipped_even_when_files_exist() {
        let root = root_with(&ALL);
        let chain = select_overlays(
            OverlayToggles {
                observability: false,
                prebuilt: true,
                arch_fallback: ArchFallback::Off,
            },
            root.path(),
        );
        assert_eq!(chain.overlays(), &[Overlay::Base, Overlay::Prebuilt]);
        let files = chain.files(root.path());
        assert!(files[0].ends_with("docker-compose.yml"));
        assert!(files[1].ends_with("docker-compose.prebuilt.yml"));
    }

    #[test]
    fn arch_fallback_is_last_when_needed() {
        let root = root_with(&ALL);
        let chain = select_overlays(
            OverlayToggles {
                observability: true,
                prebuilt: false,
                arch_fallback: ArchFallback::On,
            },
            root.path(),
        );
        assert_eq!(chain.overlays().last(), Some(&Overlay::ArchFallback));
        assert!(!chain.contains(Overlay::Prebuilt));
    }
}
