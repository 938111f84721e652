use std::path::Path;

use crate::config::DeployConfig;

/// Derive a stable compose project name from the deploy root directory.
pub fn derive_compose_project_name(deploy_root: &Path) -> String {
    let dir_name = deploy_root
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default();

    // Slugify: lowercase, non-alnum -> '-'.
    let mut slug = dir_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>();

    // Collapse multiple '-'.
    while slug.contains("--") {
        slug = slug.replace("--", "-");
    }
    slug = slug.trim_matches('-').to_string();

    if slug.is_empty() || slug == "deploy" || slug == "worqlo" {
        "worqlo".to_string()
    } else {
        format!("worqlo-{slug}")
    }
}

pub fn resolve_project_name(config: &DeployConfig) -> String {
    if let Some(p) = &config.project_name {
        return p.clone();
    }
    derive_compose_project_name(&config.deploy_root)
}
