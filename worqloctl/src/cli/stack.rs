//! Stack control: compose down/up with the current overlay chain.
//!
//! Configuration changes are applied with a full stop-then-start rather than
//! an in-place reload. Some runtimes keep serving the old contents of a
//! bind-mounted file until the container is recreated.

use std::path::PathBuf;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::{
    cli::{
        specs::{
            CommandRunner, compose_down_spec, compose_running_services_spec,
            compose_up_spec, runtime_info_spec,
        },
        utils::resolve_project_name,
    },
    config::DeployConfig,
    error::DeployError,
    overlay::OverlayChain,
    retry::{Polled, RetryPolicy},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackAction {
    Up,
    Down,
    Restart,
}

#[derive(Debug, Clone)]
/// Summary emitted after stack actions.
pub struct StackOutcome {
    pub action: StackAction,
    pub project_name: String,
    pub compose_files: Vec<PathBuf>,
    pub overlays: OverlayChain,
}

/// Container runtime present on `PATH` and its daemon answering.
pub async fn ensure_prerequisites(
    config: &DeployConfig,
    runner: &dyn CommandRunner,
) -> Result<(), DeployError> {
    let program = config.compose_program.as_str();
    if runner.locate(program).is_none() {
        return Err(DeployError::PrerequisiteMissing {
            what: program.to_string(),
            guidance: "Install Docker Engine with the compose plugin: \
                       https://docs.docker.com/engine/install/"
                .to_string(),
        });
    }

    let info = runner.run(&runtime_info_spec(config)).await;
    match info {
        Ok(out) if out.success => Ok(()),
        _ => Err(DeployError::PrerequisiteMissing {
            what: format!("the {program} daemon"),
            guidance: format!(
                "Start it (for example `sudo systemctl start {program}`) and make sure your user may access it."
            ),
        }),
    }
}

pub async fn stack_up(
    config: &DeployConfig,
    chain: &OverlayChain,
    runner: &dyn CommandRunner,
) -> Result<StackOutcome> {
    let project_name = resolve_project_name(config);
    info!(project = %project_name, overlays = %chain, "Starting stack");
    let up = compose_up_spec(config, chain, &project_name, false);
    let out = runner.run(&up).await?;
    if !out.success {
        bail!(
            "compose up failed ({}) - see output above for details",
            out.status_text()
        );
    }
    Ok(outcome(StackAction::Up, config, chain, project_name))
}

pub async fn stack_down(
    config: &DeployConfig,
    chain: &OverlayChain,
    runner: &dyn CommandRunner,
) -> Result<StackOutcome> {
    let project_name = resolve_project_name(config);
    info!(project = %project_name, "Stopping stack");
    let down = compose_down_spec(config, chain, &project_name);
    let out = runner.run(&down).await?;
    if !out.success {
        bail!("compose down failed ({})", out.status_text());
    }
    Ok(outcome(StackAction::Down, config, chain, project_name))
}

/// Full stop, then start, so every container is recreated with the current
/// env file and mounted configuration.
pub async fn restart_stack(
    config: &DeployConfig,
    chain: &OverlayChain,
    runner: &dyn CommandRunner,
) -> Result<StackOutcome> {
    stack_down(config, chain, runner).await?;
    let up = stack_up(config, chain, runner).await?;
    Ok(StackOutcome {
        action: StackAction::Restart,
        ..up
    })
}

/// Poll compose until every service in `services` reports running.
pub async fn wait_for_services(
    config: &DeployConfig,
    chain: &OverlayChain,
    runner: &dyn CommandRunner,
    services: &[&str],
    policy: &RetryPolicy,
) -> bool {
    let project_name = resolve_project_name(config);
    let spec = compose_running_services_spec(config, chain, &project_name);
    let spec = &spec;
    let polled = policy
        .poll("services", move |_| async move {
            match runner.run(spec).await {
                Ok(out) if out.success => {
                    let running: Vec<&str> =
                        out.stdout.lines().map(str::trim).collect();
                    services
                        .iter()
                        .all(|svc| running.contains(svc))
                        .then_some(())
                }
                _ => None,
            }
        })
        .await;
    if let Polled::Exhausted { attempts } = polled {
        warn!(
            services = services.join(","),
            attempts,
            "Services not running yet. Check status with: docker compose --project-name {project_name} ps"
        );
        return false;
    }
    true
}

fn outcome(
    action: StackAction,
    config: &DeployConfig,
    chain: &OverlayChain,
    project_name: String,
) -> StackOutcome {
    StackOutcome {
        action,
        project_name,
        compose_files: chain.files(&config.deploy_root),
        overlays: chain.clone(),
    }
}
