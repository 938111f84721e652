//! Command specs for the container runtime and compose, and the runner seam
//! that executes them.

pub mod certbot_spec;

use std::{fmt::Display, path::PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{config::DeployConfig, overlay::OverlayChain};

/// Abstract command representation so we can test without spawning processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub inherit_stdio: bool,
}

/// Display raw command string
impl Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CMD:`{}{} {}`\nENV:\n{}",
            self.cwd
                .clone()
                .map(|dir| {
                    let mut dir_str = dir.to_string_lossy().to_string();
                    if !dir_str.ends_with("/") {
                        dir_str.push('/')
                    }
                    dir_str
                })
                .unwrap_or_default(),
            self.program,
            self.args.join(" "),
            self.env
                .iter()
                .map(|v| format!("{}: {}", v.0, v.1))
                .collect::<Vec<String>>()
                .join("\n"),
        )
    }
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            inherit_stdio: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// `program args...` on one line, for logs and printed instructions.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub fn to_command(spec: &CommandSpec) -> Command {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);
    if !spec.env.is_empty() {
        cmd.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    if spec.inherit_stdio {
        cmd.stdin(std::process::Stdio::inherit());
        cmd.stdout(std::process::Stdio::inherit());
        cmd.stderr(std::process::Stdio::inherit());
    }
    cmd
}

pub async fn run_spec(spec: &CommandSpec) -> Result<std::process::ExitStatus> {
    let status = to_command(spec)
        .status()
        .await
        .with_context(|| format!("failed to run {}", spec.program))?;
    Ok(status)
}

pub async fn run_spec_with_output(
    spec: &CommandSpec,
) -> Result<(std::process::ExitStatus, String)> {
    let output = to_command(spec)
        .output()
        .await
        .with_context(|| format!("failed to run {}", spec.program))?;
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    Ok((output.status, stdout))
}

/// Exit information of a finished command. `stdout` is empty when the spec
/// inherited stdio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
        }
    }

    pub fn failed(code: i32) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
        }
    }

    pub fn status_text(&self) -> String {
        match self.code {
            Some(code) => format!("exit status: {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

impl From<(std::process::ExitStatus, String)> for CommandOutput {
    fn from((status, stdout): (std::process::ExitStatus, String)) -> Self {
        Self {
            success: status.success(),
            code: status.code(),
            stdout,
        }
    }
}

/// Executes command specs. Production code uses [`SystemRunner`]; tests
/// substitute a recorder.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Resolve `program` on `PATH`.
    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

/// Spawns real processes through `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!("Running {}", spec);
        if spec.inherit_stdio {
            let status = run_spec(spec).await?;
            Ok((status, String::new()).into())
        } else {
            Ok(run_spec_with_output(spec).await?.into())
        }
    }
}

/// `docker info`: fails when the runtime is installed but not running.
pub fn runtime_info_spec(config: &DeployConfig) -> CommandSpec {
    CommandSpec::new(&config.compose_program).arg("info")
}

pub fn compose_base_spec(
    config: &DeployConfig,
    chain: &OverlayChain,
    project_name: &str,
) -> CommandSpec {
    let mut spec = CommandSpec::new(&config.compose_program).arg("compose");
    spec.cwd = Some(config.deploy_root.clone());
    for file in chain.files(&config.deploy_root) {
        spec.args.push("-f".into());
        spec.args.push(file.display().to_string());
    }
    if config.env_file.exists() {
        spec.args.push("--env-file".into());
        spec.args.push(config.env_file.display().to_string());
    }
    spec.env
        .push(("COMPOSE_PROJECT_NAME".into(), project_name.into()));
    spec
}

pub fn compose_down_spec(
    config: &DeployConfig,
    chain: &OverlayChain,
    project_name: &str,
) -> CommandSpec {
    let mut spec = compose_base_spec(config, chain, project_name)
        .args(["down", "--remove-orphans"]);
    spec.inherit_stdio = true;
    spec
}

pub fn compose_up_spec(
    config: &DeployConfig,
    chain: &OverlayChain,
    project_name: &str,
    force_recreate: bool,
) -> CommandSpec {
    let mut spec =
        compose_base_spec(config, chain, project_name).args(["up", "-d"]);
    if force_recreate {
        spec.args.push("--force-recreate".into());
    }
    spec.inherit_stdio = true;
    spec
}

pub fn compose_running_services_spec(
    config: &DeployConfig,
    chain: &OverlayChain,
    project_name: &str,
) -> CommandSpec {
    compose_base_spec(config, chain, project_name).args([
        "ps",
        "--services",
        "--filter",
        "status=running",
    ])
}

/// `nginx -s reload` inside the proxy container: picks up new certificate
/// bytes without recreating the container.
pub fn proxy_reload_spec(
    config: &DeployConfig,
    chain: &OverlayChain,
    project_name: &str,
) -> CommandSpec {
    compose_base_spec(config, chain, project_name).args([
        "exec",
        "-T",
        config.proxy_service.as_str(),
        "nginx",
        "-s",
        "reload",
    ])
}

pub fn compose_status_spec(
    config: &DeployConfig,
    chain: &OverlayChain,
    project_name: &str,
) -> CommandSpec {
    let mut spec = compose_base_spec(config, chain, project_name).arg("ps");
    spec.inherit_stdio = true;
    spec
}
