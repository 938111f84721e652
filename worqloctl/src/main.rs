use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use worqloctl::{
    ArchFallback, DeployConfig, HealthProbe, OverlayChain, RetryPolicy,
    cert::{
        CertPorts, CertificateManager, HttpPublicIp, PublicDnsResolver,
        SetupReport, SetupRequest, TerminalOperator,
    },
    cli::{
        self, ConfigureOptions, ConfigureReport, StackOptions,
        proxy::{ProxyToggles, ProxyUpdate, apply_proxy_profile},
        specs::{CommandRunner, SystemRunner, compose_status_spec},
        stack::{
            StackOutcome, ensure_prerequisites, restart_stack, stack_down,
            stack_up,
        },
        utils::resolve_project_name,
    },
    select_overlays,
};

#[derive(Parser)]
#[command(
    name = "worqloctl",
    version,
    about = "Worqlo deployment configuration and TLS lifecycle"
)]
struct Cli {
    /// Deployment checkout holding docker-compose.yml and .env
    #[arg(
        long,
        global = true,
        env = "WORQLO_DEPLOY_ROOT",
        default_value = "."
    )]
    deploy_root: PathBuf,
    /// Env file to read and update (default: <deploy-root>/.env)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Derive every access URL from one access point and write them to .env
    Configure {
        /// URL, domain or IP the stack is reached at (default: localhost)
        access_point: Option<String>,
        #[arg(long)]
        llm_provider: Option<String>,
    },
    /// TLS certificate lifecycle
    Cert {
        #[command(subcommand)]
        action: CertAction,
    },
    /// Bring the stack up, down, or restart it (docker compose)
    Stack {
        #[command(subcommand)]
        action: StackAction,
    },
    /// Print the compose overlay chain the stack commands would use
    Overlays {
        #[command(flatten)]
        stack: StackArgs,
    },
    /// Probe the health endpoint until healthy or out of attempts
    Health {
        /// Probe a single time
        #[arg(long)]
        once: bool,
    },
}

#[derive(Subcommand)]
enum CertAction {
    /// Validate DNS, obtain a certificate and switch the proxy to TLS
    Setup {
        domain: String,
        #[arg(long)]
        email: String,
        /// Skip confirmation prompts (accepts a DNS mismatch)
        #[arg(long, short = 'y')]
        yes: bool,
        /// Continue when DNS points at another address
        #[arg(long)]
        allow_dns_mismatch: bool,
        #[command(flatten)]
        stack: StackArgs,
    },
    /// Renew the certificate now, re-install it and reload the proxy
    Renew {
        domain: String,
        #[command(flatten)]
        stack: StackArgs,
    },
    /// Show the persisted certificate record
    Status,
    /// (Re)write the renewal script and print the cron line to install
    Schedule {
        domain: String,
        #[command(flatten)]
        stack: StackArgs,
    },
}

#[derive(Subcommand)]
enum StackAction {
    Up {
        #[command(flatten)]
        stack: StackArgs,
    },
    Down {
        #[command(flatten)]
        stack: StackArgs,
    },
    /// Full stop, then start
    Restart {
        #[command(flatten)]
        stack: StackArgs,
    },
    /// Show stack status (docker compose ps)
    Status {
        #[command(flatten)]
        stack: StackArgs,
    },
}

#[derive(Args, Clone)]
struct StackArgs {
    /// Include the observability overlay and proxy profile; `=false` turns
    /// it off (default: the saved setting)
    #[arg(
        long,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    observability: Option<bool>,
    /// Use pre-built images instead of local builds
    #[arg(long)]
    prebuilt: bool,
    #[arg(
        long,
        value_enum,
        default_value_t = ArchFallbackArg::Auto,
        help = "Architecture fallback overlay: on/off/auto (default: auto = Apple Silicon only)"
    )]
    arch_fallback: ArchFallbackArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum ArchFallbackArg {
    Auto,
    On,
    Off,
}

impl From<ArchFallbackArg> for ArchFallback {
    fn from(val: ArchFallbackArg) -> Self {
        match val {
            ArchFallbackArg::Auto => ArchFallback::Auto,
            ArchFallbackArg::On => ArchFallback::On,
            ArchFallbackArg::Off => ArchFallback::Off,
        }
    }
}

impl From<StackArgs> for StackOptions {
    fn from(args: StackArgs) -> Self {
        StackOptions {
            observability: args.observability,
            prebuilt: args.prebuilt,
            arch_fallback: args.arch_fallback.into(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = DeployConfig::load(&cli.deploy_root)?;
    if let Some(env_file) = cli.env_file {
        config.set_env_file(env_file);
    }

    // Dropping the command future on interrupt releases its guards.
    tokio::select! {
        res = run(cli.command, &config) => res,
        _ = tokio::signal::ctrl_c() => {
            bail!("interrupted; re-running the command is safe")
        }
    }
}

async fn run(command: Command, config: &DeployConfig) -> Result<()> {
    let runner = SystemRunner;
    match command {
        Command::Configure {
            access_point,
            llm_provider,
        } => {
            let report = cli::configure(
                config,
                &ConfigureOptions {
                    access_point,
                    llm_provider,
                },
            )?;
            print_configure_report(config, &report);
        }
        Command::Cert { action } => run_cert(action, config, &runner).await?,
        Command::Stack { action } => run_stack(action, config, &runner).await?,
        Command::Overlays { stack } => {
            let (_, chain) = resolve_stack(config, stack)?;
            println!("{chain}");
            for file in chain.files(&config.deploy_root) {
                println!("  {}", file.display());
            }
        }
        Command::Health { once } => {
            let policy = if once {
                RetryPolicy::new(1, Duration::ZERO)
            } else {
                config.health_policy
            };
            let report = HealthProbe::new(config.health_url.clone(), policy)?
                .wait_until_healthy()
                .await;
            if !report.is_healthy() {
                bail!("{} did not report healthy", config.health_url);
            }
            println!("Healthy: {}", config.health_url);
        }
    }
    Ok(())
}

async fn run_cert(
    action: CertAction,
    config: &DeployConfig,
    runner: &dyn CommandRunner,
) -> Result<()> {
    let store = config.env_store();
    let resolver = PublicDnsResolver::new(&config.dns_servers);
    let public_ip = HttpPublicIp::new(config.public_ip_endpoints.clone())?;
    let operator = TerminalOperator;
    let manager = CertificateManager::new(
        config,
        &store,
        CertPorts {
            runner,
            resolver: &resolver,
            public_ip: &public_ip,
            operator: &operator,
        },
    );

    match action {
        CertAction::Setup {
            domain,
            email,
            yes,
            allow_dns_mismatch,
            stack,
        } => {
            let (_, toggles) = StackOptions::from(stack).resolve(&store)?;
            let request = SetupRequest {
                domain,
                email,
                observability: toggles.observability,
                allow_dns_mismatch,
                assume_yes: yes,
                toggles,
            };
            let report = manager.setup(&request).await?;
            print_setup_report(config, &report);
        }
        CertAction::Renew { domain, stack } => {
            let (_, chain) = resolve_stack(config, stack)?;
            let record = manager.renew(&domain, &chain).await?;
            println!(
                "Renewed {} (status={}, fingerprint={})",
                record.domain,
                record.status,
                record.fingerprint.as_deref().unwrap_or("-")
            );
        }
        CertAction::Status => match manager.status()? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => println!(
                "No certificate record at {}",
                config.cert_record_path().display()
            ),
        },
        CertAction::Schedule { domain, stack } => {
            let (_, chain) = resolve_stack(config, stack)?;
            let schedule = manager.schedule_renewal(&chain, &domain)?;
            println!(
                "Renewal script {}: {}",
                if schedule.changed { "written" } else { "unchanged" },
                schedule.script.display()
            );
            println!("Install with `crontab -e`:");
            println!("  {}", schedule.cron_line);
        }
    }
    Ok(())
}

async fn run_stack(
    action: StackAction,
    config: &DeployConfig,
    runner: &dyn CommandRunner,
) -> Result<()> {
    match action {
        StackAction::Up { stack } => {
            ensure_prerequisites(config, runner).await?;
            let (proxy, chain) = resolve_stack(config, stack)?;
            let update = apply_proxy_profile(config, &config.env_store(), &proxy)?;
            let outcome = stack_up(config, &chain, runner).await?;
            print_stack_outcome("up", &outcome);
            print_proxy_update(config, &update);
            wait_healthy(config).await?;
        }
        StackAction::Down { stack } => {
            ensure_prerequisites(config, runner).await?;
            let (_, chain) = resolve_stack(config, stack)?;
            let outcome = stack_down(config, &chain, runner).await?;
            print_stack_outcome("down", &outcome);
        }
        StackAction::Restart { stack } => {
            ensure_prerequisites(config, runner).await?;
            let (proxy, chain) = resolve_stack(config, stack)?;
            let update = apply_proxy_profile(config, &config.env_store(), &proxy)?;
            let outcome = restart_stack(config, &chain, runner).await?;
            print_stack_outcome("restart", &outcome);
            print_proxy_update(config, &update);
            wait_healthy(config).await?;
        }
        StackAction::Status { stack } => {
            let (_, chain) = resolve_stack(config, stack)?;
            let spec = compose_status_spec(
                config,
                &chain,
                &resolve_project_name(config),
            );
            let out = runner.run(&spec).await?;
            if !out.success {
                bail!("compose ps failed ({})", out.status_text());
            }
        }
    }
    Ok(())
}

/// Flags over the toggles saved in the env file, and the overlay chain that
/// goes with them.
fn resolve_stack(
    config: &DeployConfig,
    stack: StackArgs,
) -> Result<(ProxyToggles, OverlayChain)> {
    let (proxy, toggles) =
        StackOptions::from(stack).resolve(&config.env_store())?;
    Ok((proxy, select_overlays(toggles, &config.deploy_root)))
}

async fn wait_healthy(config: &DeployConfig) -> Result<()> {
    HealthProbe::new(config.health_url.clone(), config.health_policy)?
        .wait_until_healthy()
        .await;
    Ok(())
}

fn print_configure_report(config: &DeployConfig, report: &ConfigureReport) {
    if report.outcome.skipped_missing_store {
        println!(
            "{} does not exist; nothing written",
            config.env_file.display()
        );
        return;
    }
    if report.created_store {
        println!("Created {}", config.env_file.display());
    }
    let d = &report.derived;
    println!();
    println!("  Access point: {}", d.base);
    println!("  App:          {}", d.app_url);
    println!("  API:          {}", d.api_url);
    println!("  WebSocket:    {}", d.ws_url);
    println!("  Object store: {}", d.s3_public_endpoint);
    println!("  CORS origins: {}", d.cors_origins.join(", "));
    println!("  Observability: {}", d.observability_url);
    println!(
        "  Proxy config: {}",
        report.proxy.selection.mount_path(&config.deploy_root)
    );
    if let Some(provider) = &report.llm_provider {
        println!("  LLM provider: {provider}");
    }
    println!();
    println!(
        "{} keys updated, {} unchanged in {}",
        report.outcome.appended.len() + report.outcome.replaced.len(),
        report.outcome.unchanged.len(),
        config.env_file.display()
    );
}

fn print_setup_report(config: &DeployConfig, report: &SetupReport) {
    println!();
    println!(
        "TLS configured for {} ({})",
        report.record.domain,
        report.selection.profile.file_name()
    );
    println!(
        "  Proxy config: {}",
        report.selection.mount_path(&config.deploy_root)
    );
    println!("  Certificate:  {}", report.record.cert_paths.fullchain.display());
    println!("  Overlays:     {}", report.chain);
    if !report.health.is_healthy() {
        println!("  Health:       not confirmed yet; services may still be starting");
    }
    println!();
    println!("Renewal script: {}", report.renewal.script.display());
    println!("Install with `crontab -e`:");
    println!("  {}", report.renewal.cron_line);
}

fn print_proxy_update(config: &DeployConfig, update: &ProxyUpdate) {
    println!(
        "Proxy profile {} ({})",
        update.selection.profile.file_name(),
        update.selection.mount_path(&config.deploy_root)
    );
}

fn print_stack_outcome(action: &str, outcome: &StackOutcome) {
    let files: Vec<String> = outcome
        .compose_files
        .iter()
        .map(|p: &PathBuf| p.display().to_string())
        .collect();
    println!(
        "Stack {} complete: project={}, overlays={}, files={}",
        action,
        outcome.project_name,
        outcome.overlays,
        files.join(", ")
    );
}
