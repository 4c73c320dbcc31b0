//! Hostpath Provisioner - dynamic hostPath volume provisioning daemon
//!
//! The daemon provides:
//! - Leader election across replicas sharing a cluster store
//! - Provisioning of one directory per unbound claim under `--root`
//! - Reclamation of released volumes created by this node

use clap::Parser;
use hostpath_provisioner::{ClaimSeed, Daemon, DaemonConfig, DaemonResult};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hostpath provisioner CLI
#[derive(Parser)]
#[command(name = "hostpath-provisioner")]
#[command(about = "Dynamic hostPath volume provisioner", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "KHP_CONFIG")]
    config: Option<String>,

    /// Name of the node this instance runs on
    #[arg(long, env = "KHP_NODE_NAME")]
    node_name: Option<String>,

    /// Directory under which volumes are created
    #[arg(long, env = "KHP_ROOT")]
    root: Option<PathBuf>,

    /// Workers per queue
    #[arg(long, env = "KHP_WORKERS")]
    workers: Option<usize>,

    /// Run as the only instance, without leader election
    #[arg(long, env = "KHP_NO_ELECTION")]
    no_election: bool,

    /// Claim to register at startup, repeatable
    #[arg(long = "claim", value_name = "NAMESPACE/NAME=SIZE")]
    claims: Vec<ClaimSeed>,

    /// Log level
    #[arg(long, env = "KHP_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "KHP_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("hostpath-provisioner: {}", e);
            tracing::error!(error = %e, "Exiting");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> DaemonResult<()> {
    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    // Override with CLI args
    if let Some(node_name) = cli.node_name {
        config.node_name = node_name;
    }
    if let Some(root) = cli.root {
        config.root = root;
    }
    if let Some(workers) = cli.workers {
        config.controller.workers = workers;
    }
    if cli.no_election {
        config.controller.election.enabled = false;
    }
    config.claims.extend(cli.claims);
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    init_tracing(&config.logging.level, config.logging.json);
    reset_umask();

    let daemon = Daemon::new(config).await?;
    daemon.run().await
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Created directories get exactly the requested mode
#[cfg(unix)]
fn reset_umask() {
    // SAFETY: umask only swaps the process file mode mask
    unsafe {
        libc::umask(0);
    }
}

#[cfg(not(unix))]
fn reset_umask() {}
