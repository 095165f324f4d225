//! kiln CLI.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kiln::config::Config;
use kiln::ops::OpError;

mod cmd;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about = "kiln - source-based package manager")]
pub struct Cli {
    /// Force the operation
    #[arg(short, long, global = true)]
    force: bool,

    /// Assume yes to all prompts
    #[arg(short = 'y', long = "yes", global = true)]
    assume_yes: bool,

    /// Skip dependency resolution
    #[arg(short = 'n', long = "no-deps", global = true)]
    skip_deps: bool,

    /// Number of parallel build jobs
    #[arg(short = 'j', long, global = true)]
    parallel: Option<u32>,

    /// Alternative root directory
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Alternative config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a package from source
    Install {
        /// Package name
        package: String,
    },
    /// Remove an installed package
    Remove {
        /// Package name
        package: String,
    },
    /// Update a package, or all installed packages
    Update {
        /// Package name (all installed packages if omitted)
        package: Option<String>,
    },
    /// List installed packages
    List {
        /// Only show packages matching this pattern
        pattern: Option<String>,
    },
    /// Show package information
    Query {
        /// Package name
        package: String,
    },
    /// Search the catalog
    Search {
        /// Search pattern
        pattern: String,
    },
    /// Synchronize the package catalog
    Sync,
    /// Remove cached sources and build workspaces
    Clean,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cancel = Arc::new(AtomicBool::new(false));
    spawn_signal_listener(cancel.clone());

    match run(cli, cancel.clone()).await {
        Ok(()) => {
            if cancel.load(Ordering::Relaxed) {
                ExitCode::from(kiln::EXIT_INTERRUPTED as u8)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            if matches!(e.downcast_ref::<OpError>(), Some(OpError::Cancelled)) {
                tracing::warn!("operation interrupted");
                ExitCode::from(kiln::EXIT_INTERRUPTED as u8)
            } else {
                tracing::error!("{e:#}");
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli, cancel: Arc<AtomicBool>) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref(), cli.root.as_deref())?;
    if cli.force {
        config.force_mode = true;
    }
    if cli.assume_yes {
        config.assume_yes = true;
    }
    if cli.skip_deps {
        config.skip_dependencies = true;
    }
    if let Some(jobs) = cli.parallel {
        if jobs == 0 || jobs > 128 {
            anyhow::bail!("invalid parallel jobs count: {jobs}");
        }
        config.parallel_jobs = jobs;
    }

    match cli.command {
        Commands::Install { package } => cmd::install::run(config, cancel, &package).await,
        Commands::Remove { package } => cmd::remove::run(config, cancel, &package).await,
        Commands::Update { package } => cmd::update::run(config, cancel, package.as_deref()).await,
        Commands::List { pattern } => cmd::list::run(&config, pattern.as_deref()),
        Commands::Query { package } => cmd::query::run(&config, &package),
        Commands::Search { pattern } => cmd::search::run(&config, &pattern),
        Commands::Sync => cmd::sync::run(config, cancel).await,
        Commands::Clean => cmd::clean::run(config, cancel).await,
    }
}

/// Watch for SIGINT/SIGTERM and raise the cancellation flag. In-flight
/// phases finish; the orchestrator checks the flag between phases.
fn spawn_signal_listener(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let (Ok(mut interrupt), Ok(mut terminate)) = (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) else {
            return;
        };
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        tracing::warn!("received interrupt, cleaning up after the current phase");
        cancel.store(true, Ordering::Relaxed);
    });
}
