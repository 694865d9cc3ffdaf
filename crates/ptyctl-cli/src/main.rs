//! ptyctl - run shell commands on a pseudo-terminal under remote control.
//!
//! `ptyctl serve` speaks the JSON-lines protocol on stdin/stdout: one command
//! object per input line, one event object per output line. `ptyctl run` is a
//! one-shot wrapper that streams the command's terminal output and exits with
//! its status.

mod oneshot;
mod serve;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ptyctl_core::{PumpStrategy, SupervisorConfig};
use ptyctl_proto::Theme;
use tracing::{debug, error};

/// ptyctl - PTY-backed process supervisor
#[derive(Parser, Debug)]
#[command(name = "ptyctl", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    // ─────────────────────────────────────────────────────────────────────────
    // Global options (available for all subcommands)
    // ─────────────────────────────────────────────────────────────────────────
    /// Path to configuration file
    #[arg(short, long, default_value = "ptyctl.yml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// How PTY output is read (overrides the configuration file)
    #[arg(long, value_enum, global = true)]
    strategy: Option<StrategyArg>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve one session over JSON lines on stdin/stdout
    Serve(ServeArgs),

    /// Run a command once, streaming its output
    Run(RunArgs),
}

/// Arguments for the serve subcommand.
#[derive(Parser, Debug)]
struct ServeArgs {
    /// Shell command the session executes
    #[arg(long)]
    command: String,

    /// Working directory for the command
    #[arg(long, default_value = ".")]
    cwd: PathBuf,

    /// Display theme mirrored to the client (dark, light)
    #[arg(long, default_value_t = Theme::Dark)]
    theme: Theme,

    /// Execute immediately instead of waiting for an execute message
    #[arg(long)]
    auto_run: bool,
}

/// Arguments for the run subcommand.
#[derive(Parser, Debug)]
struct RunArgs {
    /// Shell command to run
    #[arg(value_name = "COMMAND")]
    command: String,

    /// Working directory for the command
    #[arg(long, default_value = ".")]
    cwd: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Auto,
    Readiness,
    Blocking,
}

impl From<StrategyArg> for PumpStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Auto => PumpStrategy::Auto,
            StrategyArg::Readiness => PumpStrategy::Readiness,
            StrategyArg::Blocking => PumpStrategy::Blocking,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "ptyctl failed");
            eprintln!("Error: {e:#}");
            1
        }
    };

    // A blocked stdin reader would otherwise hold up runtime shutdown.
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let supervisor = load_supervisor_config(&cli.config, cli.strategy)?;
    match cli.command {
        Commands::Serve(args) => serve::serve(supervisor, args).await.map(|()| 0),
        Commands::Run(args) => oneshot::run(supervisor, args).await,
    }
}

/// Logs go to stderr (stdout carries the protocol), or to `PTYCTL_LOG_FILE`.
fn init_logging(verbose: bool) {
    let filter = || {
        if verbose {
            tracing_subscriber::EnvFilter::new("debug")
        } else {
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        }
    };

    if let Ok(path) = std::env::var("PTYCTL_LOG_FILE")
        && let Ok(file) = std::fs::File::create(&path)
    {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the supervisor configuration and applies command-line overrides.
fn load_supervisor_config(path: &Path, strategy: Option<StrategyArg>) -> Result<SupervisorConfig> {
    let mut config = SupervisorConfig::load_or_default(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?
        .with_env_overrides();
    if let Some(strategy) = strategy {
        config.strategy = strategy.into();
    }
    debug!(?config, "Supervisor configuration");
    Ok(config)
}
