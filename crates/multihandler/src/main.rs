//! Multihandler
//!
//! Multi-session TCP listener with an interactive operator console.

use std::path::{Path, PathBuf};

use clap::Parser;
use multihandler::config::Config;
use multihandler::orchestrator::Orchestrator;
use tokio::io::BufReader;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Multihandler - accept connections and drive them from one console.
#[derive(Parser, Debug)]
#[command(name = "multihandler")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to listen on
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides, then command line flags
    config.apply_env_overrides();
    if let Some(host) = cli.host {
        config.listener.host = host;
    }
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    if let Some(log_file) = cli.log_file {
        config.logging.log_file = Some(log_file);
    }
    if cli.verbose {
        config.logging.log_level = "debug".to_string();
    }

    // Validate configuration
    config.validate()?;

    // Initialize tracing; the guard flushes the log file on exit
    let _log_guard = init_tracing(&config.logging.log_level, config.logging.log_file.as_deref())?;

    tracing::info!("Multihandler starting...");

    let mut orchestrator = Orchestrator::new(config);
    if let Err(e) = orchestrator.start().await {
        tracing::error!(error = %e, "Startup failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    if let Some(addr) = orchestrator.local_addr() {
        println!("Listening on {}", addr);
    }

    let result = orchestrator
        .run_console(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await;

    orchestrator.stop().await?;
    result
}

/// Installs the global tracing subscriber.
///
/// Logs go to stderr unless a log file is configured, so the console's
/// stdout only carries operator output.
fn init_tracing(level: &str, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::new(level.to_lowercase());

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| anyhow::anyhow!("Failed to open log file {}: {}", path.display(), e))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}
