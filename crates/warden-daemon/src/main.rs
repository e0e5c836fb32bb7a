//! Warden background daemon
//!
//! Runs the orchestrator behind a single JSON-lines port on stdin/stdout.
//! Logs go to stderr.

mod stdio;

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use warden_background::{Background, BackgroundConfig, InMemoryBalanceService, LocalStepBuilder, Port};
use warden_core::MemoryKeyring;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Parser)]
#[command(name = "warden-daemon")]
#[command(about = "Warden wallet background orchestrator over stdio", long_about = None)]
struct Cli {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides config)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Keyring password
    #[arg(long, env = "WARDEN_PASSWORD", hide_env_values = true)]
    password: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(format: LogFormat, level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.with_file(true).with_line_number(true).json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format, &cli.log_level);

    let mut config = BackgroundConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database_path = Some(db);
    }
    let capacity = config.port_channel_capacity;

    let keyring = Arc::new(MemoryKeyring::new(&cli.password)?);
    let balances = Arc::new(InMemoryBalanceService::new());
    let builder = Arc::new(LocalStepBuilder::new(keyring.clone()));
    let background = Background::new(config, keyring, balances, builder).await?;

    let (port, outbound) = Port::with_id("stdio", capacity);
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);

    let writer = tokio::spawn(stdio::write_messages(tokio::io::stdout(), outbound));
    let reader = tokio::spawn(stdio::read_requests(
        tokio::io::BufReader::new(tokio::io::stdin()),
        inbound_tx,
    ));
    let server = tokio::spawn(warden_background::serve_port(
        background.clone(),
        port.clone(),
        inbound_rx,
    ));

    info!(event = "daemon_ready", "Listening on stdio");

    tokio::select! {
        result = reader => match result {
            Ok(Ok(())) => info!("Input closed"),
            Ok(Err(e)) => warn!("Input failed: {}", e),
            Err(e) => warn!("Reader task failed: {}", e),
        },
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    port.disconnect();
    if let Err(e) = server.await {
        warn!("Port server task failed: {}", e);
    }
    background.shutdown();
    drop(port);
    drop(background);

    match writer.await {
        Ok(result) => result?,
        Err(e) => warn!("Writer task failed: {}", e),
    }
    Ok(())
}
