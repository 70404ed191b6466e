//! Library outbox relay
//!
//! Long-running process that publishes committed library events from the
//! PostgreSQL outbox to NATS JetStream.

mod startup;

use std::path::PathBuf;

use clap::Parser;
use library_shared::config::{ConfigLoader, LoggingConfig};

/// CLI arguments for library-relay
#[derive(clap::Parser, Debug)]
#[command(name = "library-relay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Relays committed library events from the outbox to NATS", long_about = None)]
struct Args {
    /// Load environment variables from this file before reading configuration
    #[arg(short, long)]
    env_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::new(args.env_file).load_server_config()?;
    setup_logging(&config.logging, args.debug)?;

    startup::run(config).await
}

/// RUST_LOG wins over the configured level; `--debug` wins over both.
fn setup_logging(logging: &LoggingConfig, debug: bool) -> anyhow::Result<()> {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let env_filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))
}
