//! # Callwire Server
//!
//! Signaling relay for browser-to-browser calls. Endpoints connect over a
//! WebSocket, see who else is online and exchange call setup messages through
//! the relay; media flows directly between peers.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! callwire
//!
//! # Run with custom config
//! callwire --config /path/to/callwire.toml
//!
//! # Run with environment variables
//! CALLWIRE_PORT=8080 CALLWIRE_HOST=0.0.0.0 callwire
//!
//! # Terminate TLS in-process
//! callwire --tls-cert cert.pem --tls-key key.pem
//! ```

mod cli;
mod config;
mod handlers;
mod metrics;
mod tls;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "callwire=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = cli::Cli::parse();

    // Load configuration
    let mut config = config::Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    tracing::info!("Starting Callwire server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
