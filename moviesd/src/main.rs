//! Movies Relay Worker
//!
//! Consumes `rentals` and `returns` and keeps the rentals registry in sync.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration
//! cargo run -p moviesd
//!
//! # Diverted worker in a developer namespace
//! KUBERNETES_NAMESPACE=cindy OKTETO_DIVERTED_ENVIRONMENT=cindy cargo run -p moviesd
//! ```
//!
//! # Environment Variables
//!
//! - `KAFKA_BROKERS`: Bootstrap brokers (default: kafka:9092)
//! - `KUBERNETES_NAMESPACE`: Consumer group suffix (default: default)
//! - `OKTETO_DIVERTED_ENVIRONMENT`: Diversion scope (default: empty, primary)
//! - `REGISTRY_URL`: Rentals registry (default: http://api:8080)
//! - `WORKER_PROBE_PORT`: Health/metrics port (default: disabled)
//! - `RUST_LOG`: Log filter (default: moviesd=info plus the relay crates)

use moviesd::{Config, Daemon};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LOG_FILTER: &str =
    "moviesd=info,movies_exec=info,movies_eventlog=info,movies_connectors=info,movies_db=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Create and run daemon
    if let Err(e) = Daemon::new(config).run().await {
        error!(error = %e, "Worker stopped with a fatal error");
        return Err(e.into());
    }

    Ok(())
}
