//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Delivery target (registry API or local Postgres)
//! - Kafka consumer group
//! - Partition router and lanes
//! - Probe server (health, metrics)
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Start probe server (when configured)
//! 3. Wait for the delivery target (postgres) and the brokers
//! 4. Join the consumer group and route partitions
//! 5. Graceful shutdown on SIGINT/SIGTERM, then report the processed count

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use movies_connectors::RegistryRestClient;
use movies_domain::DivertFilter;
use movies_eventlog::KafkaConsumerGroup;
use movies_exec::{DeliveryExecutor, RegistryPort};

use crate::config::{Config, DeliveryTarget};
use crate::counter::ProcessedCounter;
use crate::error::{DaemonError, DaemonResult};
use crate::lane::LaneContext;
use crate::metrics::RelayMetrics;
use crate::probe::{start_probe_server, ProbeState};
use crate::router::PartitionRouter;
use crate::startup;

// =============================================================================
// Daemon
// =============================================================================

/// The movies relay worker.
pub struct Daemon {
    /// Configuration
    config: Config,
    /// Process-wide shutdown signal
    shutdown: CancellationToken,
    /// Processed-message counter
    counter: ProcessedCounter,
}

impl Daemon {
    /// Create a daemon.
    pub fn new(config: Config) -> Self {
        let counter = ProcessedCounter::starting_at(config.relay.message_count_start);
        Self {
            config,
            shutdown: CancellationToken::new(),
            counter,
        }
    }

    /// Token that stops the daemon when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT/SIGTERM) or a
    /// fatal error occurs. Returns the processed count.
    pub async fn run(self) -> DaemonResult<u64> {
        let scope = &self.config.relay.diverted_environment;
        info!(
            version = env!("CARGO_PKG_VERSION"),
            group_id = %self.config.kafka.group_id(),
            brokers = %self.config.kafka.brokers,
            diverted_environment = %scope,
            target = %self.config.registry.target,
            "Starting movies relay worker"
        );

        tokio::spawn(shutdown_on_signal(self.shutdown.clone()));

        let result = self.relay().await;
        let processed = self.counter.get();
        info!(processed, "Processed {} messages", processed);

        result.map(|()| processed)
    }

    async fn relay(&self) -> DaemonResult<()> {
        let metrics = Arc::new(RelayMetrics::new()?);
        start_probe_server(
            &self.config.probe,
            ProbeState {
                counter: self.counter.clone(),
                metrics: metrics.clone(),
            },
            self.shutdown.clone(),
        )
        .await?;

        let Some(registry) = self.delivery_target().await? else {
            return Ok(());
        };

        let mut group = KafkaConsumerGroup::create(&self.config.kafka.group_config())?;
        let ready = startup::wait_for(
            "kafka",
            self.config.relay.startup_retry,
            &self.shutdown,
            || group.probe(),
        )
        .await;
        if !ready {
            return Ok(());
        }
        group.subscribe()?;

        let ctx = LaneContext {
            executor: DeliveryExecutor::new(registry),
            filter: DivertFilter::new(self.config.relay.diverted_environment.clone()),
            counter: self.counter.clone(),
            metrics,
            redelivery_backoff: self.config.relay.redelivery_backoff,
        };

        PartitionRouter::new(group, ctx)
            .run(self.shutdown.clone())
            .await
            .map(|_| ())
    }

    /// Build the delivery target. `None` when shut down while waiting.
    async fn delivery_target(&self) -> DaemonResult<Option<Arc<dyn RegistryPort>>> {
        match self.config.registry.target {
            DeliveryTarget::Registry => {
                let client = RegistryRestClient::new(&self.config.registry.url)
                    .map_err(|e| DaemonError::Config(e.to_string()))?
                    .with_timeout(self.config.registry.timeout);
                Ok(Some(Arc::new(client)))
            }
            DeliveryTarget::Postgres => self.postgres_target().await,
        }
    }

    #[cfg(feature = "postgres")]
    async fn postgres_target(&self) -> DaemonResult<Option<Arc<dyn RegistryPort>>> {
        let url = self.config.registry.database_url.as_deref().ok_or_else(|| {
            DaemonError::Config("DATABASE_URL is required when DELIVERY_TARGET=postgres".into())
        })?;

        let pool =
            movies_db::connect_with_retry(url, self.config.relay.startup_retry, &self.shutdown)
                .await
                .map_err(|e| DaemonError::Startup(e.to_string()))?;

        Ok(pool.map(|pool| Arc::new(movies_db::PgRentalStore::new(pool)) as Arc<dyn RegistryPort>))
    }

    #[cfg(not(feature = "postgres"))]
    async fn postgres_target(&self) -> DaemonResult<Option<Arc<dyn RegistryPort>>> {
        Err(DaemonError::Config(
            "DELIVERY_TARGET=postgres requires the postgres feature".to_string(),
        ))
    }
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn shutdown_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = shutdown.cancelled() => return,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not install SIGTERM handler");
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = shutdown.cancelled() => return,
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = shutdown.cancelled() => return,
        }
    }

    shutdown.cancel();
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_before_brokers_reachable() {
        let mut config = Config::test();
        config.kafka.brokers = "127.0.0.1:9".to_string();
        config.relay.message_count_start = 3;
        let daemon = Daemon::new(config);
        daemon.shutdown_token().cancel();

        assert_eq!(daemon.run().await.unwrap(), 3);
    }

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn test_postgres_target_needs_feature() {
        let mut config = Config::test();
        config.registry.target = DeliveryTarget::Postgres;
        config.registry.database_url = Some("postgres://localhost/votes".to_string());

        let result = Daemon::new(config).run().await;

        assert!(matches!(result, Err(DaemonError::Config(_))));
    }

    #[tokio::test]
    async fn test_invalid_registry_url() {
        let mut config = Config::test();
        config.registry.url = "not a url".to_string();

        let result = Daemon::new(config).run().await;

        assert!(matches!(result, Err(DaemonError::Config(_))));
    }
}
