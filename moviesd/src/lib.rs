//! Movies Relay Worker Library
//!
//! Relays `rentals` and `returns` records from Kafka to the rentals
//! registry, committing each record only after the registry accepted it.
//!
//! # Architecture
//!
//! ```text
//! Kafka group → Partition Router → Partition Lane (one per partition)
//!                                      │
//!                  decode → divert filter → DeliveryExecutor → RegistryPort
//!                                      │
//!                              CommitController → commit / rewind
//! ```
//!
//! # Components
//!
//! - **Daemon**: Wires configuration, startup barrier, router and probe server
//! - **Partition Router**: Follows group assignment, one lane per partition
//! - **Partition Lane**: Sequential decode/filter/deliver/commit loop
//! - **Processed Counter**: Committed-message count, reported at shutdown
//! - **Metrics / Probe**: Prometheus metrics and health endpoint
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use moviesd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let processed = Daemon::new(config).run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod counter;
pub mod daemon;
pub mod error;
pub mod lane;
pub mod metrics;
pub mod probe;
pub mod router;
pub mod startup;

// Re-exports for convenience
pub use config::{Config, DeliveryTarget, KafkaConfig, ProbeConfig, RegistryConfig, RelayConfig};
pub use counter::ProcessedCounter;
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use lane::{LaneContext, PartitionLane};
pub use metrics::{RecordResult, RelayMetrics};
pub use router::PartitionRouter;
