//! Event Log Adapters
//!
//! Implements the relay's `ConsumerGroup` and `PartitionLog` ports:
//! - Kafka consumer group (manual commits, one split queue per partition)
//! - In-memory log for tests and local runs
//!
//! # Usage
//!
//! ```rust,no_run
//! use movies_eventlog::{KafkaConsumerGroup, KafkaGroupConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = KafkaGroupConfig::new("kafka:9092", "default");
//! let mut group = KafkaConsumerGroup::create(&config)?;
//! group.probe().await?;
//! group.subscribe()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod kafka;
pub mod memory;

pub use error::EventLogError;
pub use kafka::{KafkaConsumerGroup, KafkaGroupConfig, KafkaPartitionLog};
pub use memory::{MembershipHandle, MemoryConsumerGroup, MemoryEventLog, MemoryPartitionLog};
