//! Movies Relay Execution Layer
//!
//! Delivery of decoded commands to the rental registry, and the commit
//! rules that tie event-log progress to delivery success.
//!
//! # Architecture
//!
//! ```text
//! Command → DeliveryExecutor → RegistryPort → Outcome → CommitController → PartitionLog
//! ```
//!
//! # Components
//!
//! - **Ports**: Traits for the registry and the event log (consumer group, partition reader)
//! - **Executor**: Turns commands into registry calls and classifies the outcome
//! - **Commit**: Commits on success, rewinds on failure (at-least-once)
//! - **Stub**: Test registry
//!
//! # Example
//!
//! ```rust,ignore
//! use movies_exec::{CommitController, DeliveryExecutor, StubRegistry};
//! use std::sync::Arc;
//!
//! let executor = DeliveryExecutor::new(Arc::new(StubRegistry::new()));
//! let outcome = executor.deliver(&command, record.baggage()).await;
//! let settlement = CommitController::settle(&mut log, &record, outcome).await?;
//! ```

#![warn(clippy::all)]

pub mod commit;
pub mod error;
pub mod executor;
pub mod ports;
pub mod stub;

// Re-exports for convenience
pub use commit::{CommitController, Settlement};
pub use error::{ExecError, ExecResult};
pub use executor::DeliveryExecutor;
pub use ports::{
    ConsumerGroup, MembershipChange, PartitionLog, RegistryAck, RegistryPort, RentalUpsert,
};
pub use stub::{RegistryCall, StubRegistry, StubResponse};
