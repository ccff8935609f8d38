//! Daemon error types.

use movies_domain::{DomainError, PartitionId};
use movies_eventlog::EventLogError;
use movies_exec::ExecError;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Execution error
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Event log error
    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),

    /// A partition handed out a record behind its read position
    #[error("Order violation on {partition}: offset {offset} after {expected}")]
    OrderViolation {
        partition: PartitionId,
        offset: i64,
        expected: i64,
    },

    /// Startup dependency could not be brought up
    #[error("Startup error: {0}")]
    Startup(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Probe server I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<prometheus::Error> for DaemonError {
    fn from(err: prometheus::Error) -> Self {
        DaemonError::Metrics(err.to_string())
    }
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
