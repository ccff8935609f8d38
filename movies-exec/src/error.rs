//! Execution layer error types.

use movies_domain::DomainError;
use thiserror::Error;

/// Errors that can occur while delivering commands or driving the event log.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Registry answered with a non-success status
    #[error("Registry rejected call with status {status}")]
    Rejected {
        /// HTTP status returned
        status: u16,
    },

    /// Registry could not be reached
    #[error("Registry transport error: {0}")]
    Transport(String),

    /// Registry did not answer in time
    #[error("Registry timeout: {0}")]
    Timeout(String),

    /// Local store error
    #[error("Store error: {0}")]
    Store(String),

    /// Event log read/seek error
    #[error("Event log error: {0}")]
    Log(String),

    /// Offset commit failed
    #[error("Commit failed: {0}")]
    Commit(String),

    /// Group membership or rebalance error
    #[error("Membership error: {0}")]
    Membership(String),

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl ExecError {
    /// HTTP status carried by the error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ExecError::Rejected { status } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
