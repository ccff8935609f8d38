//! Domain errors.

/// Errors raised while interpreting event records.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Record arrived from a topic the relay does not subscribe to
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),
}
