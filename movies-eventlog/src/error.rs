//! Event log errors

use movies_domain::PartitionId;
use movies_exec::ExecError;
use rdkafka::error::KafkaError;

/// Event log errors
#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("Partition not assigned to this member: {0}")]
    NotAssigned(PartitionId),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<EventLogError> for ExecError {
    fn from(err: EventLogError) -> Self {
        ExecError::Log(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EventLogError>;
