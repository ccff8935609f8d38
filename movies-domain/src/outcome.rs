//! Delivery outcomes and commit receipts.

use crate::record::{EventRecord, PartitionId};

/// Result of one downstream delivery attempt.
///
/// Produced per message and consumed only by the commit step; never
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Whether the registry accepted the call
    pub succeeded: bool,
    /// HTTP status, when the call reached the registry over HTTP
    pub http_status: Option<u16>,
}

impl DeliveryOutcome {
    /// Registry accepted the call.
    pub fn success(http_status: Option<u16>) -> Self {
        Self {
            succeeded: true,
            http_status,
        }
    }

    /// Registry answered with a status other than success.
    pub fn rejected(http_status: u16) -> Self {
        Self {
            succeeded: false,
            http_status: Some(http_status),
        }
    }

    /// The call never produced a response.
    pub fn transport_failure() -> Self {
        Self {
            succeeded: false,
            http_status: None,
        }
    }

    /// Receipt authorising a commit of `record`, only for successful outcomes.
    pub fn receipt_for(&self, record: &EventRecord) -> Option<DeliveryReceipt> {
        self.succeeded.then(|| DeliveryReceipt {
            partition: record.partition_id(),
            offset: record.offset,
        })
    }
}

/// Proof that the record at a position was delivered.
///
/// Only obtainable from a successful [`DeliveryOutcome`], so an offset can
/// never be committed for a message that was not delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    partition: PartitionId,
    offset: i64,
}

impl DeliveryReceipt {
    /// Partition of the delivered record.
    pub fn partition(&self) -> &PartitionId {
        &self.partition
    }

    /// Offset of the delivered record.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Offset to commit: the next position to read.
    pub fn commit_offset(&self) -> i64 {
        self.offset + 1
    }
}
