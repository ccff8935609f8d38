//! Commit controller: couples offset commits to delivery success.
//!
//! Per message:
//!
//! ```text
//! received ─┬─> filtered-out                      (no commit)
//!           ├─> delivered(success) ─> committed
//!           └─> delivered(failure) ─> pending-retry (rewound, redelivered)
//! ```
//!
//! Commits are never batched: each delivered message is committed before
//! the next one is handled.

use tracing::{debug, warn};

use movies_domain::{DeliveryOutcome, EventRecord};

use crate::error::ExecResult;
use crate::ports::PartitionLog;

/// Terminal state of one message for this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Belongs to another diverted worker; offset untouched
    FilteredOut,
    /// Delivered and committed
    Committed,
    /// Not committed; the log will hand it out again
    PendingRetry {
        /// Status of the failed attempt, if the registry answered
        http_status: Option<u16>,
    },
}

impl Settlement {
    /// Whether the record's offset was committed.
    pub fn is_committed(&self) -> bool {
        matches!(self, Settlement::Committed)
    }
}

/// Applies the commit rules to a partition log.
pub struct CommitController;

impl CommitController {
    /// Settle a record that the divert filter rejected.
    pub fn filter_out(record: &EventRecord) -> Settlement {
        debug!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            "Not processing message, it belongs to a diverted worker"
        );
        Settlement::FilteredOut
    }

    /// Settle a delivered record.
    ///
    /// Success commits the record. Failure, or a failed commit, rewinds the
    /// partition to the record so it is redelivered.
    ///
    /// # Errors
    /// Returns the log error when the rewind itself fails; the caller must
    /// not handle further records of this partition.
    pub async fn settle<L: PartitionLog + ?Sized>(
        log: &mut L,
        record: &EventRecord,
        outcome: DeliveryOutcome,
    ) -> ExecResult<Settlement> {
        if let Some(receipt) = outcome.receipt_for(record) {
            match log.commit(&receipt).await {
                Ok(()) => {
                    debug!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        "Message committed"
                    );
                    return Ok(Settlement::Committed);
                }
                Err(e) => {
                    warn!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Commit failed, message will be redelivered"
                    );
                }
            }
        }

        log.rewind(record.offset).await?;
        Ok(Settlement::PendingRetry {
            http_status: outcome.http_status,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use async_trait::async_trait;
    use movies_domain::{DeliveryReceipt, PartitionId};

    struct RecordingLog {
        partition: PartitionId,
        commits: Vec<i64>,
        rewinds: Vec<i64>,
        fail_commit: bool,
    }

    impl RecordingLog {
        fn new() -> Self {
            Self {
                partition: PartitionId::new("rentals", 0),
                commits: Vec::new(),
                rewinds: Vec::new(),
                fail_commit: false,
            }
        }
    }

    #[async_trait]
    impl PartitionLog for RecordingLog {
        fn partition(&self) -> &PartitionId {
            &self.partition
        }

        async fn next_record(&mut self) -> Option<ExecResult<EventRecord>> {
            None
        }

        async fn commit(&mut self, receipt: &DeliveryReceipt) -> ExecResult<()> {
            if self.fail_commit {
                return Err(ExecError::Commit("partition revoked".into()));
            }
            self.commits.push(receipt.commit_offset());
            Ok(())
        }

        async fn rewind(&mut self, offset: i64) -> ExecResult<()> {
            self.rewinds.push(offset);
            Ok(())
        }
    }

    fn record(offset: i64) -> EventRecord {
        EventRecord::new("rentals", 0, offset, "9.99").with_key("42")
    }

    #[tokio::test]
    async fn test_success_commits_next_offset() {
        let mut log = RecordingLog::new();

        let settlement =
            CommitController::settle(&mut log, &record(5), DeliveryOutcome::success(Some(200)))
                .await
                .unwrap();

        assert_eq!(settlement, Settlement::Committed);
        assert_eq!(log.commits, vec![6]);
        assert!(log.rewinds.is_empty());
    }

    #[tokio::test]
    async fn test_failure_rewinds_without_commit() {
        let mut log = RecordingLog::new();

        let settlement =
            CommitController::settle(&mut log, &record(5), DeliveryOutcome::rejected(503))
                .await
                .unwrap();

        assert_eq!(settlement, Settlement::PendingRetry { http_status: Some(503) });
        assert!(log.commits.is_empty());
        assert_eq!(log.rewinds, vec![5]);
    }

    #[tokio::test]
    async fn test_commit_error_becomes_pending_retry() {
        let mut log = RecordingLog { fail_commit: true, ..RecordingLog::new() };

        let settlement =
            CommitController::settle(&mut log, &record(9), DeliveryOutcome::success(Some(200)))
                .await
                .unwrap();

        assert!(!settlement.is_committed());
        assert_eq!(log.rewinds, vec![9]);
    }

    #[test]
    fn test_filter_out_touches_nothing() {
        assert_eq!(CommitController::filter_out(&record(1)), Settlement::FilteredOut);
    }
}
