//! Partition lane: the sequential handler of one claimed partition.
//!
//! Per record, strictly in order:
//!
//! ```text
//! decode → divert filter → deliver → commit (or rewind)
//! ```
//!
//! The next record is not read until the current one is settled, so a
//! failed record blocks its partition until it is delivered. Other
//! partitions are unaffected.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use movies_domain::{Command, DivertFilter, EventRecord, PartitionId, PayloadShape};
use movies_exec::{CommitController, DeliveryExecutor, PartitionLog, Settlement};

use crate::counter::ProcessedCounter;
use crate::error::{DaemonError, DaemonResult};
use crate::metrics::{RecordResult, RelayMetrics};

// =============================================================================
// Lane Context
// =============================================================================

/// Everything a lane shares with its siblings.
#[derive(Clone)]
pub struct LaneContext {
    /// Registry caller
    pub executor: DeliveryExecutor,
    /// This worker's diversion scope
    pub filter: DivertFilter,
    /// Processed-message counter
    pub counter: ProcessedCounter,
    /// Metrics
    pub metrics: Arc<RelayMetrics>,
    /// Pause after a failed delivery
    pub redelivery_backoff: Duration,
}

// =============================================================================
// Partition Lane
// =============================================================================

/// Sequential handler for one partition.
pub struct PartitionLane<L: PartitionLog> {
    log: L,
    ctx: LaneContext,
    cancel: CancellationToken,
    /// Lowest offset the log may hand out next
    expected: Option<i64>,
}

impl<L: PartitionLog> PartitionLane<L> {
    /// Create a lane over a claimed partition.
    pub fn new(log: L, ctx: LaneContext, cancel: CancellationToken) -> Self {
        Self {
            log,
            ctx,
            cancel,
            expected: None,
        }
    }

    /// Partition this lane owns.
    pub fn partition(&self) -> &PartitionId {
        self.log.partition()
    }

    /// Handle records until cancelled or the log closes the partition.
    ///
    /// A record being handled when cancellation arrives is finished first.
    ///
    /// # Errors
    /// Unknown topics and offset regressions are fatal.
    pub async fn run(mut self) -> DaemonResult<()> {
        let partition = self.partition().clone();
        info!(%partition, "Partition lane started");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.log.next_record() => next,
            };

            let record = match next {
                Some(Ok(record)) => record,
                Some(Err(e)) => {
                    warn!(%partition, error = %e, "Error reading partition");
                    pause(&self.cancel, self.ctx.redelivery_backoff).await;
                    continue;
                }
                None => {
                    info!(%partition, "Partition closed by the log");
                    break;
                }
            };

            self.check_order(&record)?;

            let settlement = match self.handle(&record).await {
                Ok(settlement) => settlement,
                Err(e) if self.cancel.is_cancelled() => {
                    debug!(%partition, error = %e, "Settle interrupted by shutdown");
                    break;
                }
                Err(e) => return Err(e),
            };

            match settlement {
                Settlement::Committed => {
                    self.expected = Some(record.offset + 1);
                    self.ctx.counter.increment();
                    self.ctx.metrics.record(&record.topic, RecordResult::Committed);
                }
                Settlement::FilteredOut => {
                    self.expected = Some(record.offset + 1);
                    self.ctx.metrics.record(&record.topic, RecordResult::Filtered);
                }
                Settlement::PendingRetry { http_status } => {
                    warn!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        timestamp = %record.timestamp_label(),
                        ?http_status,
                        "Delivery failed, message will be redelivered"
                    );
                    self.expected = Some(record.offset);
                    self.ctx.metrics.record(&record.topic, RecordResult::Failed);
                    pause(&self.cancel, self.ctx.redelivery_backoff).await;
                }
            }
        }

        info!(%partition, "Partition lane stopped");
        Ok(())
    }

    /// Decode, filter, deliver and settle one record.
    async fn handle(&mut self, record: &EventRecord) -> DaemonResult<Settlement> {
        let command = Command::decode(record)?;

        if !self.ctx.filter.admits_baggage(record.baggage()) {
            return Ok(CommitController::filter_out(record));
        }

        if let Command::Rental(rental) = &command {
            match rental.shape {
                PayloadShape::Structured => {}
                PayloadShape::LegacyPrice => debug!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    "Legacy price payload"
                ),
                PayloadShape::Unreadable => warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    "Unreadable rental payload, delivering with zero price"
                ),
            }
        }

        let outcome = self.ctx.executor.deliver(&command, record.baggage()).await;
        let settlement = CommitController::settle(&mut self.log, record, outcome).await?;

        if settlement.is_committed() {
            debug!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                timestamp = %record.timestamp_label(),
                catalog_id = %command.catalog_id(),
                "Message processed"
            );
        }
        Ok(settlement)
    }

    fn check_order(&self, record: &EventRecord) -> DaemonResult<()> {
        match self.expected {
            Some(expected) if record.offset < expected => Err(DaemonError::OrderViolation {
                partition: self.partition().clone(),
                offset: record.offset,
                expected,
            }),
            _ => Ok(()),
        }
    }
}

/// Wait out the redelivery backoff, or until cancelled.
async fn pause(cancel: &CancellationToken, backoff: Duration) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(backoff) => {}
    }
}

// =============================================================================
// Tests
// =============================================================================
