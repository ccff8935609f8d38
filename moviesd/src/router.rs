//! Partition Task Router.
//!
//! Follows the consumer group's assignment and keeps exactly one
//! [`PartitionLane`] running per owned partition:
//!
//! - assigned: claim the partition and spawn its lane
//! - revoked: cancel the lane, wait for its in-flight record, then release
//!   the partition back to the group
//! - shutdown: cancel every lane, wait for all, leave the group
//!
//! A lane that fails stops the router with that lane's error.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use movies_domain::PartitionId;
use movies_exec::{ConsumerGroup, ExecError, MembershipChange};

use crate::counter::ProcessedCounter;
use crate::error::{DaemonError, DaemonResult};
use crate::lane::{LaneContext, PartitionLane};

/// Pause before asking the group again after a membership error.
const MEMBERSHIP_RETRY: Duration = Duration::from_secs(1);

/// A running lane.
struct LaneHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// What woke the router up.
enum RouterEvent {
    Shutdown,
    LaneFailed(PartitionId, DaemonError),
    Membership(Result<MembershipChange, ExecError>),
}

/// Runs one lane per partition owned by this group member.
pub struct PartitionRouter<G: ConsumerGroup> {
    group: G,
    ctx: LaneContext,
    lanes: HashMap<PartitionId, LaneHandle>,
    failures_tx: mpsc::UnboundedSender<(PartitionId, DaemonError)>,
    failures_rx: mpsc::UnboundedReceiver<(PartitionId, DaemonError)>,
}

impl<G: ConsumerGroup> PartitionRouter<G> {
    /// Create a router over a joined group.
    pub fn new(group: G, ctx: LaneContext) -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Self {
            group,
            ctx,
            lanes: HashMap::new(),
            failures_tx,
            failures_rx,
        }
    }

    /// Processed-message counter shared with the lanes.
    pub fn counter(&self) -> ProcessedCounter {
        self.ctx.counter.clone()
    }

    /// Route until `shutdown` is cancelled or a lane fails.
    ///
    /// Returns the processed count. Lanes are always stopped and the group
    /// left before returning, also on error.
    pub async fn run(mut self, shutdown: CancellationToken) -> DaemonResult<u64> {
        info!("Partition router started");

        let result = loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => RouterEvent::Shutdown,
                Some((partition, err)) = self.failures_rx.recv() => {
                    RouterEvent::LaneFailed(partition, err)
                }
                change = self.group.next_change() => RouterEvent::Membership(change),
            };

            match event {
                RouterEvent::Shutdown => {
                    info!("Shutdown requested, stopping partition lanes");
                    break Ok(());
                }
                RouterEvent::LaneFailed(partition, err) => {
                    error!(%partition, error = %err, "Partition lane failed, stopping router");
                    break Err(err);
                }
                RouterEvent::Membership(Ok(MembershipChange::Assigned(partitions))) => {
                    self.assign(partitions, &shutdown);
                }
                RouterEvent::Membership(Ok(MembershipChange::Revoked(partitions))) => {
                    self.revoke(partitions).await;
                }
                RouterEvent::Membership(Err(e)) => {
                    warn!(error = %e, "Consumer group error, retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(MEMBERSHIP_RETRY) => {}
                    }
                }
            }
        };

        self.stop_all().await;
        if let Err(e) = self.group.leave().await {
            warn!(error = %e, "Error leaving consumer group");
        }

        result.map(|()| self.ctx.counter.get())
    }

    fn assign(&mut self, partitions: Vec<PartitionId>, shutdown: &CancellationToken) {
        for partition in partitions {
            if self.lanes.contains_key(&partition) {
                debug!(%partition, "Partition already owned");
                continue;
            }

            let log = match self.group.claim(&partition) {
                Ok(log) => log,
                Err(e) => {
                    warn!(%partition, error = %e, "Could not claim partition");
                    continue;
                }
            };

            let cancel = shutdown.child_token();
            let lane = PartitionLane::new(log, self.ctx.clone(), cancel.clone());
            let failures = self.failures_tx.clone();
            let lane_partition = partition.clone();

            let task = tokio::spawn(async move {
                if let Err(e) = lane.run().await {
                    let _ = failures.send((lane_partition, e));
                }
            });

            info!(%partition, "Partition assigned");
            self.lanes.insert(partition, LaneHandle { cancel, task });
        }

        self.ctx.metrics.set_assigned_partitions(self.lanes.len());
    }

    /// Stop the lanes of revoked partitions, then hand them back.
    async fn revoke(&mut self, partitions: Vec<PartitionId>) {
        let mut stopping = Vec::new();
        for partition in &partitions {
            match self.lanes.remove(partition) {
                Some(lane) => {
                    lane.cancel.cancel();
                    stopping.push((partition, lane.task));
                }
                None => debug!(%partition, "Revoked partition was not owned"),
            }
        }
        for (partition, task) in stopping {
            if let Err(e) = task.await {
                warn!(%partition, error = %e, "Partition lane panicked");
            }
            info!(%partition, "Partition revoked");
        }
        self.ctx.metrics.set_assigned_partitions(self.lanes.len());

        if let Err(e) = self.group.release(&partitions).await {
            warn!(error = %e, "Could not release revoked partitions");
        }
    }

    async fn stop_all(&mut self) {
        for lane in self.lanes.values() {
            lane.cancel.cancel();
        }
        for (partition, lane) in self.lanes.drain() {
            if let Err(e) = lane.task.await {
                warn!(%partition, error = %e, "Partition lane panicked");
            }
        }
        self.ctx.metrics.set_assigned_partitions(0);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RelayMetrics;
    use movies_domain::{DivertFilter, EventRecord};
    use movies_eventlog::MemoryEventLog;
    use movies_exec::{DeliveryExecutor, StubRegistry};
    use movies_testkit::rental_record;
    use std::sync::Arc;

    fn context() -> LaneContext {
        LaneContext {
            executor: DeliveryExecutor::new(Arc::new(StubRegistry::new())),
            filter: DivertFilter::new(""),
            counter: ProcessedCounter::starting_at(10),
            metrics: Arc::new(RelayMetrics::new().unwrap()),
            redelivery_backoff: Duration::from_millis(1),
        }
    }

    async fn eventually(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_assign_spawns_lane_and_shutdown_reports_count() {
        let log = MemoryEventLog::new();
        log.publish(rental_record(0, 0, Some("1"), "a@b.com", 1.0));
        let (group, membership) = log.join();
        let ctx = context();
        let metrics = ctx.metrics.clone();
        let shutdown = CancellationToken::new();

        let router = PartitionRouter::new(group, ctx);
        let run = tokio::spawn(router.run(shutdown.clone()));
        membership.assign_all();

        let partition = PartitionId::new("rentals", 0);
        eventually(|| log.committed(&partition) == Some(1)).await;
        assert_eq!(metrics.assigned_partitions(), 1);

        shutdown.cancel();
        assert_eq!(run.await.unwrap().unwrap(), 11);
        assert!(membership.has_left());
        assert_eq!(metrics.assigned_partitions(), 0);
    }

    #[tokio::test]
    async fn test_revoked_partition_is_not_read() {
        let log = MemoryEventLog::new();
        let partition = PartitionId::new("rentals", 0);
        let (group, membership) = log.join();
        let ctx = context();
        let metrics = ctx.metrics.clone();
        let shutdown = CancellationToken::new();

        let run = tokio::spawn(PartitionRouter::new(group, ctx).run(shutdown.clone()));
        membership.assign(vec![partition.clone()]);
        eventually(|| metrics.assigned_partitions() == 1).await;

        membership.revoke(vec![partition.clone()]);
        eventually(|| metrics.assigned_partitions() == 0).await;

        log.publish(rental_record(0, 0, Some("1"), "a@b.com", 1.0));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(log.committed(&partition), None);

        shutdown.cancel();
        assert_eq!(run.await.unwrap().unwrap(), 10);
    }

    #[tokio::test]
    async fn test_revoke_waits_for_in_flight_commit_before_release() {
        let log = MemoryEventLog::new();
        let partition = PartitionId::new("rentals", 0);
        log.publish(rental_record(0, 0, Some("1"), "a@b.com", 1.0));
        let (group, membership) = log.join();
        let registry = Arc::new(StubRegistry::with_latency(Duration::from_millis(300)));
        let ctx = LaneContext {
            executor: DeliveryExecutor::new(registry.clone()),
            ..context()
        };
        let metrics = ctx.metrics.clone();
        let shutdown = CancellationToken::new();

        let run = tokio::spawn(PartitionRouter::new(group, ctx).run(shutdown.clone()));
        membership.assign(vec![partition.clone()]);
        eventually(|| metrics.assigned_partitions() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(log.committed(&partition), None);

        membership.revoke(vec![partition.clone()]);
        eventually(|| !log.releases().is_empty()).await;

        assert_eq!(log.releases(), vec![(partition.clone(), Some(1))]);
        assert_eq!(log.commit_history(), vec![(partition, 1)]);
        assert_eq!(registry.calls().await.len(), 1);

        shutdown.cancel();
        assert_eq!(run.await.unwrap().unwrap(), 11);
    }

    #[tokio::test]
    async fn test_revoke_of_unowned_partition_is_released() {
        let log = MemoryEventLog::new();
        let partition = PartitionId::new("returns", 3);
        let (group, membership) = log.join();
        let shutdown = CancellationToken::new();

        let run = tokio::spawn(PartitionRouter::new(group, context()).run(shutdown.clone()));
        membership.revoke(vec![partition.clone()]);
        eventually(|| !log.releases().is_empty()).await;

        assert_eq!(log.releases(), vec![(partition, None)]);
        shutdown.cancel();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_lane_failure_stops_router() {
        let log = MemoryEventLog::new();
        log.publish(EventRecord::new("votes", 0, 0, "x"));
        let (group, membership) = log.join();

        let run = tokio::spawn(PartitionRouter::new(group, context()).run(CancellationToken::new()));
        membership.assign_all();

        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(DaemonError::Domain(_))));
        assert!(membership.has_left());
    }
}
