//! In-memory event log.
//!
//! Partitions are append-only vectors shared behind a mutex. Readers wait
//! on a watch channel that is bumped on every append, so a reader never
//! misses a record published between its check and its wait.
//!
//! Group membership is scripted through a [`MembershipHandle`]: tests
//! decide when partitions are assigned or revoked.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use movies_domain::{DeliveryReceipt, EventRecord, PartitionId};
use movies_exec::{ConsumerGroup, ExecError, ExecResult, MembershipChange, PartitionLog};

// =============================================================================
// Shared log state
// =============================================================================

#[derive(Default)]
struct LogState {
    /// Records per partition, offsets contiguous from 0
    partitions: BTreeMap<PartitionId, Vec<EventRecord>>,
    /// Committed position per partition (next offset to read)
    committed: HashMap<PartitionId, i64>,
    /// Every commit, in order
    commit_history: Vec<(PartitionId, i64)>,
    /// Released partitions with their committed position at release time
    releases: Vec<(PartitionId, Option<i64>)>,
}

/// In-memory, multi-partition event log.
///
/// Clones share the same log.
#[derive(Clone)]
pub struct MemoryEventLog {
    state: Arc<Mutex<LogState>>,
    appended: Arc<watch::Sender<u64>>,
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(LogState::default())),
            appended: Arc::new(appended),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        // State is only mutated in short non-panicking sections
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a record to its partition, assigning the next offset.
    ///
    /// Returns the assigned offset.
    pub fn publish(&self, mut record: EventRecord) -> i64 {
        let offset = {
            let mut state = self.lock();
            let records = state.partitions.entry(record.partition_id()).or_default();
            let offset = records.len() as i64;
            record.offset = offset;
            records.push(record);
            offset
        };
        self.appended.send_modify(|version| *version += 1);
        offset
    }

    /// Make a partition exist without publishing to it.
    pub fn create_partition(&self, partition: PartitionId) {
        self.lock().partitions.entry(partition).or_default();
    }

    /// All partitions known to the log.
    pub fn partitions(&self) -> Vec<PartitionId> {
        self.lock().partitions.keys().cloned().collect()
    }

    /// Committed position of a partition.
    pub fn committed(&self, partition: &PartitionId) -> Option<i64> {
        self.lock().committed.get(partition).copied()
    }

    /// Every commit made so far, in order.
    pub fn commit_history(&self) -> Vec<(PartitionId, i64)> {
        self.lock().commit_history.clone()
    }

    /// Every partition released after a revocation, in order, with the
    /// position committed when it was released.
    pub fn releases(&self) -> Vec<(PartitionId, Option<i64>)> {
        self.lock().releases.clone()
    }

    /// Join the log as a consumer group member.
    ///
    /// The returned handle scripts the member's assignments.
    pub fn join(&self) -> (MemoryConsumerGroup, MembershipHandle) {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let left = Arc::new(AtomicBool::new(false));

        let group = MemoryConsumerGroup {
            log: self.clone(),
            changes: changes_rx,
            _keepalive: changes_tx.clone(),
            left: left.clone(),
        };
        let handle = MembershipHandle {
            log: self.clone(),
            changes: changes_tx,
            left,
        };
        (group, handle)
    }

    fn record_at(&self, partition: &PartitionId, position: i64) -> Option<EventRecord> {
        let state = self.lock();
        state
            .partitions
            .get(partition)?
            .iter()
            .find(|r| r.offset >= position)
            .cloned()
    }

    fn commit(&self, partition: &PartitionId, offset: i64) {
        let mut state = self.lock();
        state.committed.insert(partition.clone(), offset);
        state.commit_history.push((partition.clone(), offset));
    }
}

// =============================================================================
// Membership
// =============================================================================

/// Test-side control over a [`MemoryConsumerGroup`] member.
#[derive(Clone)]
pub struct MembershipHandle {
    log: MemoryEventLog,
    changes: mpsc::UnboundedSender<MembershipChange>,
    left: Arc<AtomicBool>,
}

impl MembershipHandle {
    /// Assign partitions to the member.
    pub fn assign(&self, partitions: Vec<PartitionId>) {
        for partition in &partitions {
            self.log.create_partition(partition.clone());
        }
        let _ = self.changes.send(MembershipChange::Assigned(partitions));
    }

    /// Assign every partition currently in the log.
    pub fn assign_all(&self) {
        self.assign(self.log.partitions());
    }

    /// Revoke partitions from the member.
    pub fn revoke(&self, partitions: Vec<PartitionId>) {
        let _ = self.changes.send(MembershipChange::Revoked(partitions));
    }

    /// Whether the member has left the group.
    pub fn has_left(&self) -> bool {
        self.left.load(Ordering::SeqCst)
    }
}

/// Consumer group member over a [`MemoryEventLog`].
pub struct MemoryConsumerGroup {
    log: MemoryEventLog,
    changes: mpsc::UnboundedReceiver<MembershipChange>,
    /// Keeps `changes` open while no handle is alive
    _keepalive: mpsc::UnboundedSender<MembershipChange>,
    left: Arc<AtomicBool>,
}

#[async_trait]
impl ConsumerGroup for MemoryConsumerGroup {
    type Log = MemoryPartitionLog;

    async fn next_change(&mut self) -> ExecResult<MembershipChange> {
        self.changes
            .recv()
            .await
            .ok_or_else(|| ExecError::Membership("membership channel closed".to_string()))
    }

    fn claim(&mut self, partition: &PartitionId) -> ExecResult<Self::Log> {
        let position = self.log.committed(partition).unwrap_or(0);
        debug!(%partition, position, "Claiming in-memory partition");

        Ok(MemoryPartitionLog {
            partition: partition.clone(),
            log: self.log.clone(),
            appended: self.log.appended.subscribe(),
            position,
        })
    }

    async fn release(&mut self, partitions: &[PartitionId]) -> ExecResult<()> {
        let mut state = self.log.lock();
        for partition in partitions {
            let committed = state.committed.get(partition).copied();
            state.releases.push((partition.clone(), committed));
        }
        Ok(())
    }

    async fn leave(&mut self) -> ExecResult<()> {
        self.left.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Partition reader
// =============================================================================

/// Reader over one partition of a [`MemoryEventLog`].
pub struct MemoryPartitionLog {
    partition: PartitionId,
    log: MemoryEventLog,
    appended: watch::Receiver<u64>,
    /// Next offset to hand out
    position: i64,
}

impl MemoryPartitionLog {
    /// Next offset this reader will hand out.
    pub fn position(&self) -> i64 {
        self.position
    }
}

#[async_trait]
impl PartitionLog for MemoryPartitionLog {
    fn partition(&self) -> &PartitionId {
        &self.partition
    }

    async fn next_record(&mut self) -> Option<ExecResult<EventRecord>> {
        loop {
            if let Some(record) = self.log.record_at(&self.partition, self.position) {
                self.position = record.offset + 1;
                return Some(Ok(record));
            }
            if self.appended.changed().await.is_err() {
                return None;
            }
        }
    }

    async fn commit(&mut self, receipt: &DeliveryReceipt) -> ExecResult<()> {
        if receipt.partition() != &self.partition {
            return Err(ExecError::Commit(format!(
                "receipt for {} presented to reader of {}",
                receipt.partition(),
                self.partition
            )));
        }
        self.log.commit(&self.partition, receipt.commit_offset());
        Ok(())
    }

    async fn rewind(&mut self, offset: i64) -> ExecResult<()> {
        debug!(partition = %self.partition, offset, "Rewinding in-memory reader");
        self.position = offset;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
