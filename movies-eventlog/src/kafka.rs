//! Kafka Consumer Group Adapter
//!
//! Joins a Kafka consumer group with manual offset management:
//! - `enable.auto.commit=false`, offsets are committed per record after
//!   the downstream call succeeded
//! - rebalance callbacks are turned into [`MembershipChange`]s
//! - each claimed partition is split off the main queue into its own
//!   queue, so one lane reads one partition in order
//!
//! The main queue must keep being polled to serve rebalance events. A
//! dedicated poller thread does that, so a revocation callback can block
//! until the router has stopped the affected lanes and released the
//! partitions. A record that shows up on the main queue belongs to a
//! partition whose queue was not split yet. It is seeked back so the
//! partition's own queue hands it out again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::consumer::stream_consumer::StreamPartitionQueue;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::{BorrowedMessage, Headers};
use rdkafka::{ClientConfig, ClientContext, Message, Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use movies_domain::{DeliveryReceipt, EventRecord, PartitionId};
use movies_exec::{ConsumerGroup, ExecError, ExecResult, MembershipChange, PartitionLog};

use crate::error::{EventLogError, Result};

// =============================================================================
// Constants
// =============================================================================

/// Consumer group name prefix; the namespace is appended
pub const GROUP_ID_PREFIX: &str = "movies-worker-group";

/// Timeout for seeks and committed-offset lookups
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the broker metadata probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest a revocation waits for the router to release the partitions
const RELEASE_TIMEOUT: Duration = Duration::from_secs(60);

/// Pause after a failed poll of the main queue
const POLL_ERROR_PAUSE: Duration = Duration::from_secs(1);

// =============================================================================
// Configuration
// =============================================================================

/// Connection and group settings for the Kafka consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaGroupConfig {
    /// Comma-separated bootstrap brokers
    pub brokers: String,
    /// Consumer group id
    pub group_id: String,
    /// Topics to subscribe to
    pub topics: Vec<String>,
    /// Where to start when the group has no committed offset
    /// (`latest` or `earliest`)
    pub offset_reset: String,
    /// Group session timeout
    pub session_timeout_ms: u32,
}

impl KafkaGroupConfig {
    /// Settings for the relay in a namespace: topics `rentals` and
    /// `returns`, starting from the newest records.
    pub fn new(brokers: impl Into<String>, namespace: &str) -> Self {
        Self {
            brokers: brokers.into(),
            group_id: Self::group_id_for(namespace),
            topics: vec!["rentals".to_string(), "returns".to_string()],
            offset_reset: "latest".to_string(),
            session_timeout_ms: 30_000,
        }
    }

    /// Group id shared by every worker of a namespace.
    pub fn group_id_for(namespace: &str) -> String {
        format!("{}-{}", GROUP_ID_PREFIX, namespace)
    }

    fn client_config(&self) -> Result<ClientConfig> {
        match self.offset_reset.as_str() {
            "latest" | "earliest" => {}
            other => {
                return Err(EventLogError::Config(format!(
                    "offset reset must be latest or earliest, got {}",
                    other
                )))
            }
        }

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            // Offset management
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &self.offset_reset)
            // Spread partitions evenly across the group
            .set("partition.assignment.strategy", "roundrobin")
            // Performance
            .set("fetch.min.bytes", "1")
            .set("fetch.wait.max.ms", "500")
            // Session management
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000");
        Ok(config)
    }
}

// =============================================================================
// Rebalance Context
// =============================================================================

/// Forwards rebalance callbacks to the group as membership changes.
///
/// A revocation blocks the poller thread until the router releases the
/// partitions, so librdkafka does not unassign them while a lane is still
/// delivering.
pub struct GroupContext {
    changes: mpsc::UnboundedSender<MembershipChange>,
    released: Mutex<std_mpsc::Receiver<()>>,
    leaving: AtomicBool,
}

impl GroupContext {
    fn await_release(&self, partitions: Vec<PartitionId>) {
        let released = self
            .released
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Acks left over from a revocation that timed out
        while released.try_recv().is_ok() {}

        let count = partitions.len();
        if self.changes.send(MembershipChange::Revoked(partitions)).is_err() {
            return;
        }

        match released.recv_timeout(RELEASE_TIMEOUT) {
            Ok(()) => debug!(count, "Revoked partitions released"),
            Err(RecvTimeoutError::Timeout) => warn!(
                count,
                timeout_secs = RELEASE_TIMEOUT.as_secs(),
                "Revoked partitions not released in time, unassigning anyway"
            ),
            Err(RecvTimeoutError::Disconnected) => {}
        }
    }
}

impl ClientContext for GroupContext {}

impl ConsumerContext for GroupContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            let partitions = partitions_of(tpl);
            info!(count = partitions.len(), "Partitions revoked");
            if !self.leaving.load(Ordering::SeqCst) {
                self.await_release(partitions);
            }
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let partitions = partitions_of(tpl);
                info!(count = partitions.len(), "Partitions assigned");
                let _ = self.changes.send(MembershipChange::Assigned(partitions));
            }
            Rebalance::Error(e) => {
                warn!(error = %e, "Rebalance error");
            }
            Rebalance::Revoke(_) => {}
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        if let Err(e) = result {
            warn!(error = %e, "Offset commit callback reported an error");
        }
    }
}

fn partitions_of(tpl: &TopicPartitionList) -> Vec<PartitionId> {
    tpl.elements()
        .iter()
        .map(|elem| PartitionId::new(elem.topic(), elem.partition()))
        .collect()
}

type GroupConsumer = StreamConsumer<GroupContext>;

// =============================================================================
// Consumer Group
// =============================================================================

/// Member of a Kafka consumer group.
pub struct KafkaConsumerGroup {
    consumer: Arc<GroupConsumer>,
    changes: mpsc::UnboundedReceiver<MembershipChange>,
    released: std_mpsc::Sender<()>,
    poller: CancellationToken,
    config: KafkaGroupConfig,
}

impl KafkaConsumerGroup {
    /// Create the consumer. Brokers are not contacted until
    /// [`probe`](Self::probe) or [`subscribe`](Self::subscribe).
    pub fn create(config: &KafkaGroupConfig) -> Result<Self> {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let (released_tx, released_rx) = std_mpsc::channel();
        let context = GroupContext {
            changes: changes_tx,
            released: Mutex::new(released_rx),
            leaving: AtomicBool::new(false),
        };
        let consumer: GroupConsumer = config.client_config()?.create_with_context(context)?;

        Ok(Self {
            consumer: Arc::new(consumer),
            changes: changes_rx,
            released: released_tx,
            poller: CancellationToken::new(),
            config: config.clone(),
        })
    }

    /// Group settings in use.
    pub fn config(&self) -> &KafkaGroupConfig {
        &self.config
    }

    /// Fetch cluster metadata once, succeeding when a broker answers.
    pub async fn probe(&self) -> Result<()> {
        let consumer = self.consumer.clone();
        let metadata = tokio::task::spawn_blocking(move || {
            consumer.fetch_metadata(None, PROBE_TIMEOUT)
        })
        .await
        .map_err(|e| EventLogError::Task(e.to_string()))??;

        debug!(
            brokers = metadata.brokers().len(),
            topics = metadata.topics().len(),
            "Kafka metadata fetched"
        );
        Ok(())
    }

    /// Subscribe to the configured topics and start serving the group on
    /// a dedicated poller thread.
    pub fn subscribe(&mut self) -> Result<()> {
        let topics: Vec<&str> = self.config.topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topics)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EventLogError::Task(e.to_string()))?;
        let consumer = self.consumer.clone();
        let stop = self.poller.clone();
        std::thread::Builder::new()
            .name("kafka-group-poller".to_string())
            .spawn(move || runtime.block_on(serve_group(consumer, stop)))
            .map_err(|e| EventLogError::Task(e.to_string()))?;

        info!(
            group_id = %self.config.group_id,
            topics = ?self.config.topics,
            "Subscribed to Kafka topics"
        );
        Ok(())
    }

    fn committed_position(&self, partition: &PartitionId) -> Option<i64> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(&partition.topic, partition.partition);

        match self.consumer.committed_offsets(tpl, CONTROL_TIMEOUT) {
            Ok(committed) => committed
                .find_partition(&partition.topic, partition.partition)
                .and_then(|elem| match elem.offset() {
                    Offset::Offset(offset) => Some(offset),
                    _ => None,
                }),
            Err(e) => {
                warn!(%partition, error = %e, "Could not read committed offset");
                None
            }
        }
    }
}

#[async_trait]
impl ConsumerGroup for KafkaConsumerGroup {
    type Log = KafkaPartitionLog;

    async fn next_change(&mut self) -> ExecResult<MembershipChange> {
        self.changes
            .recv()
            .await
            .ok_or_else(|| ExecError::Membership("rebalance channel closed".to_string()))
    }

    fn claim(&mut self, partition: &PartitionId) -> ExecResult<Self::Log> {
        let queue = self
            .consumer
            .split_partition_queue(&partition.topic, partition.partition)
            .ok_or_else(|| EventLogError::NotAssigned(partition.clone()))?;
        let position = self.committed_position(partition);

        debug!(%partition, ?position, "Partition queue split off");

        Ok(KafkaPartitionLog {
            partition: partition.clone(),
            consumer: self.consumer.clone(),
            queue,
            position: ReadPosition::new(position),
        })
    }

    async fn release(&mut self, partitions: &[PartitionId]) -> ExecResult<()> {
        debug!(count = partitions.len(), "Releasing revoked partitions");
        self.released
            .send(())
            .map_err(|e| ExecError::Membership(e.to_string()))
    }

    async fn leave(&mut self) -> ExecResult<()> {
        self.consumer.context().leaving.store(true, Ordering::SeqCst);
        self.consumer.unsubscribe();
        self.poller.cancel();
        info!(group_id = %self.config.group_id, "Left consumer group");
        Ok(())
    }
}

impl Drop for KafkaConsumerGroup {
    fn drop(&mut self) {
        self.poller.cancel();
    }
}

/// Poll the main queue until `stop` is cancelled, serving rebalance
/// callbacks.
async fn serve_group(consumer: Arc<GroupConsumer>, stop: CancellationToken) {
    debug!("Group poller started");

    loop {
        let message = tokio::select! {
            _ = stop.cancelled() => break,
            message = consumer.recv() => message,
        };

        match message {
            Ok(message) => {
                let (topic, partition, offset) =
                    (message.topic(), message.partition(), message.offset());
                warn!(
                    %topic,
                    partition,
                    offset,
                    "Record reached the group queue before its partition was claimed, rewinding"
                );
                if let Err(e) =
                    consumer.seek(topic, partition, Offset::Offset(offset), CONTROL_TIMEOUT)
                {
                    error!(%topic, partition, offset, error = %e, "Could not rewind record");
                }
            }
            Err(e) => {
                warn!(error = %e, "Consumer group poll error");
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(POLL_ERROR_PAUSE) => {}
                }
            }
        }
    }

    debug!("Group poller stopped");
}

// =============================================================================
// Partition Log
// =============================================================================

/// What to do with a record fetched from a partition queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arrival {
    /// Next record in order
    Yield,
    /// Left over from before a seek, already handled
    Stale,
    /// Earlier records are missing, seek back to the position
    SeekBack(i64),
}

/// Read position of a partition queue.
///
/// After a seek the queue can still hold records fetched before it, and
/// records that sat in the group queue leave a gap. Stale records are
/// dropped; a gap is answered with one seek back to the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadPosition {
    /// Next offset expected, when known
    next: Option<i64>,
    /// A seek back to `next` was already issued for a gap
    gap_confirmed: bool,
}

impl ReadPosition {
    fn new(next: Option<i64>) -> Self {
        Self {
            next,
            gap_confirmed: false,
        }
    }

    fn arrive(&mut self, offset: i64) -> Arrival {
        match self.next {
            Some(next) if offset < next => return Arrival::Stale,
            Some(next) if offset > next && !self.gap_confirmed => {
                self.gap_confirmed = true;
                return Arrival::SeekBack(next);
            }
            _ => {}
        }

        self.gap_confirmed = false;
        self.next = Some(offset + 1);
        Arrival::Yield
    }

    fn rewind(&mut self, offset: i64) {
        self.next = Some(offset);
        self.gap_confirmed = false;
    }
}

/// Reader over one claimed Kafka partition.
pub struct KafkaPartitionLog {
    partition: PartitionId,
    consumer: Arc<GroupConsumer>,
    queue: StreamPartitionQueue<GroupContext>,
    position: ReadPosition,
}

impl KafkaPartitionLog {
    fn seek(&self, offset: i64) -> ExecResult<()> {
        self.consumer
            .seek(
                &self.partition.topic,
                self.partition.partition,
                Offset::Offset(offset),
                CONTROL_TIMEOUT,
            )
            .map_err(|e| ExecError::Log(e.to_string()))
    }
}

#[async_trait]
impl PartitionLog for KafkaPartitionLog {
    fn partition(&self) -> &PartitionId {
        &self.partition
    }

    async fn next_record(&mut self) -> Option<ExecResult<EventRecord>> {
        loop {
            let record = match self.queue.recv().await {
                Ok(message) => to_record(&message),
                Err(e) => return Some(Err(ExecError::Log(e.to_string()))),
            };

            match self.position.arrive(record.offset) {
                Arrival::Yield => return Some(Ok(record)),
                Arrival::Stale => {
                    debug!(
                        partition = %self.partition,
                        offset = record.offset,
                        "Dropping stale record"
                    );
                }
                Arrival::SeekBack(position) => {
                    debug!(
                        partition = %self.partition,
                        offset = record.offset,
                        position,
                        "Offset gap, seeking back"
                    );
                    if let Err(e) = self.seek(position) {
                        return Some(Err(e));
                    }
                }
            }
        }
    }

    async fn commit(&mut self, receipt: &DeliveryReceipt) -> ExecResult<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &receipt.partition().topic,
            receipt.partition().partition,
            Offset::Offset(receipt.commit_offset()),
        )
        .map_err(|e| ExecError::Commit(e.to_string()))?;

        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| ExecError::Commit(e.to_string()))
    }

    async fn rewind(&mut self, offset: i64) -> ExecResult<()> {
        self.seek(offset)?;
        self.position.rewind(offset);
        Ok(())
    }
}

/// Copy a Kafka message into an owned record.
fn to_record(message: &BorrowedMessage<'_>) -> EventRecord {
    let headers: BTreeMap<String, String> = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .filter_map(|header| {
                    header.value.map(|value| {
                        (
                            header.key.to_string(),
                            String::from_utf8_lossy(value).into_owned(),
                        )
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let timestamp = message
        .timestamp()
        .to_millis()
        .and_then(DateTime::<Utc>::from_timestamp_millis);

    EventRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec),
        headers,
        timestamp,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_id_per_namespace() {
        assert_eq!(
            KafkaGroupConfig::group_id_for("cindy"),
            "movies-worker-group-cindy"
        );
        let config = KafkaGroupConfig::new("kafka:9092", "default");
        assert_eq!(config.group_id, "movies-worker-group-default");
        assert_eq!(config.topics, vec!["rentals", "returns"]);
    }

    #[test]
    fn test_client_config_disables_auto_commit() {
        let config = KafkaGroupConfig::new("kafka:9092", "default");
        let client = config.client_config().unwrap();

        assert_eq!(client.get("enable.auto.commit"), Some("false"));
        assert_eq!(client.get("auto.offset.reset"), Some("latest"));
        assert_eq!(client.get("group.id"), Some("movies-worker-group-default"));
    }

    #[test]
    fn test_invalid_offset_reset_rejected() {
        let config = KafkaGroupConfig {
            offset_reset: "middle".to_string(),
            ..KafkaGroupConfig::new("kafka:9092", "default")
        };
        assert!(matches!(config.client_config(), Err(EventLogError::Config(_))));
    }

    #[test]
    fn test_partitions_of_list() {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition("rentals", 0);
        tpl.add_partition("returns", 2);

        assert_eq!(
            partitions_of(&tpl),
            vec![PartitionId::new("rentals", 0), PartitionId::new("returns", 2)]
        );
    }

    #[test]
    fn test_in_order_records_yield() {
        let mut position = ReadPosition::new(Some(5));

        assert_eq!(position.arrive(5), Arrival::Yield);
        assert_eq!(position.arrive(6), Arrival::Yield);
        assert_eq!(position.next, Some(7));
    }

    #[test]
    fn test_unknown_position_takes_first_record() {
        let mut position = ReadPosition::new(None);

        assert_eq!(position.arrive(42), Arrival::Yield);
        assert_eq!(position.next, Some(43));
    }

    #[test]
    fn test_stale_record_dropped() {
        let mut position = ReadPosition::new(Some(5));

        assert_eq!(position.arrive(3), Arrival::Stale);
        assert_eq!(position.arrive(4), Arrival::Stale);
        assert_eq!(position, ReadPosition::new(Some(5)));
    }

    #[test]
    fn test_gap_seeks_back_once() {
        let mut position = ReadPosition::new(Some(5));

        assert_eq!(position.arrive(8), Arrival::SeekBack(5));
        assert!(position.gap_confirmed);
        // Still ahead after the seek: the records are gone, move on
        assert_eq!(position.arrive(8), Arrival::Yield);
        assert_eq!(position.next, Some(9));
        assert!(!position.gap_confirmed);
    }

    #[test]
    fn test_gap_filled_after_seek_back() {
        let mut position = ReadPosition::new(Some(5));

        assert_eq!(position.arrive(7), Arrival::SeekBack(5));
        assert_eq!(position.arrive(5), Arrival::Yield);
        assert!(!position.gap_confirmed);
        // A later gap gets its own seek back
        assert_eq!(position.arrive(9), Arrival::SeekBack(6));
    }

    #[test]
    fn test_rewind_resets_position_and_gap() {
        let mut position = ReadPosition::new(Some(5));
        assert_eq!(position.arrive(8), Arrival::SeekBack(5));

        position.rewind(2);

        assert_eq!(position, ReadPosition::new(Some(2)));
        assert_eq!(position.arrive(3), Arrival::SeekBack(2));
        assert_eq!(position.arrive(1), Arrival::Stale);
        assert_eq!(position.arrive(2), Arrival::Yield);
    }

    #[tokio::test]
    #[ignore = "requires a Kafka broker on localhost:9092"]
    async fn test_probe_against_local_broker() {
        let config = KafkaGroupConfig::new("localhost:9092", "test");
        let group = KafkaConsumerGroup::create(&config).unwrap();
        group.probe().await.unwrap();
    }
}
