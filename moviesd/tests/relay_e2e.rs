//! End-to-end relay tests.
//!
//! Drives the partition router over the in-memory event log against the
//! fake registry HTTP server, through the real registry client.
//!
//! Run with: `cargo test -p moviesd --test relay_e2e`

use std::sync::Arc;
use std::time::Duration;

use movies_connectors::RegistryRestClient;
use movies_domain::{DivertFilter, EventRecord, PartitionId};
use movies_eventlog::{MembershipHandle, MemoryEventLog};
use movies_exec::{DeliveryExecutor, RegistryPort, StubRegistry};
use movies_testkit::{rental_record, return_record, with_baggage, FakeRegistry};
use moviesd::{
    DaemonResult, LaneContext, PartitionRouter, ProcessedCounter, RecordResult, RelayMetrics,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A router running over an in-memory log.
struct Relay {
    log: MemoryEventLog,
    membership: MembershipHandle,
    counter: ProcessedCounter,
    metrics: Arc<RelayMetrics>,
    shutdown: CancellationToken,
    task: JoinHandle<DaemonResult<u64>>,
}

impl Relay {
    fn start(registry: Arc<dyn RegistryPort>, scope: &str) -> Self {
        let log = MemoryEventLog::new();
        let (group, membership) = log.join();
        let counter = ProcessedCounter::default();
        let metrics = Arc::new(RelayMetrics::new().unwrap());
        let shutdown = CancellationToken::new();

        let ctx = LaneContext {
            executor: DeliveryExecutor::new(registry),
            filter: DivertFilter::new(scope),
            counter: counter.clone(),
            metrics: metrics.clone(),
            redelivery_backoff: Duration::from_millis(10),
        };
        let task = tokio::spawn(PartitionRouter::new(group, ctx).run(shutdown.clone()));

        Self {
            log,
            membership,
            counter,
            metrics,
            shutdown,
            task,
        }
    }

    fn over_http(registry: &FakeRegistry, scope: &str) -> Self {
        let client = RegistryRestClient::new(&registry.base_url()).unwrap();
        Self::start(Arc::new(client), scope)
    }

    /// Publish records and hand their partitions to the relay.
    fn feed(&self, records: Vec<EventRecord>) {
        let mut partitions = Vec::new();
        for record in records {
            let partition = record.partition_id();
            if !partitions.contains(&partition) {
                partitions.push(partition);
            }
            self.log.publish(record);
        }
        self.membership.assign(partitions);
    }

    async fn wait_committed(&self, partition: &PartitionId, position: i64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.log.committed(partition) != Some(position) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{} never committed {}", partition, position));
    }

    async fn stop(self) -> u64 {
        self.shutdown.cancel();
        let processed = self.task.await.unwrap().unwrap();
        assert!(self.membership.has_left());
        processed
    }
}

fn rentals(partition: i32) -> PartitionId {
    PartitionId::new("rentals", partition)
}

fn returns(partition: i32) -> PartitionId {
    PartitionId::new("returns", partition)
}

#[tokio::test]
async fn test_rental_delivered_then_committed() {
    let registry = FakeRegistry::start().await.unwrap();
    let relay = Relay::over_http(&registry, "");

    relay.feed(vec![rental_record(0, 0, Some("42"), "a@b.com", 12.5)]);
    relay.wait_committed(&rentals(0), 1).await;

    let requests = registry.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/internal/rentals");
    assert_eq!(
        requests[0].body,
        Some(serde_json::json!({ "id": "42", "price": "12.500000" }))
    );
    assert_eq!(relay.counter.get(), 1);
    assert_eq!(relay.stop().await, 1);
}

#[tokio::test]
async fn test_unkeyed_rental_uses_empty_id() {
    let registry = FakeRegistry::start().await.unwrap();
    let relay = Relay::over_http(&registry, "");

    relay.feed(vec![rental_record(0, 0, None, "a@b.com", 12.5)]);
    relay.wait_committed(&rentals(0), 1).await;

    assert_eq!(
        registry.requests().await[0].body,
        Some(serde_json::json!({ "id": "", "price": "12.500000" }))
    );
    relay.stop().await;
}

#[tokio::test]
async fn test_legacy_price_payload() {
    let registry = FakeRegistry::start().await.unwrap();
    let relay = Relay::over_http(&registry, "");

    relay.feed(vec![EventRecord::new("rentals", 0, 0, "9.99").with_key("7")]);
    relay.wait_committed(&rentals(0), 1).await;

    assert_eq!(
        registry.rentals().await.get("7").map(String::as_str),
        Some("9.990000")
    );
    relay.stop().await;
}

#[tokio::test]
async fn test_unavailable_registry_redelivers() {
    let registry = FakeRegistry::start().await.unwrap();
    registry.push_status(503).await;
    let relay = Relay::over_http(&registry, "");

    relay.feed(vec![rental_record(0, 0, Some("42"), "a@b.com", 12.5)]);
    relay.wait_committed(&rentals(0), 1).await;

    let requests = registry.requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], requests[1]);
    assert_eq!(relay.log.commit_history(), vec![(rentals(0), 1)]);
    assert_eq!(relay.metrics.records("rentals", RecordResult::Failed), 1);
    assert_eq!(relay.stop().await, 1);
}

#[tokio::test]
async fn test_non_200_success_status_is_failure() {
    let registry = FakeRegistry::start().await.unwrap();
    registry.push_status(204).await;
    let relay = Relay::over_http(&registry, "");

    relay.feed(vec![return_record(0, 0, "42", "a@b.com")]);
    relay.wait_committed(&returns(0), 1).await;

    assert_eq!(registry.requests().await.len(), 2);
    assert_eq!(relay.stop().await, 1);
}

#[tokio::test]
async fn test_return_deletes_with_baggage() {
    let registry = FakeRegistry::start().await.unwrap();
    let relay = Relay::over_http(&registry, "staging");

    relay.feed(vec![with_baggage(
        return_record(0, 0, "42", "a@b.com"),
        "okteto-divert=staging,trace=abc",
    )]);
    relay.wait_committed(&returns(0), 1).await;

    let requests = registry.requests().await;
    assert_eq!(requests[0].method, "DELETE");
    assert_eq!(requests[0].path, "/internal/rentals/42");
    assert_eq!(
        requests[0].baggage.as_deref(),
        Some("okteto-divert=staging,trace=abc")
    );
    relay.stop().await;
}

#[tokio::test]
async fn test_primary_worker_skips_diverted_records() {
    let registry = FakeRegistry::start().await.unwrap();
    let relay = Relay::over_http(&registry, "");

    relay.feed(vec![
        with_baggage(
            rental_record(0, 0, Some("1"), "a@b.com", 1.0),
            "okteto-divert=staging",
        ),
        rental_record(0, 0, Some("2"), "a@b.com", 2.0),
    ]);
    relay.wait_committed(&rentals(0), 2).await;

    let requests = registry.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body.as_ref().unwrap()["id"], "2");
    assert_eq!(relay.metrics.records("rentals", RecordResult::Filtered), 1);
    assert_eq!(relay.stop().await, 1);
}

#[tokio::test]
async fn test_diverted_worker_skips_primary_records() {
    let registry = FakeRegistry::start().await.unwrap();
    let relay = Relay::over_http(&registry, "staging");

    relay.feed(vec![
        rental_record(0, 0, Some("1"), "a@b.com", 1.0),
        with_baggage(
            rental_record(0, 0, Some("2"), "a@b.com", 2.0),
            "okteto-divert=other",
        ),
        with_baggage(
            rental_record(0, 0, Some("3"), "a@b.com", 3.0),
            "okteto-divert=staging",
        ),
    ]);
    relay.wait_committed(&rentals(0), 3).await;

    let ids: Vec<String> = registry.rentals().await.into_keys().collect();
    assert_eq!(ids, vec!["3"]);
    assert_eq!(relay.stop().await, 1);
}

#[tokio::test]
async fn test_partition_order_preserved() {
    let registry = Arc::new(StubRegistry::with_latency(Duration::from_millis(2)));
    let relay = Relay::start(registry.clone(), "");

    let records: Vec<EventRecord> = (0..10)
        .map(|i| {
            let id = i.to_string();
            rental_record(i % 2, 0, Some(id.as_str()), "a@b.com", i as f64)
        })
        .collect();
    relay.feed(records);
    relay.wait_committed(&rentals(0), 5).await;
    relay.wait_committed(&rentals(1), 5).await;

    let ids: Vec<u32> = registry
        .calls()
        .await
        .into_iter()
        .filter_map(|call| match call {
            movies_exec::RegistryCall::Upsert { rental, .. } => rental.id.parse().ok(),
            movies_exec::RegistryCall::Delete { .. } => None,
        })
        .collect();
    let even: Vec<u32> = ids.iter().copied().filter(|i| i % 2 == 0).collect();
    let odd: Vec<u32> = ids.iter().copied().filter(|i| i % 2 == 1).collect();
    assert_eq!(even, vec![0, 2, 4, 6, 8]);
    assert_eq!(odd, vec![1, 3, 5, 7, 9]);
    assert_eq!(relay.stop().await, 10);
}

#[tokio::test]
async fn test_shutdown_finishes_in_flight_record() {
    let registry = Arc::new(StubRegistry::with_latency(Duration::from_millis(300)));
    let relay = Relay::start(registry.clone(), "");

    relay.feed(vec![rental_record(0, 0, Some("42"), "a@b.com", 1.0)]);
    tokio::time::timeout(Duration::from_secs(5), async {
        while relay.metrics.assigned_partitions() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let log = relay.log.clone();
    assert_eq!(relay.stop().await, 1);
    assert_eq!(log.committed(&rentals(0)), Some(1));
}
