//! Prometheus metrics for the relay.
//!
//! Metrics live in a registry owned by the daemon rather than the process
//! default registry, so several relays (or tests) can coexist.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{DaemonError, DaemonResult};

/// How a record left its lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordResult {
    /// Delivered and committed
    Committed,
    /// Skipped by the divert filter
    Filtered,
    /// Delivery or commit failed; will be redelivered
    Failed,
}

impl RecordResult {
    /// Label value.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordResult::Committed => "committed",
            RecordResult::Filtered => "filtered",
            RecordResult::Failed => "failed",
        }
    }
}

/// Relay metrics.
pub struct RelayMetrics {
    registry: Registry,
    /// `movies_relay_records_total{topic, result}`
    records: IntCounterVec,
    /// `movies_relay_assigned_partitions`
    assigned_partitions: IntGauge,
}

impl RelayMetrics {
    /// Create and register the relay metrics.
    pub fn new() -> DaemonResult<Self> {
        let registry = Registry::new();

        let records = IntCounterVec::new(
            Opts::new(
                "movies_relay_records_total",
                "Records handled by the relay, by topic and result",
            ),
            &["topic", "result"],
        )?;
        let assigned_partitions = IntGauge::new(
            "movies_relay_assigned_partitions",
            "Partitions currently owned by this worker",
        )?;

        registry.register(Box::new(records.clone()))?;
        registry.register(Box::new(assigned_partitions.clone()))?;

        Ok(Self {
            registry,
            records,
            assigned_partitions,
        })
    }

    /// Count a handled record.
    pub fn record(&self, topic: &str, result: RecordResult) {
        self.records
            .with_label_values(&[topic, result.as_str()])
            .inc();
    }

    /// Records counted for a topic and result.
    pub fn records(&self, topic: &str, result: RecordResult) -> u64 {
        self.records
            .with_label_values(&[topic, result.as_str()])
            .get()
    }

    /// Set the number of owned partitions.
    pub fn set_assigned_partitions(&self, count: usize) {
        self.assigned_partitions.set(count as i64);
    }

    /// Number of owned partitions.
    pub fn assigned_partitions(&self) -> i64 {
        self.assigned_partitions.get()
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> DaemonResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| DaemonError::Metrics(e.to_string()))
    }
}
