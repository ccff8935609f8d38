//! Event Record
//!
//! Immutable view of one record read from the event log.
//! Records are borrowed by handlers for the duration of one invocation
//! and never mutated.

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::baggage::BAGGAGE_HEADER;
use crate::error::DomainError;

// =============================================================================
// Topic
// =============================================================================

/// Topics the relay consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Rental requests (`rentals`)
    Rentals,
    /// Returned movies (`returns`)
    Returns,
}

impl Topic {
    /// Topic name on the event log.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Rentals => "rentals",
            Topic::Returns => "returns",
        }
    }
}

impl FromStr for Topic {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rentals" => Ok(Topic::Rentals),
            "returns" => Ok(Topic::Returns),
            other => Err(DomainError::UnknownTopic(other.to_string())),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Partition Identity
// =============================================================================

/// A (topic, partition) pair: the unit of ownership and ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId {
    /// Topic name as reported by the log
    pub topic: String,
    /// Partition number
    pub partition: i32,
}

impl PartitionId {
    /// Create a new partition identity.
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

// =============================================================================
// Event Record
// =============================================================================

/// One record as supplied by the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Topic name
    pub topic: String,
    /// Partition number
    pub partition: i32,
    /// Position within the partition
    pub offset: i64,
    /// Record key (absent for unkeyed records)
    pub key: Option<Vec<u8>>,
    /// Record value (absent for tombstones)
    pub value: Option<Vec<u8>>,
    /// Record headers, last value wins for repeated keys
    pub headers: BTreeMap<String, String>,
    /// Broker timestamp, when the log provides one
    pub timestamp: Option<DateTime<Utc>>,
}

impl EventRecord {
    /// Create a record with no key, headers or timestamp.
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            value: Some(value.into()),
            headers: BTreeMap::new(),
            timestamp: None,
        }
    }

    /// Set the record key.
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the broker timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Broker timestamp for log lines, `-` when unknown.
    pub fn timestamp_label(&self) -> String {
        self.timestamp
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_else(|| "-".to_string())
    }

    /// The partition this record belongs to.
    pub fn partition_id(&self) -> PartitionId {
        PartitionId::new(self.topic.clone(), self.partition)
    }

    /// Parse the record's topic.
    pub fn topic(&self) -> Result<Topic, DomainError> {
        self.topic.parse()
    }

    /// Key as text, `None` when absent or empty.
    pub fn key_str(&self) -> Option<String> {
        non_empty_text(self.key.as_deref())
    }

    /// Value as text, `None` when absent or empty.
    pub fn value_str(&self) -> Option<String> {
        non_empty_text(self.value.as_deref())
    }

    /// Raw `baggage` header, `None` when absent or empty.
    pub fn baggage(&self) -> Option<&str> {
        self.headers
            .get(BAGGAGE_HEADER)
            .map(String::as_str)
            .filter(|b| !b.is_empty())
    }
}

fn non_empty_text(bytes: Option<&[u8]>) -> Option<String> {
    bytes
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .filter(|s| !s.is_empty())
}

// =============================================================================
// Tests
// =============================================================================
