//! Execution layer port definitions.
//!
//! Ports define the interfaces for external services (registry, event log).
//! Adapters implement these ports for specific services (HTTP registry,
//! Postgres, Kafka, in-memory, stub).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use movies_domain::{DeliveryReceipt, EventRecord, PartitionId, RentalCommand};

use crate::error::ExecResult;

// =============================================================================
// Registry Port
// =============================================================================

/// Body of the rental upsert call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalUpsert {
    /// Catalog id (upsert key)
    pub id: String,
    /// Price with six decimals
    pub price: String,
}

impl RentalUpsert {
    /// Build the upsert body for a rental.
    pub fn from_command(command: &RentalCommand) -> Self {
        Self {
            id: command.movie_id.clone(),
            price: command.wire_price(),
        }
    }
}

/// Acknowledgement from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryAck {
    /// HTTP status, for HTTP-backed registries
    pub http_status: Option<u16>,
}

/// Port for the downstream rental registry.
///
/// Implementations:
/// - `RegistryRestClient` - HTTP registry (`POST/DELETE /internal/rentals`)
/// - `PgRentalStore` - local Postgres `rentals` table
/// - `StubRegistry` - for testing
///
/// `Ok` means the call was accepted. A present `baggage` value must be
/// forwarded verbatim.
#[async_trait]
pub trait RegistryPort: Send + Sync {
    /// Create or update a rental keyed by id.
    async fn upsert_rental(
        &self,
        rental: &RentalUpsert,
        baggage: Option<&str>,
    ) -> ExecResult<RegistryAck>;

    /// Delete a rental by catalog id. Deleting an absent id may succeed.
    async fn delete_rental(&self, catalog_id: &str, baggage: Option<&str>)
        -> ExecResult<RegistryAck>;
}

// =============================================================================
// Event Log Ports
// =============================================================================

/// Ordered reader over one claimed partition.
///
/// Records are yielded in log order. After `rewind(offset)` the next
/// record yielded is the one at `offset`.
#[async_trait]
pub trait PartitionLog: Send {
    /// Partition this reader owns.
    fn partition(&self) -> &PartitionId;

    /// Next record. `None` when the partition was closed by the log.
    async fn next_record(&mut self) -> Option<ExecResult<EventRecord>>;

    /// Commit the position after a delivered record.
    async fn commit(&mut self, receipt: &DeliveryReceipt) -> ExecResult<()>;

    /// Move the read position back to `offset` so it is read again.
    async fn rewind(&mut self, offset: i64) -> ExecResult<()>;
}

/// Change in this member's partition ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    /// Partitions newly assigned to this member
    Assigned(Vec<PartitionId>),
    /// Partitions taken away from this member
    Revoked(Vec<PartitionId>),
}

/// Membership in a consumer group.
///
/// The group guarantees each partition is claimed by at most one member.
#[async_trait]
pub trait ConsumerGroup: Send {
    /// Reader type for claimed partitions
    type Log: PartitionLog + 'static;

    /// Wait for the next assignment change. Must be cancel safe.
    async fn next_change(&mut self) -> ExecResult<MembershipChange>;

    /// Open a reader for an assigned partition.
    fn claim(&mut self, partition: &PartitionId) -> ExecResult<Self::Log>;

    /// Hand revoked partitions back once their readers have stopped.
    ///
    /// Called after every `Revoked` change. The group does not give the
    /// partitions to another member before this.
    async fn release(&mut self, partitions: &[PartitionId]) -> ExecResult<()>;

    /// Leave the group, releasing all partitions.
    async fn leave(&mut self) -> ExecResult<()>;
}
