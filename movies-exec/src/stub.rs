//! Stub implementations for testing.
//!
//! Simulates the rental registry without making real calls. Responses
//! can be scripted per call; unscripted calls answer 200.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{ExecError, ExecResult};
use crate::ports::{RegistryAck, RegistryPort, RentalUpsert};

// =============================================================================
// Stub Registry
// =============================================================================

/// Scripted answer for one registry call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubResponse {
    /// Answer with an HTTP status (only 200 is accepted)
    Status(u16),
    /// Fail as if the registry could not be reached
    Unreachable,
}

/// A call received by the stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCall {
    /// `POST /internal/rentals`
    Upsert {
        /// Body sent
        rental: RentalUpsert,
        /// Forwarded baggage
        baggage: Option<String>,
    },
    /// `DELETE /internal/rentals/{id}`
    Delete {
        /// Catalog id addressed
        catalog_id: String,
        /// Forwarded baggage
        baggage: Option<String>,
    },
}

/// Stub registry for testing.
///
/// Keeps the rentals table in memory so upsert/delete semantics can be
/// asserted.
#[derive(Default)]
pub struct StubRegistry {
    /// Scripted responses, consumed in order
    script: Mutex<VecDeque<StubResponse>>,
    /// Calls received, in order
    calls: Mutex<Vec<RegistryCall>>,
    /// Accepted rentals (id -> price)
    rentals: Mutex<HashMap<String, String>>,
    /// Simulated latency per call
    latency: Option<Duration>,
}

impl StubRegistry {
    /// Create a stub that accepts every call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stub that sleeps before answering.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Script the answer for the next unscripted call.
    pub async fn push_response(&self, response: StubResponse) {
        self.script.lock().await.push_back(response);
    }

    /// Calls received so far.
    pub async fn calls(&self) -> Vec<RegistryCall> {
        self.calls.lock().await.clone()
    }

    /// Accepted rentals.
    pub async fn rentals(&self) -> HashMap<String, String> {
        self.rentals.lock().await.clone()
    }

    async fn answer(&self, call: RegistryCall) -> ExecResult<RegistryAck> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.calls.lock().await.push(call);

        match self.script.lock().await.pop_front().unwrap_or(StubResponse::Status(200)) {
            StubResponse::Status(200) => Ok(RegistryAck { http_status: Some(200) }),
            StubResponse::Status(status) => Err(ExecError::Rejected { status }),
            StubResponse::Unreachable => {
                Err(ExecError::Transport("Simulated registry outage".to_string()))
            }
        }
    }
}

#[async_trait]
impl RegistryPort for StubRegistry {
    async fn upsert_rental(
        &self,
        rental: &RentalUpsert,
        baggage: Option<&str>,
    ) -> ExecResult<RegistryAck> {
        let ack = self
            .answer(RegistryCall::Upsert {
                rental: rental.clone(),
                baggage: baggage.map(str::to_string),
            })
            .await?;

        self.rentals.lock().await.insert(rental.id.clone(), rental.price.clone());
        Ok(ack)
    }

    async fn delete_rental(
        &self,
        catalog_id: &str,
        baggage: Option<&str>,
    ) -> ExecResult<RegistryAck> {
        let ack = self
            .answer(RegistryCall::Delete {
                catalog_id: catalog_id.to_string(),
                baggage: baggage.map(str::to_string),
            })
            .await?;

        self.rentals.lock().await.remove(catalog_id);
        Ok(ack)
    }
}
