//! Delivery executor: turns commands into registry calls.
//!
//! Every failure path becomes a failed [`DeliveryOutcome`]; nothing is
//! retried here. Retrying is done by the event log redelivering the
//! uncommitted message.

use std::sync::Arc;

use tracing::{debug, warn};

use movies_domain::{Command, DeliveryOutcome, RentalCommand, ReturnCommand};

use crate::error::ExecResult;
use crate::ports::{RegistryAck, RegistryPort, RentalUpsert};

/// Issues the downstream call implied by a command.
///
/// Safe to share between partition lanes; the registry adapter owns any
/// connection pool.
#[derive(Clone)]
pub struct DeliveryExecutor {
    registry: Arc<dyn RegistryPort>,
}

impl DeliveryExecutor {
    /// Create an executor over a registry.
    pub fn new(registry: Arc<dyn RegistryPort>) -> Self {
        Self { registry }
    }

    /// Deliver any command.
    pub async fn deliver(&self, command: &Command, baggage: Option<&str>) -> DeliveryOutcome {
        match command {
            Command::Rental(rental) => self.deliver_rental(rental, baggage).await,
            Command::Return(ret) => self.deliver_return(ret, baggage).await,
        }
    }

    /// Upsert `{id, price}` for a rental.
    pub async fn deliver_rental(
        &self,
        command: &RentalCommand,
        baggage: Option<&str>,
    ) -> DeliveryOutcome {
        let body = RentalUpsert::from_command(command);
        debug!(movie_id = %body.id, price = %body.price, "Upserting rental");

        let outcome = classify(self.registry.upsert_rental(&body, baggage).await);
        if !outcome.succeeded {
            warn!(
                movie_id = %body.id,
                status = ?outcome.http_status,
                "Rental delivery failed, message will not be committed"
            );
        }
        outcome
    }

    /// Delete the rental addressed by a return.
    pub async fn deliver_return(
        &self,
        command: &ReturnCommand,
        baggage: Option<&str>,
    ) -> DeliveryOutcome {
        debug!(catalog_id = %command.catalog_id, "Deleting rental");

        let outcome = classify(self.registry.delete_rental(&command.catalog_id, baggage).await);
        if !outcome.succeeded {
            warn!(
                catalog_id = %command.catalog_id,
                status = ?outcome.http_status,
                "Return delivery failed, message will not be committed"
            );
        }
        outcome
    }
}

fn classify(result: ExecResult<RegistryAck>) -> DeliveryOutcome {
    match result {
        Ok(ack) => DeliveryOutcome::success(ack.http_status),
        Err(e) => {
            debug!(error = %e, "Registry call failed");
            match e.http_status() {
                Some(status) => DeliveryOutcome::rejected(status),
                None => DeliveryOutcome::transport_failure(),
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
