//! Postgres-backed rentals store.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use movies_exec::{ExecError, ExecResult, RegistryAck, RegistryPort, RentalUpsert};

const UPSERT_RENTAL: &str =
    r#"INSERT INTO rentals (id, price) VALUES ($1, $2) ON CONFLICT (id) DO UPDATE SET price = $2"#;

const DELETE_RENTAL: &str = r#"DELETE FROM rentals WHERE id = $1"#;

/// Writes rentals straight into the `rentals (id, price)` table.
///
/// Baggage has no meaning for a local write and is ignored.
#[derive(Debug, Clone)]
pub struct PgRentalStore {
    pool: PgPool,
}

impl PgRentalStore {
    /// Create a store over a pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RegistryPort for PgRentalStore {
    async fn upsert_rental(
        &self,
        rental: &RentalUpsert,
        _baggage: Option<&str>,
    ) -> ExecResult<RegistryAck> {
        sqlx::query(UPSERT_RENTAL)
            .bind(&rental.id)
            .bind(&rental.price)
            .execute(&self.pool)
            .await
            .map_err(|e| ExecError::Store(e.to_string()))?;

        debug!(id = %rental.id, price = %rental.price, "Rental upserted");
        Ok(RegistryAck { http_status: None })
    }

    async fn delete_rental(
        &self,
        catalog_id: &str,
        _baggage: Option<&str>,
    ) -> ExecResult<RegistryAck> {
        let result = sqlx::query(DELETE_RENTAL)
            .bind(catalog_id)
            .execute(&self.pool)
            .await
            .map_err(|e| ExecError::Store(e.to_string()))?;

        debug!(id = %catalog_id, rows = result.rows_affected(), "Rental deleted");
        Ok(RegistryAck { http_status: None })
    }
}
