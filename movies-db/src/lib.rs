//! Database access for the movies relay.
//!
//! Provides connection bring-up with retry and the `rentals` table store
//! used when the relay writes rentals directly instead of calling the
//! registry API. The table is owned by the registry service; no schema is
//! created here.

mod store;

pub use store::PgRentalStore;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Result type for DB operations.
pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// Check database connectivity.
pub async fn ping(pool: &PgPool) -> Result<()> {
    let result: i32 = sqlx::query_scalar("SELECT 1").fetch_one(pool).await?;

    if result != 1 {
        return Err(anyhow::anyhow!("Database connectivity check failed"));
    }
    Ok(())
}

/// Connect to Postgres, retrying until it answers.
///
/// Waits `retry` between attempts. Returns `Ok(None)` when `shutdown` is
/// cancelled before a connection was made.
pub async fn connect_with_retry(
    url: &str,
    retry: Duration,
    shutdown: &CancellationToken,
) -> Result<Option<PgPool>> {
    info!("Waiting for postgresql...");

    loop {
        let attempt = async {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(5))
                .connect(url)
                .await?;
            ping(&pool).await?;
            Ok::<_, anyhow::Error>(pool)
        };

        match attempt.await {
            Ok(pool) => {
                info!("Postgresql connected");
                return Ok(Some(pool));
            }
            Err(e) => warn!(error = %e, "Postgresql not reachable yet"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(None),
            _ = tokio::time::sleep(retry) => {}
        }
    }
}
