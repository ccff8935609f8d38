//! Startup barrier: wait for dependencies before consuming.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Retry `check` every `retry` until it succeeds.
///
/// Returns `false` when `shutdown` is cancelled first.
pub async fn wait_for<F, Fut, E>(
    dependency: &str,
    retry: Duration,
    shutdown: &CancellationToken,
    mut check: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    info!(dependency, "Waiting for dependency...");
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let result = tokio::select! {
            _ = shutdown.cancelled() => return false,
            result = check() => result,
        };

        match result {
            Ok(()) => {
                info!(dependency, attempts, "Dependency ready");
                return true;
            }
            Err(e) => warn!(dependency, attempts, error = %e, "Dependency not ready"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = tokio::time::sleep(retry) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_ready() {
        let calls = AtomicU32::new(0);
        let shutdown = CancellationToken::new();

        let ready = wait_for("kafka", Duration::from_secs(1), &shutdown, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("connection refused")
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(ready);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_wait() {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let ready = wait_for("kafka", Duration::from_secs(1), &shutdown, || async {
            Err::<(), _>("connection refused")
        })
        .await;

        assert!(!ready);
    }
}
