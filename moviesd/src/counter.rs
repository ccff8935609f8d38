//! Processed-message counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Number of messages delivered and committed by this process.
///
/// Clones share the same count. Only partition lanes increment it, once
/// per committed message.
#[derive(Debug, Clone, Default)]
pub struct ProcessedCounter {
    count: Arc<AtomicU64>,
}

impl ProcessedCounter {
    /// Create a counter starting at `start`.
    pub fn starting_at(start: u64) -> Self {
        Self {
            count: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Current count.
    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Count one committed message, returning the new total.
    pub(crate) fn increment(&self) -> u64 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }
}
