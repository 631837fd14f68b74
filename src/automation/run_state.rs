//! Per-run mutable state, owned exclusively by the item loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Duplicate skips tolerated before an item is force-counted to break the loop.
pub const MAX_DUPLICATE_RETRIES: u32 = 3;

/// Consecutive failed stuck-page recoveries tolerated before the current
/// item/phase is declared lost.
pub const MAX_STUCK_RETRIES: u32 = 3;

/// Mutable run-scoped counters. Created at run start, reset in `run()`,
/// discarded at run end — nothing here survives across runs.
#[derive(Debug)]
pub struct RunState {
    /// Shared with the controller's stop endpoint; monotonic false→true.
    stop: Arc<AtomicBool>,
    /// Identifier of the most recently opened item (duplicate detection).
    pub last_item_id: String,
    pub duplicate_retries: u32,
    pub processed: u32,
    pub successful: u32,
    pub consecutive_stuck: u32,
}

impl RunState {
    pub fn new(stop: Arc<AtomicBool>) -> Self {
        Self {
            stop,
            last_item_id: String::new(),
            duplicate_retries: 0,
            processed: 0,
            successful: 0,
            consecutive_stuck: 0,
        }
    }

    /// Reset all counters for a fresh run. The stop flag is left alone — it
    /// belongs to the run's `RunContext` and a fresh run gets a fresh flag.
    pub fn reset(&mut self) {
        self.last_item_id.clear();
        self.duplicate_retries = 0;
        self.processed = 0;
        self.successful = 0;
        self.consecutive_stuck = 0;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}
