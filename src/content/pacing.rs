//! Human-like pacing between submissions.
//!
//! Two concerns live here:
//! * drawing the randomized inter-item delay (`fast` 5–10 s, `slow` 10–15 s),
//! * sleeping in short stop-aware ticks so an external stop request is
//!   observed within one polling interval no matter how long the requested
//!   delay is.

use crate::core::types::Pacing;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Stop flag polling granularity. Every wait in the run path is decomposed
/// into ticks of at most this length.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Marker returned when a stop request interrupts a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopRequested;

/// Draw the delay (in whole seconds) applied after a successful submission.
/// Uniform inclusive, re-sampled on every call.
pub fn sample_delay_secs(mode: Pacing) -> u64 {
    use rand::prelude::*;
    let mut rng = rand::rng();
    match mode {
        Pacing::Fast => rng.random_range(5..=10),
        Pacing::Slow => rng.random_range(10..=15),
    }
}

/// Sleep for `duration`, checking `stop` every ≤100 ms.
///
/// Returns `Err(StopRequested)` as soon as the flag is observed set; the
/// caller converts this into run termination at the next suspension point.
pub async fn sleep_with_stop(duration: Duration, stop: &AtomicBool) -> Result<(), StopRequested> {
    let mut remaining = duration;
    while !remaining.is_zero() {
        if stop.load(Ordering::SeqCst) {
            return Err(StopRequested);
        }
        let tick = remaining.min(STOP_POLL_INTERVAL);
        tokio::time::sleep(tick).await;
        remaining = remaining.saturating_sub(tick);
    }
    if stop.load(Ordering::SeqCst) {
        return Err(StopRequested);
    }
    Ok(())
}
