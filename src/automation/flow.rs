//! Control-flow vocabulary shared by the controller, guard, and item loop.
//!
//! "Skip this item" / "stop this run" travel as explicit tagged values, not
//! exceptions: step functions return [`StepFlow`] and only genuinely fatal
//! conditions become [`RunError`].

use crate::content::pacing::{self, StopRequested};
use crate::core::types::{ProgressEvent, Severity};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

/// Outcome of a per-item step that may divert the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFlow {
    /// Step succeeded; the item continues through the pipeline.
    Continue,
    /// Abandon this item and move on; it does not count toward the quota.
    SkipItem,
    /// End the whole run gracefully (duplicate-stop, empty-fields-stop).
    StopRun,
}

/// Fatal (run-ending) conditions. Item-level trouble is handled inside the
/// loop and never surfaces here.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("stop requested")]
    StopRequested,
    #[error("challenge unresolved: {0}")]
    ChallengeUnresolved(String),
    #[error("{phase} failed: {source}")]
    Phase {
        phase: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Page(#[from] anyhow::Error),
}

impl From<StopRequested> for RunError {
    fn from(_: StopRequested) -> Self {
        RunError::StopRequested
    }
}

impl RunError {
    pub fn phase(phase: &'static str, source: anyhow::Error) -> Self {
        RunError::Phase { phase, source }
    }
}

/// The only two things the run task and the HTTP surface share: the
/// monotonic stop flag and the append-only progress-event list.
#[derive(Clone)]
pub struct RunContext {
    stop: Arc<AtomicBool>,
    events: Arc<RwLock<Vec<ProgressEvent>>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            events: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Append a progress event and mirror it to the log.
    pub fn emit(&self, step: i32, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Error => error!("step {}: {}", step, message),
            Severity::Warning => warn!("step {}: {}", step, message),
            _ => info!("step {}: {}", step, message),
        }
        if let Ok(mut events) = self.events.write() {
            events.push(ProgressEvent {
                step,
                message,
                severity,
            });
        }
    }

    /// Request a cooperative stop. Monotonic: never cleared for the run's lifetime.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Bail out with `RunError::StopRequested` when the flag is set.
    pub fn check_stop(&self) -> Result<(), RunError> {
        if self.stop_requested() {
            return Err(RunError::StopRequested);
        }
        Ok(())
    }

    /// Stop-aware sleep (≤100 ms ticks, see [`pacing::sleep_with_stop`]).
    pub async fn sleep_checked(&self, duration: Duration) -> Result<(), RunError> {
        pacing::sleep_with_stop(duration, &self.stop).await?;
        Ok(())
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn events_snapshot(&self) -> Vec<ProgressEvent> {
        self.events.read().map(|e| e.clone()).unwrap_or_default()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
