//! Top-level run/stop lifecycle.
//!
//! Phase machine: `NotStarted → SessionAcquired → Authenticated →
//! SurfaceReady → ItemLoopRunning → {Completed | Failed | Stopped}`.
//! Exactly one run may be active at a time; a second start request is
//! rejected, not queued. `start()` returns a [`RunHandle`], and `stop()`
//! demands one back — there is no ambient global run registry.

use crate::auth;
use crate::automation::flow::{RunContext, RunError};
use crate::automation::item_loop::ItemLoop;
use crate::automation::run_state::RunState;
use crate::automation::selectors::UPLOAD_NAV_BUTTON;
use crate::browser::guard::PageGuard;
use crate::browser::session::BrowserSession;
use crate::content::vision::VisionAnalyzer;
use crate::core::config::PilotConfig;
use crate::core::types::{
    ProgressEvent, RunConfiguration, RunOptions, RunStatus, Severity, StatusResponse,
};
use anyhow::anyhow;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Live handle to one run: the stop flag, the event stream, and the coarse
/// status. Cloning shares the underlying run.
#[derive(Clone)]
pub struct RunHandle {
    pub id: Uuid,
    ctx: RunContext,
    status: Arc<RwLock<RunStatus>>,
    configuration: Arc<RunConfiguration>,
}

impl RunHandle {
    fn new(configuration: RunConfiguration) -> Self {
        Self {
            id: Uuid::new_v4(),
            ctx: RunContext::new(),
            status: Arc::new(RwLock::new(RunStatus::Running)),
            configuration: Arc::new(configuration),
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status.read().map(|s| *s).unwrap_or(RunStatus::Error)
    }

    fn set_status(&self, status: RunStatus) {
        if let Ok(mut s) = self.status.write() {
            *s = status;
        }
    }

    pub fn is_running(&self) -> bool {
        self.status() == RunStatus::Running
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.ctx.events_snapshot()
    }

    pub fn configuration(&self) -> &RunConfiguration {
        &self.configuration
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("Automation is already running")]
    AlreadyRunning,
    #[error("{0}")]
    Credentials(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StopError {
    #[error("No automation is currently running")]
    NotRunning,
    #[error("Handle does not match the active run")]
    UnknownHandle,
}

pub struct AutomationController {
    config: Arc<PilotConfig>,
    active: Mutex<Option<RunHandle>>,
    last: Mutex<Option<RunHandle>>,
}

impl AutomationController {
    pub fn new(config: Arc<PilotConfig>) -> Self {
        Self {
            config,
            active: Mutex::new(None),
            last: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .ok()
            .and_then(|a| a.as_ref().map(|h| h.is_running()))
            .unwrap_or(false)
    }

    /// Handle of the currently-active run, if any.
    pub fn active_handle(&self) -> Option<RunHandle> {
        self.active.lock().ok().and_then(|a| a.clone())
    }

    /// Begin a run asynchronously. Rejects when a run is already active or
    /// credentials are unconfigured; on success the run executes on its own
    /// task and the returned handle observes it.
    pub fn start(self: &Arc<Self>, options: RunOptions) -> Result<RunHandle, StartError> {
        let mut active = self.active.lock().expect("active-run lock poisoned");
        if active.as_ref().map(|h| h.is_running()).unwrap_or(false) {
            return Err(StartError::AlreadyRunning);
        }

        // Interactive login needs typed credentials; cookie/attach runs can
        // proceed without them, so only those reject on missing config.
        let run_cfg = RunConfiguration::from_options(&options);
        if run_cfg.auth_mode == crate::core::types::AuthMode::Interactive {
            self.config
                .validate_credentials()
                .map_err(StartError::Credentials)?;
        }

        let handle = RunHandle::new(run_cfg);
        *active = Some(handle.clone());
        if let Ok(mut last) = self.last.lock() {
            *last = Some(handle.clone());
        }
        drop(active);

        info!("controller: run {} starting", handle.id);
        let controller = Arc::clone(self);
        let task_handle = handle.clone();
        tokio::spawn(async move {
            controller.execute(task_handle).await;
        });

        Ok(handle)
    }

    /// Flag the active run to stop. Cooperative: in-flight page operations
    /// finish before the flag is observed at the next suspension point.
    pub fn stop(&self, handle: &RunHandle) -> Result<(), StopError> {
        let active = self.active.lock().expect("active-run lock poisoned");
        match active.as_ref() {
            Some(h) if h.id == handle.id && h.is_running() => {
                h.ctx.request_stop();
                h.ctx.emit(
                    -1,
                    Severity::Warning,
                    "Stop requested, automation will halt soon...",
                );
                Ok(())
            }
            Some(h) if h.id != handle.id => Err(StopError::UnknownHandle),
            _ => Err(StopError::NotRunning),
        }
    }

    /// Point-in-time status: the active run when there is one, otherwise the
    /// last finished run, otherwise idle.
    pub fn status_snapshot(&self) -> StatusResponse {
        let handle = self
            .active_handle()
            .or_else(|| self.last.lock().ok().and_then(|l| l.clone()));
        match handle {
            Some(h) => StatusResponse {
                running: h.is_running(),
                status: h.status(),
                progress: h.events(),
            },
            None => StatusResponse {
                running: false,
                status: RunStatus::Idle,
                progress: Vec::new(),
            },
        }
    }

    /// Used by graceful shutdown: request a stop without needing a handle
    /// from outside the process.
    pub fn stop_active(&self) {
        if let Some(handle) = self.active_handle() {
            let _ = self.stop(&handle);
        }
    }

    // ── Run execution ────────────────────────────────────────────────────────

    async fn execute(self: Arc<Self>, handle: RunHandle) {
        let ctx = handle.context().clone();
        let cfg = handle.configuration().clone();

        let result = AssertUnwindSafe(self.execute_phases(&ctx, &cfg))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok((processed, successful))) => {
                ctx.emit(
                    -1,
                    Severity::Success,
                    format!(
                        "Automation completed! Processed: {}, Successful: {}",
                        processed, successful
                    ),
                );
                handle.set_status(RunStatus::Completed);
            }
            Ok(Err(RunError::StopRequested)) => {
                // Stop is not a failure: distinct message, warning severity.
                ctx.emit(-1, Severity::Warning, "Automation stopped by user");
                handle.set_status(RunStatus::Completed);
            }
            Ok(Err(RunError::Phase { phase, source })) => {
                ctx.emit(
                    -1,
                    Severity::Error,
                    format!("Automation stopped at {}: {}", phase, source),
                );
                handle.set_status(RunStatus::Failed);
            }
            Ok(Err(e)) => {
                ctx.emit(-1, Severity::Error, format!("Automation failed: {}", e));
                handle.set_status(RunStatus::Failed);
            }
            Err(_panic) => {
                ctx.emit(-1, Severity::Error, "Automation crashed unexpectedly");
                handle.set_status(RunStatus::Error);
            }
        }

        // Free the single-run slot; the handle stays in `last` for /status.
        if let Ok(mut active) = self.active.lock() {
            if active.as_ref().map(|h| h.id) == Some(handle.id) {
                *active = None;
            }
        }
        info!("controller: run {} finished ({:?})", handle.id, handle.status());
    }

    /// The ordered phase list. The session is torn down on every exit path —
    /// success, stop, guard failure, or error.
    async fn execute_phases(
        &self,
        ctx: &RunContext,
        cfg: &RunConfiguration,
    ) -> Result<(u32, u32), RunError> {
        let strategy = auth::strategy_for(cfg.auth_mode);
        let empty_policy = cfg
            .on_empty_content
            .unwrap_or_else(|| strategy.default_empty_content_policy());
        info!(
            "controller: auth strategy '{}', empty-content policy {:?}",
            strategy.name(),
            empty_policy
        );

        // Phase: SessionAcquired
        ctx.check_stop()?;
        let session = strategy
            .acquire_session(&self.config, ctx)
            .await
            .map_err(|e| RunError::phase("session setup", e))?;

        let upload_url = self.config.resolve_upload_url();
        let guard = PageGuard::new(session.driver(), upload_url.clone());
        let vision = VisionAnalyzer::from_config(&self.config);
        let mut state = RunState::new(ctx.stop_flag());

        let outcome: Result<(), RunError> = async {
            // Phase: Authenticated
            ctx.check_stop()?;
            strategy
                .authenticate(&session, &guard, ctx, &self.config)
                .await?;

            // Phase: SurfaceReady
            self.locate_upload_surface(&session, &guard, ctx, &upload_url)
                .await?;

            // Phase: ItemLoopRunning
            let mut item_loop = ItemLoop {
                driver: session.driver(),
                guard: &guard,
                ctx,
                cfg,
                upload_url: &upload_url,
                vision: vision.as_ref(),
                empty_policy,
                state: &mut state,
            };
            item_loop.run().await
        }
        .await;

        // Unconditional teardown: owned browsers close, attached ones detach.
        session.close().await;

        outcome.map(|()| (state.processed, state.successful))
    }

    /// Phase: SurfaceReady. Reach the upload surface (nav button when the
    /// portal shows one, direct navigation otherwise) and verify we are
    /// still authenticated there. Stuck-page exhaustion here is run-fatal.
    async fn locate_upload_surface(
        &self,
        session: &BrowserSession,
        guard: &PageGuard,
        ctx: &RunContext,
        upload_url: &str,
    ) -> Result<(), RunError> {
        ctx.check_stop()?;
        ctx.emit(5, Severity::Info, "Opening the upload surface...");
        let driver = session.driver();

        let clicked = driver.exists(UPLOAD_NAV_BUTTON).await.unwrap_or(false)
            && driver.click(UPLOAD_NAV_BUTTON).await.is_ok();
        if !clicked {
            driver
                .navigate(upload_url)
                .await
                .map_err(|e| RunError::phase("upload surface", e))?;
        }
        ctx.sleep_checked(Duration::from_secs(3)).await?;

        let mut attempts = 0;
        if !guard.recover_stuck(ctx, &mut attempts).await? {
            return Err(RunError::phase(
                "upload surface",
                anyhow!("upload page stuck after retries"),
            ));
        }
        if !guard.is_authenticated().await {
            return Err(RunError::phase(
                "upload surface",
                anyhow!("session is not authenticated on the upload surface"),
            ));
        }

        ctx.emit(5, Severity::Success, "Upload surface ready");
        Ok(())
    }
}
