//! The per-item processing state machine.
//!
//! `Discovering → Opened → PopulatingFields → Categorizing → Submitting`,
//! looping back to discovery until the quota is met, a stop is requested,
//! discovery comes up empty, the duplicate policy says stop, or a challenge
//! stays unresolved. Strictly one item in flight at a time.

use crate::automation::fields::FieldWork;
use crate::automation::flow::{RunContext, RunError, StepFlow};
use crate::automation::run_state::{RunState, MAX_DUPLICATE_RETRIES};
use crate::automation::selectors::{
    edit_target_pattern, DELETE_SUBMIT, DESCRIPTION_FIELD, DISCOVERY_FALLBACKS, NEXT_SUBMIT,
    ORIGINAL_FILENAME, READY_EDIT_LINKS, SUBMIT_BUTTON, TITLE_FIELD, UPLOAD_COUNT_BADGE,
};
use crate::browser::driver::PageDriver;
use crate::browser::guard::PageGuard;
use crate::content::pacing::sample_delay_secs;
use crate::content::vision::VisionAnalyzer;
use crate::core::types::{EmptyContentPolicy, RunConfiguration, SameIdAction, Severity};
use std::sync::Arc;
use std::time::Duration;

/// Wall-clock budget for one item, measured from the moment its editor
/// opened. An item that overruns is deleted rather than submitted so it
/// cannot block the rest of the batch.
pub const ITEM_DEADLINE: Duration = Duration::from_secs(60);

/// How long the editor's required fields get to materialize after opening.
const EDITOR_FIELD_TIMEOUT: Duration = Duration::from_secs(10);

enum LoopSignal {
    /// Keep looping (the item was submitted, skipped, or abandoned).
    Continue,
    /// Natural end of the run (no items left / duplicate-stop / field-stop).
    Done,
}

pub struct ItemLoop<'a> {
    pub driver: Arc<dyn PageDriver>,
    pub guard: &'a PageGuard,
    pub ctx: &'a RunContext,
    pub cfg: &'a RunConfiguration,
    pub upload_url: &'a str,
    pub vision: Option<&'a VisionAnalyzer>,
    pub empty_policy: EmptyContentPolicy,
    pub state: &'a mut RunState,
}

impl ItemLoop<'_> {
    /// Drive the loop to one of its termination conditions. Stop requests
    /// and unresolved challenges surface as errors; everything else is a
    /// normal return with the counts left in `RunState`.
    pub async fn run(&mut self) -> Result<(), RunError> {
        self.state.reset();
        self.ctx
            .emit(6, Severity::Info, "Checking for uploaded images...");
        self.ctx.sleep_checked(Duration::from_secs(3)).await?;

        if let Ok(badge) = self.driver.inner_text(UPLOAD_COUNT_BADGE).await {
            let badge = badge.trim().to_string();
            if !badge.is_empty() {
                self.ctx
                    .emit(6, Severity::Info, format!("Found {} image(s) uploaded", badge));
            }
        }

        let total = self.cfg.repeat_count;
        self.ctx.emit(
            6,
            Severity::Info,
            format!("Will process up to {} image(s)...", total),
        );

        while self.state.processed < total {
            self.ctx.check_stop()?;
            match self.process_next(total).await {
                Ok(LoopSignal::Continue) => {}
                Ok(LoopSignal::Done) => break,
                Err(RunError::Page(e)) => {
                    // Unclassified per-item failure: log it, get back to the
                    // upload surface, keep going. If even the recovery
                    // navigation fails the run is over.
                    self.ctx.emit(
                        6,
                        Severity::Error,
                        format!(
                            "Error processing image {}: {}",
                            self.state.processed + 1,
                            e
                        ),
                    );
                    self.driver
                        .navigate(self.upload_url)
                        .await
                        .map_err(RunError::Page)?;
                    self.ctx.sleep_checked(Duration::from_secs(3)).await?;
                }
                Err(fatal) => return Err(fatal),
            }
        }

        self.ctx.emit(
            6,
            Severity::Success,
            format!("Completed processing {} image(s)", self.state.processed),
        );
        Ok(())
    }

    /// One trip through the state machine for the next discoverable item.
    async fn process_next(&mut self, total: u32) -> Result<LoopSignal, RunError> {
        // ── Discovering ─────────────────────────────────────────────────────
        let Some(entry_selector) = self.discover().await? else {
            self.ctx
                .emit(6, Severity::Info, "No more images to process");
            return Ok(LoopSignal::Done);
        };

        self.ctx.emit(
            6,
            Severity::Info,
            format!("Processing image {} of {}", self.state.processed + 1, total),
        );

        // ── Opened ──────────────────────────────────────────────────────────
        self.driver
            .click(entry_selector)
            .await
            .map_err(RunError::Page)?;
        self.ctx.sleep_checked(Duration::from_secs(3)).await?;

        let title_ready = self
            .guard
            .guarded_wait(
                TITLE_FIELD,
                EDITOR_FIELD_TIMEOUT,
                self.ctx,
                &mut self.state.consecutive_stuck,
            )
            .await?;
        let fields_ready = title_ready
            && self
                .guard
                .guarded_wait(
                    DESCRIPTION_FIELD,
                    Duration::from_secs(5),
                    self.ctx,
                    &mut self.state.consecutive_stuck,
                )
                .await?;
        if !fields_ready {
            self.ctx.emit(
                6,
                Severity::Warning,
                "Editor fields never appeared - abandoning item",
            );
            self.return_to_upload_surface().await?;
            return Ok(LoopSignal::Continue);
        }

        let opened_at = tokio::time::Instant::now();
        self.ctx.emit(
            6,
            Severity::Success,
            format!("Opened editor for image {}", self.state.processed + 1),
        );

        // ── Duplicate check ─────────────────────────────────────────────────
        let item_id = self
            .driver
            .inner_text(ORIGINAL_FILENAME)
            .await
            .unwrap_or_default()
            .trim()
            .to_string();

        if !item_id.is_empty() && item_id == self.state.last_item_id {
            self.ctx.emit(
                6,
                Severity::Warning,
                format!("Duplicate image ID detected: {}", item_id),
            );
            match self.cfg.same_id_action {
                SameIdAction::Stop => {
                    self.ctx
                        .emit(6, Severity::Info, "Stopping due to duplicate image ID");
                    return Ok(LoopSignal::Done);
                }
                SameIdAction::Skip => {
                    self.ctx.emit(6, Severity::Info, "Skipping duplicate image");
                    self.skip_to_next_item().await?;
                    self.state.duplicate_retries += 1;
                    if self.state.duplicate_retries >= MAX_DUPLICATE_RETRIES {
                        // Force-count so a wedged queue cannot loop forever.
                        self.ctx.emit(
                            6,
                            Severity::Warning,
                            "Max duplicate retries reached - counting item as processed",
                        );
                        self.state.duplicate_retries = 0;
                        self.state.processed += 1;
                    }
                    return Ok(LoopSignal::Continue);
                }
            }
        }
        if !item_id.is_empty() {
            self.state.last_item_id = item_id.clone();
        }
        self.state.duplicate_retries = 0;

        // ── PopulatingFields ────────────────────────────────────────────────
        let field_work = FieldWork {
            driver: &self.driver,
            ctx: self.ctx,
            cfg: self.cfg,
            vision: self.vision,
            empty_policy: self.empty_policy,
        };
        match field_work
            .populate(&item_id, self.state.processed + 1)
            .await?
        {
            StepFlow::StopRun => {
                self.ctx
                    .emit(6, Severity::Info, "Stopping due to empty fields");
                return Ok(LoopSignal::Done);
            }
            StepFlow::SkipItem => {
                self.skip_to_next_item().await?;
                return Ok(LoopSignal::Continue);
            }
            StepFlow::Continue => {}
        }

        // ── Categorizing ────────────────────────────────────────────────────
        field_work.apply_ai_category().await?;
        field_work.apply_model_release().await?;
        field_work.apply_exclusive().await?;

        // ── Submitting ──────────────────────────────────────────────────────
        // An unresolved challenge at this point aborts the run; submitting
        // through a challenge would silently drop the item server-side.
        self.guard.ensure_no_challenge(self.ctx).await?;

        if opened_at.elapsed() >= ITEM_DEADLINE {
            self.ctx.emit(
                6,
                Severity::Warning,
                format!(
                    "Item cycle exceeded {}s - deleting it to unblock the batch",
                    ITEM_DEADLINE.as_secs()
                ),
            );
            if self.driver.exists(DELETE_SUBMIT).await.unwrap_or(false) {
                let _ = self.driver.click(DELETE_SUBMIT).await;
                self.ctx.sleep_checked(Duration::from_secs(2)).await?;
            }
            self.return_to_upload_surface().await?;
            return Ok(LoopSignal::Continue);
        }

        self.ctx.emit(8, Severity::Info, "Submitting image...");
        if !self
            .driver
            .exists(SUBMIT_BUTTON)
            .await
            .map_err(RunError::Page)?
        {
            self.ctx.emit(8, Severity::Error, "Submit button not found");
            self.return_to_upload_surface().await?;
            return Ok(LoopSignal::Continue);
        }
        self.driver
            .click(SUBMIT_BUTTON)
            .await
            .map_err(RunError::Page)?;
        self.ctx.sleep_checked(Duration::from_secs(3)).await?;
        self.ctx
            .emit(8, Severity::Success, "Image submitted successfully");

        self.state.processed += 1;
        self.state.successful += 1;
        let pct = self.state.processed * 100 / total;
        self.ctx.emit(
            6,
            Severity::Info,
            format!("Progress: {}% ({}/{})", pct, self.state.processed, total),
        );

        // ── Pacing ──────────────────────────────────────────────────────────
        if self.state.processed < total {
            let delay_secs = sample_delay_secs(self.cfg.delay);
            self.ctx.emit(
                6,
                Severity::Info,
                format!("Waiting {} seconds before next image...", delay_secs),
            );
            self.ctx
                .sleep_checked(Duration::from_secs(delay_secs))
                .await?;
        }

        if self.cfg.pause_after > 0
            && self.state.processed % self.cfg.pause_after == 0
            && self.state.processed < total
        {
            self.ctx.emit(
                6,
                Severity::Info,
                format!("Pausing for {} seconds...", self.cfg.pause_duration),
            );
            self.ctx
                .sleep_checked(Duration::from_secs(self.cfg.pause_duration as u64))
                .await?;
        }

        if self.state.processed < total {
            self.ctx.sleep_checked(Duration::from_secs(2)).await?;
            self.return_to_upload_surface().await?;
        }

        Ok(LoopSignal::Continue)
    }

    /// Locate the next edit target. Primary pattern first (ready-to-submit
    /// edit anchors whose target ends in a numeric identifier), then the
    /// broader thumbnail heuristics. `None` means the queue is drained —
    /// natural completion, not an error.
    async fn discover(&self) -> Result<Option<&'static str>, RunError> {
        let pattern = edit_target_pattern();

        let hrefs = self
            .driver
            .link_hrefs(READY_EDIT_LINKS)
            .await
            .map_err(RunError::Page)?;
        if hrefs.iter().any(|h| pattern.is_match(h)) {
            return Ok(Some(READY_EDIT_LINKS));
        }

        for fallback in DISCOVERY_FALLBACKS {
            let hrefs = self
                .driver
                .link_hrefs(fallback)
                .await
                .map_err(RunError::Page)?;
            if hrefs.iter().any(|h| pattern.is_match(h)) {
                return Ok(Some(fallback));
            }
        }

        // Last heuristic: edit anchors whose targets don't expose an id at
        // all (the portal sometimes routes edits through javascript: hrefs).
        if self
            .driver
            .count(READY_EDIT_LINKS)
            .await
            .map_err(RunError::Page)?
            > 0
        {
            return Ok(Some(READY_EDIT_LINKS));
        }

        Ok(None)
    }

    /// Advance the edit surface to its next item, when the control exists.
    async fn skip_to_next_item(&self) -> Result<(), RunError> {
        if self.driver.exists(NEXT_SUBMIT).await.unwrap_or(false) {
            let _ = self.driver.click(NEXT_SUBMIT).await;
            self.ctx.sleep_checked(Duration::from_secs(2)).await?;
        }
        Ok(())
    }

    /// Navigate back to the upload surface between items. Failures here
    /// propagate — with no surface to return to, the run cannot continue.
    async fn return_to_upload_surface(&self) -> Result<(), RunError> {
        self.driver
            .navigate(self.upload_url)
            .await
            .map_err(RunError::Page)?;
        self.ctx.sleep_checked(Duration::from_secs(3)).await?;
        Ok(())
    }
}
