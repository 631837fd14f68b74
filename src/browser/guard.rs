//! Session/page guard — classifies anomalous browser states and drives
//! bounded recovery.
//!
//! Three anomaly families:
//! * **Challenge** — anti-automation verification overlays. Recovery:
//!   best-effort automated key-hold bypass, then a bounded wait for manual
//!   intervention.
//! * **Stuck** — a page that loaded but stopped answering. Recovery: an
//!   explicit retry loop (reload → re-navigate → known-good URL), bounded by
//!   an attempt counter carried in `RunState`. Never recursive.
//! * **Not authenticated** — fail-closed detection used by the cookie and
//!   attach strategies.

use crate::automation::flow::{RunContext, RunError};
use crate::automation::run_state::MAX_STUCK_RETRIES;
use crate::automation::selectors::{
    AUTHENTICATED_MARKERS, CHALLENGE_SELECTORS, CHALLENGE_TEXT_MARKERS, CHALLENGE_TITLE_MARKERS,
    ERROR_TITLE_MARKERS, LOGIN_FORM_MARKERS,
};
use crate::browser::driver::PageDriver;
use crate::core::types::Severity;
use aho_corasick::AhoCorasick;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{info, warn};

fn challenge_text_matcher() -> &'static AhoCorasick {
    static MATCHER: OnceLock<AhoCorasick> = OnceLock::new();
    MATCHER.get_or_init(|| {
        AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(CHALLENGE_TEXT_MARKERS)
            .expect("valid challenge markers")
    })
}

fn error_title_matcher() -> &'static AhoCorasick {
    static MATCHER: OnceLock<AhoCorasick> = OnceLock::new();
    MATCHER.get_or_init(|| {
        AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(ERROR_TITLE_MARKERS)
            .expect("valid error-title markers")
    })
}

/// `true` when a page title reads like a challenge/denial interstitial.
pub fn title_has_challenge_marker(title: &str) -> bool {
    let lower = title.to_lowercase();
    CHALLENGE_TITLE_MARKERS.iter().any(|m| lower.contains(m))
}

/// `true` when a page title reads like a load failure.
pub fn title_has_error_marker(title: &str) -> bool {
    error_title_matcher().is_match(title)
}

/// `true` when visible body text carries a challenge marker.
pub fn body_has_challenge_marker(body: &str) -> bool {
    challenge_text_matcher().is_match(body)
}

pub struct PageGuard {
    driver: Arc<dyn PageDriver>,
    /// Known-good URL used as the last rung of the stuck-recovery ladder.
    default_url: String,
    max_stuck_retries: u32,
    bypass_hold_ceiling: Duration,
    bypass_poll: Duration,
    manual_poll: Duration,
    manual_ceiling: Duration,
    probe_timeout: Duration,
    settle_wait: Duration,
}

impl PageGuard {
    pub fn new(driver: Arc<dyn PageDriver>, default_url: impl Into<String>) -> Self {
        Self {
            driver,
            default_url: default_url.into(),
            max_stuck_retries: MAX_STUCK_RETRIES,
            bypass_hold_ceiling: Duration::from_secs(15),
            bypass_poll: Duration::from_millis(500),
            manual_poll: Duration::from_secs(5),
            manual_ceiling: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(3),
            settle_wait: Duration::from_secs(3),
        }
    }

    pub fn with_max_stuck_retries(mut self, max: u32) -> Self {
        self.max_stuck_retries = max;
        self
    }

    pub fn with_manual_wait(mut self, poll: Duration, ceiling: Duration) -> Self {
        self.manual_poll = poll;
        self.manual_ceiling = ceiling;
        self
    }

    pub fn with_bypass_hold(mut self, poll: Duration, ceiling: Duration) -> Self {
        self.bypass_poll = poll;
        self.bypass_hold_ceiling = ceiling;
        self
    }

    pub fn with_settle_wait(mut self, settle: Duration) -> Self {
        self.settle_wait = settle;
        self
    }

    // ── Challenge handling ───────────────────────────────────────────────────

    /// Challenge present on the current page?
    pub async fn detect_challenge(&self) -> bool {
        if let Ok(title) = self.driver.title().await {
            if title_has_challenge_marker(&title) {
                return true;
            }
        }
        for selector in CHALLENGE_SELECTORS {
            if self.driver.exists(selector).await.unwrap_or(false) {
                return true;
            }
        }
        match self.driver.body_text().await {
            Ok(body) => body_has_challenge_marker(&body),
            Err(_) => false,
        }
    }

    /// Best-effort automated bypass: focus the challenge control and hold the
    /// activation key, polling every 500 ms for up to 15 s for the markers to
    /// clear. Returns `Ok(true)` when the challenge cleared.
    pub async fn attempt_challenge_bypass(&self, ctx: &RunContext) -> Result<bool, RunError> {
        let mut focused = false;
        for selector in CHALLENGE_SELECTORS {
            if self.driver.exists(selector).await.unwrap_or(false) {
                if self.driver.focus(selector).await.is_ok() {
                    focused = true;
                }
                break;
            }
        }
        if !focused {
            // Fall back to body focus; the hold is harmless when misaimed.
            let _ = self.driver.focus("body").await;
        }

        self.driver.key_down("Enter").await.map_err(RunError::Page)?;
        let held_since = tokio::time::Instant::now();
        let mut solved = false;
        while held_since.elapsed() < self.bypass_hold_ceiling {
            if let Err(e) = ctx.sleep_checked(self.bypass_poll).await {
                let _ = self.driver.key_up("Enter").await;
                return Err(e);
            }
            if !self.detect_challenge().await {
                solved = true;
                break;
            }
        }
        let _ = self.driver.key_up("Enter").await;

        if solved {
            info!("guard: challenge cleared by automated bypass");
        } else {
            warn!("guard: automated challenge bypass did not clear the markers");
        }
        Ok(solved)
    }

    /// Bounded wait for a human to clear the challenge: poll every 5 s for up
    /// to 5 minutes, aborting immediately on a stop request. Exceeding the
    /// ceiling is terminal for the run.
    pub async fn wait_for_manual_resolution(&self, ctx: &RunContext) -> Result<(), RunError> {
        let started = tokio::time::Instant::now();
        loop {
            ctx.check_stop()?;
            if !self.detect_challenge().await {
                info!("guard: challenge cleared after manual intervention");
                return Ok(());
            }
            if started.elapsed() >= self.manual_ceiling {
                return Err(RunError::ChallengeUnresolved(format!(
                    "verification not completed within {}s",
                    self.manual_ceiling.as_secs()
                )));
            }
            ctx.sleep_checked(self.manual_poll).await?;
        }
    }

    /// Composite used before any mandatory mutation: detect → automated
    /// bypass → bounded manual wait. An unresolved challenge is run-fatal.
    pub async fn ensure_no_challenge(&self, ctx: &RunContext) -> Result<(), RunError> {
        if !self.detect_challenge().await {
            return Ok(());
        }
        ctx.emit(
            -1,
            Severity::Warning,
            "Bot protection detected. Attempting to solve...",
        );
        if self.attempt_challenge_bypass(ctx).await? {
            return Ok(());
        }
        ctx.emit(
            -1,
            Severity::Warning,
            "Automated bypass failed - waiting for manual verification...",
        );
        self.wait_for_manual_resolution(ctx).await
    }

    // ── Stuck-page handling ──────────────────────────────────────────────────

    /// A page is stuck when its URL is blank, its title reads like a load
    /// failure, or the ready-state probe fails / answers something other
    /// than `complete` / `interactive`.
    pub async fn is_stuck(&self) -> bool {
        match self.driver.current_url().await {
            Ok(url) if url.trim().is_empty() || url == "about:blank" => return true,
            Ok(_) => {}
            Err(_) => return true,
        }
        if let Ok(title) = self.driver.title().await {
            if title_has_error_marker(&title) {
                return true;
            }
        }
        match self.driver.ready_state(self.probe_timeout).await {
            Ok(state) => !matches!(state.as_str(), "complete" | "interactive"),
            Err(_) => true,
        }
    }

    /// Bounded stuck recovery. The attempt counter lives in `RunState` so
    /// the bound is shared across the whole phase; it resets on success.
    ///
    /// Returns `Ok(true)` when the page answers again, `Ok(false)` when the
    /// retry budget is exhausted — the caller treats that as "skip this
    /// item" (or run-fatal during session setup). Never recurses.
    pub async fn recover_stuck(
        &self,
        ctx: &RunContext,
        attempts: &mut u32,
    ) -> Result<bool, RunError> {
        loop {
            ctx.check_stop()?;
            if !self.is_stuck().await {
                *attempts = 0;
                return Ok(true);
            }
            if *attempts >= self.max_stuck_retries {
                warn!(
                    "guard: stuck recovery exhausted after {} attempts",
                    self.max_stuck_retries
                );
                return Ok(false);
            }
            *attempts += 1;
            info!(
                "guard: page stuck - recovery attempt {}/{}",
                *attempts, self.max_stuck_retries
            );

            // Recovery ladder: reload, then direct re-navigation, then the
            // known-good default URL.
            if self.driver.reload().await.is_err() {
                let target = self
                    .driver
                    .current_url()
                    .await
                    .ok()
                    .filter(|u| !u.trim().is_empty() && u != "about:blank")
                    .unwrap_or_else(|| self.default_url.clone());
                if self.driver.navigate(&target).await.is_err() {
                    let _ = self.driver.navigate(&self.default_url).await;
                }
            }
            ctx.sleep_checked(self.settle_wait).await?;
        }
    }

    /// Wait for `selector`, recovering from stuck pages along the way.
    /// `Ok(false)` when the element never materialized (item abandoned).
    pub async fn guarded_wait(
        &self,
        selector: &str,
        timeout: Duration,
        ctx: &RunContext,
        attempts: &mut u32,
    ) -> Result<bool, RunError> {
        ctx.check_stop()?;
        if self
            .driver
            .wait_for_selector(selector, timeout)
            .await
            .map_err(RunError::Page)?
        {
            return Ok(true);
        }
        if self.is_stuck().await {
            if !self.recover_stuck(ctx, attempts).await? {
                return Ok(false);
            }
            // One more try on the recovered page.
            return self
                .driver
                .wait_for_selector(selector, timeout)
                .await
                .map_err(RunError::Page);
        }
        Ok(false)
    }

    // ── Authentication detection ─────────────────────────────────────────────

    /// Fail-closed authenticated-state check: an authenticated-area URL is
    /// decisive; otherwise a visible login form means "no", and only a
    /// positive authenticated-only marker means "yes".
    pub async fn is_authenticated(&self) -> bool {
        if let Ok(url) = self.driver.current_url().await {
            if url.contains("/upload") || url.contains("/member/") {
                return true;
            }
        }
        for marker in LOGIN_FORM_MARKERS {
            if self.driver.exists(marker).await.unwrap_or(false) {
                return false;
            }
        }
        for marker in AUTHENTICATED_MARKERS {
            if self.driver.exists(marker).await.unwrap_or(false) {
                return true;
            }
        }
        false
    }
}
