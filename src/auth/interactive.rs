//! Interactive login: the portal's own sign-in form, typed with human
//! pacing, challenge-guarded at every step. On success the cookie jar is
//! persisted so later runs can use the `cookie` strategy instead.

use crate::auth::AuthStrategy;
use crate::automation::flow::{RunContext, RunError};
use crate::automation::selectors::{
    LOGIN_SUBMIT, PASSWORD_FIELD, SIGN_IN_BUTTON, USERNAME_FIELD,
};
use crate::browser::cookie_store;
use crate::browser::guard::PageGuard;
use crate::browser::session::BrowserSession;
use crate::core::config::PilotConfig;
use crate::core::types::{EmptyContentPolicy, Severity};
use anyhow::anyhow;
use async_trait::async_trait;
use std::time::Duration;

/// Keystroke pacing for credential entry.
const TYPE_DELAY: Duration = Duration::from_millis(100);

/// How long the secure-verification interstitial is allowed to sit before we
/// proceed anyway (the portal sometimes clears it late on its own).
const VERIFICATION_WAIT: Duration = Duration::from_secs(60);

pub struct InteractiveLogin;

#[async_trait]
impl AuthStrategy for InteractiveLogin {
    fn name(&self) -> &'static str {
        "interactive"
    }

    fn default_empty_content_policy(&self) -> EmptyContentPolicy {
        EmptyContentPolicy::RequireGeneration
    }

    async fn acquire_session(
        &self,
        config: &PilotConfig,
        ctx: &RunContext,
    ) -> anyhow::Result<BrowserSession> {
        ctx.emit(
            0,
            Severity::Info,
            "Setting up Chromium browser with stealth mode...",
        );
        let session = BrowserSession::launch(config.resolve_headless()).await?;
        ctx.emit(0, Severity::Success, "Browser setup complete");
        Ok(session)
    }

    async fn authenticate(
        &self,
        session: &BrowserSession,
        guard: &PageGuard,
        ctx: &RunContext,
        config: &PilotConfig,
    ) -> Result<(), RunError> {
        let driver = session.driver();
        let username = config
            .resolve_username()
            .ok_or_else(|| RunError::phase("authentication", anyhow!("username unconfigured")))?;
        let password = config
            .resolve_password()
            .ok_or_else(|| RunError::phase("authentication", anyhow!("password unconfigured")))?;

        // Step 1: portal landing page.
        ctx.check_stop()?;
        ctx.emit(1, Severity::Info, "Navigating to the portal...");
        driver
            .navigate(&config.resolve_base_url())
            .await
            .map_err(|e| RunError::phase("navigation", e))?;
        ctx.sleep_checked(Duration::from_secs(2)).await?;
        guard.ensure_no_challenge(ctx).await?;
        let mut stuck_attempts = 0;
        if !guard.recover_stuck(ctx, &mut stuck_attempts).await? {
            return Err(RunError::phase(
                "navigation",
                anyhow!("landing page stuck after retries"),
            ));
        }
        ctx.emit(1, Severity::Success, "Successfully navigated to the portal");

        // Step 2: open the sign-in form (unless a challenge redirect already
        // dropped us on the login page).
        ctx.check_stop()?;
        ctx.emit(2, Severity::Info, "Looking for sign-in button...");
        if !self.on_login_page(&driver).await {
            if driver.click(SIGN_IN_BUTTON).await.is_err() {
                guard.ensure_no_challenge(ctx).await?;
                if !self.on_login_page(&driver).await {
                    driver
                        .click(SIGN_IN_BUTTON)
                        .await
                        .map_err(|e| RunError::phase("sign-in", e))?;
                }
            }
            ctx.sleep_checked(Duration::from_secs(2)).await?;
        }
        ctx.emit(2, Severity::Success, "Sign-in form opened");

        // Step 3: username.
        ctx.check_stop()?;
        ctx.emit(3, Severity::Info, "Entering username...");
        guard.ensure_no_challenge(ctx).await?;
        let mut found = guard
            .guarded_wait(USERNAME_FIELD, Duration::from_secs(10), ctx, &mut stuck_attempts)
            .await?;
        if !found {
            // Give a human time to clear whatever is blocking the form.
            ctx.emit(3, Severity::Warning, "Waiting for user to solve captcha...");
            found = driver
                .wait_for_selector(USERNAME_FIELD, Duration::from_secs(60))
                .await
                .map_err(RunError::Page)?;
        }
        if !found {
            return Err(RunError::phase(
                "username entry",
                anyhow!("login form never appeared"),
            ));
        }
        driver
            .type_text(USERNAME_FIELD, &username, TYPE_DELAY)
            .await
            .map_err(|e| RunError::phase("username entry", e))?;
        ctx.emit(3, Severity::Success, "Username entered");

        // Step 4: password + submit.
        ctx.check_stop()?;
        ctx.emit(4, Severity::Info, "Entering password...");
        driver
            .type_text(PASSWORD_FIELD, &password, TYPE_DELAY)
            .await
            .map_err(|e| RunError::phase("password entry", e))?;
        ctx.sleep_checked(Duration::from_secs(1)).await?;
        driver
            .click(LOGIN_SUBMIT)
            .await
            .map_err(|e| RunError::phase("login submit", e))?;
        ctx.sleep_checked(Duration::from_secs(5)).await?;

        ctx.emit(4, Severity::Info, "Checking for bot protection challenge...");
        guard.ensure_no_challenge(ctx).await?;
        ctx.sleep_checked(Duration::from_secs(2)).await?;

        self.wait_out_secure_verification(&driver, ctx).await?;
        ctx.emit(4, Severity::Success, "Password entered and login submitted");

        // Persist the jar so subsequent runs can skip all of the above.
        match driver.cookies().await {
            Ok(cookies) => {
                cookie_store::save(config, &cookies);
                ctx.emit(4, Severity::Info, "Session cookies saved for future runs");
            }
            Err(e) => ctx.emit(
                4,
                Severity::Warning,
                format!("Could not persist session cookies: {}", e),
            ),
        }

        Ok(())
    }
}

impl InteractiveLogin {
    async fn on_login_page(&self, driver: &std::sync::Arc<dyn crate::PageDriver>) -> bool {
        driver
            .current_url()
            .await
            .map(|url| url.contains("login") || url.contains("securelogin"))
            .unwrap_or(false)
    }

    /// The portal sometimes lands on a secure-verification interstitial after
    /// login. Give the user a bounded window to complete it; staying on the
    /// page past the window is reported but not fatal — the surface check
    /// will fail later if verification really is required.
    async fn wait_out_secure_verification(
        &self,
        driver: &std::sync::Arc<dyn crate::PageDriver>,
        ctx: &RunContext,
    ) -> Result<(), RunError> {
        let on_verification = |url: &str| url.contains("securelogin");
        let url = driver.current_url().await.unwrap_or_default();
        if !on_verification(&url) {
            return Ok(());
        }

        ctx.emit(
            4,
            Severity::Warning,
            "Security verification page detected - please complete manually",
        );
        ctx.emit(
            4,
            Severity::Info,
            format!(
                "Waiting for verification to complete (up to {} seconds)...",
                VERIFICATION_WAIT.as_secs()
            ),
        );
        let started = tokio::time::Instant::now();
        while started.elapsed() < VERIFICATION_WAIT {
            ctx.sleep_checked(Duration::from_secs(5)).await?;
            let url = driver.current_url().await.unwrap_or_default();
            if !on_verification(&url) {
                ctx.emit(4, Severity::Success, "Verification completed, continuing...");
                return Ok(());
            }
        }
        ctx.emit(
            4,
            Severity::Warning,
            "Still on verification page - you may need more time",
        );
        Ok(())
    }
}
