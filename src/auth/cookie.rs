//! Cookie-based session restore: inject the persisted jar before the first
//! navigation and verify (fail-closed) that the portal still honors it.

use crate::auth::AuthStrategy;
use crate::automation::flow::{RunContext, RunError};
use crate::browser::cookie_store;
use crate::browser::guard::PageGuard;
use crate::browser::session::BrowserSession;
use crate::core::config::PilotConfig;
use crate::core::types::{EmptyContentPolicy, Severity};
use anyhow::anyhow;
use async_trait::async_trait;
use std::time::Duration;

pub struct CookieSession;

#[async_trait]
impl AuthStrategy for CookieSession {
    fn name(&self) -> &'static str {
        "cookie"
    }

    fn default_empty_content_policy(&self) -> EmptyContentPolicy {
        EmptyContentPolicy::UseGenericFallback
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

        ctx.check_stop()?;
        ctx.emit(1, Severity::Info, "Restoring saved session cookies...");
        let cookies = cookie_store::load(config).ok_or_else(|| {
            RunError::phase(
                "authentication",
                anyhow!("no stored session cookies - run an interactive login first"),
            )
        })?;
        driver
            .set_cookies(&cookies)
            .await
            .map_err(|e| RunError::phase("authentication", e))?;

        // Cookies ride on the first request only if injection happens
        // before navigation.
        driver
            .navigate(&config.resolve_upload_url())
            .await
            .map_err(|e| RunError::phase("navigation", e))?;
        ctx.sleep_checked(Duration::from_secs(2)).await?;
        guard.ensure_no_challenge(ctx).await?;

        let mut stuck_attempts = 0;
        if !guard.recover_stuck(ctx, &mut stuck_attempts).await? {
            return Err(RunError::phase(
                "navigation",
                anyhow!("upload page stuck after retries"),
            ));
        }

        if !guard.is_authenticated().await {
            cookie_store::invalidate(config);
            return Err(RunError::phase(
                "authentication",
                anyhow!("stored session rejected by the portal (stale cookies) - store cleared"),
            ));
        }

        ctx.emit(1, Severity::Success, "Authenticated from saved session");
        Ok(())
    }
}
