//! CDP-attach: drive a browser the user already has running (launched with
//! `--remote-debugging-port`). The browser is externally owned — teardown
//! detaches and never closes it.

use crate::auth::AuthStrategy;
use crate::automation::flow::{RunContext, RunError};
use crate::browser::guard::PageGuard;
use crate::browser::session::BrowserSession;
use crate::core::config::PilotConfig;
use crate::core::types::{EmptyContentPolicy, Severity};
use anyhow::anyhow;
use async_trait::async_trait;
use std::time::Duration;

pub struct CdpAttach;

#[async_trait]
impl AuthStrategy for CdpAttach {
    fn name(&self) -> &'static str {
        "attach"
    }

    fn default_empty_content_policy(&self) -> EmptyContentPolicy {
        EmptyContentPolicy::UseGenericFallback
    }

    async fn acquire_session(
        &self,
        config: &PilotConfig,
        ctx: &RunContext,
    ) -> anyhow::Result<BrowserSession> {
        let ws_url = config.resolve_attach_ws_url().ok_or_else(|| {
            anyhow!(
                "attach mode requires attach_ws_url in stock-pilot.json \
                 (or STOCK_PILOT_ATTACH_WS) pointing at a running browser's CDP websocket"
            )
        })?;
        ctx.emit(
            0,
            Severity::Info,
            "Attaching to an already-running browser...",
        );
        let session = BrowserSession::attach(&ws_url).await?;
        ctx.emit(0, Severity::Success, "Attached to external browser");
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
        ctx.emit(1, Severity::Info, "Navigating attached browser to the upload surface...");
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

        // The attached browser must already carry an authenticated session;
        // this strategy never types credentials.
        if !guard.is_authenticated().await {
            return Err(RunError::phase(
                "authentication",
                anyhow!("attached browser is not logged in to the portal"),
            ));
        }

        ctx.emit(1, Severity::Success, "Attached session is authenticated");
        Ok(())
    }
}
