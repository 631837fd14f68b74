//! Pluggable authentication/session-acquisition strategies.
//!
//! All strategies feed the same item-processing state machine; they differ
//! only in how a session is obtained and proven authenticated:
//! * `interactive` — full typed login against the portal's sign-in form.
//! * `cookie` — persisted cookies injected before navigation.
//! * `attach` — an already-running, externally-owned browser over CDP.

pub mod attach;
pub mod cookie;
pub mod interactive;

use crate::automation::flow::{RunContext, RunError};
use crate::browser::guard::PageGuard;
use crate::browser::session::BrowserSession;
use crate::core::config::PilotConfig;
use crate::core::types::{AuthMode, EmptyContentPolicy};
use async_trait::async_trait;

#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Historical behavior of this variant when an item has neither title
    /// nor description and no explicit `onEmptyContent` was configured.
    fn default_empty_content_policy(&self) -> EmptyContentPolicy;

    /// Acquire the browser session this strategy operates on.
    async fn acquire_session(
        &self,
        config: &PilotConfig,
        ctx: &RunContext,
    ) -> anyhow::Result<BrowserSession>;

    /// Drive the session to an authenticated state (or fail the run).
    async fn authenticate(
        &self,
        session: &BrowserSession,
        guard: &PageGuard,
        ctx: &RunContext,
        config: &PilotConfig,
    ) -> Result<(), RunError>;
}

pub fn strategy_for(mode: AuthMode) -> Box<dyn AuthStrategy> {
    match mode {
        AuthMode::Interactive => Box::new(interactive::InteractiveLogin),
        AuthMode::Cookie => Box::new(cookie::CookieSession),
        AuthMode::Attach => Box::new(attach::CdpAttach),
    }
}
