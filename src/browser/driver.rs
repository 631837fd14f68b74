//! The page-automation seam.
//!
//! Everything the state machine needs from a live page goes through this
//! trait, so the automation core stays free of embedded script text and the
//! whole per-item pipeline can be exercised against a scripted fake. The
//! chromiumoxide implementation lives in [`crate::browser::session`].

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Capability surface of one browser page.
///
/// Semantics the implementations must uphold:
/// * `click`/`type_text`/`focus` act on the **first** element matching the
///   selector and dispatch trusted input events.
/// * `set_field_value_with_events` writes the value **and** dispatches the
///   `input` + `change` notifications the destination's reactive form logic
///   listens for — writing the bare value is not enough.
/// * `select_option` picks an option by value and dispatches `change`.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn reload(&self) -> Result<()>;
    async fn current_url(&self) -> Result<String>;
    async fn title(&self) -> Result<String>;

    /// Number of elements currently matching `selector`.
    async fn count(&self, selector: &str) -> Result<usize>;

    async fn exists(&self, selector: &str) -> Result<bool> {
        Ok(self.count(selector).await? > 0)
    }

    async fn click(&self, selector: &str) -> Result<()>;

    /// Type into the matched field with a per-keystroke delay (human pacing).
    async fn type_text(&self, selector: &str, text: &str, per_key_delay: Duration) -> Result<()>;

    /// Current `value` of the matched input/textarea ("" when absent).
    async fn read_value(&self, selector: &str) -> Result<String>;

    /// Visible inner text of the matched element ("" when absent).
    async fn inner_text(&self, selector: &str) -> Result<String>;

    async fn set_field_value_with_events(&self, selector: &str, value: &str) -> Result<()>;
    async fn select_option(&self, selector: &str, value: &str) -> Result<()>;

    /// Poll for `selector` to appear; `Ok(false)` on timeout (not an error).
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool>;

    /// Document ready-state probe, bounded by `timeout`. Errors when the
    /// page no longer answers script evaluation at all.
    async fn ready_state(&self, timeout: Duration) -> Result<String>;

    /// Full visible body text (challenge marker scanning).
    async fn body_text(&self) -> Result<String>;

    async fn focus(&self, selector: &str) -> Result<()>;
    async fn key_down(&self, key: &str) -> Result<()>;
    async fn key_up(&self, key: &str) -> Result<()>;

    /// `href` attributes of all anchors matching `selector`.
    async fn link_hrefs(&self, selector: &str) -> Result<Vec<String>>;

    /// PNG screenshot of the first element matching `selector`.
    async fn screenshot_element(&self, selector: &str) -> Result<Vec<u8>>;

    /// Full cookie jar as raw CDP cookie objects.
    async fn cookies(&self) -> Result<Vec<serde_json::Value>>;

    /// Install raw CDP cookies into the session (call before navigation so
    /// they ride on the first request).
    async fn set_cookies(&self, cookies: &[serde_json::Value]) -> Result<()>;
}
