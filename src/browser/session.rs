//! Native browser session management using `chromiumoxide`.
//!
//! This module is the single source of truth for:
//! * Finding a usable browser executable (env override → PATH scan →
//!   well-known install paths).
//! * Launching a stealth-configured browser, or attaching to an
//!   already-running one over its CDP websocket.
//! * `CdpPage` — the [`PageDriver`] implementation. Every piece of embedded
//!   JavaScript in the crate lives here; the automation core never sees
//!   script text.
//! * Guaranteed teardown: owned browsers are closed, attached browsers are
//!   detached, on every exit path.

use crate::browser::driver::PageDriver;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, SetCookiesParams};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, ReloadParams,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use rand::seq::IndexedRandom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

// ── Realistic User-Agent pool ────────────────────────────────────────────────

const DESKTOP_USER_AGENTS: &[&str] = &[
    // Chrome 132 – Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    // Chrome 132 – macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    // Chrome 131 – Linux
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    // Edge 132 – Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36 Edg/132.0.0.0",
];

/// Returns a randomly-chosen realistic desktop User-Agent string.
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::rng();
    DESKTOP_USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(DESKTOP_USER_AGENTS[0])
}

// ── Browser executable discovery ─────────────────────────────────────────────

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (explicit override)
/// 2. PATH scan — finds package-manager installs on all platforms.
/// 3. OS-specific well-known install paths.
pub fn find_chrome_executable() -> Option<String> {
    if let Some(p) = crate::core::config::chrome_executable_override() {
        return Some(p);
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
            "brave-browser",
            "brave",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/brave-browser",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

/// Stealth init script injected on every new document: hides the automation
/// fingerprint the destination's bot detection looks for.
const STEALTH_INIT_SCRIPT: &str = r#"
// Remove webdriver property
Object.defineProperty(navigator, 'webdriver', {
    get: () => undefined
});

// Mock plugins
Object.defineProperty(navigator, 'plugins', {
    get: () => [1, 2, 3, 4, 5]
});

// Mock languages
Object.defineProperty(navigator, 'languages', {
    get: () => ['en-US', 'en']
});

// Add Chrome runtime
window.chrome = { runtime: {} };
"#;

/// Build a `BrowserConfig` with stealth defaults.
///
/// Flags chosen for:
/// * Compatibility with CI / restricted environments (`--no-sandbox`,
///   `--disable-dev-shm-usage`).
/// * Stealth — `--disable-blink-features=AutomationControlled` hides the
///   `navigator.webdriver` flag; UA is drawn from `DESKTOP_USER_AGENTS`.
pub fn build_stealth_config(exe: &str, headless: bool) -> Result<BrowserConfig> {
    let ua = random_user_agent();

    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width: 1280,
            height: 720,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(1280, 720)
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--mute-audio")
        // Stealth: suppress CDP automation fingerprint
        .arg("--disable-blink-features=AutomationControlled")
        .arg(format!("--user-agent={}", ua));

    if !headless {
        builder = builder.with_head();
    }

    builder
        .build()
        .map_err(|e| anyhow!("Failed to build browser config: {}", e))
}

// ── BrowserSession ───────────────────────────────────────────────────────────

/// One live browser session: the page driver plus ownership bookkeeping.
///
/// Owned sessions (launched by us) are closed at teardown; attached sessions
/// (an externally-running browser) are only detached — the browser keeps
/// running.
pub struct BrowserSession {
    driver: Arc<dyn PageDriver>,
    browser: Option<Browser>,
    handler_task: Option<JoinHandle<()>>,
    owned: bool,
}

impl BrowserSession {
    /// Launch a fresh stealth browser and open a blank page.
    pub async fn launch(headless: bool) -> Result<Self> {
        let exe = find_chrome_executable().ok_or_else(|| {
            anyhow!(
                "No browser found. Install Chrome or Chromium, or set CHROME_EXECUTABLE \
                 if installed in a non-standard location."
            )
        })?;
        info!("session: launching browser ({}, headless={})", exe, headless);

        let config = build_stealth_config(&exe, headless)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| anyhow!("Failed to launch browser ({}): {}", exe, e))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("session: CDP handler error: {}", e);
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow!("Failed to open page: {}", e))?;

        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            STEALTH_INIT_SCRIPT,
        ))
        .await
        .map_err(|e| anyhow!("Failed to inject stealth script: {}", e))?;

        Ok(Self {
            driver: Arc::new(CdpPage::new(page)),
            browser: Some(browser),
            handler_task: Some(handler_task),
            owned: true,
        })
    }

    /// Attach to an already-running browser over its CDP websocket URL.
    /// The session is externally owned: teardown detaches, never closes.
    pub async fn attach(ws_url: &str) -> Result<Self> {
        info!("session: attaching to external browser at {}", ws_url);
        let (browser, mut handler) = Browser::connect(ws_url)
            .await
            .map_err(|e| anyhow!("Failed to attach to browser at {}: {}", ws_url, e))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("session: CDP handler error (attached): {}", e);
                }
            }
        });

        // Reuse the first existing page when there is one; otherwise open our own.
        let page = match browser.pages().await {
            Ok(pages) if !pages.is_empty() => pages.into_iter().next().unwrap(),
            _ => browser
                .new_page("about:blank")
                .await
                .map_err(|e| anyhow!("Failed to open page on attached browser: {}", e))?,
        };

        Ok(Self {
            driver: Arc::new(CdpPage::new(page)),
            browser: Some(browser),
            handler_task: Some(handler_task),
            owned: false,
        })
    }

    /// Wrap an arbitrary driver (tests, simulations). No teardown work.
    pub fn for_driver(driver: Arc<dyn PageDriver>) -> Self {
        Self {
            driver,
            browser: None,
            handler_task: None,
            owned: false,
        }
    }

    pub fn driver(&self) -> Arc<dyn PageDriver> {
        Arc::clone(&self.driver)
    }

    /// Tear the session down. Closes owned browsers; attached browsers only
    /// lose the websocket connection and keep running.
    pub async fn close(mut self) {
        if let Some(mut browser) = self.browser.take() {
            if self.owned {
                if let Err(e) = browser.close().await {
                    warn!("session: browser close error (non-fatal): {}", e);
                } else {
                    info!("session: browser closed");
                }
            } else {
                info!("session: detached from external browser");
            }
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
    }
}

// ── CdpPage — PageDriver over chromiumoxide ──────────────────────────────────

/// [`PageDriver`] implementation over a live CDP page.
pub struct CdpPage {
    page: Page,
}

impl CdpPage {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// Evaluate an expression and deserialize the result, `Null` on any
    /// value-conversion hiccup (evaluation transport errors still surface).
    async fn eval_json(&self, expr: String) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(expr)
            .await
            .map_err(|e| anyhow!("script evaluation failed: {}", e))?;
        Ok(result
            .into_value::<serde_json::Value>()
            .unwrap_or(serde_json::Value::Null))
    }

    fn quote(text: &str) -> String {
        serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
    }
}

#[async_trait]
impl PageDriver for CdpPage {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| anyhow!("navigation to {} failed: {}", url, e))?;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.page
            .execute(ReloadParams::default())
            .await
            .map_err(|e| anyhow!("reload failed: {}", e))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| anyhow!("url read failed: {}", e))?;
        Ok(url.unwrap_or_default())
    }

    async fn title(&self) -> Result<String> {
        let title = self
            .page
            .get_title()
            .await
            .map_err(|e| anyhow!("title read failed: {}", e))?;
        Ok(title.unwrap_or_default())
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        let value = self
            .eval_json(format!(
                "document.querySelectorAll({}).length",
                Self::quote(selector)
            ))
            .await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| anyhow!("element not found for click ({}): {}", selector, e))?;
        element
            .click()
            .await
            .map_err(|e| anyhow!("click failed ({}): {}", selector, e))?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str, per_key_delay: Duration) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| anyhow!("element not found for typing ({}): {}", selector, e))?;
        element
            .click()
            .await
            .map_err(|e| anyhow!("focus click failed ({}): {}", selector, e))?;
        // Clear any previous value before typing the fresh one.
        self.eval_json(format!(
            "(() => {{ const el = document.querySelector({}); if (el) el.value = ''; }})()",
            Self::quote(selector)
        ))
        .await?;
        for ch in text.chars() {
            element
                .type_str(ch.to_string())
                .await
                .map_err(|e| anyhow!("typing failed ({}): {}", selector, e))?;
            if !per_key_delay.is_zero() {
                tokio::time::sleep(per_key_delay).await;
            }
        }
        Ok(())
    }

    async fn read_value(&self, selector: &str) -> Result<String> {
        let value = self
            .eval_json(format!(
                "document.querySelector({})?.value || ''",
                Self::quote(selector)
            ))
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn inner_text(&self, selector: &str) -> Result<String> {
        let value = self
            .eval_json(format!(
                "document.querySelector({})?.innerText || ''",
                Self::quote(selector)
            ))
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn set_field_value_with_events(&self, selector: &str, value: &str) -> Result<()> {
        // Value write plus the notification events the destination's own
        // reactive form logic listens for. A bare value write is invisible
        // to it.
        let script = format!(
            r#"(() => {{
    const field = document.querySelector({sel});
    if (!field) return false;
    field.focus();
    field.value = {val};
    const inputEvent = new Event('input', {{ bubbles: true, cancelable: true }});
    const changeEvent = new Event('change', {{ bubbles: true, cancelable: true }});
    field.dispatchEvent(inputEvent);
    field.dispatchEvent(changeEvent);
    if (field.oninput) field.oninput(inputEvent);
    if (field.onchange) field.onchange(changeEvent);
    return true;
}})()"#,
            sel = Self::quote(selector),
            val = Self::quote(value),
        );
        let ok = self.eval_json(script).await?;
        if ok.as_bool() != Some(true) {
            anyhow::bail!("field not found: {}", selector);
        }
        Ok(())
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<()> {
        let script = format!(
            r#"(() => {{
    const select = document.querySelector({sel});
    if (!select) return false;
    select.value = {val};
    select.dispatchEvent(new Event('change', {{ bubbles: true }}));
    return true;
}})()"#,
            sel = Self::quote(selector),
            val = Self::quote(value),
        );
        let ok = self.eval_json(script).await?;
        if ok.as_bool() != Some(true) {
            anyhow::bail!("select not found: {}", selector);
        }
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool> {
        let poll = Duration::from_millis(250);
        let started = tokio::time::Instant::now();
        loop {
            if self.count(selector).await.unwrap_or(0) > 0 {
                return Ok(true);
            }
            if started.elapsed() >= timeout {
                return Ok(false);
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn ready_state(&self, timeout: Duration) -> Result<String> {
        let probe = self.eval_json("document.readyState".to_string());
        match tokio::time::timeout(timeout, probe).await {
            Ok(Ok(value)) => Ok(value.as_str().unwrap_or_default().to_string()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(anyhow!("ready-state probe timed out")),
        }
    }

    async fn body_text(&self) -> Result<String> {
        let value = self
            .eval_json("document.body ? document.body.innerText : ''".to_string())
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn focus(&self, selector: &str) -> Result<()> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; el.focus(); return true; }})()",
            Self::quote(selector)
        );
        let ok = self.eval_json(script).await?;
        if ok.as_bool() != Some(true) {
            anyhow::bail!("focus target not found: {}", selector);
        }
        Ok(())
    }

    async fn key_down(&self, key: &str) -> Result<()> {
        let params = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::RawKeyDown)
            .key(key)
            .build()
            .map_err(|e| anyhow!("key event build failed: {}", e))?;
        self.page
            .execute(params)
            .await
            .map_err(|e| anyhow!("key down failed: {}", e))?;
        Ok(())
    }

    async fn key_up(&self, key: &str) -> Result<()> {
        let params = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .key(key)
            .build()
            .map_err(|e| anyhow!("key event build failed: {}", e))?;
        self.page
            .execute(params)
            .await
            .map_err(|e| anyhow!("key up failed: {}", e))?;
        Ok(())
    }

    async fn link_hrefs(&self, selector: &str) -> Result<Vec<String>> {
        let value = self
            .eval_json(format!(
                "Array.from(document.querySelectorAll({})).map(a => a.getAttribute('href') || '')",
                Self::quote(selector)
            ))
            .await?;
        Ok(value
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn screenshot_element(&self, selector: &str) -> Result<Vec<u8>> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| anyhow!("element not found for screenshot ({}): {}", selector, e))?;
        element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(|e| anyhow!("element screenshot failed ({}): {}", selector, e))
    }

    async fn cookies(&self) -> Result<Vec<serde_json::Value>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| anyhow!("cookie read failed: {}", e))?;
        Ok(cookies
            .into_iter()
            .filter_map(|c| serde_json::to_value(c).ok())
            .collect())
    }

    async fn set_cookies(&self, cookies: &[serde_json::Value]) -> Result<()> {
        // Individual malformed cookies are skipped so a partially-stale jar
        // never blocks the session.
        let cookie_params: Vec<CookieParam> = cookies
            .iter()
            .filter_map(|v| serde_json::from_value::<CookieParam>(v.clone()).ok())
            .collect();
        if cookie_params.is_empty() {
            anyhow::bail!("stored session contained no valid cookies");
        }
        let count = cookie_params.len();
        self.page
            .execute(SetCookiesParams::new(cookie_params))
            .await
            .map_err(|e| anyhow!("cookie injection failed: {}", e))?;
        info!("session: injected {} cookies into page", count);
        Ok(())
    }
}
