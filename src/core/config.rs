use std::path::Path;

// ---------------------------------------------------------------------------
// PilotConfig — file-based config loader (stock-pilot.json) with env-var
// fallback per field. Credentials are never logged.
// ---------------------------------------------------------------------------

/// Vision sub-config (mirrors the `vision` key in stock-pilot.json).
///
/// The content generator talks to any OpenAI-compatible vision endpoint;
/// point `llm_base_url` at Ollama / LM Studio for fully local inference.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct VisionConfig {
    /// LLM endpoint — e.g. `https://api.openai.com/v1` or `http://localhost:11434/v1`.
    pub llm_base_url: Option<String>,
    /// API key. Never logged. Leave blank (`""`) for key-less local endpoints.
    pub llm_api_key: Option<String>,
    /// Model name — must support image input, e.g. `gpt-4o-mini`.
    pub llm_model: Option<String>,
}

impl VisionConfig {
    /// API key: JSON field → `OPENAI_API_KEY` env var → `None`.
    ///
    /// `Some("")` means "no key required" (local endpoint) — generation
    /// proceeds without auth. `None` means the generator is unavailable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.llm_api_key {
            return Some(k.trim().to_string());
        }
        std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    /// LLM base URL: JSON field → `OPENAI_BASE_URL` env var → OpenAI default.
    pub fn resolve_base_url(&self) -> String {
        if let Some(u) = &self.llm_base_url {
            if !u.trim().is_empty() {
                return u.clone();
            }
        }
        std::env::var("OPENAI_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
    }

    /// Model name: JSON field → `STOCK_PILOT_VISION_MODEL` env var → `gpt-4o-mini`.
    pub fn resolve_model(&self) -> String {
        if let Some(m) = &self.llm_model {
            if !m.trim().is_empty() {
                return m.clone();
            }
        }
        std::env::var("STOCK_PILOT_VISION_MODEL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "gpt-4o-mini".to_string())
    }
}

/// Top-level config loaded from `stock-pilot.json`.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct PilotConfig {
    /// Portal account credentials (required before a run may start).
    pub portal_username: Option<String>,
    pub portal_password: Option<String>,

    /// Shared-secret gate for the `/api/*` endpoints.
    pub api_key: Option<String>,
    pub require_api_key: Option<bool>,

    /// Destination site URLs. Defaults target the production portal.
    pub base_url: Option<String>,
    pub upload_url: Option<String>,

    /// Run the browser headless. Defaults to `false` so challenges stay solvable.
    pub headless: Option<bool>,

    /// CDP websocket URL for `authMode: attach` (an already-running browser).
    pub attach_ws_url: Option<String>,

    /// Override for the cookie-store file location (tests, containers).
    pub cookie_store_path: Option<String>,

    #[serde(default)]
    pub vision: VisionConfig,
}

impl PilotConfig {
    pub fn resolve_username(&self) -> Option<String> {
        non_empty(self.portal_username.clone())
            .or_else(|| std::env::var("STOCK_PILOT_USERNAME").ok())
            .filter(|v| !v.trim().is_empty())
    }

    pub fn resolve_password(&self) -> Option<String> {
        non_empty(self.portal_password.clone())
            .or_else(|| std::env::var("STOCK_PILOT_PASSWORD").ok())
            .filter(|v| !v.trim().is_empty())
    }

    /// Both credentials present, or an error message suitable for the caller.
    pub fn validate_credentials(&self) -> Result<(), String> {
        if self.resolve_username().is_none() || self.resolve_password().is_none() {
            return Err(
                "Portal credentials not configured. Set portal_username/portal_password in \
                 stock-pilot.json or STOCK_PILOT_USERNAME/STOCK_PILOT_PASSWORD."
                    .to_string(),
            );
        }
        Ok(())
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        non_empty(self.api_key.clone()).or_else(|| {
            std::env::var("STOCK_PILOT_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
        })
    }

    pub fn resolve_require_api_key(&self) -> bool {
        if let Some(b) = self.require_api_key {
            return b;
        }
        std::env::var("STOCK_PILOT_REQUIRE_API_KEY")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }

    pub fn resolve_base_url(&self) -> String {
        non_empty(self.base_url.clone())
            .or_else(|| std::env::var("STOCK_PILOT_BASE_URL").ok().filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| "https://www.dreamstime.com".to_string())
    }

    pub fn resolve_upload_url(&self) -> String {
        non_empty(self.upload_url.clone())
            .or_else(|| std::env::var("STOCK_PILOT_UPLOAD_URL").ok().filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| format!("{}/upload", self.resolve_base_url().trim_end_matches('/')))
    }

    pub fn resolve_headless(&self) -> bool {
        if let Some(b) = self.headless {
            return b;
        }
        std::env::var("STOCK_PILOT_HEADLESS")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }

    pub fn resolve_attach_ws_url(&self) -> Option<String> {
        non_empty(self.attach_ws_url.clone()).or_else(|| {
            std::env::var("STOCK_PILOT_ATTACH_WS")
                .ok()
                .filter(|v| !v.trim().is_empty())
        })
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

/// Load `stock-pilot.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `STOCK_PILOT_CONFIG` env var path
/// 2. `./stock-pilot.json`  (process cwd)
/// 3. `../stock-pilot.json` (one level up — repo root when running from a subdir)
///
/// Missing file → `PilotConfig::default()` (silent, all env-var fallbacks apply).
/// Parse error → log a warning, return `PilotConfig::default()`.
pub fn load_pilot_config() -> PilotConfig {
    let candidates: Vec<std::path::PathBuf> = {
        let mut v = vec![
            std::path::PathBuf::from("stock-pilot.json"),
            std::path::PathBuf::from("../stock-pilot.json"),
        ];
        if let Ok(env_path) = std::env::var("STOCK_PILOT_CONFIG") {
            v.insert(0, std::path::PathBuf::from(env_path));
        }
        v
    };

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<PilotConfig>(&contents) {
                Ok(cfg) => {
                    tracing::info!("stock-pilot.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "stock-pilot.json parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    return PilotConfig::default();
                }
            },
            Err(_) => continue, // file not found at this path — try next
        }
    }

    PilotConfig::default()
}

// ---------------------------------------------------------------------------

pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";

/// Optional override for the Chromium-family browser executable.
///
/// Default behavior is **auto-discovery** (see `browser::session::find_chrome_executable()`).
/// This function only returns a value when `CHROME_EXECUTABLE` is set to an existing path.
pub fn chrome_executable_override() -> Option<String> {
    let p = std::env::var(ENV_CHROME_EXECUTABLE).ok()?;
    let p = p.trim();
    if p.is_empty() {
        return None;
    }
    if Path::new(p).exists() {
        Some(p.to_string())
    } else {
        None
    }
}
