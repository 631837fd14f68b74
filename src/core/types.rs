use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Wire types — the /start payload and the /status, /start, /stop responses.
// Numeric fields arrive as either JSON numbers or strings; coercion failures
// fall back silently to the documented defaults instead of rejecting the
// request (external callers — n8n, webhooks — are sloppy about types).
// ---------------------------------------------------------------------------

fn de_flexible_uint<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_u64().map(|v| v.min(u32::MAX as u64) as u32),
        serde_json::Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    })
}

/// Raw automation options as accepted by `POST /start`.
///
/// Every field is optional; `RunConfiguration::from_options` fills defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunOptions {
    pub template: Option<String>,
    pub manual_description: Option<String>,
    /// "yes" / "no"
    pub model_release: Option<String>,
    /// "yes" / "no"
    pub exclusive_image: Option<String>,
    /// "yes" / "no"
    pub ai_image: Option<String>,
    /// "fast" / "slow"
    pub delay: Option<String>,
    #[serde(deserialize_with = "de_flexible_uint")]
    pub repeat_count: Option<u32>,
    #[serde(deserialize_with = "de_flexible_uint")]
    pub pause_after: Option<u32>,
    #[serde(deserialize_with = "de_flexible_uint")]
    pub pause_duration: Option<u32>,
    /// "stop" / "skip"
    pub same_id_action: Option<String>,
    /// "skip" / "useGenericFallback" / "requireGeneration"
    pub on_empty_content: Option<String>,
    /// "interactive" / "cookie" / "attach"
    pub auth_mode: Option<String>,
}

// ---------------------------------------------------------------------------
// Normalized run configuration — immutable for the lifetime of a run.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Template {
    None,
    Template1,
    Template2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pacing {
    Fast,
    Slow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameIdAction {
    Stop,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmptyContentPolicy {
    /// Skip the item without attempting content generation.
    Skip,
    /// Attempt generation, fall back to the generic placeholder on failure.
    UseGenericFallback,
    /// Attempt generation, skip the item when it fails.
    RequireGeneration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Interactive,
    Cookie,
    Attach,
}

/// Validated, immutable per-run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfiguration {
    pub template: Template,
    pub manual_description: String,
    pub model_release: bool,
    pub exclusive_image: bool,
    pub ai_image: bool,
    pub delay: Pacing,
    pub repeat_count: u32,
    pub pause_after: u32,
    pub pause_duration: u32,
    pub same_id_action: SameIdAction,
    /// `None` on the wire resolves to the auth strategy's historical default.
    pub on_empty_content: Option<EmptyContentPolicy>,
    pub auth_mode: AuthMode,
}

pub const DEFAULT_REPEAT_COUNT: u32 = 999;
pub const DEFAULT_PAUSE_AFTER: u32 = 0;
pub const DEFAULT_PAUSE_DURATION: u32 = 60;

impl RunConfiguration {
    /// Normalize raw wire options. Unknown enum strings and out-of-range
    /// numerics fall back to the defaults rather than rejecting the run.
    pub fn from_options(opts: &RunOptions) -> Self {
        let template = match opts.template.as_deref().map(str::trim) {
            Some("none") => Template::None,
            Some("template2") => Template::Template2,
            _ => Template::Template1,
        };
        let delay = match opts.delay.as_deref().map(str::trim) {
            Some("slow") => Pacing::Slow,
            _ => Pacing::Fast,
        };
        let same_id_action = match opts.same_id_action.as_deref().map(str::trim) {
            Some("stop") => SameIdAction::Stop,
            _ => SameIdAction::Skip,
        };
        let on_empty_content = match opts.on_empty_content.as_deref().map(str::trim) {
            Some("skip") => Some(EmptyContentPolicy::Skip),
            Some("useGenericFallback") => Some(EmptyContentPolicy::UseGenericFallback),
            Some("requireGeneration") => Some(EmptyContentPolicy::RequireGeneration),
            _ => None,
        };
        let auth_mode = match opts.auth_mode.as_deref().map(str::trim) {
            Some("cookie") => AuthMode::Cookie,
            Some("attach") => AuthMode::Attach,
            _ => AuthMode::Interactive,
        };
        let yes = |v: &Option<String>, default: bool| match v.as_deref().map(str::trim) {
            Some("yes") => true,
            Some("no") => false,
            _ => default,
        };
        // Target count must be positive; zero falls back like a parse failure.
        let repeat_count = match opts.repeat_count {
            Some(0) | None => DEFAULT_REPEAT_COUNT,
            Some(n) => n,
        };

        Self {
            template,
            manual_description: opts
                .manual_description
                .as_deref()
                .unwrap_or_default()
                .trim()
                .to_string(),
            model_release: yes(&opts.model_release, false),
            exclusive_image: yes(&opts.exclusive_image, false),
            ai_image: yes(&opts.ai_image, true),
            delay,
            repeat_count,
            pause_after: opts.pause_after.unwrap_or(DEFAULT_PAUSE_AFTER),
            pause_duration: opts.pause_duration.unwrap_or(DEFAULT_PAUSE_DURATION),
            same_id_action,
            on_empty_content,
            auth_mode,
        }
    }
}

// ---------------------------------------------------------------------------
// Progress events + status reporting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// One observable state transition; `step == -1` marks run-level events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub step: i32,
    pub message: String,
    pub severity: Severity,
}

/// Coarse roll-up status exposed by `/status`.
///
/// A user-requested stop rolls up as `completed` (with a distinct
/// warning-severity final event) — stop is not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub status: RunStatus,
    pub progress: Vec<ProgressEvent>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub success: bool,
    pub message: String,
    pub options: RunConfiguration,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            message: message.into(),
        }
    }
}
