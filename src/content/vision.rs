//! Vision-based content generation for items with no usable metadata.
//!
//! Wraps an OpenAI-compatible vision chat endpoint. The contract is
//! deliberately fail-soft: any transport, quota, or parse failure yields
//! `None` and the caller falls back to its configured empty-content policy —
//! a flaky generator must never take the run down with it.

use crate::content::sanitize::TITLE_MAX_CHARS;
use crate::core::config::{PilotConfig, VisionConfig};
use base64::Engine;
use tracing::{info, warn};

/// A generated (title, description) candidate for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedContent {
    pub title: String,
    pub description: String,
}

const ANALYSIS_PROMPT: &str = "Analyze this image for stock photography submission. Generate:\n\n\
1. TITLE (max 115 characters):\n\
   - Descriptive and SEO-friendly\n\
   - Highlight main subject and key elements\n\
   - Professional tone\n\
   - No colons or special characters\n\n\
2. DESCRIPTION (2-3 sentences, max 200 characters):\n\
   - Detailed description of what's in the image\n\
   - Include colors, mood, composition, and setting\n\
   - Mention potential use cases\n\
   - Professional and engaging\n\n\
Format your response EXACTLY as:\n\
TITLE: [your title here]\n\
DESCRIPTION: [your description here]";

pub struct VisionAnalyzer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl VisionAnalyzer {
    /// Build an analyzer from config, or `None` when no API key is
    /// configured anywhere (an explicit empty key still counts — key-less
    /// local endpoints are valid).
    pub fn from_config(config: &PilotConfig) -> Option<Self> {
        Self::from_vision_config(&config.vision)
    }

    pub fn from_vision_config(vision: &VisionConfig) -> Option<Self> {
        let api_key = match vision.resolve_api_key() {
            Some(k) => k,
            None => {
                warn!("vision: no API key configured — content generation unavailable");
                return None;
            }
        };
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .ok()?;
        Some(Self {
            client,
            base_url: vision.resolve_base_url(),
            api_key,
            model: vision.resolve_model(),
        })
    }

    /// Analyze a PNG screenshot of the item's preview region and return a
    /// (title, description) candidate, or `None` on any failure.
    pub async fn analyze(&self, image_png: &[u8]) -> Option<GeneratedContent> {
        match self.analyze_inner(image_png).await {
            Ok(Some(content)) => {
                info!(
                    "vision: generated title: {}...",
                    content.title.chars().take(50).collect::<String>()
                );
                Some(content)
            }
            Ok(None) => {
                warn!("vision: response did not contain TITLE:/DESCRIPTION: labels");
                None
            }
            Err(e) => {
                warn!("vision: analysis failed (non-fatal): {}", e);
                None
            }
        }
    }

    async fn analyze_inner(&self, image_png: &[u8]) -> anyhow::Result<Option<GeneratedContent>> {
        let data_url = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(image_png)
        );
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.4,
            "messages": [
                {
                    "role": "user",
                    "content": [
                        {"type": "text", "text": ANALYSIS_PROMPT},
                        {"type": "image_url", "image_url": {"url": data_url}}
                    ]
                }
            ]
        });

        let builder = self.client.post(url).json(&body);
        // Only send Authorization when a key is provided; key-less local
        // endpoints (Ollama / LM Studio) work without it.
        let builder = if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(self.api_key.trim())
        };

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("vision chat.completions failed: status={} body={}", status, text);
        }

        let value: serde_json::Value = response.json().await?;
        let content = value
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default();

        Ok(parse_labeled_response(content))
    }
}

/// Parse the model's `TITLE:` / `DESCRIPTION:` labeled lines. Both labels
/// must be present or the whole call counts as a parse failure. The title is
/// independently capped at 115 characters (112 + `...` when clipped).
pub fn parse_labeled_response(text: &str) -> Option<GeneratedContent> {
    let mut title: Option<String> = None;
    let mut description: Option<String> = None;

    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = strip_label(line, "TITLE:") {
            title = Some(clip_title(rest.trim().trim_matches(['"', '\''])));
        } else if let Some(rest) = strip_label(line, "DESCRIPTION:") {
            description = Some(rest.trim().trim_matches(['"', '\'']).to_string());
        }
    }

    match (title, description) {
        (Some(t), Some(d)) if !t.is_empty() && !d.is_empty() => Some(GeneratedContent {
            title: t,
            description: d,
        }),
        _ => None,
    }
}

/// Case-insensitive ASCII label prefix match, returning the remainder.
fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    if line.len() >= label.len()
        && line.is_char_boundary(label.len())
        && line[..label.len()].eq_ignore_ascii_case(label)
    {
        Some(&line[label.len()..])
    } else {
        None
    }
}

fn clip_title(title: &str) -> String {
    if title.chars().count() > TITLE_MAX_CHARS {
        let clipped: String = title.chars().take(TITLE_MAX_CHARS - 3).collect();
        format!("{}...", clipped)
    } else {
        title.to_string()
    }
}
