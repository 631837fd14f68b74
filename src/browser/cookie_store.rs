//! Session cookie persistence.
//!
//! One serialized-cookie-array JSON file at a fixed well-known location
//! (`~/.stock-pilot/session.json`), written wholesale on save and read
//! wholesale on load — no partial/merge semantics. Both directions are
//! best-effort: a broken store degrades to an interactive login, never to a
//! failed run.

use crate::core::config::PilotConfig;
use chrono::{TimeZone, Utc};
use std::path::PathBuf;
use tracing::{info, warn};

/// Resolve the cookie-store file path: config override → env override →
/// `~/.stock-pilot/session.json`.
pub fn store_path(config: &PilotConfig) -> Option<PathBuf> {
    if let Some(p) = &config.cookie_store_path {
        if !p.trim().is_empty() {
            return Some(PathBuf::from(p));
        }
    }
    if let Ok(p) = std::env::var("STOCK_PILOT_COOKIES") {
        if !p.trim().is_empty() {
            return Some(PathBuf::from(p));
        }
    }
    let home = dirs::home_dir()?;
    Some(home.join(".stock-pilot").join("session.json"))
}

/// Compute the minimum finite cookie expiry from a raw CDP cookie array.
///
/// CDP cookies carry an `expires` field that is either `-1.0` (session
/// cookie, no persistent expiry) or a positive Unix timestamp in seconds.
/// Returns `None` when every cookie is session-scoped.
pub fn min_cookie_expiry(raw_cookies: &[serde_json::Value]) -> Option<f64> {
    raw_cookies
        .iter()
        .filter_map(|v| v.get("expires").and_then(|e| e.as_f64()))
        .filter(|&exp| exp > 0.0)
        .reduce(f64::min)
}

/// Overwrite the store with the full current cookie set. Best-effort.
pub fn save(config: &PilotConfig, cookies: &[serde_json::Value]) {
    let Some(path) = store_path(config) else {
        warn!("cookie_store: no home directory - cookies not persisted");
        return;
    };
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("cookie_store: cannot create {}: {}", parent.display(), e);
            return;
        }
    }
    match serde_json::to_string_pretty(cookies) {
        Ok(json) => match std::fs::write(&path, json) {
            Ok(()) => {
                let expiry_hint = min_cookie_expiry(cookies)
                    .and_then(|exp| Utc.timestamp_opt(exp as i64, 0).single())
                    .map(|dt| format!(", earliest expiry {}", dt.to_rfc3339()))
                    .unwrap_or_default();
                info!(
                    "cookie_store: saved {} cookies to {}{}",
                    cookies.len(),
                    path.display(),
                    expiry_hint
                );
            }
            Err(e) => warn!("cookie_store: write failed at {}: {}", path.display(), e),
        },
        Err(e) => warn!("cookie_store: serialization failed: {}", e),
    }
}

/// Read the stored cookie array. `None` when the store is absent, empty, or
/// unreadable — the caller proceeds without persisted cookies.
pub fn load(config: &PilotConfig) -> Option<Vec<serde_json::Value>> {
    let path = store_path(config)?;
    if !path.exists() {
        return None;
    }
    let content = std::fs::read_to_string(&path).ok()?;
    let cookies: Vec<serde_json::Value> = serde_json::from_str(&content).ok()?;
    if cookies.is_empty() {
        return None;
    }
    info!(
        "cookie_store: loaded {} cookies from {}",
        cookies.len(),
        path.display()
    );
    Some(cookies)
}

/// Remove the stored session so the next run falls back to interactive login.
pub fn invalidate(config: &PilotConfig) {
    if let Some(path) = store_path(config) {
        if path.exists() {
            match std::fs::remove_file(&path) {
                Ok(()) => info!("cookie_store: removed stale session ({})", path.display()),
                Err(e) => warn!(
                    "cookie_store: failed to remove session file {}: {}",
                    path.display(),
                    e
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_with_store(path: &std::path::Path) -> PilotConfig {
        PilotConfig {
            cookie_store_path: Some(path.to_string_lossy().to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn save_then_load_round_trips_the_jar() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_store(&dir.path().join("session.json"));

        let cookies = vec![
            json!({"name": "sess", "value": "abc", "domain": ".example.com", "expires": -1.0}),
            json!({"name": "remember", "value": "1", "domain": ".example.com", "expires": 1_900_000_000.0}),
        ];
        save(&config, &cookies);

        let loaded = load(&config).expect("store should load");
        assert_eq!(loaded, cookies);
    }

    #[test]
    fn absent_store_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_store(&dir.path().join("missing.json"));
        assert!(load(&config).is_none());
    }

    #[test]
    fn empty_jar_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(load(&config_with_store(&path)).is_none());
    }

    #[test]
    fn corrupt_store_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load(&config_with_store(&path)).is_none());
    }

    #[test]
    fn invalidate_removes_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let config = config_with_store(&path);
        save(&config, &[json!({"name": "a", "value": "b"})]);
        assert!(path.exists());
        invalidate(&config);
        assert!(!path.exists());
    }

    #[test]
    fn min_expiry_skips_session_cookies() {
        let cookies = vec![
            json!({"name": "s", "expires": -1.0}),
            json!({"name": "p", "expires": 2_000_000_000.0}),
            json!({"name": "q", "expires": 1_800_000_000.0}),
        ];
        assert_eq!(min_cookie_expiry(&cookies), Some(1_800_000_000.0));
        assert_eq!(min_cookie_expiry(&[json!({"name": "s", "expires": -1.0})]), None);
    }
}
