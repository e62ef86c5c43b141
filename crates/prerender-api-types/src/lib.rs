//! Wire types shared by the prerender server and its clients.
//!
//! Timestamps are unix epoch milliseconds. Field names serialize in camelCase so the
//! status payload matches what browser-side tooling expects.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Language tag used when a request does not name one.
pub const DEFAULT_LANGUAGE: &str = "default";

/// Path serving the render status of a single page.
pub const STATUS_PATH: &str = "/__render/status";

/// Marker header set on responses served from a snapshot.
pub const RENDERED_HEADER: &str = "x-rendered";

/// Header carrying the language the snapshot was rendered for.
pub const RENDERED_LANGUAGE_HEADER: &str = "x-rendered-language";

/// Lifecycle state of a page render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderState {
    Idle,
    Rendering,
    Completed,
    Failed,
}

impl RenderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderState::Idle => "idle",
            RenderState::Rendering => "rendering",
            RenderState::Completed => "completed",
            RenderState::Failed => "failed",
        }
    }
}

impl fmt::Display for RenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render bookkeeping for one cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderStatus {
    pub status: RenderState,
    pub last_updated: i64,
    /// Number of render attempts ever claimed for the key. Never decreases.
    pub render_count: u64,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RenderStatus {
    /// Status reported for a key that has never been rendered.
    pub fn idle(now_ms: i64) -> Self {
        Self {
            status: RenderState::Idle,
            last_updated: now_ms,
            render_count: 0,
            html: None,
            error: None,
        }
    }

    pub fn is_rendering(&self) -> bool {
        self.status == RenderState::Rendering
    }
}

/// Stored HTML snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub html: String,
    pub last_updated: i64,
}

/// Result of a snapshot lookup.
///
/// `html` is empty when nothing has been stored yet. Stale entries keep their HTML and
/// set `must_revalidate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheLookup {
    pub html: String,
    pub must_revalidate: bool,
}

impl CacheLookup {
    pub fn missing() -> Self {
        Self {
            html: String::new(),
            must_revalidate: true,
        }
    }
}

/// Query accepted by the status path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_status_uses_camel_case_and_lowercase_state() {
        let status = RenderStatus {
            status: RenderState::Rendering,
            last_updated: 1_700_000_000_000,
            render_count: 3,
            html: None,
            error: None,
        };

        let value = serde_json::to_value(&status).expect("serialize status");
        assert_eq!(value["status"], "rendering");
        assert_eq!(value["lastUpdated"], 1_700_000_000_000_i64);
        assert_eq!(value["renderCount"], 3);
        assert!(value["html"].is_null());
    }

    #[test]
    fn render_status_tolerates_missing_optional_fields() {
        let status: RenderStatus =
            serde_json::from_str(r#"{"status":"failed","lastUpdated":5,"renderCount":2}"#)
                .expect("deserialize status");
        assert_eq!(status.status, RenderState::Failed);
        assert_eq!(status.html, None);
        assert_eq!(status.error, None);
    }

    #[test]
    fn idle_status_has_zero_render_count() {
        let status = RenderStatus::idle(42);
        assert_eq!(status.status, RenderState::Idle);
        assert_eq!(status.render_count, 0);
        assert!(!status.is_rendering());
    }

    #[test]
    fn missing_lookup_requires_revalidation() {
        let lookup = CacheLookup::missing();
        assert!(lookup.html.is_empty());
        assert!(lookup.must_revalidate);
    }
}
