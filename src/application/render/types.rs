use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::entities::DEFAULT_LANGUAGE;

/// Page to render, addressed by its public URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub url: String,
    pub language: String,
}

impl RenderRequest {
    pub fn new(url: impl Into<String>, language: impl Into<String>) -> Self {
        let language = language.into();
        let language = if language.trim().is_empty() {
            DEFAULT_LANGUAGE.to_string()
        } else {
            language
        };
        Self {
            url: url.into(),
            language,
        }
    }

    /// Whether the request asks for an explicit language rather than the default.
    pub fn has_explicit_language(&self) -> bool {
        self.language != DEFAULT_LANGUAGE
    }
}

/// Failures surfaced by a rendering engine. The display form is what ends up in the
/// `error` field of a failed render status.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("render timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("render transport failed: {message}")]
    Transport { message: String },
    #[error("render service responded with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("render service returned an empty document")]
    EmptyDocument,
    #[error("document rewrite failed: {message}")]
    Rewrite { message: String },
}

#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<String, RenderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_language_falls_back_to_default() {
        let request = RenderRequest::new("https://example.com/", "  ");
        assert_eq!(request.language, DEFAULT_LANGUAGE);
        assert!(!request.has_explicit_language());

        let request = RenderRequest::new("https://example.com/", "de");
        assert!(request.has_explicit_language());
    }

    #[test]
    fn status_error_mentions_code_and_body() {
        let error = RenderError::Status {
            status: 502,
            body: "browser crashed".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "render service responded with 502: browser crashed"
        );
    }
}
