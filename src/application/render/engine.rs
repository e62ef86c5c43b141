use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use super::{
    inject::inject_render_flag,
    types::{RenderEngine, RenderError, RenderRequest},
};

const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone)]
pub struct HttpRenderEngineConfig {
    pub endpoint: reqwest::Url,
    pub user_agent: String,
    pub timeout: Duration,
}

/// Delegates rendering to a remote headless-browser service.
///
/// The service receives `{"url", "language"}` as JSON and answers with the rendered
/// document as the response body.
#[derive(Debug, Clone)]
pub struct HttpRenderEngine {
    client: Client,
    endpoint: reqwest::Url,
}

#[derive(Serialize)]
struct RenderPayload<'a> {
    url: &'a str,
    language: &'a str,
}

impl HttpRenderEngine {
    pub fn new(config: HttpRenderEngineConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint,
        })
    }

    pub fn endpoint(&self) -> &reqwest::Url {
        &self.endpoint
    }
}

#[async_trait]
impl RenderEngine for HttpRenderEngine {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn render(&self, request: &RenderRequest) -> Result<String, RenderError> {
        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .json(&RenderPayload {
                url: &request.url,
                language: &request.language,
            });
        if request.has_explicit_language() {
            builder = builder.header(header::ACCEPT_LANGUAGE, request.language.as_str());
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        if body.trim().is_empty() {
            return Err(RenderError::EmptyDocument);
        }

        debug!(bytes = body.len(), "render service returned document");
        inject_render_flag(&body, OffsetDateTime::now_utc())
    }
}

fn transport_error(err: reqwest::Error) -> RenderError {
    RenderError::Transport {
        message: err.to_string(),
    }
}

fn status_error(status: StatusCode, body: &str) -> RenderError {
    let mut body = body.trim().to_string();
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    RenderError::Status {
        status: status.as_u16(),
        body,
    }
}
