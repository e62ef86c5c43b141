//! Snapshot serving middleware.
//!
//! Eligible requests (crawlers, or `__render-force=true`) on matching paths get the
//! cached snapshot of their public URL when one exists. Stale or missing snapshots schedule a background
//! revalidation; the response never waits for it.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, instrument, warn};

use crate::application::error::AppError;
use crate::application::render::RenderRequest;
use crate::domain::entities::RenderStatus;
use prerender_api_types::{RENDERED_HEADER, RENDERED_LANGUAGE_HEADER, STATUS_PATH, StatusQuery};

use super::{
    coordinator::RenderCoordinator,
    gate::{GateConfig, resolve_language},
    keys::key_for_public_url,
    trigger::RenderTrigger,
};

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Shared state for the snapshot middleware and the status handler.
#[derive(Clone)]
pub struct PrerenderState {
    pub coordinator: Arc<RenderCoordinator>,
    pub trigger: Arc<RenderTrigger>,
    pub gate: Arc<GateConfig>,
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn prerender_layer(
    State(state): State<PrerenderState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !matches!(*request.method(), Method::GET | Method::HEAD) {
        return next.run(request).await;
    }

    let uri = request.uri().clone();
    if uri.path() == STATUS_PATH
        || !state.gate.matches_path(uri.path())
        || !state.gate.is_eligible(request.headers(), uri.query())
    {
        return next.run(request).await;
    }

    let Some(public_url) = state.gate.public_url(&uri, request.headers()) else {
        warn!("cannot build public url, falling through");
        return next.run(request).await;
    };
    let language = resolve_language(uri.query(), request.headers());
    let key = key_for_public_url(&public_url, &language);

    let lookup = match state.coordinator.get_cache(&key).await {
        Ok(lookup) => lookup,
        Err(err) => {
            warn!(key = %key, error = %err, "snapshot lookup failed, falling through");
            return next.run(request).await;
        }
    };

    if lookup.must_revalidate {
        debug!(key = %key, "scheduling revalidation");
        state.trigger.spawn_revalidation(
            key.clone(),
            RenderRequest::new(public_url, language.clone()),
        );
    }

    if lookup.html.is_empty() {
        debug!(key = %key, outcome = "miss", "no snapshot, falling through");
        return next.run(request).await;
    }

    debug!(key = %key, outcome = "hit", "serving snapshot");
    snapshot_response(lookup.html, &language)
}

/// `GET /__render/status?url=<absolute url>&language=<lang>`
#[instrument(skip(state))]
pub async fn render_status(
    State(state): State<PrerenderState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<RenderStatus>, AppError> {
    let status = state
        .coordinator
        .status_url(&query.url, query.language.as_deref())?;
    Ok(Json(status))
}

fn snapshot_response(html: String, language: &str) -> Response {
    let mut response = (StatusCode::OK, html).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(HTML_CONTENT_TYPE),
    );
    headers.insert(RENDERED_HEADER, HeaderValue::from_static("true"));
    if let Ok(value) = HeaderValue::from_str(language) {
        headers.insert(RENDERED_LANGUAGE_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_response_carries_marker_headers() {
        let response = snapshot_response("<html></html>".to_string(), "en");
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], HTML_CONTENT_TYPE);
        assert_eq!(headers[RENDERED_HEADER], "true");
        assert_eq!(headers[RENDERED_LANGUAGE_HEADER], "en");
    }

    #[test]
    fn unrepresentable_language_omits_header() {
        let response = snapshot_response("<html></html>".to_string(), "bad\nvalue");
        assert!(response.headers().get(RENDERED_LANGUAGE_HEADER).is_none());
        assert_eq!(response.headers()[RENDERED_HEADER], "true");
    }
}
