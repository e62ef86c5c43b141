//! Single-page application asset serving.
//!
//! Files are read from a directory on disk. Paths that do not name a file and carry no
//! extension fall back to `index.html` so client-side routes resolve.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use mime_guess::Mime;
use tokio::fs;

use crate::application::error::ErrorReport;

const SOURCE: &str = "infra::assets::serve_spa";
const INDEX_FILE: &str = "index.html";

#[derive(Debug, Clone)]
pub struct AssetState {
    root: Arc<PathBuf>,
}

impl AssetState {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Fallback handler serving the application shell and its static files.
pub async fn serve_spa(State(assets): State<AssetState>, uri: Uri) -> Response {
    let Some(relative) = sanitize(uri.path()) else {
        return rejected_response(StatusCode::BAD_REQUEST);
    };

    let wants_file = relative
        .extension()
        .is_some_and(|extension| !extension.is_empty());
    let candidate = if relative.as_os_str().is_empty() {
        assets.root.join(INDEX_FILE)
    } else {
        assets.root.join(&relative)
    };

    if let Some(response) = read_file(&candidate).await {
        return response;
    }
    if wants_file {
        return not_found_response();
    }
    match read_file(&assets.root.join(INDEX_FILE)).await {
        Some(response) => response,
        None => not_found_response(),
    }
}

/// Turn a request path into a relative filesystem path, rejecting traversal.
fn sanitize(path: &str) -> Option<PathBuf> {
    let relative = Path::new(path.trim_start_matches('/'));
    if relative
        .components()
        .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }
    Some(relative.to_path_buf())
}

async fn read_file(path: &Path) -> Option<Response> {
    let metadata = fs::metadata(path).await.ok()?;
    if !metadata.is_file() {
        return None;
    }
    let contents = fs::read(path).await.ok()?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let is_index = path.file_name().is_some_and(|name| name == INDEX_FILE);
    Some(build_response(Bytes::from(contents), mime, is_index))
}

fn build_response(bytes: Bytes, mime: Mime, is_index: bool) -> Response {
    let len = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    let cache_control = if is_index {
        "no-cache"
    } else {
        "public, max-age=3600"
    };
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache_control));

    response
}

fn not_found_response() -> Response {
    let mut response = StatusCode::NOT_FOUND.into_response();
    ErrorReport::from_message(SOURCE, StatusCode::NOT_FOUND, "Static asset not found")
        .attach(&mut response);
    response
}

fn rejected_response(status: StatusCode) -> Response {
    let mut response = status.into_response();
    ErrorReport::from_message(SOURCE, status, "Static asset request rejected")
        .attach(&mut response);
    response
}
