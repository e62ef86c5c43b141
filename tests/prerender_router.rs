use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use prerender::application::render::{RenderEngine, RenderError, RenderRequest};
use prerender::cache::{CacheConfig, GateConfig, PrerenderState, RenderCoordinator, RenderTrigger};
use prerender::domain::clock::ManualClock;
use prerender::domain::entities::{RenderState, RenderStatus};
use prerender::infra::assets::AssetState;
use prerender::infra::http::{RouterState, build_router};
use prerender::infra::storage::MemoryStorage;
use tower::ServiceExt;
use url::Url;

const GOOGLEBOT: &str = "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";
const BROWSER: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0";
const SHELL: &str = "<html><head></head><body><div id=\"app\"></div></body></html>";

/// Engine answering every request with a fixed document and remembering what it was asked.
#[derive(Default)]
struct RecordingEngine {
    requests: Mutex<Vec<RenderRequest>>,
}

impl RecordingEngine {
    fn requests(&self) -> Vec<RenderRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RenderEngine for RecordingEngine {
    async fn render(&self, request: &RenderRequest) -> Result<String, RenderError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        Ok(format!(
            "<html><head></head><body>rendered {} in {}</body></html>",
            request.url, request.language
        ))
    }
}

struct Harness {
    router: Router,
    trigger: Arc<RenderTrigger>,
    engine: Arc<RecordingEngine>,
    _assets: tempfile::TempDir,
}

async fn harness(patterns: &[&str]) -> Harness {
    let origin = Url::parse("https://www.example.com").expect("origin");
    harness_with(patterns, Some(origin)).await
}

async fn harness_with(patterns: &[&str], origin: Option<Url>) -> Harness {
    let assets = tempfile::tempdir().expect("tempdir");
    std::fs::write(assets.path().join("index.html"), SHELL).expect("index");

    let coordinator = Arc::new(
        RenderCoordinator::start(
            CacheConfig::default(),
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::new(1_700_000_000_000)),
        )
        .await
        .expect("coordinator"),
    );
    let engine = Arc::new(RecordingEngine::default());
    let trigger = Arc::new(RenderTrigger::new(
        Arc::clone(&coordinator),
        engine.clone(),
    ));
    let patterns: Vec<String> = patterns.iter().map(|pattern| pattern.to_string()).collect();
    let gate = GateConfig::new(&patterns, &[], origin).expect("gate");

    let router = build_router(RouterState {
        prerender: PrerenderState {
            coordinator,
            trigger: Arc::clone(&trigger),
            gate: Arc::new(gate),
        },
        assets: AssetState::new(assets.path()),
    });

    Harness {
        router,
        trigger,
        engine,
        _assets: assets,
    }
}

fn page_request(uri: &str, agent: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::USER_AGENT, agent)
        .header(header::ACCEPT_LANGUAGE, "en;q=0.9,fr;q=0.8")
        .body(Body::empty())
        .expect("request")
}

fn page_request_for_host(uri: &str, host: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, host)
        .header(header::USER_AGENT, GOOGLEBOT)
        .header(header::ACCEPT_LANGUAGE, "en")
        .body(Body::empty())
        .expect("request")
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

#[tokio::test]
async fn crawler_gets_shell_then_snapshot() {
    let harness = harness(&[]).await;

    let first = harness
        .router
        .clone()
        .oneshot(page_request("/page?x=1", GOOGLEBOT))
        .await
        .expect("first response");
    assert_eq!(first.status(), StatusCode::OK);
    assert!(first.headers().get("x-rendered").is_none());
    assert_eq!(body_text(first).await, SHELL);

    assert!(harness.trigger.drain(Duration::from_secs(5)).await);
    let requests = harness.engine.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "https://www.example.com/page?x=1");
    assert_eq!(requests[0].language, "en");

    let second = harness
        .router
        .clone()
        .oneshot(page_request("/page?x=1", GOOGLEBOT))
        .await
        .expect("second response");
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers()["x-rendered"], "true");
    assert_eq!(second.headers()["x-rendered-language"], "en");
    assert_eq!(
        second.headers()[header::CONTENT_TYPE],
        "text/html; charset=utf-8"
    );
    assert!(body_text(second).await.contains("rendered https://www.example.com/page?x=1"));

    assert!(harness.trigger.drain(Duration::from_secs(5)).await);
    assert_eq!(harness.engine.requests().len(), 1);
}

#[tokio::test]
async fn regular_browsers_bypass_snapshots() {
    let harness = harness(&[]).await;

    let response = harness
        .router
        .clone()
        .oneshot(page_request("/page", BROWSER))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-rendered").is_none());

    assert!(harness.trigger.drain(Duration::from_secs(5)).await);
    assert!(harness.engine.requests().is_empty());
}

#[tokio::test]
async fn force_parameter_makes_browsers_eligible() {
    let harness = harness(&[]).await;

    let uri = "/page?__render-force=true&__render-language=de";
    harness
        .router
        .clone()
        .oneshot(page_request(uri, BROWSER))
        .await
        .expect("first response");
    assert!(harness.trigger.drain(Duration::from_secs(5)).await);

    let requests = harness.engine.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "https://www.example.com/page");
    assert_eq!(requests[0].language, "de");

    let second = harness
        .router
        .clone()
        .oneshot(page_request(uri, BROWSER))
        .await
        .expect("second response");
    assert_eq!(second.headers()["x-rendered"], "true");
    assert_eq!(second.headers()["x-rendered-language"], "de");
}

#[tokio::test]
async fn paths_outside_patterns_are_never_rendered() {
    let harness = harness(&["/blog/.*"]).await;

    harness
        .router
        .clone()
        .oneshot(page_request("/shop/item", GOOGLEBOT))
        .await
        .expect("response");
    harness
        .router
        .clone()
        .oneshot(page_request("/blog/post-1", GOOGLEBOT))
        .await
        .expect("response");
    assert!(harness.trigger.drain(Duration::from_secs(5)).await);

    let urls: Vec<String> = harness
        .engine
        .requests()
        .into_iter()
        .map(|request| request.url)
        .collect();
    assert_eq!(urls, vec!["https://www.example.com/blog/post-1"]);
}

#[tokio::test]
async fn status_path_reports_render_state() {
    let harness = harness(&[]).await;

    harness
        .router
        .clone()
        .oneshot(page_request("/page?x=1", GOOGLEBOT))
        .await
        .expect("page response");
    assert!(harness.trigger.drain(Duration::from_secs(5)).await);

    let response = harness
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(concat!(
                    "/__render/status",
                    "?url=https%3A%2F%2Fwww.example.com%2Fpage%3Fx%3D1&language=en"
                ))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("status response");
    assert_eq!(response.status(), StatusCode::OK);

    let status: RenderStatus = serde_json::from_str(&body_text(response).await).expect("json");
    assert_eq!(status.status, RenderState::Completed);
    assert_eq!(status.render_count, 1);
    assert!(status.error.is_none());
    assert!(status.html.is_some_and(|html| html.contains("rendered")));
}

#[tokio::test]
async fn status_path_for_unknown_page_is_idle() {
    let harness = harness(&[]).await;

    let response = harness
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/__render/status?url=https%3A%2F%2Fwww.example.com%2Fnever")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("status response");
    assert_eq!(response.status(), StatusCode::OK);

    let value: serde_json::Value =
        serde_json::from_str(&body_text(response).await).expect("json");
    assert_eq!(value["status"], "idle");
    assert_eq!(value["renderCount"], 0);
}

#[tokio::test]
async fn status_path_rejects_bad_urls() {
    let harness = harness(&[]).await;

    for uri in ["/__render/status", "/__render/status?url=not-a-url"] {
        let response = harness
            .router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("status response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn missing_asset_with_extension_is_not_found() {
    let harness = harness(&[]).await;

    let response = harness
        .router
        .clone()
        .oneshot(page_request("/assets/missing.js", BROWSER))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn snapshots_are_partitioned_by_host_without_public_origin() {
    let harness = harness_with(&[], None).await;

    harness
        .router
        .clone()
        .oneshot(page_request_for_host("/page", "evil.example"))
        .await
        .expect("evil response");
    assert!(harness.trigger.drain(Duration::from_secs(5)).await);

    let good = harness
        .router
        .clone()
        .oneshot(page_request_for_host("/page", "good.example"))
        .await
        .expect("good response");
    assert!(good.headers().get("x-rendered").is_none());
    assert_eq!(body_text(good).await, SHELL);
    assert!(harness.trigger.drain(Duration::from_secs(5)).await);

    let urls: Vec<String> = harness
        .engine
        .requests()
        .into_iter()
        .map(|request| request.url)
        .collect();
    assert_eq!(
        urls,
        vec!["http://evil.example/page", "http://good.example/page"]
    );

    let good = harness
        .router
        .clone()
        .oneshot(page_request_for_host("/page", "good.example"))
        .await
        .expect("good snapshot");
    assert_eq!(good.headers()["x-rendered"], "true");
    let body = body_text(good).await;
    assert!(body.contains("rendered http://good.example/page"));
    assert!(!body.contains("evil.example"));
}
