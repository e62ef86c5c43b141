//! Background revalidation.
//!
//! Runs `claim -> engine -> complete` off the request path. Only the caller that
//! acquired the claim talks to the engine; deduplicated calls return immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::application::render::{RenderEngine, RenderError, RenderRequest};
use crate::domain::entities::RenderStatus;

use super::coordinator::{Claim, Completion, CoordinatorError, RenderCoordinator};
use super::keys::CacheKey;

const METRIC_RENDER_MS: &str = "prerender_render_ms";
const METRIC_RENDER_FAILED: &str = "prerender_render_failed_total";

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

pub struct RenderTrigger {
    coordinator: Arc<RenderCoordinator>,
    engine: Arc<dyn RenderEngine>,
    in_flight: Arc<AtomicUsize>,
}

impl RenderTrigger {
    pub fn new(coordinator: Arc<RenderCoordinator>, engine: Arc<dyn RenderEngine>) -> Self {
        Self {
            coordinator,
            engine,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn coordinator(&self) -> &Arc<RenderCoordinator> {
        &self.coordinator
    }

    /// Revalidate `key` on a detached task. Failures are logged, never returned.
    pub fn spawn_revalidation(
        self: &Arc<Self>,
        key: CacheKey,
        request: RenderRequest,
    ) -> JoinHandle<()> {
        let guard = InFlightGuard::enter(Arc::clone(&self.in_flight));
        let trigger = Arc::clone(self);
        let span = info_span!("revalidate", key = %key, url = %request.url);

        tokio::spawn(
            async move {
                let _guard = guard;
                if let Err(err) = trigger.revalidate(&key, &request).await {
                    error!(error = %err, "revalidation could not record its outcome");
                }
            }
            .instrument(span),
        )
    }

    /// Claim `key` and, when the claim is ours, render it and record the outcome.
    ///
    /// Returns `None` when another render already holds the key, or when our claim
    /// was reclaimed before the engine answered.
    pub async fn revalidate(
        &self,
        key: &CacheKey,
        request: &RenderRequest,
    ) -> Result<Option<RenderStatus>, CoordinatorError> {
        let claim = match self.coordinator.claim(key).await? {
            Claim::InProgress(_) => {
                debug!("render deduplicated");
                return Ok(None);
            }
            Claim::Acquired(status) => status.render_count,
        };

        let completion = self.run_engine(request).await.for_claim(claim);
        match self.coordinator.complete(key, completion).await {
            Ok(status) => Ok(Some(status)),
            Err(
                err @ (CoordinatorError::StaleClaim { .. }
                | CoordinatorError::NotRendering { .. }),
            ) => {
                warn!(error = %err, "render superseded, outcome dropped");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait for spawned revalidations to finish. Returns `false` if some were still
    /// running when `timeout` elapsed.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.in_flight() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                warn!(in_flight = self.in_flight(), "abandoning unfinished revalidations");
                return false;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    async fn run_engine(&self, request: &RenderRequest) -> Completion {
        let render_timeout = self.coordinator.config().render_timeout;
        let started_at = Instant::now();
        let rendered = tokio::time::timeout(render_timeout, self.engine.render(request)).await;
        let outcome = match rendered {
            Ok(Ok(html)) if html.trim().is_empty() => Err(RenderError::EmptyDocument),
            Ok(result) => result,
            Err(_) => Err(RenderError::Timeout {
                seconds: render_timeout.as_secs(),
            }),
        };
        histogram!(METRIC_RENDER_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        match outcome {
            Ok(html) => Completion::rendered(html),
            Err(err) => {
                counter!(METRIC_RENDER_FAILED).increment(1);
                warn!(error = %err, "render failed");
                Completion::failed(err.to_string())
            }
        }
    }
}

struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::keys::derive_key;
    use crate::domain::clock::SystemClock;
    use crate::domain::entities::RenderState;
    use crate::infra::storage::MemoryStorage;

    const HOST: &str = "localhost";

    struct StaticEngine(Result<String, RenderError>);

    #[async_trait]
    impl RenderEngine for StaticEngine {
        async fn render(&self, _request: &RenderRequest) -> Result<String, RenderError> {
            self.0.clone()
        }
    }

    struct SlowEngine;

    #[async_trait]
    impl RenderEngine for SlowEngine {
        async fn render(&self, _request: &RenderRequest) -> Result<String, RenderError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("<html></html>".into())
        }
    }

    async fn trigger(
        engine: impl RenderEngine + 'static,
        config: CacheConfig,
    ) -> Arc<RenderTrigger> {
        let coordinator = RenderCoordinator::start(
            config,
            Arc::new(MemoryStorage::new()),
            Arc::new(SystemClock),
        )
        .await
        .expect("start");
        Arc::new(RenderTrigger::new(Arc::new(coordinator), Arc::new(engine)))
    }

    #[tokio::test]
    async fn successful_render_completes_and_caches() {
        let trigger = trigger(StaticEngine(Ok("<p>hi</p>".into())), CacheConfig::default()).await;
        let key = derive_key(HOST, "/", None, "en");
        let request = RenderRequest::new("http://localhost/", "en");

        let status = trigger
            .revalidate(&key, &request)
            .await
            .expect("revalidate")
            .expect("claimed");
        assert_eq!(status.status, RenderState::Completed);

        let lookup = trigger.coordinator().get_cache(&key).await.expect("lookup");
        assert_eq!(lookup.html, "<p>hi</p>");
    }

    #[tokio::test]
    async fn empty_document_is_a_failure() {
        let trigger = trigger(StaticEngine(Ok("  ".into())), CacheConfig::default()).await;
        let key = derive_key(HOST, "/", None, "en");
        let request = RenderRequest::new("http://localhost/", "en");

        let status = trigger
            .revalidate(&key, &request)
            .await
            .expect("revalidate")
            .expect("claimed");
        assert_eq!(status.status, RenderState::Failed);
        assert_eq!(
            status.error.as_deref(),
            Some("render service returned an empty document")
        );
    }

    #[tokio::test]
    async fn engine_timeout_fails_the_render() {
        let config = CacheConfig {
            render_timeout: Duration::from_millis(20),
            ..CacheConfig::default()
        };
        let trigger = trigger(SlowEngine, config).await;
        let key = derive_key(HOST, "/slow", None, "en");
        let request = RenderRequest::new("http://localhost/slow", "en");

        let status = trigger
            .revalidate(&key, &request)
            .await
            .expect("revalidate")
            .expect("claimed");
        assert_eq!(status.status, RenderState::Failed);
        assert!(status.error.expect("error").contains("timed out"));
    }

    #[tokio::test]
    async fn spawned_revalidation_is_drained() {
        let trigger = trigger(StaticEngine(Ok("<p>bg</p>".into())), CacheConfig::default()).await;
        let key = derive_key(HOST, "/bg", None, "en");
        trigger.spawn_revalidation(key.clone(), RenderRequest::new("http://localhost/bg", "en"));

        assert!(trigger.drain(Duration::from_secs(5)).await);
        assert_eq!(trigger.in_flight(), 0);
        assert_eq!(
            trigger.coordinator().status(&key).status,
            RenderState::Completed
        );
    }

    /// Engine that parks until released, so a test can reclaim the key meanwhile.
    struct GatedEngine {
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl RenderEngine for GatedEngine {
        async fn render(&self, _request: &RenderRequest) -> Result<String, RenderError> {
            self.release.notified().await;
            Ok("<p>late</p>".into())
        }
    }

    #[tokio::test]
    async fn superseded_render_drops_its_outcome() {
        let engine = Arc::new(GatedEngine {
            release: tokio::sync::Notify::new(),
        });
        let config = CacheConfig {
            render_timeout: Duration::from_secs(60),
            ..CacheConfig::default()
        };
        let clock = Arc::new(crate::domain::clock::ManualClock::new(1_700_000_000_000));
        let coordinator = Arc::new(
            RenderCoordinator::start(config, Arc::new(MemoryStorage::new()), clock.clone())
                .await
                .expect("start"),
        );
        let trigger = Arc::new(RenderTrigger::new(Arc::clone(&coordinator), engine.clone()));
        let key = derive_key(HOST, "/race", None, "en");

        let slow = {
            let trigger = Arc::clone(&trigger);
            let key = key.clone();
            tokio::spawn(async move {
                trigger
                    .revalidate(&key, &RenderRequest::new("http://localhost/race", "en"))
                    .await
            })
        };
        while coordinator.status(&key).status != RenderState::Rendering {
            tokio::task::yield_now().await;
        }

        clock.advance(Duration::from_secs(61));
        let current = coordinator.claim(&key).await.expect("reclaim");
        assert!(current.is_acquired());

        engine.release.notify_one();
        let outcome = slow.await.expect("join").expect("revalidate");
        assert_eq!(outcome, None);

        let status = coordinator.status(&key);
        assert_eq!(status.status, RenderState::Rendering);
        assert_eq!(status.render_count, current.id());
    }
}
