//! Render coordination state machine.
//!
//! Per key: `idle -> rendering -> completed | failed`, where `completed` and `failed`
//! may move back to `rendering`. Every transition for a key runs under that key's
//! slot mutex, so the check-and-set in [`RenderCoordinator::claim`] is atomic per key
//! while different keys proceed in parallel. The engine call itself happens outside
//! the slot. Slots only live while a transition holds or waits for them.
//!
//! Each claim is identified by the `render_count` it produced. A completion carrying a
//! claim id is only accepted while that claim still holds the key, so a render that
//! was reclaimed after the render timeout cannot overwrite its successor.

use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::application::storage::{SnapshotStorage, StorageError};
use crate::domain::clock::{Clock, duration_ms};
use crate::domain::entities::{CacheLookup, DEFAULT_LANGUAGE, RenderState, RenderStatus};

use super::config::CacheConfig;
use super::keys::{CacheKey, key_for_public_url};
use super::registry::TaskRegistry;
use super::store::SnapshotCache;

const METRIC_RENDER_CLAIMED: &str = "prerender_render_claimed_total";
const METRIC_RENDER_DEDUPLICATED: &str = "prerender_render_deduplicated_total";

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("missing required field `url`")]
    MissingUrl,
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("completion for `{key}` carries neither html nor error")]
    EmptyCompletion { key: String },
    #[error("completion for `{key}` arrived while it is {status}, not rendering")]
    NotRendering { key: String, status: RenderState },
    #[error("completion for `{key}` belongs to claim {claim}, current claim is {current}")]
    StaleClaim { key: String, claim: u64, current: u64 },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Outcome of asking to render a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// This caller moved the key to `rendering` and owns the engine call plus the
    /// matching [`RenderCoordinator::complete`].
    Acquired(RenderStatus),
    /// Another render is already running; the status is returned unchanged.
    InProgress(RenderStatus),
}

impl Claim {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Claim::Acquired(_))
    }

    /// Identifier to hand back through [`Completion::for_claim`].
    pub fn id(&self) -> u64 {
        self.status().render_count
    }

    pub fn status(&self) -> &RenderStatus {
        match self {
            Claim::Acquired(status) | Claim::InProgress(status) => status,
        }
    }

    pub fn into_status(self) -> RenderStatus {
        match self {
            Claim::Acquired(status) | Claim::InProgress(status) => status,
        }
    }
}

/// Result reported back for a claimed render. Empty HTML counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub html: Option<String>,
    pub error: Option<String>,
    /// Claim this result belongs to. `None` completes whichever claim holds the key.
    pub claim: Option<u64>,
}

impl Completion {
    pub fn rendered(html: impl Into<String>) -> Self {
        Self {
            html: Some(html.into()),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn for_claim(mut self, claim: u64) -> Self {
        self.claim = Some(claim);
        self
    }
}

type Slots = DashMap<CacheKey, Arc<Mutex<()>>>;

/// Exclusive hold on one key's slot. Dropping it releases the mutex and forgets the
/// slot once nobody else holds or waits for it.
struct SlotLease<'a> {
    slots: &'a Slots,
    key: CacheKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

pub struct RenderCoordinator {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    cache: SnapshotCache,
    registry: TaskRegistry,
    slots: Slots,
}

impl RenderCoordinator {
    /// Load persisted state, reconcile interrupted renders and return a coordinator
    /// ready to serve.
    pub async fn start(
        config: CacheConfig,
        storage: Arc<dyn SnapshotStorage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        let registry =
            TaskRegistry::load(Arc::clone(&storage), clock.now_ms(), config.render_timeout).await?;
        let cache = SnapshotCache::new(&config, storage, Arc::clone(&clock));
        info!(
            ttl_seconds = config.ttl.as_secs(),
            render_timeout_seconds = config.render_timeout.as_secs(),
            hot_limit = config.hot_limit,
            "render coordinator started"
        );
        Ok(Self {
            config,
            clock,
            cache,
            registry,
            slots: DashMap::new(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Number of keys with a transition running or waiting.
    pub fn active_slots(&self) -> usize {
        self.slots.len()
    }

    pub async fn get_cache(&self, key: &CacheKey) -> Result<CacheLookup, StorageError> {
        self.cache.get(key).await
    }

    /// Try to move `key` into `rendering`.
    ///
    /// A `rendering` entry younger than the render timeout is returned untouched. An
    /// older one is treated as abandoned and reclaimed.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn claim(&self, key: &CacheKey) -> Result<Claim, CoordinatorError> {
        let _lease = self.lock_slot(key).await;

        let now = self.clock.now_ms();
        let current = self.registry.get(key);
        if let Some(status) = current.as_ref().filter(|status| status.is_rendering()) {
            let age_ms = now.saturating_sub(status.last_updated);
            if age_ms <= duration_ms(self.config.render_timeout) {
                counter!(METRIC_RENDER_DEDUPLICATED).increment(1);
                debug!(age_ms, "render already in progress");
                return Ok(Claim::InProgress(status.clone()));
            }
            warn!(age_ms, "reclaiming abandoned render");
        }

        let render_count = current.map_or(0, |status| status.render_count);
        let next = RenderStatus {
            status: RenderState::Rendering,
            last_updated: now,
            render_count: render_count.saturating_add(1),
            html: None,
            error: None,
        };
        self.registry.commit(key, next.clone()).await?;
        counter!(METRIC_RENDER_CLAIMED).increment(1);
        Ok(Claim::Acquired(next))
    }

    /// Deduplicating render request. See [`RenderCoordinator::claim`].
    pub async fn render(&self, key: &CacheKey) -> Result<RenderStatus, CoordinatorError> {
        self.claim(key).await.map(Claim::into_status)
    }

    /// Record the outcome of a render.
    ///
    /// Only a key in `rendering` can be completed, and only by the claim named in the
    /// completion when it names one. HTML is written to the snapshot cache before the
    /// status moves to `completed`; a failed write leaves the status where it was.
    #[instrument(skip(self, completion), fields(key = %key, claim = ?completion.claim))]
    pub async fn complete(
        &self,
        key: &CacheKey,
        completion: Completion,
    ) -> Result<RenderStatus, CoordinatorError> {
        let html = completion.html.filter(|html| !html.is_empty());
        if html.is_none() && completion.error.is_none() {
            return Err(CoordinatorError::EmptyCompletion {
                key: key.to_string(),
            });
        }

        let _lease = self.lock_slot(key).await;

        let current = self.status(key);
        if !current.is_rendering() {
            return Err(CoordinatorError::NotRendering {
                key: key.to_string(),
                status: current.status,
            });
        }
        if let Some(claim) = completion.claim.filter(|claim| *claim != current.render_count) {
            return Err(CoordinatorError::StaleClaim {
                key: key.to_string(),
                claim,
                current: current.render_count,
            });
        }

        let next = match html {
            Some(html) => {
                let entry = self.cache.set(key, html).await?;
                RenderStatus {
                    status: RenderState::Completed,
                    last_updated: entry.last_updated,
                    render_count: current.render_count,
                    html: Some(entry.html),
                    error: None,
                }
            }
            None => RenderStatus {
                status: RenderState::Failed,
                last_updated: self.clock.now_ms(),
                render_count: current.render_count,
                html: None,
                error: completion.error,
            },
        };

        self.registry.commit(key, next.clone()).await?;
        debug!(status = %next.status, "render completed");
        Ok(next)
    }

    /// Current status of `key`, or a synthetic `idle` status for unseen keys.
    pub fn status(&self, key: &CacheKey) -> RenderStatus {
        self.registry
            .get(key)
            .unwrap_or_else(|| RenderStatus::idle(self.clock.now_ms()))
    }

    pub async fn render_url(
        &self,
        url: &str,
        language: Option<&str>,
    ) -> Result<RenderStatus, CoordinatorError> {
        let key = key_for_url(url, language)?;
        self.render(&key).await
    }

    pub fn status_url(
        &self,
        url: &str,
        language: Option<&str>,
    ) -> Result<RenderStatus, CoordinatorError> {
        let key = key_for_url(url, language)?;
        Ok(self.status(&key))
    }

    async fn lock_slot(&self, key: &CacheKey) -> SlotLease<'_> {
        let slot = Arc::clone(self.slots.entry(key.clone()).or_default().value());
        let guard = slot.lock_owned().await;
        SlotLease {
            slots: &self.slots,
            key: key.clone(),
            guard: Some(guard),
        }
    }
}

/// Validate an absolute http(s) URL and derive its cache key.
pub fn key_for_url(url: &str, language: Option<&str>) -> Result<CacheKey, CoordinatorError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(CoordinatorError::MissingUrl);
    }

    let parsed = Url::parse(trimmed).map_err(|err| CoordinatorError::InvalidUrl {
        url: trimmed.to_string(),
        reason: err.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(CoordinatorError::InvalidUrl {
            url: trimmed.to_string(),
            reason: format!("unsupported scheme `{}`", parsed.scheme()),
        });
    }

    Ok(key_for_public_url(
        &parsed,
        language.unwrap_or(DEFAULT_LANGUAGE),
    ))
}
