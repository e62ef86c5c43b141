//! Persisted task registry.
//!
//! Holds one [`RenderStatus`] per cache key. The whole map is stored under a single
//! storage key; the live map only changes after the durable write succeeded, so the
//! in-memory view never runs ahead of what a restart would see.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::counter;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::application::storage::{SnapshotStorage, StorageError, read_json, write_json};
use crate::domain::clock::duration_ms;
use crate::domain::entities::{RenderState, RenderStatus};

use super::keys::{CacheKey, TASKS_STORAGE_KEY};

const METRIC_REGISTRY_RECONCILED: &str = "prerender_registry_reconciled_total";

/// Serialized form of the registry.
pub type PersistedTasks = BTreeMap<String, RenderStatus>;

pub struct TaskRegistry {
    storage: Arc<dyn SnapshotStorage>,
    tasks: DashMap<CacheKey, RenderStatus>,
    persist_lock: Mutex<()>,
}

impl TaskRegistry {
    /// Load the persisted registry and reconcile renders interrupted by a restart.
    ///
    /// Every `rendering` entry last touched more than `render_timeout` before `now_ms`
    /// goes back to `idle`, keeping its `last_updated`. When anything changed, the corrected map is written back
    /// before this returns.
    #[instrument(skip(storage))]
    pub async fn load(
        storage: Arc<dyn SnapshotStorage>,
        now_ms: i64,
        render_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let persisted = Self::read_persisted(storage.as_ref()).await?;
        let (reconciled, tasks) = reconcile(persisted, now_ms, duration_ms(render_timeout));

        let registry = Self {
            storage,
            tasks: tasks
                .into_iter()
                .map(|(key, status)| (CacheKey::from_stored(key), status))
                .collect(),
            persist_lock: Mutex::new(()),
        };

        if reconciled > 0 {
            let _guard = registry.persist_lock.lock().await;
            registry.persist(&registry.snapshot_map()).await?;
            counter!(METRIC_REGISTRY_RECONCILED).increment(reconciled as u64);
            warn!(reconciled, "reset interrupted renders to idle");
        }
        info!(tasks = registry.tasks.len(), "task registry loaded");
        Ok(registry)
    }

    /// Read the persisted registry as stored, without reconciliation.
    pub async fn read_persisted(
        storage: &dyn SnapshotStorage,
    ) -> Result<PersistedTasks, StorageError> {
        Ok(read_json::<PersistedTasks>(storage, TASKS_STORAGE_KEY)
            .await?
            .unwrap_or_default())
    }

    pub fn get(&self, key: &CacheKey) -> Option<RenderStatus> {
        self.tasks.get(key).map(|entry| entry.value().clone())
    }

    /// Persist the registry with `status` recorded for `key`, then publish it.
    ///
    /// On a storage failure the live map keeps its previous value for `key`.
    pub async fn commit(&self, key: &CacheKey, status: RenderStatus) -> Result<(), StorageError> {
        let _guard = self.persist_lock.lock().await;
        let mut next = self.snapshot_map();
        next.insert(key.as_str().to_string(), status.clone());
        self.persist(&next).await?;
        self.tasks.insert(key.clone(), status);
        Ok(())
    }

    /// Copy of every tracked status, ordered by key.
    pub fn snapshot(&self) -> PersistedTasks {
        self.snapshot_map()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn snapshot_map(&self) -> PersistedTasks {
        self.tasks
            .iter()
            .map(|entry| (entry.key().as_str().to_string(), entry.value().clone()))
            .collect()
    }

    async fn persist(&self, tasks: &PersistedTasks) -> Result<(), StorageError> {
        write_json(self.storage.as_ref(), TASKS_STORAGE_KEY, tasks).await
    }
}

fn reconcile(mut tasks: PersistedTasks, now_ms: i64, timeout_ms: i64) -> (usize, PersistedTasks) {
    let mut reconciled = 0;
    for status in tasks.values_mut() {
        if status.status == RenderState::Rendering
            && now_ms.saturating_sub(status.last_updated) > timeout_ms
        {
            status.status = RenderState::Idle;
            reconciled += 1;
        }
    }
    (reconciled, tasks)
}
