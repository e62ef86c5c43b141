//! Prerender cache system.
//!
//! - **Snapshot cache**: rendered HTML per cache key, durable storage fronted by an LRU
//!   hot layer, flagged for revalidation once older than the TTL.
//! - **Task registry**: persisted render status per key, reconciled on startup.
//! - **Coordinator**: the per-key `idle -> rendering -> completed | failed` machine.
//! - **Trigger + middleware**: background revalidation and the request gate.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! ttl_seconds = 3600
//! render_timeout_seconds = 30
//! hot_limit = 256
//! ```

mod config;
mod coordinator;
mod gate;
mod keys;
mod lock;
mod middleware;
mod registry;
mod store;
mod trigger;

pub use config::CacheConfig;
pub use coordinator::{Claim, Completion, CoordinatorError, RenderCoordinator, key_for_url};
pub use gate::{
    BOT_USER_AGENTS, FORCE_PARAM, GateConfig, GateError, LANGUAGE_PARAM, is_forced,
    resolve_language,
};
pub use keys::{
    CONTROL_PARAM_PREFIX, CacheKey, TASKS_STORAGE_KEY, derive_key, key_for_public_url,
    strip_control_params,
};
pub use middleware::{PrerenderState, prerender_layer, render_status};
pub use registry::{PersistedTasks, TaskRegistry};
pub use store::SnapshotCache;
pub use trigger::RenderTrigger;
