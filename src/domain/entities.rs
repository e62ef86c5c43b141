//! Records owned by the render coordinator.
//!
//! The record types are defined in `prerender-api-types` so clients decode the same
//! shapes the server persists.

pub use prerender_api_types::{
    CacheEntry, CacheLookup, DEFAULT_LANGUAGE, RenderState, RenderStatus,
};
