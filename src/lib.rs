//! Prerender snapshot server.
//!
//! Serves cached HTML snapshots of a single-page application to crawlers and keeps
//! them fresh by re-rendering stale pages in the background.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
