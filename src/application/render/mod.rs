//! Rendering engine port and the HTTP adapter that delegates to a remote
//! headless-browser service.
//!
//! Engines are opaque: they take a public URL plus a language and hand back a finished
//! HTML document or a [`RenderError`]. Recording the outcome is the caller's job.

mod engine;
mod inject;
mod types;

pub use engine::{HttpRenderEngine, HttpRenderEngineConfig};
pub use inject::inject_render_flag;
pub use types::{RenderEngine, RenderError, RenderRequest};
