mod middleware;

pub use middleware::RequestContext;

use axum::{Router, extract::FromRef, middleware as axum_middleware, routing::get};
use prerender_api_types::STATUS_PATH;

use crate::cache::{PrerenderState, prerender_layer, render_status};
use crate::infra::assets::{AssetState, serve_spa};

use middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct RouterState {
    pub prerender: PrerenderState,
    pub assets: AssetState,
}

impl FromRef<RouterState> for PrerenderState {
    fn from_ref(state: &RouterState) -> Self {
        state.prerender.clone()
    }
}

impl FromRef<RouterState> for AssetState {
    fn from_ref(state: &RouterState) -> Self {
        state.assets.clone()
    }
}

/// Status endpoint plus the application shell, with snapshots served in front of both.
pub fn build_router(state: RouterState) -> Router {
    let prerender = state.prerender.clone();

    Router::new()
        .route(STATUS_PATH, get(render_status))
        .fallback(serve_spa)
        .layer(axum_middleware::from_fn_with_state(prerender, prerender_layer))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
