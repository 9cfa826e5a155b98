//! Assembles the middleware stack around an [`trebuchet_http::HttpGateway`]
//! router in the mandated order.
//!
//! `tower`'s `Router::layer` wraps outside-in: the last layer added is
//! the first one a request passes through. To get the execution order
//! validation → rate limit → authenticate → authorize → trace → dispatch,
//! the layers below are added in the reverse of that list.

use std::sync::Arc;

use axum::middleware as axum_middleware;
use axum::routing::get;
use axum::Router;

use crate::middleware::{auth, authz, rate_limit, tracing_mw, validation};
use crate::GatewayState;

/// Build the full gateway router: the inner `invoke_router` (typically
/// [`trebuchet_http::HttpGateway::router`]) wrapped with the validation,
/// rate-limit, authentication, authorization, and tracing stages, plus a
/// `GET /metrics` endpoint exposing [`crate::metrics::GatewayMetrics`].
pub fn build(state: Arc<GatewayState>, invoke_router: Router) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::clone(&state));

    invoke_router
        .merge(metrics_router)
        .layer(axum_middleware::from_fn_with_state(Arc::clone(&state), tracing_mw::trace))
        .layer(axum_middleware::from_fn_with_state(Arc::clone(&state), authz::authorize))
        .layer(axum_middleware::from_fn_with_state(Arc::clone(&state), auth::authenticate))
        .layer(axum_middleware::from_fn_with_state(Arc::clone(&state), rate_limit::rate_limit))
        .layer(axum_middleware::from_fn_with_state(Arc::clone(&state), validation::validate))
}

async fn metrics_handler(axum::extract::State(state): axum::extract::State<Arc<GatewayState>>) -> String {
    state.metrics.render()
}
