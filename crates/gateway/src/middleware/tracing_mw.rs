//! Structured request tracing: the last stage before dispatch, so every
//! request that made it past validation, rate limiting, authentication,
//! and authorization gets one span covering the actual handler call.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;

use crate::middleware::auth::AuthenticatedUser;
use crate::GatewayState;

/// `axum::middleware::from_fn_with_state` handler wrapping the handler
/// call in a span recording method, path, caller subject (if
/// authenticated), response status, and latency, and crediting the
/// gateway's success counter once the handler itself has run.
pub async fn trace(State(state): State<Arc<GatewayState>>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let subject = request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|u| u.subject.clone())
        .unwrap_or_else(|| "anonymous".to_string());

    let span = tracing::info_span!("gateway.request", %method, %path, %subject);
    let start = Instant::now();

    async move {
        let response = next.run(request).await;
        if method == Method::POST && response.status().is_success() {
            state.metrics.invocations_total.inc();
        }
        tracing::info!(
            status = response.status().as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "request handled"
        );
        response
    }
    .instrument(span)
    .await
}
