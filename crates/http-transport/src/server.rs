//! The HTTP gateway: `POST /invoke` dispatches a unary call or opens a
//! streamed one (answered as Server-Sent Events), `GET /health` reports
//! the host's lifecycle and load.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::BoxStream;
use futures::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;
use trebuchet_actor::{ActorRef, ActorSystem};
use trebuchet_stream::StreamEvent;
use trebuchet_wire::Envelope;

use crate::health::{HealthProvider, HealthSnapshot, HostStatus};
use crate::protocol::{InvokeRequest, InvokeResponse, StreamFrame};

struct GatewayState {
    actor_system: Arc<ActorSystem>,
    health: Arc<dyn HealthProvider>,
}

/// The HTTP request/response reference transport.
///
/// Binds a plain router over an [`ActorSystem`]; callers who only need the
/// router (to mount it alongside other routes, or to serve it themselves)
/// can use [`HttpGateway::router`] directly instead of [`HttpGateway::serve`].
pub struct HttpGateway {
    state: Arc<GatewayState>,
}

impl HttpGateway {
    /// Build a gateway dispatching into `actor_system`, reporting health via
    /// `health`.
    pub fn new(actor_system: Arc<ActorSystem>, health: Arc<dyn HealthProvider>) -> Self {
        Self {
            state: Arc::new(GatewayState { actor_system, health }),
        }
    }

    /// The `axum` router backing this gateway: `POST /invoke`, `GET /health`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/invoke", post(invoke_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(Arc::clone(&self.state))
    }

    /// Bind `bind_address` and serve until the process is asked to stop.
    pub async fn serve(&self, bind_address: &str) -> crate::error::Result<()> {
        let listener = tokio::net::TcpListener::bind(bind_address).await?;
        tracing::info!(%bind_address, "http gateway listening");
        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::error::Error::BadRequest(e.to_string()))
    }
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let snapshot: HealthSnapshot = state.health.snapshot().await;
    let status = match snapshot.status {
        HostStatus::Running => StatusCode::OK,
        HostStatus::Draining | HostStatus::Stopped => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(snapshot))
}

async fn invoke_handler(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<InvokeRequest>,
) -> Response {
    let actor_ref = match state.actor_system.resolve(request.actor_id.clone()) {
        Ok(actor_ref) => actor_ref,
        Err(e) => return error_response(&e),
    };

    if Envelope::is_streaming_target(&request.target_identifier) {
        stream_invoke(actor_ref, request).await
    } else {
        match actor_ref
            .call(
                &request.target_identifier,
                &request.generic_substitutions,
                &request.arguments,
            )
            .await
        {
            Ok(result) => Json(InvokeResponse {
                result: Some(result),
                error_message: None,
            })
            .into_response(),
            Err(e) => error_response(&e),
        }
    }
}

async fn stream_invoke(actor_ref: Box<dyn ActorRef>, request: InvokeRequest) -> Response {
    let events: BoxStream<'static, StreamEvent> = match actor_ref
        .observe(
            &request.target_identifier,
            &request.generic_substitutions,
            &request.arguments,
            request.stream_filter.clone(),
        )
        .await
    {
        Ok(events) => events,
        Err(e) => return error_response(&e),
    };

    let frames = events.map(|event| {
        let frame = match event {
            StreamEvent::Data(data) => StreamFrame::Data { data },
            StreamEvent::Error(error_message) => StreamFrame::Error { error_message },
            StreamEvent::Ended { reason, message } => StreamFrame::End { reason, message },
        };
        let payload = serde_json::to_string(&frame).unwrap_or_else(|e| {
            warn!(error = %e, "failed to encode stream frame, dropping");
            String::new()
        });
        Ok::<Event, Infallible>(Event::default().data(payload))
    });

    Sse::new(frames)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

fn error_response(error: &trebuchet_actor::Error) -> Response {
    use trebuchet_actor::Error as E;
    let status = match error {
        E::ActorNotFound(_) | E::UnknownTarget { .. } => StatusCode::NOT_FOUND,
        E::NotStreaming(_) | E::NotUnary(_) | E::ProtocolNegotiationFailed(..) => StatusCode::BAD_REQUEST,
        E::UnknownCallId(_) => StatusCode::GATEWAY_TIMEOUT,
        E::NotLocal(_) | E::HandlerFailed(_) | E::Transport(_) | E::Wire(_) => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(InvokeResponse {
            result: None,
            error_message: Some(error.to_string()),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_system() -> Arc<ActorSystem> {
        let transport = Arc::new(trebuchet_transport::FramedSocketTransport::new(4 * 1024 * 1024));
        ActorSystem::new("127.0.0.1", 9400, (1, 1), transport)
    }

    #[tokio::test]
    async fn health_reports_running_with_ok_status() {
        let gateway = HttpGateway::new(make_system(), Arc::new(crate::health::AlwaysHealthy));
        let response = gateway
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    struct StubDraining;

    #[async_trait::async_trait]
    impl HealthProvider for StubDraining {
        async fn snapshot(&self) -> HealthSnapshot {
            HealthSnapshot {
                status: HostStatus::Draining,
                inflight_requests: 1,
                active_streams: 0,
                uptime_secs: 0,
            }
        }
    }

    #[tokio::test]
    async fn health_reports_draining_with_service_unavailable_status() {
        let gateway = HttpGateway::new(make_system(), Arc::new(StubDraining));
        let response = gateway
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn invoke_against_unknown_actor_is_not_found() {
        let gateway = HttpGateway::new(make_system(), Arc::new(crate::health::AlwaysHealthy));
        let body = serde_json::to_vec(&InvokeRequest {
            actor_id: trebuchet_wire::ActorId::new("missing", "127.0.0.1", 9400),
            target_identifier: "increment".to_string(),
            generic_substitutions: vec![],
            arguments: vec![],
            stream_filter: None,
        })
        .unwrap();
        let response = gateway
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/invoke")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
