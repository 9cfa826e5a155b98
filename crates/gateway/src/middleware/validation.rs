//! Request validation: runs first in the pipeline, before any token is
//! decoded or any rate-limit bucket is touched, so a malformed request
//! is rejected as cheaply as possible.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use trebuchet_http::InvokeRequest;

use crate::GatewayState;

/// Requests larger than this are rejected outright.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// An `Invocation` carrying more arguments than this is rejected outright.
const MAX_ARGUMENTS: usize = 64;

/// Longest `actor_id.id` or `target_identifier` accepted.
const MAX_IDENTIFIER_LEN: usize = 128;

/// `actor_id.id` and `target_identifier` must match `[A-Za-z0-9_-]+`
/// within [`MAX_IDENTIFIER_LEN`] — no path separators, whitespace, or
/// null bytes.
fn is_valid_identifier(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_IDENTIFIER_LEN
        && value.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// The parsed, validated request body, attached so later stages (and
/// the final handler) don't re-parse JSON already validated here.
#[derive(Clone)]
pub struct ParsedInvoke(pub InvokeRequest);

fn bad_request(state: &GatewayState, reason: &str) -> Response {
    state.metrics.record_rejection("validation");
    (StatusCode::BAD_REQUEST, Json(json!({ "error": reason }))).into_response()
}

/// `axum::middleware::from_fn_with_state` handler validating and
/// buffering the body of `POST /invoke`; every other route passes
/// through untouched.
pub async fn validate(State(state): State<Arc<GatewayState>>, request: Request, next: Next) -> Response {
    if request.method() != Method::POST {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => return bad_request(&state, &format!("body exceeds {MAX_BODY_BYTES} bytes or is truncated: {e}")),
    };

    let parsed: InvokeRequest = match serde_json::from_slice(&bytes) {
        Ok(parsed) => parsed,
        Err(e) => return bad_request(&state, &format!("invalid invoke request: {e}")),
    };

    if !is_valid_identifier(&parsed.actor_id.id) {
        return bad_request(
            &state,
            &format!("actor_id.id must match [A-Za-z0-9_-]+ within {MAX_IDENTIFIER_LEN} chars"),
        );
    }
    if !is_valid_identifier(&parsed.target_identifier) {
        return bad_request(
            &state,
            &format!("target_identifier must match [A-Za-z0-9_-]+ within {MAX_IDENTIFIER_LEN} chars"),
        );
    }
    if parsed.arguments.len() > MAX_ARGUMENTS {
        return bad_request(&state, &format!("at most {MAX_ARGUMENTS} arguments are accepted"));
    }

    let mut request = Request::from_parts(parts, Body::from(bytes));
    request.extensions_mut().insert(ParsedInvoke(parsed));
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use trebuchet_wire::ActorId;

    fn sample(target: &str) -> InvokeRequest {
        InvokeRequest {
            actor_id: ActorId::new("counter-1", "127.0.0.1", 9000),
            target_identifier: target.to_string(),
            generic_substitutions: vec![],
            arguments: vec![],
            stream_filter: None,
        }
    }

    #[test]
    fn serializes_and_parses_back_identically() {
        let request = sample("increment");
        let bytes = serde_json::to_vec(&request).unwrap();
        let parsed: InvokeRequest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.target_identifier, "increment");
    }

    #[test]
    fn identifier_pattern_accepts_alnum_underscore_and_dash() {
        assert!(is_valid_identifier("counter-1"));
        assert!(is_valid_identifier("observe_count"));
        assert!(is_valid_identifier("A9"));
    }

    #[test]
    fn identifier_pattern_rejects_separators_whitespace_and_nul() {
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("a/b"));
        assert!(!is_valid_identifier("a b"));
        assert!(!is_valid_identifier("a\0b"));
        assert!(!is_valid_identifier(&"a".repeat(MAX_IDENTIFIER_LEN + 1)));
    }
}
