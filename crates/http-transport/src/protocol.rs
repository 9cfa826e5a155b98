//! JSON request/response shapes exchanged over the HTTP gateway.
//!
//! These mirror the fields of [`trebuchet_wire::Envelope::Invocation`] and
//! its replies, but drop the fields that only make sense on a persistent
//! connection (`call_id`, `protocol_version`): HTTP correlates a request to
//! its response by the connection itself, and protocol negotiation has no
//! place to live between one-shot requests.

use serde::{Deserialize, Serialize};
use trebuchet_wire::{ActorId, Base64Bytes, StreamEndReason, StreamFilter};

/// Body of `POST /invoke`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Actor to route the call to.
    pub actor_id: ActorId,
    /// Method name; `observe`-prefixed names stream their replies as SSE.
    pub target_identifier: String,
    /// Per-argument generic type substitutions, in declaration order.
    #[serde(default)]
    pub generic_substitutions: Vec<String>,
    /// Pre-encoded argument payloads.
    #[serde(default)]
    pub arguments: Vec<Base64Bytes>,
    /// Server-side filter to apply if this is a streaming invocation.
    #[serde(default)]
    pub stream_filter: Option<StreamFilter>,
}

/// Body of a successful unary `POST /invoke` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResponse {
    /// Success payload, present iff the call did not fail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Base64Bytes>,
    /// Failure message, present iff the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// One Server-Sent Event payload for a streaming `POST /invoke`.
///
/// Sent as the `data:` field of an SSE event named `data`, `error`, or
/// `end` to match the frame's case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamFrame {
    /// One value of the observed property.
    Data {
        /// Opaque payload, full value or delta per the server's encoding.
        data: Base64Bytes,
    },
    /// Non-terminal error; always followed by an `End` frame.
    Error {
        /// Human-readable description of the error.
        error_message: String,
    },
    /// Terminal frame for the stream.
    End {
        /// Why the stream ended.
        reason: StreamEndReason,
        /// Error detail, present iff `reason == Error`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}
