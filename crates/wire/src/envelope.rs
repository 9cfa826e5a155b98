//! The wire envelope: a tagged union of the seven message cases exchanged
//! between actor-system peers, plus the types embedded in its fields.
//!
//! Encoding is JSON with the variant name as the `type` discriminator.
//! Byte-valued fields (`arguments`, `result`, `data`) are base64 strings
//! on the wire; this module exposes them as `Vec<u8>` / `Bytes` and
//! handles the conversion via [`Base64Bytes`].

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Logical, user-chosen identity of an actor: a name unique within its
/// host's namespace plus the endpoint that owns it.
///
/// An actor is local on a node iff that node's listening endpoint
/// matches `host`/`port`; otherwise it is remote. IDs are stable for the
/// actor's lifetime and serve as the routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId {
    /// Logical name, unique within the host's namespace.
    pub id: String,
    /// Hostname or address of the node that owns this actor.
    pub host: String,
    /// Listening port of the node that owns this actor.
    pub port: u16,
}

impl ActorId {
    /// Build an `ActorId` for an actor hosted at `host:port`.
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
        }
    }

    /// True iff this id would be local on a node listening at `host:port`.
    pub fn is_local(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}

/// Opaque byte payload, base64-encoded on the wire.
///
/// The runtime never interprets the bytes it carries; the actor method
/// (or the caller, for arguments) owns their content encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Base64Bytes(pub Vec<u8>);

impl Base64Bytes {
    /// Wrap raw bytes for transmission.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrow the underlying bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Consume and return the underlying bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Base64Bytes {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl Serialize for Base64Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Base64Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64
            .decode(s.as_bytes())
            .map(Base64Bytes)
            .map_err(serde::de::Error::custom)
    }
}

/// W3C-style trace propagation carried unchanged across the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    /// Identifies the overall distributed trace.
    pub trace_id: String,
    /// Identifies the span that issued this call.
    pub span_id: String,
    /// Span id of the caller's own parent, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    /// W3C trace-flags byte (e.g. sampled bit).
    #[serde(default)]
    pub flags: u8,
}

/// Optional server-side filter evaluated before a `StreamData` is
/// broadcast.
///
/// Unknown `type` values fail to deserialize rather than silently
/// falling back to `All` — a malformed or forward-incompatible filter
/// request should surface as an error, not silently stream everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamFilter {
    /// No filtering; every change is delivered.
    All,
    /// One of the server's built-in named filters (`changed`, `nonEmpty`,
    /// `threshold`, `rate-limit`); unrecognized names behave as `all`.
    Predefined {
        /// Name of the predefined filter.
        name: String,
        /// Filter-specific parameters.
        #[serde(default)]
        params: serde_json::Value,
    },
}

/// Why a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamEndReason {
    /// The observed sequence naturally ran to completion.
    Completed,
    /// The actor backing the stream was shut down.
    ActorTerminated,
    /// The client explicitly unsubscribed.
    ClientUnsubscribed,
    /// The underlying transport connection was closed.
    ConnectionClosed,
    /// The stream ended because of an error; see the sibling `message` field.
    Error,
}

/// The tagged union exchanged between actor-system peers.
///
/// Serializes as `{"type": "<CaseName>", ...fields}`. Unknown optional
/// fields on decode are ignored for forward compatibility; unknown
/// `type` values are a decode error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// A method call routed to `actor_id`.
    Invocation {
        /// Correlates the eventual `Response`/`StreamStart` to this call.
        call_id: Uuid,
        /// Routing target.
        actor_id: ActorId,
        /// Method name; `observe`-prefixed names are streaming.
        target_identifier: String,
        /// Per-argument generic type substitutions, in declaration order.
        #[serde(default)]
        generic_substitutions: Vec<String>,
        /// Pre-encoded argument payloads; the runtime does not re-encode.
        #[serde(default)]
        arguments: Vec<Base64Bytes>,
        /// Negotiated wire protocol version; absence decodes as `1`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        protocol_version: Option<u32>,
        /// Server-side filter to apply if this is a streaming invocation.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stream_filter: Option<StreamFilter>,
        /// Propagated trace context.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trace_context: Option<TraceContext>,
    },
    /// The unary result of an `Invocation`.
    Response {
        /// The `call_id` of the `Invocation` this answers.
        call_id: Uuid,
        /// Success payload. Empty bytes together with no `error_message`
        /// means a void success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Base64Bytes>,
        /// Failure message. Exactly one of `result`/`error_message` is set.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    /// Sent once a streaming invocation has been accepted; establishes the
    /// server's `stream_id` for subsequent `StreamData`/`StreamEnd`.
    StreamStart {
        /// The `call_id` of the originating `Invocation`.
        call_id: Uuid,
        /// Server-assigned stream identifier.
        stream_id: Uuid,
        /// Routing target the stream was opened against.
        actor_id: ActorId,
        /// Method name the stream was opened against.
        target_identifier: String,
    },
    /// One value of a streamed property.
    StreamData {
        /// Identifies the stream within its (connection, actor) scope.
        stream_id: Uuid,
        /// Monotonic per-stream counter; starts at 1, gaps allowed.
        sequence_number: u64,
        /// Opaque payload in the actor's chosen encoding (full value or
        /// delta — see [`StreamFilter`] and the delta-encoding header bit
        /// defined by `trebuchet-stream`).
        data: Base64Bytes,
        /// Server-observed time this value was produced.
        timestamp: DateTime<Utc>,
    },
    /// Terminal event for a stream.
    StreamEnd {
        /// Identifies the stream within its (connection, actor) scope.
        stream_id: Uuid,
        /// Why the stream ended.
        reason: StreamEndReason,
        /// Error detail, present iff `reason == Error`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Non-terminal error delivered to a stream subscriber; always
    /// followed by a `StreamEnd`.
    StreamError {
        /// Identifies the stream within its (connection, actor) scope.
        stream_id: Uuid,
        /// Human-readable description of the error.
        error_message: String,
    },
    /// Sent by a reconnecting client to resume a stream from a checkpoint.
    StreamResume {
        /// Identifies the stream within its (connection, actor) scope.
        stream_id: Uuid,
        /// Client's last-observed sequence number for that stream.
        last_sequence: u64,
        /// Routing target.
        actor_id: ActorId,
        /// Method name.
        target_identifier: String,
    },
}

impl Envelope {
    /// Encode this envelope as a single JSON line (no trailing newline).
    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(crate::Error::from)
    }

    /// Decode an envelope from a JSON byte slice.
    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| crate::Error::InvalidEnvelope(e.to_string()))
    }

    /// The call id this envelope correlates to, if it carries one.
    pub fn call_id(&self) -> Option<Uuid> {
        match self {
            Envelope::Invocation { call_id, .. } => Some(*call_id),
            Envelope::Response { call_id, .. } => Some(*call_id),
            Envelope::StreamStart { call_id, .. } => Some(*call_id),
            _ => None,
        }
    }

    /// The stream id this envelope belongs to, if any.
    pub fn stream_id(&self) -> Option<Uuid> {
        match self {
            Envelope::StreamStart { stream_id, .. }
            | Envelope::StreamData { stream_id, .. }
            | Envelope::StreamEnd { stream_id, .. }
            | Envelope::StreamError { stream_id, .. }
            | Envelope::StreamResume { stream_id, .. } => Some(*stream_id),
            _ => None,
        }
    }

    /// True iff `target_identifier` names an observe-style streaming method.
    pub fn is_streaming_target(target_identifier: &str) -> bool {
        target_identifier.starts_with("observe")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_actor() -> ActorId {
        ActorId::new("counter-1", "127.0.0.1", 9000)
    }

    #[test]
    fn round_trips_invocation() {
        let env = Envelope::Invocation {
            call_id: Uuid::new_v4(),
            actor_id: sample_actor(),
            target_identifier: "increment".to_string(),
            generic_substitutions: vec![],
            arguments: vec![Base64Bytes::new(b"42".to_vec())],
            protocol_version: Some(1),
            stream_filter: None,
            trace_context: None,
        };
        let encoded = env.encode().unwrap();
        let decoded = Envelope::decode(&encoded).unwrap();
        assert_eq!(env, decoded);
    }

    #[test]
    fn round_trips_every_case() {
        let call_id = Uuid::new_v4();
        let stream_id = Uuid::new_v4();
        let cases = vec![
            Envelope::Invocation {
                call_id,
                actor_id: sample_actor(),
                target_identifier: "observeCount".to_string(),
                generic_substitutions: vec![],
                arguments: vec![],
                protocol_version: None,
                stream_filter: Some(StreamFilter::All),
                trace_context: Some(TraceContext {
                    trace_id: "t1".into(),
                    span_id: "s1".into(),
                    parent_span_id: None,
                    flags: 1,
                }),
            },
            Envelope::Response {
                call_id,
                result: Some(Base64Bytes::new(vec![1, 2, 3])),
                error_message: None,
            },
            Envelope::StreamStart {
                call_id,
                stream_id,
                actor_id: sample_actor(),
                target_identifier: "observeCount".to_string(),
            },
            Envelope::StreamData {
                stream_id,
                sequence_number: 1,
                data: Base64Bytes::new(vec![9]),
                timestamp: Utc::now(),
            },
            Envelope::StreamEnd {
                stream_id,
                reason: StreamEndReason::Completed,
                message: None,
            },
            Envelope::StreamError {
                stream_id,
                error_message: "boom".to_string(),
            },
            Envelope::StreamResume {
                stream_id,
                last_sequence: 3,
                actor_id: sample_actor(),
                target_identifier: "observeCount".to_string(),
            },
        ];
        for env in cases {
            let encoded = env.encode().unwrap();
            let decoded = Envelope::decode(&encoded).unwrap();
            assert_eq!(env, decoded);
        }
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = serde_json::json!({
            "type": "Response",
            "call_id": Uuid::new_v4(),
            "result": null,
            "error_message": null,
            "from_the_future": "ignored"
        });
        let decoded = Envelope::decode(json.to_string().as_bytes()).unwrap();
        assert!(matches!(decoded, Envelope::Response { .. }));
    }

    #[test]
    fn unknown_filter_shape_is_rejected() {
        let json = serde_json::json!({
            "type": "custom",
            "name": "x"
        });
        let result: std::result::Result<StreamFilter, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }

    #[test]
    fn observe_prefix_detects_streaming_target() {
        assert!(Envelope::is_streaming_target("observeCount"));
        assert!(!Envelope::is_streaming_target("increment"));
    }
}
