//! A client for the HTTP reference transport: `call` for unary
//! invocations, `call_stream` for streaming ones, both against a gateway
//! exposing `POST /invoke`.
//!
//! Idempotent by construction (every invocation is request/response, with
//! no connection state to leak across a retry), so failed attempts are
//! retried on 5xx responses and on transport-level errors; 4xx responses
//! are treated as a caller mistake and never retried.

use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use trebuchet_stream::StreamEvent;
use trebuchet_wire::{ActorId, Base64Bytes, StreamEndReason, StreamFilter};

use crate::error::{Error, Result};
use crate::protocol::{InvokeRequest, InvokeResponse, StreamFrame};

/// How many times a request is retried after its first attempt fails
/// with a retryable error.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay of the client's exponential backoff between retries.
const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(100);

/// Calls a [`crate::HttpGateway`] over plain HTTP.
pub struct HttpRpcClient {
    base_url: String,
    http: reqwest::Client,
    max_retries: u32,
    base_backoff: Duration,
}

impl HttpRpcClient {
    /// Build a client targeting the gateway at `base_url` (e.g.
    /// `http://peer:8080`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: DEFAULT_BASE_BACKOFF,
        }
    }

    /// Override the retry budget (default 3 retries, 100ms base backoff).
    pub fn with_retry(mut self, max_retries: u32, base_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_backoff = base_backoff;
        self
    }

    /// Invoke a unary method and await its result, retrying transient
    /// failures.
    pub async fn call(
        &self,
        actor_id: &ActorId,
        target_identifier: &str,
        generic_substitutions: &[String],
        arguments: &[Base64Bytes],
    ) -> Result<Base64Bytes> {
        let request = InvokeRequest {
            actor_id: actor_id.clone(),
            target_identifier: target_identifier.to_string(),
            generic_substitutions: generic_substitutions.to_vec(),
            arguments: arguments.to_vec(),
            stream_filter: None,
        };

        let response: InvokeResponse = self.post_with_retry(&request).await?;
        match (response.result, response.error_message) {
            (_, Some(message)) => Err(Error::UpstreamStatus {
                endpoint: self.invoke_url(),
                status: 200,
                body: message,
            }),
            (Some(bytes), None) => Ok(bytes),
            (None, None) => Ok(Base64Bytes::default()),
        }
    }

    /// Open a streaming method and return the resulting sequence of
    /// [`StreamEvent`]s. Streaming requests are not retried once the SSE
    /// body has started: a dropped connection surfaces as a terminal
    /// [`StreamEvent::Error`] for the caller to resubscribe from.
    pub async fn call_stream(
        &self,
        actor_id: &ActorId,
        target_identifier: &str,
        generic_substitutions: &[String],
        arguments: &[Base64Bytes],
        stream_filter: Option<StreamFilter>,
    ) -> Result<BoxStream<'static, StreamEvent>> {
        let request = InvokeRequest {
            actor_id: actor_id.clone(),
            target_identifier: target_identifier.to_string(),
            generic_substitutions: generic_substitutions.to_vec(),
            arguments: arguments.to_vec(),
            stream_filter,
        };

        let response = self
            .http
            .post(self.invoke_url())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }

        let byte_stream = response.bytes_stream();
        Ok(Box::pin(sse_lines(byte_stream)))
    }

    async fn post_with_retry<T: serde::de::DeserializeOwned>(
        &self,
        request: &InvokeRequest,
    ) -> Result<T> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.post_once(request).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt > self.max_retries || !is_retryable(&e) => return Err(e),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "retrying http invoke");
                    let backoff = self.base_backoff * 2u32.pow(attempt.saturating_sub(1));
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn post_once<T: serde::de::DeserializeOwned>(&self, request: &InvokeRequest) -> Result<T> {
        let response = self.http.post(self.invoke_url()).json(request).send().await?;
        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }
        Ok(response.json::<T>().await?)
    }

    async fn status_error(&self, response: reqwest::Response) -> Error {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Error::UpstreamStatus {
            endpoint: self.invoke_url(),
            status,
            body,
        }
    }

    fn invoke_url(&self) -> String {
        format!("{}/invoke", self.base_url.trim_end_matches('/'))
    }
}

fn is_retryable(error: &Error) -> bool {
    match error {
        Error::Http(_) => true,
        Error::UpstreamStatus { status, .. } => *status >= 500,
        _ => false,
    }
}

/// Adapt an SSE byte stream (`data: <json>\n\n` frames) into
/// [`StreamEvent`]s, one per `data:` line.
fn sse_lines(
    byte_stream: impl futures::Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> impl futures::Stream<Item = StreamEvent> + Send + 'static {
    let mut buffer = String::new();
    byte_stream
        .filter_map(move |chunk| {
            let frames = match chunk {
                Ok(bytes) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    let mut frames = Vec::new();
                    while let Some(pos) = buffer.find("\n\n") {
                        let event = buffer[..pos].to_string();
                        buffer.drain(..pos + 2);
                        for line in event.lines() {
                            if let Some(data) = line.strip_prefix("data:") {
                                frames.push(data.trim().to_string());
                            }
                        }
                    }
                    frames
                }
                Err(e) => {
                    tracing::warn!(error = %e, "sse byte stream failed");
                    vec![serde_json::to_string(&StreamFrame::End {
                        reason: StreamEndReason::Error,
                        message: Some(e.to_string()),
                    })
                    .unwrap_or_default()]
                }
            };
            async move { Some(futures::stream::iter(frames)) }
        })
        .flatten()
        .filter_map(|payload| async move {
            match serde_json::from_str::<StreamFrame>(&payload) {
                Ok(StreamFrame::Data { data }) => Some(StreamEvent::Data(data)),
                Ok(StreamFrame::Error { error_message }) => Some(StreamEvent::Error(error_message)),
                Ok(StreamFrame::End { reason, message }) => Some(StreamEvent::Ended { reason, message }),
                Err(e) => {
                    tracing::warn!(error = %e, payload = %payload, "dropping unparsable sse frame");
                    None
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classifies_5xx_but_not_4xx() {
        let server_error = Error::UpstreamStatus {
            endpoint: "x".into(),
            status: 503,
            body: String::new(),
        };
        let client_error = Error::UpstreamStatus {
            endpoint: "x".into(),
            status: 404,
            body: String::new(),
        };
        assert!(is_retryable(&server_error));
        assert!(!is_retryable(&client_error));
    }

    #[test]
    fn invoke_url_strips_trailing_slash() {
        let client = HttpRpcClient::new("http://peer:8080/");
        assert_eq!(client.invoke_url(), "http://peer:8080/invoke");
    }
}
