//! Streaming transport to a hosted chat model.
//!
//! [`StreamTransport`] abstracts one streaming POST round-trip: send a JSON
//! payload, receive the ordered sequence of SSE `data:` payloads the server
//! emits.  The two chat engines speak structurally different wire formats,
//! so all payload construction and chunk parsing stays inside the engines —
//! the transport only moves framed lines.
//!
//! [`SseTransport`] is the production implementation (reqwest +
//! `bytes_stream`).  [`ScriptedTransport`] is the test double used across
//! the engine and brain test suites.

use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// Errors surfaced by a streaming transport.
///
/// These never escape an engine: streaming tasks convert them into a single
/// terminal ERROR event.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection / DNS / TLS failure before or during the stream.
    #[error("request failed: {0}")]
    Request(String),

    /// The request did not complete within the client timeout.
    #[error("request timed out")]
    Timeout,

    /// The endpoint answered with a non-success status.
    #[error("endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

/// One framed SSE payload, or the transport failure that ended the stream.
pub type LineResult = Result<String, TransportError>;

/// The receiving end of one streaming round-trip.
pub type LineStream = mpsc::Receiver<LineResult>;

// ---------------------------------------------------------------------------
// StreamTransport
// ---------------------------------------------------------------------------

/// One streaming POST round-trip to a chat endpoint.
///
/// Implementations must be `Send + Sync` so engines can hold them behind
/// `Arc<dyn StreamTransport>` and hand clones to spawned streaming tasks.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// POST `payload` and return the stream of SSE `data:` payloads.
    ///
    /// Returns `Err` when the connection or status check fails before any
    /// data arrives; mid-stream failures are delivered in-band as the final
    /// `Err` item of the stream.
    async fn stream_lines(&self, payload: serde_json::Value) -> Result<LineStream, TransportError>;
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// How the credential is attached to each request.
#[derive(Debug, Clone)]
pub enum Auth {
    /// `Authorization: Bearer <key>` — OpenAI-compatible endpoints.
    Bearer(String),
    /// `x-goog-api-key: <key>` — Google generative-language endpoints.
    GoogleApiKey(String),
}

// ---------------------------------------------------------------------------
// SseTransport
// ---------------------------------------------------------------------------

/// Production transport: reqwest POST with an SSE body consumed via
/// `bytes_stream`, reassembled into `data:` payload lines.
///
/// Lines may straddle network chunks, so bytes are buffered until a newline
/// is seen.  Empty lines and comment lines are framing only and are never
/// forwarded.
pub struct SseTransport {
    client: reqwest::Client,
    url: String,
    auth: Auth,
}

impl SseTransport {
    /// Build a transport for `url` with the given auth scheme.
    ///
    /// No request timeout is set: a streamed turn legitimately stays open
    /// for as long as the model keeps generating.  A connect timeout keeps
    /// dead endpoints from hanging the turn.
    pub fn new(url: impl Into<String>, auth: Auth) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            url: url.into(),
            auth,
        }
    }
}

#[async_trait]
impl StreamTransport for SseTransport {
    async fn stream_lines(&self, payload: serde_json::Value) -> Result<LineStream, TransportError> {
        let mut req = self.client.post(&self.url).json(&payload);
        req = match &self.auth {
            Auth::Bearer(key) => req.bearer_auth(key),
            Auth::GoogleApiKey(key) => req.header("x-goog-api-key", key),
        };

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let (tx, rx) = mpsc::channel::<LineResult>(32);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buf: Vec<u8> = Vec::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(TransportError::from(e))).await;
                        return;
                    }
                };
                buf.extend_from_slice(&chunk);

                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim_end();

                    if let Some(data) = line.strip_prefix("data:") {
                        let data = data.trim();
                        if !data.is_empty() && tx.send(Ok(data.to_string())).await.is_err() {
                            // Consumer gone; stop reading the socket.
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

// ---------------------------------------------------------------------------
// ScriptedTransport  (test-only)
// ---------------------------------------------------------------------------

/// What a [`ScriptedTransport`] should play back.
#[cfg(test)]
#[derive(Debug, Clone)]
pub enum Script {
    /// Connect succeeds; the given `data:` payloads arrive in order.
    Lines(Vec<String>),
    /// The connection itself fails with this HTTP status.
    ConnectFail(u16),
    /// Some lines arrive, then the stream dies mid-flight.
    MidStreamFail(Vec<String>),
}

/// Test double that records every payload it is asked to send and plays
/// back a canned script instead of touching the network.
#[cfg(test)]
pub struct ScriptedTransport {
    script: Script,
    payloads: std::sync::Mutex<Vec<serde_json::Value>>,
}

#[cfg(test)]
impl ScriptedTransport {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            payloads: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Convenience: a transport whose single round-trip yields `lines`.
    pub fn with_lines<S: Into<String>>(lines: Vec<S>) -> Self {
        Self::new(Script::Lines(lines.into_iter().map(Into::into).collect()))
    }

    /// Every payload passed to [`StreamTransport::stream_lines`], in order.
    pub fn sent_payloads(&self) -> Vec<serde_json::Value> {
        self.payloads.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn stream_lines(&self, payload: serde_json::Value) -> Result<LineStream, TransportError> {
        self.payloads.lock().unwrap().push(payload);

        match &self.script {
            Script::ConnectFail(status) => Err(TransportError::Status {
                status: *status,
                body: "scripted failure".into(),
            }),
            Script::Lines(lines) => {
                let (tx, rx) = mpsc::channel(32);
                let lines = lines.clone();
                tokio::spawn(async move {
                    for line in lines {
                        if tx.send(Ok(line)).await.is_err() {
                            return;
                        }
                    }
                });
                Ok(rx)
            }
            Script::MidStreamFail(lines) => {
                let (tx, rx) = mpsc::channel(32);
                let lines = lines.clone();
                tokio::spawn(async move {
                    for line in lines {
                        if tx.send(Ok(line)).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx
                        .send(Err(TransportError::Request("connection reset".into())))
                        .await;
                });
                Ok(rx)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
