//! Session transport: the duplex channel to the live endpoint.
//!
//! [`Transport`] is the seam the session controller drives; [`WsTransport`]
//! is the production WebSocket implementation. [`LiveEndpoint`] is the
//! connection factory, so tests can swap the whole wire in.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::{LiveError, Result};

/// Live endpoint WebSocket URL.
pub const LIVE_ENDPOINT_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;
type WsSource = futures::stream::SplitStream<WsStream>;

/// A connected duplex channel carrying JSON text frames.
///
/// Sends are fire-and-forget: a mid-session network failure marks the
/// transport closed and surfaces through the receive side, never as an
/// error to the in-flight sender.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Enqueue one text frame for transmission.
    ///
    /// Fails with [`LiveError::NotConnected`] when the channel is closed.
    async fn send(&self, frame: String) -> Result<()>;

    /// Receive the next inbound text frame.
    ///
    /// Returns `None` once the channel is closed.
    async fn receive(&self) -> Option<Result<String>>;

    /// Close the channel. Idempotent; underlying close failures are
    /// swallowed.
    async fn close(&self) -> Result<()>;

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;
}

/// Connection factory for live sessions.
#[async_trait]
pub trait LiveEndpoint: Send + Sync {
    /// Open a fresh transport authenticated with `credential`.
    async fn connect(&self, credential: &SecretString) -> Result<Arc<dyn Transport>>;
}

/// The production live endpoint.
#[derive(Debug, Clone)]
pub struct GeminiEndpoint {
    base_url: String,
}

impl GeminiEndpoint {
    /// Endpoint at the standard live URL.
    pub fn new() -> Self {
        Self { base_url: LIVE_ENDPOINT_URL.to_string() }
    }

    /// Endpoint at a custom base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }
}

impl Default for GeminiEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LiveEndpoint for GeminiEndpoint {
    async fn connect(&self, credential: &SecretString) -> Result<Arc<dyn Transport>> {
        let url = build_endpoint_url(&self.base_url, credential)?;
        let transport = WsTransport::connect(&url).await?;
        Ok(Arc::new(transport))
    }
}

/// Append the credential as the `key` query parameter.
fn build_endpoint_url(base_url: &str, credential: &SecretString) -> Result<String> {
    let mut url = url::Url::parse(base_url)
        .map_err(|e| LiveError::config(format!("invalid endpoint url: {e}")))?;
    url.query_pairs_mut().append_pair("key", credential.expose_secret());
    Ok(url.to_string())
}

/// WebSocket transport over `tokio-tungstenite`.
pub struct WsTransport {
    open: AtomicBool,
    sink: Mutex<WsSink>,
    source: Mutex<WsSource>,
}

impl WsTransport {
    /// Open a WebSocket connection to `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let request = url
            .into_client_request()
            .map_err(|e| LiveError::connection(format!("failed to build client request: {e}")))?;
        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| LiveError::connection(format!("websocket connect failed: {e}")))?;
        let (sink, source) = stream.split();

        Ok(Self {
            open: AtomicBool::new(true),
            sink: Mutex::new(sink),
            source: Mutex::new(source),
        })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, frame: String) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(LiveError::NotConnected);
        }
        let mut sink = self.sink.lock().await;
        if let Err(error) = sink.send(Message::Text(frame)).await {
            // Surfaced through the receive side as a closure, not here.
            self.open.store(false, Ordering::SeqCst);
            tracing::warn!(%error, "websocket send failed, marking transport closed");
        }
        Ok(())
    }

    async fn receive(&self) -> Option<Result<String>> {
        let mut source = self.source.lock().await;
        loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                // The endpoint also ships JSON in binary frames.
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(error) => {
                        return Some(Err(LiveError::protocol(format!(
                            "invalid utf-8 in binary frame: {error}"
                        ))));
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    self.open.store(false, Ordering::SeqCst);
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(error)) => {
                    self.open.store(false, Ordering::SeqCst);
                    return Some(Err(LiveError::connection(format!("receive error: {error}"))));
                }
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        if let Err(error) = sink.send(Message::Close(None)).await {
            tracing::debug!(%error, "websocket close handshake failed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport").field("open", &self.is_open()).finish()
    }
}
