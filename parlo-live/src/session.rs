//! Session controller: owns the transport and fans inbound events out.
//!
//! One controller drives at most one open session. All outbound sends are
//! serialized through the transport's single sink, preserving caller
//! invocation order on the wire. Inbound frames are decoded and published
//! to one broadcast channel per event category, so text, audio, tool-call,
//! and connection-state consumers stay independent of each other.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;

use crate::codec::ProtocolCodec;
use crate::config::SessionConfig;
use crate::error::{LiveError, Result};
use crate::events::{AudioFrame, InboundEvent, OutboundMessage, ToolCall};
use crate::transport::{LiveEndpoint, Transport};

/// Broadcast ring capacity per subscriber channel.
const CHANNEL_CAPACITY: usize = 256;

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session, or the last session ended.
    Disconnected,
    /// Transport handshake in progress.
    Connecting,
    /// Transport open and setup enqueued.
    Connected,
}

/// Entry point pipelines use to forward captured audio.
///
/// Pipelines hold this instead of the controller's transport, so the
/// transport stays exclusively owned by the controller.
#[async_trait::async_trait]
pub trait OutboundAudio: Send + Sync {
    /// Forward one PCM frame to the live endpoint.
    async fn send_audio(&self, pcm: &[u8]) -> Result<()>;
}

/// Current state plus its broadcast channel, deduplicating transitions so
/// each state is published at most once per change.
struct StateCell {
    current: parking_lot::Mutex<ConnectionState>,
    tx: broadcast::Sender<ConnectionState>,
}

impl StateCell {
    fn new(tx: broadcast::Sender<ConnectionState>) -> Self {
        Self { current: parking_lot::Mutex::new(ConnectionState::Disconnected), tx }
    }

    fn set(&self, next: ConnectionState) {
        let mut current = self.current.lock();
        if *current == next {
            return;
        }
        *current = next;
        let _ = self.tx.send(next);
    }

    fn get(&self) -> ConnectionState {
        *self.current.lock()
    }
}

/// One open session: transport handle plus its inbound reader.
struct ActiveSession {
    id: String,
    transport: Arc<dyn Transport>,
    reader: JoinHandle<()>,
}

/// Drives one live conversation session.
///
/// Construct one controller per conversation context and inject it into
/// the pipelines; there are no process-wide singletons.
pub struct SessionController {
    endpoint: Arc<dyn LiveEndpoint>,
    credential: SecretString,
    config: SessionConfig,
    codec: ProtocolCodec,
    session: RwLock<Option<ActiveSession>>,
    state: Arc<StateCell>,
    text_tx: broadcast::Sender<String>,
    audio_tx: broadcast::Sender<AudioFrame>,
    tool_tx: broadcast::Sender<ToolCall>,
    event_tx: broadcast::Sender<InboundEvent>,
}

impl SessionController {
    /// Create a controller for `endpoint` with the given credential and
    /// session configuration.
    ///
    /// An empty credential is a fatal configuration error, surfaced here
    /// before any connection attempt.
    pub fn new(
        endpoint: Arc<dyn LiveEndpoint>,
        credential: SecretString,
        config: SessionConfig,
    ) -> Result<Self> {
        if credential.expose_secret().trim().is_empty() {
            return Err(LiveError::config("live API credential is empty"));
        }

        let codec = ProtocolCodec::new(config.tools.clone());
        let (state_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (text_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (audio_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (tool_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (event_tx, _) = broadcast::channel(CHANNEL_CAPACITY);

        Ok(Self {
            endpoint,
            credential,
            config,
            codec,
            session: RwLock::new(None),
            state: Arc::new(StateCell::new(state_tx)),
            text_tx,
            audio_tx,
            tool_tx,
            event_tx,
        })
    }

    /// Open a new session: connect the transport, send the setup envelope,
    /// and start decoding the inbound stream.
    ///
    /// The session is marked Connected as soon as the transport opens and
    /// the setup envelope is enqueued; the setup acknowledgement is logged
    /// when it arrives but does not gate the connected signal.
    pub async fn connect(&self) -> Result<()> {
        let mut guard = self.session.write().await;
        if let Some(active) = guard.as_ref() {
            if active.transport.is_open() {
                return Err(LiveError::connection("session already open; disconnect first"));
            }
            // The previous session died on the wire; discard it so the
            // caller can re-invoke connect directly.
            if let Some(stale) = guard.take() {
                stale.reader.abort();
            }
        }

        self.state.set(ConnectionState::Connecting);
        let transport = match self.endpoint.connect(&self.credential).await {
            Ok(transport) => transport,
            Err(error) => {
                self.state.set(ConnectionState::Disconnected);
                return Err(error);
            }
        };

        let setup = match self.codec.encode_setup(&self.config) {
            Ok(setup) => setup,
            Err(error) => {
                let _ = transport.close().await;
                self.state.set(ConnectionState::Disconnected);
                return Err(error);
            }
        };
        if let Err(error) = transport.send(setup).await {
            let _ = transport.close().await;
            self.state.set(ConnectionState::Disconnected);
            return Err(error);
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        self.state.set(ConnectionState::Connected);
        tracing::info!(
            session_id = %session_id,
            model_id = %self.config.model,
            "live session connected"
        );

        let reader = tokio::spawn(read_loop(
            session_id.clone(),
            transport.clone(),
            self.codec.clone(),
            self.state.clone(),
            self.text_tx.clone(),
            self.audio_tx.clone(),
            self.tool_tx.clone(),
            self.event_tx.clone(),
        ));

        *guard = Some(ActiveSession { id: session_id, transport, reader });
        Ok(())
    }

    /// Send one complete user text turn.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let frame = self.codec.encode(&OutboundMessage::text_turn(text))?;
        self.send_frame(frame).await
    }

    /// Forward one captured PCM frame, as-is, preserving call order.
    ///
    /// Frames are never batched: each call produces exactly one wire
    /// envelope.
    pub async fn send_audio(&self, pcm: &[u8]) -> Result<()> {
        let frame = self.codec.encode(&OutboundMessage::audio(pcm))?;
        self.send_frame(frame).await
    }

    /// Close the session. Safe to call from any state.
    pub async fn disconnect(&self) {
        let mut guard = self.session.write().await;
        let Some(active) = guard.take() else {
            self.state.set(ConnectionState::Disconnected);
            return;
        };

        let _ = active.transport.close().await;
        active.reader.abort();
        self.state.set(ConnectionState::Disconnected);
        tracing::info!(session_id = %active.id, "live session disconnected");
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// ID of the open session, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|active| active.id.clone())
    }

    /// Subscribe to incremental model text.
    pub fn subscribe_text(&self) -> broadcast::Receiver<String> {
        self.text_tx.subscribe()
    }

    /// Subscribe to synthesized audio frames.
    pub fn subscribe_audio(&self) -> broadcast::Receiver<AudioFrame> {
        self.audio_tx.subscribe()
    }

    /// Subscribe to validated tool calls.
    pub fn subscribe_tool_calls(&self) -> broadcast::Receiver<ToolCall> {
        self.tool_tx.subscribe()
    }

    /// Subscribe to connection-state transitions.
    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.state.tx.subscribe()
    }

    /// Subscribe to every decoded inbound event, in wire order.
    ///
    /// This is where `TurnComplete` and server `Error` events are
    /// observable alongside the typed channels.
    pub fn subscribe_events(&self) -> broadcast::Receiver<InboundEvent> {
        self.event_tx.subscribe()
    }

    async fn send_frame(&self, frame: String) -> Result<()> {
        let guard = self.session.read().await;
        let active = guard.as_ref().ok_or(LiveError::NotConnected)?;
        if !active.transport.is_open() {
            return Err(LiveError::NotConnected);
        }
        active.transport.send(frame).await
    }
}

#[async_trait::async_trait]
impl OutboundAudio for SessionController {
    async fn send_audio(&self, pcm: &[u8]) -> Result<()> {
        SessionController::send_audio(self, pcm).await
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("model", &self.config.model)
            .field("state", &self.state.get())
            .finish()
    }
}

/// Decode the inbound stream and fan events out until the transport
/// closes, then publish Disconnected.
#[allow(clippy::too_many_arguments)]
async fn read_loop(
    session_id: String,
    transport: Arc<dyn Transport>,
    codec: ProtocolCodec,
    state: Arc<StateCell>,
    text_tx: broadcast::Sender<String>,
    audio_tx: broadcast::Sender<AudioFrame>,
    tool_tx: broadcast::Sender<ToolCall>,
    event_tx: broadcast::Sender<InboundEvent>,
) {
    while let Some(item) = transport.receive().await {
        match item {
            Ok(raw) => {
                for event in codec.decode(&raw) {
                    match &event {
                        InboundEvent::SetupComplete => {
                            tracing::info!(session_id = %session_id, "setup acknowledged");
                        }
                        InboundEvent::TextDelta(delta) => {
                            let _ = text_tx.send(delta.clone());
                        }
                        InboundEvent::AudioFrame(frame) => {
                            let _ = audio_tx.send(frame.clone());
                        }
                        InboundEvent::ToolCall(call) => {
                            let _ = tool_tx.send(call.clone());
                        }
                        InboundEvent::TurnComplete => {}
                        InboundEvent::Error(message) => {
                            tracing::warn!(session_id = %session_id, %message, "server error event");
                        }
                    }
                    let _ = event_tx.send(event);
                }
            }
            Err(error) => {
                tracing::warn!(session_id = %session_id, %error, "inbound stream error");
                break;
            }
        }
    }

    state.set(ConnectionState::Disconnected);
    tracing::debug!(session_id = %session_id, "inbound reader finished");
}
