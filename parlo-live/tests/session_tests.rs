//! Session controller tests against a mock transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use parlo_live::{
    ConnectionState, FunctionDecl, InboundEvent, LiveEndpoint, LiveError, Result, SessionConfig,
    SessionController, Transport,
};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};

/// In-memory transport: records sent frames, replays inbound frames the
/// test pushes.
struct MockTransport {
    open: AtomicBool,
    sent: parking_lot::Mutex<Vec<String>>,
    inbound_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<Result<String>>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<String>>>,
    closed: tokio::sync::Notify,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            open: AtomicBool::new(true),
            sent: parking_lot::Mutex::new(Vec::new()),
            inbound_tx: parking_lot::Mutex::new(Some(tx)),
            inbound_rx: tokio::sync::Mutex::new(rx),
            closed: tokio::sync::Notify::new(),
        })
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Deliver one inbound wire frame.
    fn push(&self, frame: impl Into<String>) {
        let guard = self.inbound_tx.lock();
        guard.as_ref().expect("inbound already ended").send(Ok(frame.into())).unwrap();
    }

    /// Simulate the remote end dropping the connection.
    fn end_inbound(&self) {
        self.inbound_tx.lock().take();
    }

    fn force_close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closed.notify_waiters();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, frame: String) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(LiveError::NotConnected);
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    async fn receive(&self) -> Option<Result<String>> {
        if !self.open.load(Ordering::SeqCst) {
            return None;
        }
        let mut inbound = self.inbound_rx.lock().await;
        tokio::select! {
            item = inbound.recv() => match item {
                Some(item) => Some(item),
                None => {
                    self.open.store(false, Ordering::SeqCst);
                    None
                }
            },
            _ = self.closed.notified() => None,
        }
    }

    async fn close(&self) -> Result<()> {
        self.force_close();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Endpoint minting a fresh mock transport per connect call.
#[derive(Default)]
struct MockEndpoint {
    made: parking_lot::Mutex<Vec<Arc<MockTransport>>>,
}

impl MockEndpoint {
    fn latest(&self) -> Arc<MockTransport> {
        self.made.lock().last().expect("no transport connected yet").clone()
    }

    fn connect_count(&self) -> usize {
        self.made.lock().len()
    }
}

#[async_trait]
impl LiveEndpoint for MockEndpoint {
    async fn connect(&self, _credential: &SecretString) -> Result<Arc<dyn Transport>> {
        let transport = MockTransport::new();
        self.made.lock().push(transport.clone());
        Ok(transport)
    }
}

struct RefusingEndpoint;

#[async_trait]
impl LiveEndpoint for RefusingEndpoint {
    async fn connect(&self, _credential: &SecretString) -> Result<Arc<dyn Transport>> {
        Err(LiveError::connection("connection refused"))
    }
}

fn display_text_config() -> SessionConfig {
    SessionConfig::new().with_tool(
        FunctionDecl::new("display_text").with_parameters(json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "type": { "type": "string", "enum": ["note", "vocabulary", "correction"] }
            },
            "required": ["text", "type"]
        })),
    )
}

fn controller_with_mock(config: SessionConfig) -> (Arc<SessionController>, Arc<MockEndpoint>) {
    let endpoint = Arc::new(MockEndpoint::default());
    let controller = SessionController::new(
        endpoint.clone(),
        SecretString::from("test-credential"),
        config,
    )
    .expect("controller construction should succeed");
    (Arc::new(controller), endpoint)
}

async fn recv_soon<T: Clone>(rx: &mut broadcast::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

fn parse(frame: &str) -> Value {
    serde_json::from_str(frame).expect("frame should be valid JSON")
}

// ── Construction ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_empty_credential_is_fatal_before_connecting() {
    let result = SessionController::new(
        Arc::new(MockEndpoint::default()),
        SecretString::from("   "),
        SessionConfig::new(),
    );
    assert!(matches!(result, Err(LiveError::Config(_))));
}

// ── Connect / setup ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_sends_setup_envelope_first() {
    let (controller, endpoint) = controller_with_mock(display_text_config());

    controller.connect().await.unwrap();
    assert_eq!(controller.state(), ConnectionState::Connected);
    assert!(controller.session_id().await.is_some());

    let sent = endpoint.latest().sent();
    assert_eq!(sent.len(), 1);
    let setup = &parse(&sent[0])["setup"];
    assert!(setup["model"].as_str().is_some());
    assert_eq!(setup["tools"][0]["functionDeclarations"][0]["name"], "display_text");
}

#[tokio::test]
async fn test_connect_publishes_state_transitions() {
    let (controller, _endpoint) = controller_with_mock(SessionConfig::new());
    let mut state = controller.subscribe_state();

    controller.connect().await.unwrap();

    assert_eq!(recv_soon(&mut state).await, ConnectionState::Connecting);
    assert_eq!(recv_soon(&mut state).await, ConnectionState::Connected);
}

#[tokio::test]
async fn test_connect_refused_returns_to_disconnected() {
    let controller = SessionController::new(
        Arc::new(RefusingEndpoint),
        SecretString::from("test-credential"),
        SessionConfig::new(),
    )
    .unwrap();

    let result = controller.connect().await;
    assert!(matches!(result, Err(LiveError::Connection(_))));
    assert_eq!(controller.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_second_connect_while_open_fails() {
    let (controller, endpoint) = controller_with_mock(SessionConfig::new());
    controller.connect().await.unwrap();
    assert!(matches!(controller.connect().await, Err(LiveError::Connection(_))));
    assert_eq!(endpoint.connect_count(), 1);
}

// ── Sending ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_while_disconnected_never_reaches_transport() {
    let (controller, endpoint) = controller_with_mock(SessionConfig::new());

    assert!(matches!(controller.send_text("hello").await, Err(LiveError::NotConnected)));
    assert!(matches!(controller.send_audio(&[0u8; 32]).await, Err(LiveError::NotConnected)));
    assert_eq!(endpoint.connect_count(), 0);
}

#[tokio::test]
async fn test_send_text_produces_complete_user_turn() {
    let (controller, endpoint) = controller_with_mock(SessionConfig::new());
    controller.connect().await.unwrap();

    controller.send_text("hello").await.unwrap();

    let sent = endpoint.latest().sent();
    let content = &parse(&sent[1])["clientContent"];
    assert_eq!(content["turns"][0]["role"], "user");
    assert_eq!(content["turns"][0]["parts"][0]["text"], "hello");
    assert_eq!(content["turnComplete"], true);
}

#[tokio::test]
async fn test_send_audio_preserves_caller_order_unbatched() {
    let (controller, endpoint) = controller_with_mock(SessionConfig::new());
    controller.connect().await.unwrap();

    let frames: Vec<Vec<u8>> = vec![vec![1], vec![2, 2], vec![3, 3, 3]];
    for frame in &frames {
        controller.send_audio(frame).await.unwrap();
    }

    let sent = endpoint.latest().sent();
    // One wire envelope per frame, after the setup envelope.
    assert_eq!(sent.len(), 1 + frames.len());
    for (frame, raw) in frames.iter().zip(&sent[1..]) {
        let chunk = &parse(raw)["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm");
        let decoded = BASE64_STANDARD.decode(chunk["data"].as_str().unwrap()).unwrap();
        assert_eq!(&decoded, frame);
    }
}

#[tokio::test]
async fn test_send_after_transport_loss_fails_not_connected() {
    let (controller, endpoint) = controller_with_mock(SessionConfig::new());
    controller.connect().await.unwrap();

    endpoint.latest().force_close();
    assert!(matches!(controller.send_text("hi").await, Err(LiveError::NotConnected)));
}

// ── Inbound fan-out ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_inbound_text_reaches_text_channel() {
    let (controller, endpoint) = controller_with_mock(SessionConfig::new());
    let mut text = controller.subscribe_text();
    controller.connect().await.unwrap();

    endpoint
        .latest()
        .push(r#"{"serverContent":{"modelTurn":{"parts":[{"text":"hi"}]}}}"#);

    assert_eq!(recv_soon(&mut text).await, "hi");
}

#[tokio::test]
async fn test_inbound_audio_reaches_audio_channel() {
    let (controller, endpoint) = controller_with_mock(SessionConfig::new());
    let mut audio = controller.subscribe_audio();
    controller.connect().await.unwrap();

    let payload = BASE64_STANDARD.encode([5u8, 6, 7]);
    endpoint.latest().push(
        json!({
            "serverContent": { "modelTurn": { "parts": [
                { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": payload } }
            ]}}
        })
        .to_string(),
    );

    let frame = recv_soon(&mut audio).await;
    assert_eq!(frame.data.as_ref(), &[5u8, 6, 7]);
    assert_eq!(frame.sample_rate, 24_000);
}

#[tokio::test]
async fn test_tool_calls_validated_before_fan_out() {
    let (controller, endpoint) = controller_with_mock(display_text_config());
    let mut tools = controller.subscribe_tool_calls();
    controller.connect().await.unwrap();

    // An undeclared call, then a valid one: only the valid one arrives.
    endpoint.latest().push(
        json!({ "toolCall": { "functionCalls": [{ "name": "launch_rockets", "args": {} }] } })
            .to_string(),
    );
    endpoint.latest().push(
        json!({
            "toolCall": { "functionCalls": [
                { "name": "display_text", "args": { "text": "A", "type": "note" } }
            ]}
        })
        .to_string(),
    );

    let call = recv_soon(&mut tools).await;
    assert_eq!(call.name, "display_text");
    assert_eq!(call.args["text"], "A");
}

#[tokio::test]
async fn test_turn_complete_observable_on_event_firehose() {
    let (controller, endpoint) = controller_with_mock(SessionConfig::new());
    let mut events = controller.subscribe_events();
    controller.connect().await.unwrap();

    endpoint.latest().push(r#"{"serverContent":{"turnComplete":true}}"#);

    assert_eq!(recv_soon(&mut events).await, InboundEvent::TurnComplete);
}

#[tokio::test]
async fn test_malformed_inbound_keeps_session_alive() {
    let (controller, endpoint) = controller_with_mock(SessionConfig::new());
    let mut text = controller.subscribe_text();
    controller.connect().await.unwrap();

    endpoint.latest().push("garbage %%% not json");
    endpoint
        .latest()
        .push(r#"{"serverContent":{"modelTurn":{"parts":[{"text":"still here"}]}}}"#);

    // The malformed frame produced nothing; the next frame flows normally.
    assert_eq!(recv_soon(&mut text).await, "still here");
    assert_eq!(controller.state(), ConnectionState::Connected);
}

// ── Closure / disconnect ────────────────────────────────────────────────

#[tokio::test]
async fn test_transport_closure_publishes_disconnected() {
    let (controller, endpoint) = controller_with_mock(SessionConfig::new());
    let mut state = controller.subscribe_state();
    controller.connect().await.unwrap();

    assert_eq!(recv_soon(&mut state).await, ConnectionState::Connecting);
    assert_eq!(recv_soon(&mut state).await, ConnectionState::Connected);

    // The remote end drops: the inbound stream terminates.
    endpoint.latest().end_inbound();

    assert_eq!(recv_soon(&mut state).await, ConnectionState::Disconnected);
    assert_eq!(controller.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_is_idempotent_from_any_state() {
    let (controller, endpoint) = controller_with_mock(SessionConfig::new());

    // Disconnect before ever connecting: no-op.
    controller.disconnect().await;
    assert_eq!(controller.state(), ConnectionState::Disconnected);

    controller.connect().await.unwrap();
    controller.disconnect().await;
    controller.disconnect().await;

    assert_eq!(controller.state(), ConnectionState::Disconnected);
    assert!(!endpoint.latest().is_open());
    assert!(controller.session_id().await.is_none());
    assert!(matches!(controller.send_text("hi").await, Err(LiveError::NotConnected)));
}

#[tokio::test]
async fn test_connect_retry_after_wire_loss() {
    let (controller, endpoint) = controller_with_mock(SessionConfig::new());
    let mut state = controller.subscribe_state();
    controller.connect().await.unwrap();

    endpoint.latest().end_inbound();
    wait_for_state(&mut state, ConnectionState::Disconnected).await;

    // No explicit disconnect needed; the caller just re-invokes connect.
    controller.connect().await.unwrap();
    assert_eq!(controller.state(), ConnectionState::Connected);
    assert_eq!(endpoint.connect_count(), 2);
}

async fn wait_for_state(
    rx: &mut broadcast::Receiver<ConnectionState>,
    wanted: ConnectionState,
) {
    loop {
        if recv_soon(rx).await == wanted {
            return;
        }
    }
}

#[tokio::test]
async fn test_reconnect_creates_fresh_session() {
    let (controller, endpoint) = controller_with_mock(SessionConfig::new());

    controller.connect().await.unwrap();
    let first = controller.session_id().await.unwrap();
    controller.disconnect().await;

    controller.connect().await.unwrap();
    let second = controller.session_id().await.unwrap();
    assert_ne!(first, second);
    assert_eq!(endpoint.connect_count(), 2);
}
