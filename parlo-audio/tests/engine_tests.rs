//! Voice engine tests: the full path from wire frames to the playback
//! sink, and teardown ordering.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use parlo_audio::{
    AssumeGranted, AudioResult, CaptureDevice, FrameResult, PlaybackSink, VoiceEngine,
};
use parlo_live::{
    ConnectionState, LiveEndpoint, LiveError, Result, SessionConfig, SessionController, Transport,
};
use secrecy::SecretString;
use serde_json::json;
use tokio::sync::mpsc;

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Transport the test can feed inbound wire frames into.
struct ScriptedTransport {
    open: AtomicBool,
    inbound_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<Result<String>>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<String>>>,
    closed: tokio::sync::Notify,
}

impl ScriptedTransport {
    fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            open: AtomicBool::new(true),
            inbound_tx: parking_lot::Mutex::new(Some(tx)),
            inbound_rx: tokio::sync::Mutex::new(rx),
            closed: tokio::sync::Notify::new(),
        })
    }

    fn push(&self, frame: impl Into<String>) {
        let guard = self.inbound_tx.lock();
        guard.as_ref().expect("transport ended").send(Ok(frame.into())).unwrap();
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, _frame: String) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(LiveError::NotConnected);
        }
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
        self.open.store(false, Ordering::SeqCst);
        self.closed.notify_waiters();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct ScriptedEndpoint {
    made: parking_lot::Mutex<Vec<Arc<ScriptedTransport>>>,
}

impl ScriptedEndpoint {
    fn latest(&self) -> Arc<ScriptedTransport> {
        self.made.lock().last().expect("not connected").clone()
    }
}

#[async_trait]
impl LiveEndpoint for ScriptedEndpoint {
    async fn connect(&self, _credential: &SecretString) -> Result<Arc<dyn Transport>> {
        let transport = ScriptedTransport::new();
        self.made.lock().push(transport.clone());
        Ok(transport)
    }
}

/// Minimal device that stays silent until stopped.
///
/// Holds the frames sender so the forwarding loop stays alive between
/// start and stop.
#[derive(Clone, Default)]
struct SilentDevice {
    started: Arc<AtomicUsize>,
    stopped: Arc<AtomicUsize>,
    frames: Arc<parking_lot::Mutex<Option<mpsc::UnboundedSender<FrameResult>>>>,
}

impl CaptureDevice for SilentDevice {
    fn start(&mut self, frames: mpsc::UnboundedSender<FrameResult>) -> AudioResult<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        *self.frames.lock() = Some(frames);
        Ok(())
    }

    fn stop(&mut self) {
        if self.frames.lock().take().is_some() {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Sink recording played payload sizes and halt calls.
#[derive(Default)]
struct CountingSink {
    played: parking_lot::Mutex<Vec<Vec<u8>>>,
    halts: AtomicUsize,
}

#[async_trait]
impl PlaybackSink for CountingSink {
    async fn play(&self, path: &Path) -> AudioResult<()> {
        let container = std::fs::read(path)?;
        let mut reader = hound::WavReader::new(std::io::Cursor::new(&container)).unwrap();
        let mut payload = Vec::new();
        for sample in reader.samples::<i16>() {
            payload.extend_from_slice(&sample.unwrap().to_le_bytes());
        }
        self.played.lock().push(payload);
        Ok(())
    }

    fn halt(&self) {
        self.halts.fetch_add(1, Ordering::SeqCst);
    }
}

fn engine_with_mocks() -> (VoiceEngine, Arc<ScriptedEndpoint>, SilentDevice, Arc<CountingSink>) {
    let endpoint = Arc::new(ScriptedEndpoint::default());
    let controller = Arc::new(
        SessionController::new(
            endpoint.clone(),
            SecretString::from("test-credential"),
            SessionConfig::new(),
        )
        .unwrap(),
    );
    let device = SilentDevice::default();
    let sink = Arc::new(CountingSink::default());
    let engine = VoiceEngine::new(
        controller,
        Box::new(device.clone()),
        Arc::new(AssumeGranted),
        sink.clone(),
    );
    (engine, endpoint, device, sink)
}

#[tokio::test]
async fn test_wire_audio_flows_through_to_playback_sink() {
    let (engine, endpoint, _device, sink) = engine_with_mocks();
    engine.connect().await.unwrap();

    let pcm: Vec<u8> = (0u8..100).collect();
    endpoint.latest().push(
        json!({
            "serverContent": { "modelTurn": { "parts": [
                { "inlineData": {
                    "mimeType": "audio/pcm;rate=24000",
                    "data": BASE64_STANDARD.encode(&pcm)
                }}
            ]}}
        })
        .to_string(),
    );

    wait_until(|| !sink.played.lock().is_empty()).await;
    assert_eq!(sink.played.lock()[0], pcm);
}

#[tokio::test]
async fn test_disconnect_stops_recording_playback_and_session() {
    let (engine, _endpoint, device, sink) = engine_with_mocks();
    engine.connect().await.unwrap();

    engine.start_recording().unwrap();
    assert!(engine.is_recording());

    engine.disconnect().await;

    assert!(!engine.is_recording());
    assert_eq!(device.stopped.load(Ordering::SeqCst), 1);
    assert!(sink.halts.load(Ordering::SeqCst) >= 1);
    assert_eq!(engine.controller().state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_before_connect_is_safe() {
    let (engine, _endpoint, device, _sink) = engine_with_mocks();

    engine.disconnect().await;

    assert_eq!(engine.controller().state(), ConnectionState::Disconnected);
    assert_eq!(device.stopped.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_send_text_before_connect_fails() {
    let (engine, _endpoint, _device, _sink) = engine_with_mocks();
    assert!(matches!(engine.send_text("hola").await, Err(LiveError::NotConnected)));
}
