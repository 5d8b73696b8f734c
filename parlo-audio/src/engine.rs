//! Voice engine: the composition root for one conversation context.
//!
//! Owns the session controller and both pipelines, built by explicit
//! construction and injected as collaborators — there are no process-wide
//! singletons.

use std::sync::Arc;

use parlo_live::{
    AudioFrame, ConnectionState, InboundEvent, SessionController, ToolCall,
};
use tokio::sync::broadcast;

use crate::capture::{CaptureDevice, CapturePipeline, MicrophoneGrant};
use crate::error::AudioResult;
use crate::playback::{PlaybackPipeline, PlaybackSink};

/// One live voice conversation: session, microphone, speaker.
pub struct VoiceEngine {
    controller: Arc<SessionController>,
    capture: CapturePipeline,
    playback: Arc<PlaybackPipeline>,
}

impl VoiceEngine {
    /// Compose an engine from a controller and audio collaborators.
    ///
    /// The playback pipeline subscribes to the controller's audio channel
    /// immediately, so no synthesized frame is missed between connect and
    /// the first playback.
    pub fn new(
        controller: Arc<SessionController>,
        capture_device: Box<dyn CaptureDevice>,
        grant: Arc<dyn MicrophoneGrant>,
        sink: Arc<dyn PlaybackSink>,
    ) -> Self {
        let capture = CapturePipeline::new(capture_device, grant, controller.clone());
        let playback = PlaybackPipeline::new(sink);
        playback.attach(controller.subscribe_audio());
        Self { controller, capture, playback }
    }

    /// Compose an engine over the default desktop microphone and speaker.
    #[cfg(feature = "desktop-audio")]
    pub fn desktop(controller: Arc<SessionController>) -> Self {
        Self::new(
            controller,
            Box::new(crate::capture::CpalCaptureDevice::new()),
            Arc::new(crate::capture::AssumeGranted),
            Arc::new(crate::playback::CpalPlaybackSink::new()),
        )
    }

    /// Open the live session.
    pub async fn connect(&self) -> parlo_live::Result<()> {
        self.controller.connect().await
    }

    /// Send one complete user text turn.
    pub async fn send_text(&self, text: &str) -> parlo_live::Result<()> {
        self.controller.send_text(text).await
    }

    /// Start streaming microphone audio into the session.
    pub fn start_recording(&self) -> AudioResult<()> {
        self.capture.start_recording()
    }

    /// Stop streaming microphone audio. No-op when not recording.
    pub fn stop_recording(&self) {
        self.capture.stop_recording();
    }

    /// Whether microphone audio is currently streaming.
    pub fn is_recording(&self) -> bool {
        self.capture.is_recording()
    }

    /// Halt playback and discard buffered audio.
    pub fn stop_playback(&self) {
        self.playback.stop_playback();
    }

    /// Tear the conversation down: stop recording, stop playback, close
    /// the session. Safe from any state.
    pub async fn disconnect(&self) {
        self.capture.stop_recording();
        self.playback.stop_playback();
        self.controller.disconnect().await;
    }

    /// The underlying session controller.
    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    /// Subscribe to incremental model text.
    pub fn subscribe_text(&self) -> broadcast::Receiver<String> {
        self.controller.subscribe_text()
    }

    /// Subscribe to synthesized audio frames.
    pub fn subscribe_audio(&self) -> broadcast::Receiver<AudioFrame> {
        self.controller.subscribe_audio()
    }

    /// Subscribe to validated tool calls.
    pub fn subscribe_tool_calls(&self) -> broadcast::Receiver<ToolCall> {
        self.controller.subscribe_tool_calls()
    }

    /// Subscribe to connection-state transitions.
    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.controller.subscribe_state()
    }

    /// Subscribe to every decoded inbound event.
    pub fn subscribe_events(&self) -> broadcast::Receiver<InboundEvent> {
        self.controller.subscribe_events()
    }
}

impl std::fmt::Debug for VoiceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceEngine")
            .field("state", &self.controller.state())
            .field("recording", &self.is_recording())
            .finish()
    }
}
