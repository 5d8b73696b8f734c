//! Microphone capture pipeline.
//!
//! Capture is push-style: the device delivers 16 kHz/16-bit/mono PCM
//! frames into a channel and the pipeline forwards each one, as it
//! arrives, to the session's outbound audio entry point. The pipeline
//! never batches and never retries; a mid-stream device error ends the
//! recording.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parlo_live::OutboundAudio;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{AudioError, AudioResult};

/// One captured frame, or the device fault that ended the stream.
pub type FrameResult = AudioResult<Bytes>;

/// A push-style audio source delivering PCM16 frames at 16 kHz mono.
///
/// Implementations deliver frames (and at most one trailing error) into
/// the sender passed to `start`, until `stop` is called or the sender is
/// dropped.
pub trait CaptureDevice: Send {
    /// Begin delivering frames into `frames`.
    ///
    /// Fails when the device cannot be opened at the required format.
    fn start(&mut self, frames: mpsc::UnboundedSender<FrameResult>) -> AudioResult<()>;

    /// Stop delivering frames and release the device. Idempotent.
    fn stop(&mut self);
}

/// Reports whether the OS microphone capability grant is present.
pub trait MicrophoneGrant: Send + Sync {
    /// Whether recording may start.
    fn granted(&self) -> bool;
}

/// Grant probe for hosts where the OS prompts at device open.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeGranted;

impl MicrophoneGrant for AssumeGranted {
    fn granted(&self) -> bool {
        true
    }
}

/// Forwards captured audio frames to the live session.
///
/// At most one recording is active per pipeline; a second
/// `start_recording` while recording is a no-op.
pub struct CapturePipeline {
    device: Arc<parking_lot::Mutex<Box<dyn CaptureDevice>>>,
    grant: Arc<dyn MicrophoneGrant>,
    outbound: Arc<dyn OutboundAudio>,
    recording: Arc<AtomicBool>,
    forward: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl CapturePipeline {
    /// Create a pipeline over `device`, gated by `grant`, forwarding to
    /// `outbound`.
    pub fn new(
        device: Box<dyn CaptureDevice>,
        grant: Arc<dyn MicrophoneGrant>,
        outbound: Arc<dyn OutboundAudio>,
    ) -> Self {
        Self {
            device: Arc::new(parking_lot::Mutex::new(device)),
            grant,
            outbound,
            recording: Arc::new(AtomicBool::new(false)),
            forward: parking_lot::Mutex::new(None),
        }
    }

    /// Start capturing and forwarding frames.
    ///
    /// Fails with [`AudioError::PermissionDenied`] when the capability
    /// grant is absent, or [`AudioError::Capture`] when the device cannot
    /// open at 16 kHz/16-bit/mono. No-op while already recording.
    pub fn start_recording(&self) -> AudioResult<()> {
        if self.recording.swap(true, Ordering::SeqCst) {
            tracing::debug!("recording already active");
            return Ok(());
        }
        if !self.grant.granted() {
            self.recording.store(false, Ordering::SeqCst);
            return Err(AudioError::PermissionDenied);
        }

        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
        if let Err(error) = self.device.lock().start(frames_tx) {
            self.recording.store(false, Ordering::SeqCst);
            return Err(error);
        }

        let outbound = self.outbound.clone();
        let recording = self.recording.clone();
        let device = self.device.clone();
        let handle = tokio::spawn(async move {
            while let Some(item) = frames_rx.recv().await {
                match item {
                    Ok(frame) => {
                        if let Err(error) = outbound.send_audio(&frame).await {
                            tracing::warn!(%error, "stopping capture, session rejected frame");
                            break;
                        }
                    }
                    Err(error) => {
                        // Reported once; the recording ends, no retry.
                        tracing::error!(%error, "capture stream failed");
                        break;
                    }
                }
            }
            device.lock().stop();
            recording.store(false, Ordering::SeqCst);
        });
        *self.forward.lock() = Some(handle);

        tracing::debug!("recording started");
        Ok(())
    }

    /// Stop capturing and release the device. No-op when not recording.
    pub fn stop_recording(&self) {
        if !self.recording.swap(false, Ordering::SeqCst) {
            return;
        }
        self.device.lock().stop();
        if let Some(handle) = self.forward.lock().take() {
            handle.abort();
        }
        tracing::debug!("recording stopped");
    }

    /// Whether a recording is currently active.
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CapturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturePipeline").field("recording", &self.is_recording()).finish()
    }
}

#[cfg(feature = "desktop-audio")]
pub use desktop::CpalCaptureDevice;

#[cfg(feature = "desktop-audio")]
mod desktop {
    use super::*;
    use cpal::SampleRate;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use parlo_live::INPUT_SAMPLE_RATE;

    /// Captures from the default input device at 16 kHz mono.
    ///
    /// The cpal stream is not `Send`, so a dedicated thread owns it for
    /// the lifetime of the recording.
    pub struct CpalCaptureDevice {
        // Dropping the sender ends the capture thread.
        stop: Option<std::sync::mpsc::Sender<()>>,
    }

    impl CpalCaptureDevice {
        /// Create an idle capture device.
        pub fn new() -> Self {
            Self { stop: None }
        }
    }

    impl Default for CpalCaptureDevice {
        fn default() -> Self {
            Self::new()
        }
    }

    impl CaptureDevice for CpalCaptureDevice {
        fn start(&mut self, frames: mpsc::UnboundedSender<FrameResult>) -> AudioResult<()> {
            if self.stop.is_some() {
                return Ok(());
            }
            let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
            let (ready_tx, ready_rx) = std::sync::mpsc::channel();
            std::thread::Builder::new()
                .name("parlo-capture".to_string())
                .spawn(move || capture_thread(frames, ready_tx, stop_rx))
                .map_err(|e| AudioError::capture(format!("failed to spawn capture thread: {e}")))?;

            match ready_rx.recv() {
                Ok(Ok(())) => {
                    self.stop = Some(stop_tx);
                    Ok(())
                }
                Ok(Err(error)) => Err(error),
                Err(_) => Err(AudioError::capture("capture thread exited during startup")),
            }
        }

        fn stop(&mut self) {
            self.stop.take();
        }
    }

    fn capture_thread(
        frames: mpsc::UnboundedSender<FrameResult>,
        ready: std::sync::mpsc::Sender<AudioResult<()>>,
        stop: std::sync::mpsc::Receiver<()>,
    ) {
        match open_stream(&frames) {
            Ok(stream) => {
                let _ = ready.send(Ok(()));
                // Park until the pipeline drops its stop handle.
                let _ = stop.recv();
                drop(stream);
            }
            Err(error) => {
                let _ = ready.send(Err(error));
            }
        }
    }

    fn open_stream(frames: &mpsc::UnboundedSender<FrameResult>) -> AudioResult<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::capture("no input device available"))?;

        let supported = device
            .supported_input_configs()
            .map_err(|e| AudioError::capture(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(INPUT_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(INPUT_SAMPLE_RATE)
            })
            .ok_or_else(|| AudioError::capture("device does not support 16 kHz mono capture"))?;
        let config = supported.with_sample_rate(SampleRate(INPUT_SAMPLE_RATE)).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = INPUT_SAMPLE_RATE,
            "capture device opened"
        );

        let data_tx = frames.clone();
        let error_tx = frames.clone();
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mut pcm = Vec::with_capacity(data.len() * 2);
                    for &sample in data {
                        let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                        pcm.extend_from_slice(&value.to_le_bytes());
                    }
                    let _ = data_tx.send(Ok(Bytes::from(pcm)));
                },
                move |error| {
                    let _ = error_tx.send(Err(AudioError::capture(error.to_string())));
                },
                None,
            )
            .map_err(|e| AudioError::capture(e.to_string()))?;

        stream.play().map_err(|e| AudioError::capture(e.to_string()))?;
        Ok(stream)
    }
}
