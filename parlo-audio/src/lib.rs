//! # parlo-audio
//!
//! Capture and playback pipelines for the Parlo live session engine, plus
//! the [`VoiceEngine`] composition root that wires them to a
//! `parlo_live::SessionController`.
//!
//! The device seams ([`CaptureDevice`], [`PlaybackSink`],
//! [`MicrophoneGrant`]) keep the pipelines testable without hardware; the
//! cpal-backed implementations live behind the `desktop-audio` feature.
//!
//! ## Example
//!
//! ```rust,ignore
//! use parlo_audio::VoiceEngine;
//! use parlo_live::{GeminiEndpoint, SessionConfig, SessionController};
//! use secrecy::SecretString;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let controller = Arc::new(SessionController::new(
//!     Arc::new(GeminiEndpoint::new()),
//!     SecretString::from(std::env::var("GEMINI_API_KEY")?),
//!     SessionConfig::new(),
//! )?);
//!
//! let engine = VoiceEngine::desktop(controller);
//! engine.connect().await?;
//! engine.start_recording()?;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod engine;
pub mod error;
pub mod playback;

// Re-exports
pub use capture::{AssumeGranted, CaptureDevice, CapturePipeline, FrameResult, MicrophoneGrant};
pub use engine::VoiceEngine;
pub use error::{AudioError, AudioResult};
pub use playback::{PlaybackPipeline, PlaybackSink, pcm_to_wav};

#[cfg(feature = "desktop-audio")]
pub use capture::CpalCaptureDevice;
#[cfg(feature = "desktop-audio")]
pub use playback::CpalPlaybackSink;
