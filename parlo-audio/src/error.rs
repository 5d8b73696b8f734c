//! Error types for the audio pipelines.

use thiserror::Error;

/// Result type for audio pipeline operations.
pub type AudioResult<T> = std::result::Result<T, AudioError>;

/// Errors that can occur in the capture and playback pipelines.
#[derive(Error, Debug)]
pub enum AudioError {
    /// The OS microphone capability grant is absent.
    #[error("microphone permission denied")]
    PermissionDenied,

    /// Capture device error (open failure, mid-stream fault).
    #[error("capture device error: {0}")]
    Capture(String),

    /// Playback device error.
    #[error("playback device error: {0}")]
    Playback(String),

    /// Audio container error.
    #[error("audio container error: {0}")]
    Container(#[from] hound::Error),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the live session layer.
    #[error(transparent)]
    Session(#[from] parlo_live::LiveError),
}

impl AudioError {
    /// Create a new capture error.
    pub fn capture<S: Into<String>>(msg: S) -> Self {
        Self::Capture(msg.into())
    }

    /// Create a new playback error.
    pub fn playback<S: Into<String>>(msg: S) -> Self {
        Self::Playback(msg.into())
    }
}
