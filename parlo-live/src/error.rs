//! Error types for the live session engine.

use thiserror::Error;

/// Result type for live session operations.
pub type Result<T> = std::result::Result<T, LiveError>;

/// Errors that can occur while driving a live session.
#[derive(Error, Debug)]
pub enum LiveError {
    /// Transport-level connection error (DNS, TLS, refusal, mid-session loss).
    #[error("connection error: {0}")]
    Connection(String),

    /// A send was attempted while no session is open.
    #[error("session not connected")]
    NotConnected,

    /// Invalid configuration (missing credential, malformed endpoint).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Wire protocol error (unserializable envelope, non-UTF-8 frame).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Audio format violation.
    #[error("audio format error: {0}")]
    AudioFormat(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LiveError {
    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new protocol error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a new audio format error.
    pub fn audio<S: Into<String>>(msg: S) -> Self {
        Self::AudioFormat(msg.into())
    }
}
