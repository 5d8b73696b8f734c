//! # parlo-live
//!
//! Client-side engine for a persistent, bidirectional, low-latency session
//! with a conversational speech/text endpoint (the Gemini Live API).
//!
//! The crate is layered leaf to root:
//!
//! ```text
//!   ProtocolCodec      typed events <-> JSON wire envelopes
//!   Transport          duplex channel (WebSocket in production)
//!   SessionController  owns the session, serializes sends, fans events out
//! ```
//!
//! Capture and playback pipelines (see `parlo-audio`) run concurrently
//! against one controller: capture forwards frames through
//! [`OutboundAudio`], playback consumes the audio broadcast channel.
//!
//! ## Example
//!
//! ```rust,ignore
//! use parlo_live::{GeminiEndpoint, SessionConfig, SessionController};
//! use secrecy::SecretString;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> parlo_live::Result<()> {
//!     let controller = Arc::new(SessionController::new(
//!         Arc::new(GeminiEndpoint::new()),
//!         SecretString::from(std::env::var("GEMINI_API_KEY").unwrap()),
//!         SessionConfig::new().with_voice("Aoede"),
//!     )?);
//!
//!     let mut text = controller.subscribe_text();
//!     controller.connect().await?;
//!     controller.send_text("hola!").await?;
//!
//!     while let Ok(delta) = text.recv().await {
//!         print!("{delta}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod transport;

// Re-exports
pub use audio::{AudioFormat, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, PCM_MIME};
pub use codec::ProtocolCodec;
pub use config::{DEFAULT_MODEL, FunctionDecl, LIVE_VOICES, SessionConfig};
pub use error::{LiveError, Result};
pub use events::{AudioFrame, InboundEvent, OutboundMessage, ToolCall};
pub use session::{ConnectionState, OutboundAudio, SessionController};
pub use transport::{GeminiEndpoint, LIVE_ENDPOINT_URL, LiveEndpoint, Transport, WsTransport};
