//! Typed messages and events exchanged with the live endpoint.
//!
//! `OutboundMessage` covers everything the client sends after setup;
//! `InboundEvent` is the closed set of events the codec can produce.
//! Audio travels as raw bytes internally and as base64 on the wire.

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::audio::PCM_MIME;

/// Messages sent from the client to the live endpoint.
///
/// Immutable once constructed; encoding happens in the codec.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// A chunk of raw PCM audio with its mime tag.
    AudioChunk {
        /// Raw PCM16 bytes, 16 kHz mono.
        data: Vec<u8>,
        /// Mime tag sent alongside the chunk.
        mime_type: String,
    },
    /// One complete user text turn.
    TextTurn {
        /// The user's text.
        text: String,
        /// Whether the turn is complete (always true for this client).
        turn_complete: bool,
    },
}

impl OutboundMessage {
    /// A PCM audio chunk with the standard mime tag.
    pub fn audio(data: impl Into<Vec<u8>>) -> Self {
        Self::AudioChunk { data: data.into(), mime_type: PCM_MIME.to_string() }
    }

    /// A complete user text turn.
    pub fn text_turn(text: impl Into<String>) -> Self {
        Self::TextTurn { text: text.into(), turn_complete: true }
    }
}

/// A frame of synthesized speech received from the endpoint.
///
/// The payload is `Bytes` so broadcast fan-out clones stay cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Raw PCM16 bytes.
    pub data: Bytes,
    /// Sample rate in Hz (always 24000 for this protocol).
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Create a new audio frame.
    pub fn new(data: impl Into<Bytes>, sample_rate: u32) -> Self {
        Self { data: data.into(), sample_rate }
    }
}

/// A schema-validated function invocation requested by the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Declared function name.
    pub name: String,
    /// Validated argument map.
    pub args: Map<String, Value>,
}

/// Events decoded from the live endpoint.
///
/// Produced only by the codec; malformed or unrecognized payloads produce
/// no events rather than a variant or an error.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// The endpoint acknowledged the setup envelope.
    SetupComplete,
    /// An incremental piece of model text.
    TextDelta(String),
    /// A frame of synthesized speech.
    AudioFrame(AudioFrame),
    /// A validated tool invocation.
    ToolCall(ToolCall),
    /// The model finished its turn.
    TurnComplete,
    /// The endpoint reported an error.
    Error(String),
}
