//! Wire codec for the live protocol.
//!
//! Outbound messages become JSON envelopes; inbound payloads are decoded
//! into [`InboundEvent`]s. Decoding is total: a payload that cannot be
//! parsed, or that matches none of the recognized shapes, yields zero
//! events and never an error. Tool calls are validated against the
//! declared function schemas before they are emitted.

use base64::prelude::*;
use serde::Serialize;
use serde_json::{Value, json};

use crate::audio::{OUTPUT_SAMPLE_RATE, PCM_MIME};
use crate::config::{FunctionDecl, SessionConfig};
use crate::error::Result;
use crate::events::{AudioFrame, InboundEvent, OutboundMessage, ToolCall};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    setup: Option<Setup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    realtime_input: Option<RealtimeInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_content: Option<ClientContent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaChunk {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContent {
    turns: Vec<Turn>,
    turn_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
struct Turn {
    role: String,
    parts: Vec<Part>,
}

/// Translates typed messages to and from the JSON wire envelopes.
#[derive(Debug, Clone)]
pub struct ProtocolCodec {
    declared: Vec<FunctionDecl>,
}

impl ProtocolCodec {
    /// Create a codec that validates tool calls against `declared`.
    pub fn new(declared: Vec<FunctionDecl>) -> Self {
        Self { declared }
    }

    /// Build the initial setup envelope for `config`.
    ///
    /// The `tools` key is present only when functions are declared.
    pub fn encode_setup(&self, config: &SessionConfig) -> Result<String> {
        let mut generation_config = json!({
            "responseModalities": config.modalities,
        });
        if let Some(voice) = &config.voice {
            generation_config["speechConfig"] = json!({
                "voiceConfig": {
                    "prebuiltVoiceConfig": {
                        "voiceName": voice
                    }
                }
            });
        }

        let system_instruction = config.instruction.as_ref().map(|text| Content {
            parts: vec![Part { text: Some(text.clone()) }],
        });

        let envelope = ClientMessage {
            setup: Some(Setup {
                model: config.model.clone(),
                system_instruction,
                generation_config,
                tools: declared_tools(&config.tools),
            }),
            ..Default::default()
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Encode one outbound message as a JSON text frame.
    pub fn encode(&self, message: &OutboundMessage) -> Result<String> {
        let envelope = match message {
            OutboundMessage::AudioChunk { data, mime_type } => ClientMessage {
                realtime_input: Some(RealtimeInput {
                    media_chunks: vec![MediaChunk {
                        mime_type: mime_type.clone(),
                        data: BASE64_STANDARD.encode(data),
                    }],
                }),
                ..Default::default()
            },
            OutboundMessage::TextTurn { text, turn_complete } => ClientMessage {
                client_content: Some(ClientContent {
                    turns: vec![Turn {
                        role: "user".to_string(),
                        parts: vec![Part { text: Some(text.clone()) }],
                    }],
                    turn_complete: *turn_complete,
                }),
                ..Default::default()
            },
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Decode one inbound payload into zero or more events.
    ///
    /// Recognized shapes are handled independently; everything else is
    /// ignored. This function never fails and never panics.
    pub fn decode(&self, raw: &str) -> Vec<InboundEvent> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(error) => {
                tracing::debug!(%error, "discarding unparseable inbound payload");
                return Vec::new();
            }
        };

        let mut events = Vec::new();

        if value.get("setupComplete").is_some() {
            events.push(InboundEvent::SetupComplete);
        }

        if let Some(content) = value.get("serverContent") {
            if let Some(parts) = content
                .get("modelTurn")
                .and_then(|turn| turn.get("parts"))
                .and_then(Value::as_array)
            {
                for part in parts {
                    self.decode_part(part, &mut events);
                }
            }
            if content.get("turnComplete").and_then(Value::as_bool).unwrap_or(false) {
                events.push(InboundEvent::TurnComplete);
            }
        }

        if let Some(calls) = value
            .get("toolCall")
            .and_then(|call| call.get("functionCalls"))
            .and_then(Value::as_array)
        {
            for call in calls {
                if let Some(tool_call) = self.validate_call(call) {
                    events.push(InboundEvent::ToolCall(tool_call));
                }
            }
        }

        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            events.push(InboundEvent::Error(message));
        }

        events
    }

    /// Decode one model-turn part into at most one event.
    fn decode_part(&self, part: &Value, events: &mut Vec<InboundEvent>) {
        if let Some(inline) = part.get("inlineData") {
            if let Some(frame) = decode_audio_part(inline) {
                events.push(InboundEvent::AudioFrame(frame));
            }
            return;
        }
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            events.push(InboundEvent::TextDelta(text.to_string()));
            return;
        }
        if let Some(call) = part.get("functionCall") {
            if let Some(tool_call) = self.validate_call(call) {
                events.push(InboundEvent::ToolCall(tool_call));
            }
        }
    }

    /// Validate a function-call descriptor against the declarations.
    ///
    /// Calls to undeclared names, or with arguments that fail the declared
    /// schema, are dropped.
    fn validate_call(&self, call: &Value) -> Option<ToolCall> {
        let name = call.get("name").and_then(Value::as_str)?;
        let Some(decl) = self.declared.iter().find(|decl| decl.name == name) else {
            tracing::debug!(%name, "dropping call to undeclared function");
            return None;
        };

        let args = match call.get("args") {
            Some(Value::Object(map)) => map.clone(),
            None => serde_json::Map::new(),
            Some(other) => {
                tracing::debug!(%name, args = %other, "dropping call with non-object arguments");
                return None;
            }
        };

        if !decl.validate_args(&args) {
            tracing::debug!(%name, "dropping call with arguments outside the declared schema");
            return None;
        }
        Some(ToolCall { name: name.to_string(), args })
    }
}

/// Wrap declared functions in the wire `tools` shape, or `None` when
/// nothing is declared.
fn declared_tools(decls: &[FunctionDecl]) -> Option<Vec<Value>> {
    if decls.is_empty() {
        return None;
    }
    let function_declarations: Vec<Value> = decls
        .iter()
        .map(|decl| {
            json!({
                "name": decl.name,
                "description": decl.description.clone().unwrap_or_default(),
                "parameters": decl.parameters.clone().unwrap_or_else(|| {
                    json!({ "type": "object", "properties": {} })
                }),
            })
        })
        .collect();
    Some(vec![json!({ "functionDeclarations": function_declarations })])
}

/// Decode an inline-data part into an audio frame.
///
/// The sample rate rides in the mime type (`audio/pcm;rate=24000`) and
/// defaults to 24 kHz. Frames with a foreign mime or rate violate the
/// protocol and are dropped; so are frames whose base64 payload is broken.
fn decode_audio_part(inline: &Value) -> Option<AudioFrame> {
    let mime = inline.get("mimeType").and_then(Value::as_str).unwrap_or(PCM_MIME);
    if !mime.starts_with(PCM_MIME) {
        tracing::warn!(%mime, "dropping inbound frame with unexpected mime type");
        return None;
    }
    let sample_rate = pcm_rate(mime).unwrap_or(OUTPUT_SAMPLE_RATE);
    if sample_rate != OUTPUT_SAMPLE_RATE {
        tracing::warn!(sample_rate, "dropping inbound frame with unexpected sample rate");
        return None;
    }

    let data = inline.get("data").and_then(Value::as_str)?;
    match BASE64_STANDARD.decode(data) {
        Ok(decoded) => Some(AudioFrame::new(decoded, sample_rate)),
        Err(error) => {
            tracing::warn!(%error, "dropping inbound frame with invalid base64 payload");
            None
        }
    }
}

/// Extract the `rate=` parameter from a PCM mime type.
fn pcm_rate(mime: &str) -> Option<u32> {
    mime.split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}
