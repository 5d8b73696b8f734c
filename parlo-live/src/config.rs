//! Configuration types for live sessions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default live model.
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";

/// Prebuilt voices accepted by the live endpoint (varies by model).
pub const LIVE_VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Aoede"];

/// A declared function the endpoint may invoke during the session.
///
/// `parameters` is a JSON-schema subset: `{"type": "object", "properties":
/// {..}, "required": [..]}` where properties are strings, enumerations of
/// strings, numbers, or booleans. Inbound calls are validated against
/// exactly what is declared here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDecl {
    /// Function name.
    pub name: String,
    /// Human-readable description sent to the endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for the argument object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl FunctionDecl {
    /// Create a new function declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: None, parameters: None }
    }

    /// Set the function description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Set the parameters schema.
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }

    /// Check an argument map against the declared parameter schema.
    ///
    /// Every `required` key must be present, every provided argument must
    /// be declared, and enumerated properties only admit listed values.
    /// A declaration without a schema accepts any arguments.
    pub fn validate_args(&self, args: &Map<String, Value>) -> bool {
        let Some(schema) = &self.parameters else { return true };

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !args.contains_key(key) {
                    return false;
                }
            }
        }

        let empty = Map::new();
        let properties =
            schema.get("properties").and_then(Value::as_object).unwrap_or(&empty);
        for (key, value) in args {
            let Some(prop) = properties.get(key) else { return false };
            if !value_matches(prop, value) {
                return false;
            }
        }
        true
    }
}

fn value_matches(prop: &Value, value: &Value) -> bool {
    if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
        return allowed.iter().any(|candidate| candidate == value);
    }
    match prop.get("type").and_then(Value::as_str) {
        Some("string") => value.is_string(),
        Some("number") => value.is_number(),
        Some("integer") => value.as_i64().is_some() || value.as_u64().is_some(),
        Some("boolean") => value.is_boolean(),
        Some("object") => value.is_object(),
        Some("array") => value.is_array(),
        _ => true,
    }
}

/// Configuration for one live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Model identifier.
    pub model: String,

    /// Voice for synthesized speech output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Response modalities, e.g. `["AUDIO"]` or `["TEXT", "AUDIO"]`.
    pub modalities: Vec<String>,

    /// System instruction for the session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,

    /// Functions the endpoint may invoke.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tools: Vec<FunctionDecl>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: None,
            modalities: vec!["AUDIO".to_string()],
            instruction: None,
            tools: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Create a configuration with the default model and audio output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the voice.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Set the response modalities.
    pub fn with_modalities(mut self, modalities: Vec<String>) -> Self {
        self.modalities = modalities;
        self
    }

    /// Enable text and audio output.
    pub fn with_text_and_audio(mut self) -> Self {
        self.modalities = vec!["TEXT".to_string(), "AUDIO".to_string()];
        self
    }

    /// Set the system instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Add a function declaration.
    pub fn with_tool(mut self, tool: FunctionDecl) -> Self {
        self.tools.push(tool);
        self
    }
}
