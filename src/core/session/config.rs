//! Session configuration types.
//!
//! - Endpointing sensitivity (turn detection)
//! - Inference parameters
//! - Tool definitions
//! - Audio rates and the idle guard

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::audio::{DEFAULT_INPUT_SAMPLE_RATE, DEFAULT_OUTPUT_SAMPLE_RATE};

/// Default voice for assistant speech.
pub const DEFAULT_VOICE_ID: &str = "matthew";

/// Default system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friend. The user and you will engage in a \
spoken dialog exchanging the transcripts of a natural real-time conversation. Keep your \
responses short, generally two or three sentences for chatty scenarios.";

/// Session terminates after this long without inbound events.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(20);

/// PCM sample size on the wire.
pub const SAMPLE_SIZE_BITS: u16 = 16;

/// Mono on the wire in both directions.
pub const CHANNEL_COUNT: u16 = 1;

// =============================================================================
// Endpointing
// =============================================================================

/// How eagerly the server decides the user finished speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EndpointingSensitivity {
    /// End turns quickly
    High,
    /// Balanced (default)
    #[default]
    Medium,
    /// Tolerate longer pauses
    Low,
}

impl EndpointingSensitivity {
    /// Convert to the wire value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }

    /// Parse a wire or config value, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "HIGH" => Some(Self::High),
            "MEDIUM" => Some(Self::Medium),
            "LOW" => Some(Self::Low),
            _ => None,
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }
}

impl std::fmt::Display for EndpointingSensitivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Inference
// =============================================================================

/// Generation parameters sent in `sessionStart`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferenceParams {
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            top_p: 0.9,
            temperature: 0.7,
        }
    }
}

// =============================================================================
// Tools
// =============================================================================

/// Tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,
    /// What the tool does, shown to the model
    #[serde(default)]
    pub description: String,
    /// JSON schema for the tool input
    #[serde(default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {}, "required": [] })
}

// =============================================================================
// Session Config
// =============================================================================

/// Everything a session needs to connect and configure the conversation.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint (`ws://` or `wss://`)
    pub endpoint: String,
    /// Bearer token sent in the handshake
    pub auth_token: String,
    /// System prompt sent as the first content block
    pub system_prompt: String,
    /// Voice for assistant audio
    pub voice_id: String,
    /// Turn detection sensitivity, omitted from `sessionStart` when `None`
    pub endpointing_sensitivity: Option<EndpointingSensitivity>,
    /// Generation parameters
    pub inference: InferenceParams,
    /// Rate of captured audio sent upstream
    pub input_sample_rate: u32,
    /// Rate of assistant audio requested from the server
    pub output_sample_rate: u32,
    /// Idle guard after connect
    pub idle_timeout: Duration,
    /// Tools offered to the model
    pub tools: Vec<ToolDefinition>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            auth_token: String::new(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            voice_id: DEFAULT_VOICE_ID.to_string(),
            endpointing_sensitivity: None,
            inference: InferenceParams::default(),
            input_sample_rate: DEFAULT_INPUT_SAMPLE_RATE,
            output_sample_rate: DEFAULT_OUTPUT_SAMPLE_RATE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            tools: Vec::new(),
        }
    }
}
