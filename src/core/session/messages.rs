//! Wire event types.
//!
//! Every frame is JSON text of the form `{"event": {"<eventName>": {...}}}`.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - sessionStart - Inference and turn detection configuration
//! - promptStart - Output configuration, voice and tools
//! - contentStart - Open a TEXT, AUDIO or TOOL block
//! - textInput / audioInput / toolResult - Block payloads
//! - contentEnd - Close a block
//! - promptEnd - Close the prompt
//! - sessionEnd - Close the session
//!
//! Server events (received from server):
//! - completionStart - Completion opened, carries the server session id
//! - contentStart - Output block opened (type, role, generation stage)
//! - textOutput - Transcript text
//! - audioOutput - Base64 PCM16 assistant audio
//! - toolUse - Tool invocation request
//! - contentEnd - Output block closed with a stop reason
//! - completionEnd - Completion closed
//! - usageEvent - Token accounting

use serde::{Deserialize, Serialize};

use super::base::{SessionError, SessionResult};
use super::config::{
    CHANNEL_COUNT, EndpointingSensitivity, InferenceParams, SAMPLE_SIZE_BITS, SessionConfig,
    ToolDefinition,
};

// =============================================================================
// Shared Enums
// =============================================================================

/// Content block modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentType {
    Text,
    Audio,
    Tool,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Speaker of a content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentRole {
    User,
    Assistant,
    System,
    Tool,
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ContentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentRole::User => write!(f, "USER"),
            ContentRole::Assistant => write!(f, "ASSISTANT"),
            ContentRole::System => write!(f, "SYSTEM"),
            ContentRole::Tool => write!(f, "TOOL"),
            ContentRole::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Why a block or completion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    EndTurn,
    PartialTurn,
    Interrupted,
    ToolUse,
    #[serde(other)]
    Other,
}

/// Whether assistant text is a preview or the settled transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GenerationStage {
    Speculative,
    Final,
    #[serde(other)]
    Unknown,
}

// =============================================================================
// Client Events
// =============================================================================

const MEDIA_TEXT: &str = "text/plain";
const MEDIA_LPCM: &str = "audio/lpcm";
const MEDIA_JSON: &str = "application/json";
const ENCODING_BASE64: &str = "base64";
const AUDIO_TYPE_SPEECH: &str = "SPEECH";

/// Events sent to the server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientEvent {
    SessionStart(SessionStart),
    PromptStart(PromptStart),
    ContentStart(ContentStart),
    TextInput(ContentPayload),
    AudioInput(ContentPayload),
    ToolResult(ContentPayload),
    ContentEnd(ContentRef),
    PromptEnd(PromptRef),
    SessionEnd(SessionEnd),
}

#[derive(Serialize)]
struct ClientEnvelope<'a> {
    event: &'a ClientEvent,
}

impl ClientEvent {
    /// Serialize into a wire frame.
    pub fn to_frame(&self) -> SessionResult<String> {
        serde_json::to_string(&ClientEnvelope { event: self })
            .map_err(|e| SessionError::SerializationError(e.to_string()))
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SessionStart(_) => "sessionStart",
            ClientEvent::PromptStart(_) => "promptStart",
            ClientEvent::ContentStart(_) => "contentStart",
            ClientEvent::TextInput(_) => "textInput",
            ClientEvent::AudioInput(_) => "audioInput",
            ClientEvent::ToolResult(_) => "toolResult",
            ClientEvent::ContentEnd(_) => "contentEnd",
            ClientEvent::PromptEnd(_) => "promptEnd",
            ClientEvent::SessionEnd(_) => "sessionEnd",
        }
    }

    /// Content block this event belongs to, if any.
    pub fn content_name(&self) -> Option<&str> {
        match self {
            ClientEvent::ContentStart(start) => Some(&start.content_name),
            ClientEvent::TextInput(p) | ClientEvent::AudioInput(p) | ClientEvent::ToolResult(p) => {
                Some(&p.content_name)
            }
            ClientEvent::ContentEnd(r) => Some(&r.content_name),
            _ => None,
        }
    }

    pub fn session_start(config: &SessionConfig) -> Self {
        ClientEvent::SessionStart(SessionStart {
            inference_configuration: InferenceConfiguration::from(config.inference),
            turn_detection_configuration: config.endpointing_sensitivity.map(|sensitivity| {
                TurnDetectionConfiguration {
                    endpointing_sensitivity: sensitivity,
                }
            }),
        })
    }

    pub fn prompt_start(prompt_name: &str, config: &SessionConfig) -> Self {
        let tools = (!config.tools.is_empty()).then(|| ToolConfiguration {
            tools: config.tools.iter().map(ToolEntry::from).collect(),
        });
        ClientEvent::PromptStart(PromptStart {
            prompt_name: prompt_name.to_string(),
            text_output_configuration: MediaConfiguration::text(),
            audio_output_configuration: AudioOutputConfiguration {
                media_type: MEDIA_LPCM.to_string(),
                sample_rate_hertz: config.output_sample_rate,
                sample_size_bits: SAMPLE_SIZE_BITS,
                channel_count: CHANNEL_COUNT,
                voice_id: config.voice_id.clone(),
                encoding: ENCODING_BASE64.to_string(),
                audio_type: AUDIO_TYPE_SPEECH.to_string(),
            },
            tool_use_output_configuration: tools.as_ref().map(|_| MediaConfiguration::json()),
            tool_configuration: tools,
        })
    }

    pub fn text_content_start(prompt_name: &str, content_name: &str, role: ContentRole) -> Self {
        ClientEvent::ContentStart(ContentStart {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: ContentType::Text,
            interactive: role != ContentRole::System,
            role,
            text_input_configuration: Some(MediaConfiguration::text()),
            audio_input_configuration: None,
            tool_result_input_configuration: None,
        })
    }

    pub fn audio_content_start(prompt_name: &str, content_name: &str, sample_rate: u32) -> Self {
        ClientEvent::ContentStart(ContentStart {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: ContentType::Audio,
            interactive: true,
            role: ContentRole::User,
            text_input_configuration: None,
            audio_input_configuration: Some(AudioInputConfiguration {
                media_type: MEDIA_LPCM.to_string(),
                sample_rate_hertz: sample_rate,
                sample_size_bits: SAMPLE_SIZE_BITS,
                channel_count: CHANNEL_COUNT,
                audio_type: AUDIO_TYPE_SPEECH.to_string(),
                encoding: ENCODING_BASE64.to_string(),
            }),
            tool_result_input_configuration: None,
        })
    }

    pub fn tool_content_start(prompt_name: &str, content_name: &str, tool_use_id: &str) -> Self {
        ClientEvent::ContentStart(ContentStart {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: ContentType::Tool,
            interactive: false,
            role: ContentRole::Tool,
            text_input_configuration: None,
            audio_input_configuration: None,
            tool_result_input_configuration: Some(ToolResultInputConfiguration {
                tool_use_id: tool_use_id.to_string(),
                content_type: ContentType::Text,
                text_input_configuration: MediaConfiguration::text(),
            }),
        })
    }

    pub fn text_input(prompt_name: &str, content_name: &str, text: &str) -> Self {
        ClientEvent::TextInput(ContentPayload::new(prompt_name, content_name, text))
    }

    pub fn audio_input(prompt_name: &str, content_name: &str, base64_pcm: &str) -> Self {
        ClientEvent::AudioInput(ContentPayload::new(prompt_name, content_name, base64_pcm))
    }

    pub fn tool_result(prompt_name: &str, content_name: &str, result: &str) -> Self {
        ClientEvent::ToolResult(ContentPayload::new(prompt_name, content_name, result))
    }

    pub fn content_end(prompt_name: &str, content_name: &str) -> Self {
        ClientEvent::ContentEnd(ContentRef {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
        })
    }

    pub fn prompt_end(prompt_name: &str) -> Self {
        ClientEvent::PromptEnd(PromptRef {
            prompt_name: prompt_name.to_string(),
        })
    }

    pub fn session_end() -> Self {
        ClientEvent::SessionEnd(SessionEnd {})
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStart {
    pub inference_configuration: InferenceConfiguration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection_configuration: Option<TurnDetectionConfiguration>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfiguration {
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,
}

impl From<InferenceParams> for InferenceConfiguration {
    fn from(params: InferenceParams) -> Self {
        Self {
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            temperature: params.temperature,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnDetectionConfiguration {
    pub endpointing_sensitivity: EndpointingSensitivity,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConfiguration {
    pub media_type: String,
}

impl MediaConfiguration {
    fn text() -> Self {
        Self {
            media_type: MEDIA_TEXT.to_string(),
        }
    }

    fn json() -> Self {
        Self {
            media_type: MEDIA_JSON.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptStart {
    pub prompt_name: String,
    pub text_output_configuration: MediaConfiguration,
    pub audio_output_configuration: AudioOutputConfiguration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_output_configuration: Option<MediaConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_configuration: Option<ToolConfiguration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutputConfiguration {
    pub media_type: String,
    pub sample_rate_hertz: u32,
    pub sample_size_bits: u16,
    pub channel_count: u16,
    pub voice_id: String,
    pub encoding: String,
    pub audio_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInputConfiguration {
    pub media_type: String,
    pub sample_rate_hertz: u32,
    pub sample_size_bits: u16,
    pub channel_count: u16,
    pub audio_type: String,
    pub encoding: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfiguration {
    pub tools: Vec<ToolEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolEntry {
    pub tool_spec: ToolSpec,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: ToolInputSchema,
}

/// The schema travels as a JSON string.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInputSchema {
    pub json: String,
}

impl From<&ToolDefinition> for ToolEntry {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            tool_spec: ToolSpec {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: ToolInputSchema {
                    json: tool.input_schema.to_string(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStart {
    pub prompt_name: String,
    pub content_name: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub interactive: bool,
    pub role: ContentRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_input_configuration: Option<MediaConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_input_configuration: Option<AudioInputConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result_input_configuration: Option<ToolResultInputConfiguration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultInputConfiguration {
    pub tool_use_id: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub text_input_configuration: MediaConfiguration,
}

/// Payload of `textInput`, `audioInput` and `toolResult`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPayload {
    pub prompt_name: String,
    pub content_name: String,
    pub content: String,
}

impl ContentPayload {
    fn new(prompt_name: &str, content_name: &str, content: &str) -> Self {
        Self {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRef {
    pub prompt_name: String,
    pub content_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRef {
    pub prompt_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionEnd {}

// =============================================================================
// Server Events
// =============================================================================

/// Names of the server events this client understands.
const SERVER_EVENT_NAMES: &[&str] = &[
    "completionStart",
    "contentStart",
    "textOutput",
    "audioOutput",
    "toolUse",
    "contentEnd",
    "completionEnd",
    "usageEvent",
];

/// Events received from the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerEvent {
    CompletionStart(CompletionStart),
    ContentStart(ContentStartOutput),
    TextOutput(TextOutput),
    AudioOutput(AudioOutput),
    ToolUse(ToolUse),
    ContentEnd(ContentEndOutput),
    CompletionEnd(CompletionEnd),
    UsageEvent(serde_json::Value),
    /// Well-formed frame with an event name outside the vocabulary
    #[serde(skip)]
    Unknown(String),
}

#[derive(Deserialize)]
struct ServerEnvelope {
    event: serde_json::Map<String, serde_json::Value>,
}

impl ServerEvent {
    /// Parse one inbound text frame.
    pub fn parse(text: &str) -> SessionResult<Self> {
        let envelope: ServerEnvelope = serde_json::from_str(text)
            .map_err(|e| SessionError::SerializationError(e.to_string()))?;

        let name = match envelope.event.keys().next() {
            Some(name) if envelope.event.len() == 1 => name.clone(),
            _ => {
                return Err(SessionError::Protocol(format!(
                    "expected exactly one event, got {}",
                    envelope.event.len()
                )));
            }
        };

        if !SERVER_EVENT_NAMES.contains(&name.as_str()) {
            return Ok(ServerEvent::Unknown(name));
        }

        serde_json::from_value(serde_json::Value::Object(envelope.event))
            .map_err(|e| SessionError::SerializationError(format!("{name}: {e}")))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionStart {
    pub session_id: Option<String>,
    pub prompt_name: Option<String>,
    pub completion_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentStartOutput {
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub role: ContentRole,
    pub content_id: Option<String>,
    /// Either a JSON object or a string holding JSON
    pub additional_model_fields: Option<serde_json::Value>,
}

impl ContentStartOutput {
    /// Generation stage announced in `additionalModelFields`.
    pub fn generation_stage(&self) -> Option<GenerationStage> {
        let fields = match self.additional_model_fields.as_ref()? {
            serde_json::Value::String(raw) => serde_json::from_str(raw).ok()?,
            other => other.clone(),
        };
        serde_json::from_value(fields.get("generationStage")?.clone()).ok()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextOutput {
    pub role: ContentRole,
    pub content: String,
    pub content_id: Option<String>,
}

impl TextOutput {
    /// Whether this is the server's barge-in marker `{ "interrupted" : true }`.
    pub fn is_interruption(&self) -> bool {
        let trimmed = self.content.trim();
        if !trimmed.starts_with('{') {
            return false;
        }
        serde_json::from_str::<serde_json::Value>(trimmed)
            .ok()
            .and_then(|v| v.get("interrupted").and_then(|flag| flag.as_bool()))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioOutput {
    /// Base64 PCM16 LE
    pub content: String,
    pub content_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolUse {
    pub tool_name: String,
    pub tool_use_id: String,
    pub content: String,
    pub content_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentEndOutput {
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub stop_reason: Option<StopReason>,
    pub content_id: Option<String>,
    pub role: Option<ContentRole>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionEnd {
    pub stop_reason: Option<StopReason>,
    pub completion_id: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================
