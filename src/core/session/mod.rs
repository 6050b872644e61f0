//! Speech-to-speech session protocol.
//!
//! This module frames bidirectional audio and text over one WebSocket
//! connection and turns the server's event stream into transcript updates,
//! turn indicators and playable audio.
//!
//! # Architecture
//!
//! - `BaseSession` trait for the client abstraction
//! - [`SonicSession`]: the WebSocket implementation
//! - [`ClientEvent`] / [`ServerEvent`]: the wire vocabulary as tagged unions
//! - [`TurnTracker`]: transcript and indicator state machine
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian mono, base64 in JSON frames. Input
//! defaults to 16kHz, output to 24kHz.

mod base;
pub mod client;
pub mod config;
pub mod messages;
pub mod turn;

pub use base::{
    AudioOutputCallback, BaseSession, DisconnectCallback, DisconnectEvent,
    SessionAudio, SessionError, SessionErrorCallback, SessionResult, SessionState,
    ToolUseCallback, ToolUseRequest, TranscriptCallback, TurnStateCallback,
};
pub use client::SonicSession;
pub use config::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_SYSTEM_PROMPT, DEFAULT_VOICE_ID, EndpointingSensitivity,
    InferenceParams, SessionConfig, ToolDefinition,
};
pub use messages::{
    ClientEvent, ContentRole, ContentType, GenerationStage, ServerEvent, StopReason,
};
pub use turn::{ChatMessage, TurnEffect, TurnIndicators, TurnTracker};
