//! Base trait and types for speech-to-speech sessions.
//!
//! A session is one conversation over one WebSocket connection. Outbound
//! frames follow a strict lifecycle (`sessionStart` → `promptStart` →
//! content blocks → `promptEnd` → `sessionEnd`), inbound frames are
//! demultiplexed to per-kind subscribers.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use super::config::SessionConfig;
use super::turn::{ChatMessage, TurnIndicators};
use crate::core::audio::{AudioChunk, PlayerHandle};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during a session.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    /// Handshake or transport open failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Transport dropped after the session opened
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Operation requires an open session
    #[error("Not connected")]
    NotConnected,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Frame did not match the event vocabulary
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No inbound activity within the idle window
    #[error("Session idle for {0:?}, terminated")]
    IdleTimeout(Duration),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, not yet connected
    #[default]
    Idle,
    /// Transport handshake in progress
    Connecting,
    /// Transport open, startup events being sent
    Open,
    /// Startup sequence sent, streaming allowed
    SessionActive,
    /// Closing sequence in progress
    Closing,
    /// Closed cleanly
    Closed,
    /// Failed (connection, transport loss or idle timeout)
    Error,
}

impl SessionState {
    /// Whether no further transitions are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Error)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Open => write!(f, "Open"),
            SessionState::SessionActive => write!(f, "SessionActive"),
            SessionState::Closing => write!(f, "Closing"),
            SessionState::Closed => write!(f, "Closed"),
            SessionState::Error => write!(f, "Error"),
        }
    }
}

// =============================================================================
// Callback Types
// =============================================================================

/// Assistant audio as delivered by the server.
#[derive(Debug, Clone)]
pub struct SessionAudio {
    /// Raw audio bytes (PCM 16-bit, mono, little-endian)
    pub data: Bytes,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Content block the audio belongs to, if announced
    pub content_id: Option<String>,
}

/// Tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseRequest {
    pub tool_name: String,
    pub tool_use_id: String,
    /// JSON arguments as sent by the server
    pub content: String,
}

/// Why the connection task ended.
#[derive(Debug, Clone, PartialEq)]
pub struct DisconnectEvent {
    /// State the session ended in
    pub state: SessionState,
    /// Failure description, `None` for a requested close
    pub reason: Option<String>,
}

/// Callback type for transcript updates.
pub type TranscriptCallback =
    Arc<dyn Fn(ChatMessage) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for assistant audio.
pub type AudioOutputCallback =
    Arc<dyn Fn(SessionAudio) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for tool use requests.
pub type ToolUseCallback =
    Arc<dyn Fn(ToolUseRequest) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for turn indicator changes.
pub type TurnStateCallback =
    Arc<dyn Fn(TurnIndicators) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for session errors.
pub type SessionErrorCallback =
    Arc<dyn Fn(SessionError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for the end of the connection.
pub type DisconnectCallback =
    Arc<dyn Fn(DisconnectEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// =============================================================================
// Base Trait
// =============================================================================

/// Base trait for speech-to-speech session clients.
///
/// # Example
///
/// ```rust,ignore
/// use s2s_stream::core::session::{BaseSession, SessionConfig, SonicSession};
///
/// let mut session = SonicSession::new(SessionConfig {
///     endpoint: "wss://example.com/s2s".to_string(),
///     auth_token: "token".to_string(),
///     ..Default::default()
/// })?;
///
/// session.on_transcript(Arc::new(|m| Box::pin(async move {
///     println!("{}: {}", m.role, m.text);
/// })))?;
///
/// session.connect().await?;
/// session.send_text("Hello").await?;
/// session.disconnect().await?;
/// ```
#[async_trait]
pub trait BaseSession: Send + Sync {
    /// Create a new session instance.
    fn new(config: SessionConfig) -> SessionResult<Self>
    where
        Self: Sized;

    /// Open the transport and send the startup sequence.
    async fn connect(&mut self) -> SessionResult<()>;

    /// Close open content blocks, end the prompt and session, close transport.
    async fn disconnect(&mut self) -> SessionResult<()>;

    /// Whether streaming operations are currently accepted.
    fn is_ready(&self) -> bool;

    /// Get the current lifecycle state.
    fn get_connection_state(&self) -> SessionState;

    // -------------------------------------------------------------------------
    // Input
    // -------------------------------------------------------------------------

    /// Open a USER audio block and forward every captured chunk.
    async fn start_audio_stream(
        &mut self,
        frames: mpsc::UnboundedReceiver<AudioChunk>,
    ) -> SessionResult<()>;

    /// Stop forwarding audio and close the audio block.
    async fn stop_audio_stream(&mut self) -> SessionResult<()>;

    /// Send a complete USER text block.
    async fn send_text(&mut self, text: &str) -> SessionResult<()>;

    /// Answer a tool use request.
    async fn send_tool_result(&mut self, tool_use_id: &str, result: &str) -> SessionResult<()>;

    // -------------------------------------------------------------------------
    // Output
    // -------------------------------------------------------------------------

    /// Route assistant audio to a running player.
    fn attach_player(&mut self, player: PlayerHandle);

    /// Register a callback for transcript updates.
    fn on_transcript(&mut self, callback: TranscriptCallback) -> SessionResult<()>;

    /// Register a callback for assistant audio.
    fn on_audio(&mut self, callback: AudioOutputCallback) -> SessionResult<()>;

    /// Register a callback for tool use requests.
    fn on_tool_use(&mut self, callback: ToolUseCallback) -> SessionResult<()>;

    /// Register a callback for turn indicator changes.
    fn on_turn_state(&mut self, callback: TurnStateCallback) -> SessionResult<()>;

    /// Register a callback for session errors.
    fn on_error(&mut self, callback: SessionErrorCallback) -> SessionResult<()>;

    /// Register a callback for the end of the connection.
    fn on_disconnect(&mut self, callback: DisconnectCallback) -> SessionResult<()>;

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Snapshot of the transcript so far.
    fn transcript(&self) -> Vec<ChatMessage>;

    /// Current turn indicators.
    fn turn_indicators(&self) -> TurnIndicators;

    /// Session information for logs and diagnostics.
    fn get_session_info(&self) -> serde_json::Value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Idle.to_string(), "Idle");
        assert_eq!(SessionState::SessionActive.to_string(), "SessionActive");
        assert_eq!(SessionState::Error.to_string(), "Error");
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Error.is_terminal());
        assert!(!SessionState::Open.is_terminal());
        assert!(!SessionState::Closing.is_terminal());
    }

    #[test]
    fn test_error_display() {
        let err = SessionError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("Connection failed"));

        assert_eq!(SessionError::NotConnected.to_string(), "Not connected");
        assert_eq!(
            SessionError::IdleTimeout(Duration::from_secs(20)).to_string(),
            "Session idle for 20s, terminated"
        );
    }
}
