//! Bidirectional speech-to-speech session client.
//!
//! [`SonicSession`] implements [`BaseSession`] over a single WebSocket
//! connection. One spawned connection task owns both halves of the socket:
//!
//! - outbound events arrive through a FIFO `mpsc` queue, so enqueue order is
//!   wire order
//! - inbound frames are parsed into [`ServerEvent`]s and folded through the
//!   [`TurnTracker`]
//! - an idle deadline terminates the session when the server goes quiet
//!
//! # Example
//!
//! ```rust,ignore
//! use s2s_stream::core::session::{BaseSession, SessionConfig, SonicSession};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut session = SonicSession::new(SessionConfig {
//!         endpoint: "wss://speech.example.com/s2s".to_string(),
//!         auth_token: "token".to_string(),
//!         ..Default::default()
//!     })
//!     .unwrap();
//!
//!     session.on_transcript(Arc::new(|m| Box::pin(async move {
//!         println!("{}: {}", m.role, m.text);
//!     }))).unwrap();
//!
//!     session.connect().await.unwrap();
//!     session.send_text("What time is it?").await.unwrap();
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::base::{
    AudioOutputCallback, BaseSession, DisconnectCallback, DisconnectEvent, SessionAudio,
    SessionError, SessionErrorCallback, SessionResult, SessionState, ToolUseCallback,
    ToolUseRequest, TranscriptCallback, TurnStateCallback,
};
use super::config::SessionConfig;
use super::messages::{ClientEvent, ContentRole, ServerEvent};
use super::turn::{ChatMessage, TurnEffect, TurnIndicators, TurnTracker};
use crate::core::audio::pcm::decode_pcm16_le;
use crate::core::audio::{AudioChunk, PlayerHandle};
use crate::utils::validate_ws_endpoint;

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Upper bound on the closing handshake during `disconnect`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type Callback<T> = Arc<dyn Fn(T) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Install a callback without blocking, deferring to a task if the slot is busy.
macro_rules! register_callback {
    ($shared:expr, $slot:ident, $callback:expr) => {{
        let callback = $callback;
        if let Ok(mut guard) = $shared.$slot.try_lock() {
            *guard = Some(callback);
        } else {
            let shared = $shared.clone();
            tokio::spawn(async move {
                *shared.$slot.lock().await = Some(callback);
            });
        }
    }};
}

async fn emit<T>(slot: &Mutex<Option<Callback<T>>>, value: T) {
    let callback = slot.lock().await.clone();
    if let Some(callback) = callback {
        callback(value).await;
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// State shared between the session handle and its connection task.
struct SessionShared {
    state: RwLock<SessionState>,
    server_session_id: RwLock<Option<String>>,
    turns: parking_lot::Mutex<TurnTracker>,
    player: RwLock<Option<PlayerHandle>>,
    output_sample_rate: u32,

    transcript_callback: Mutex<Option<TranscriptCallback>>,
    audio_callback: Mutex<Option<AudioOutputCallback>>,
    tool_use_callback: Mutex<Option<ToolUseCallback>>,
    turn_state_callback: Mutex<Option<TurnStateCallback>>,
    error_callback: Mutex<Option<SessionErrorCallback>>,
    disconnect_callback: Mutex<Option<DisconnectCallback>>,
}

impl SessionShared {
    fn new(output_sample_rate: u32) -> Self {
        Self {
            state: RwLock::new(SessionState::Idle),
            server_session_id: RwLock::new(None),
            turns: parking_lot::Mutex::new(TurnTracker::new()),
            player: RwLock::new(None),
            output_sample_rate,
            transcript_callback: Mutex::new(None),
            audio_callback: Mutex::new(None),
            tool_use_callback: Mutex::new(None),
            turn_state_callback: Mutex::new(None),
            error_callback: Mutex::new(None),
            disconnect_callback: Mutex::new(None),
        }
    }

    fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write();
        if *state != next {
            tracing::debug!("Session state {} -> {}", *state, next);
            *state = next;
        }
    }

    /// Move to `next` only from `expected`.
    fn transition(&self, expected: SessionState, next: SessionState) -> bool {
        let mut state = self.state.write();
        if *state == expected {
            tracing::debug!("Session state {} -> {}", *state, next);
            *state = next;
            true
        } else {
            false
        }
    }

    fn reset_conversation(&self) {
        *self.server_session_id.write() = None;
        *self.turns.lock() = TurnTracker::new();
    }

    async fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::CompletionStart(start) => {
                tracing::info!(
                    "Completion started (session_id={:?}, completion_id={:?})",
                    start.session_id,
                    start.completion_id
                );
                if let Some(id) = start.session_id {
                    *self.server_session_id.write() = Some(id);
                }
            }

            ServerEvent::ContentStart(start) => {
                tracing::debug!(
                    "contentStart type={:?} role={} id={:?}",
                    start.content_type,
                    start.role,
                    start.content_id
                );
                let effects = self.turns.lock().on_content_start(&start);
                self.apply(effects).await;
            }

            ServerEvent::TextOutput(text) => {
                tracing::debug!("textOutput {}: {}", text.role, text.content);
                let effects = self.turns.lock().on_text_output(&text);
                self.apply(effects).await;
            }

            ServerEvent::ContentEnd(end) => {
                tracing::debug!(
                    "contentEnd type={:?} stop_reason={:?}",
                    end.content_type,
                    end.stop_reason
                );
                let effects = self.turns.lock().on_content_end(&end);
                self.apply(effects).await;
            }

            ServerEvent::AudioOutput(audio) => match BASE64_STANDARD.decode(audio.content.as_bytes())
            {
                Ok(pcm) => self.deliver_audio(Bytes::from(pcm), audio.content_id).await,
                Err(e) => tracing::warn!("Dropping undecodable audioOutput: {}", e),
            },

            ServerEvent::ToolUse(tool) => {
                tracing::info!("Tool use requested: {} ({})", tool.tool_name, tool.tool_use_id);
                emit(
                    &self.tool_use_callback,
                    ToolUseRequest {
                        tool_name: tool.tool_name,
                        tool_use_id: tool.tool_use_id,
                        content: tool.content,
                    },
                )
                .await;
            }

            ServerEvent::CompletionEnd(end) => {
                tracing::debug!("Completion ended: {:?}", end.stop_reason);
            }

            ServerEvent::UsageEvent(usage) => {
                tracing::trace!("Usage: {}", usage);
            }

            ServerEvent::Unknown(name) => {
                tracing::debug!("Ignoring unknown server event: {}", name);
            }
        }
    }

    async fn apply(&self, effects: Vec<TurnEffect>) {
        for effect in effects {
            match effect {
                TurnEffect::Transcript(message) => emit(&self.transcript_callback, message).await,
                TurnEffect::Indicators(indicators) => {
                    emit(&self.turn_state_callback, indicators).await
                }
                TurnEffect::BargeIn => {
                    tracing::info!("Barge-in, flushing playback");
                    let player = self.player.read().clone();
                    if let Some(player) = player {
                        player.barge_in();
                    }
                }
            }
        }
    }

    async fn deliver_audio(&self, pcm: Bytes, content_id: Option<String>) {
        let player = self.player.read().clone();
        if let Some(player) = player {
            player.play_audio(decode_pcm16_le(&pcm));
        }
        emit(
            &self.audio_callback,
            SessionAudio {
                data: pcm,
                sample_rate: self.output_sample_rate,
                content_id,
            },
        )
        .await;
    }
}

// =============================================================================
// Connection Task
// =============================================================================

enum OutboundFrame {
    Event(ClientEvent),
    /// Run the closing sequence and close the socket
    Close,
}

enum TaskExit {
    Requested,
    Lost(SessionError),
    Idle,
}

/// What has actually been written to the wire.
#[derive(Debug, Default)]
struct WireLedger {
    session_started: bool,
    prompt_open: bool,
    open_blocks: Vec<String>,
}

impl WireLedger {
    fn record(&mut self, event: &ClientEvent) {
        match event {
            ClientEvent::SessionStart(_) => self.session_started = true,
            ClientEvent::PromptStart(_) => self.prompt_open = true,
            ClientEvent::ContentStart(start) => self.open_blocks.push(start.content_name.clone()),
            ClientEvent::ContentEnd(end) => self.open_blocks.retain(|name| name != &end.content_name),
            ClientEvent::PromptEnd(_) => self.prompt_open = false,
            ClientEvent::SessionEnd(_) => self.session_started = false,
            _ => {}
        }
    }

    /// Events that close everything still open, innermost first.
    fn closing_sequence(&self, prompt_name: &str) -> Vec<ClientEvent> {
        let mut events: Vec<ClientEvent> = self
            .open_blocks
            .iter()
            .map(|name| ClientEvent::content_end(prompt_name, name))
            .collect();
        if self.prompt_open {
            events.push(ClientEvent::prompt_end(prompt_name));
        }
        if self.session_started {
            events.push(ClientEvent::session_end());
        }
        events
    }
}

struct ConnectionTask {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    outbound: mpsc::Receiver<OutboundFrame>,
    shared: Arc<SessionShared>,
    prompt_name: String,
    idle_timeout: Duration,
    wire: WireLedger,
}

impl ConnectionTask {
    async fn run(mut self) {
        let idle = tokio::time::sleep(self.idle_timeout);
        tokio::pin!(idle);

        let exit = loop {
            tokio::select! {
                frame = self.outbound.recv() => match frame {
                    Some(OutboundFrame::Event(event)) => {
                        if let Err(e) = self.write(event).await {
                            break TaskExit::Lost(e);
                        }
                    }
                    Some(OutboundFrame::Close) | None => break TaskExit::Requested,
                },

                msg = self.stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => match ServerEvent::parse(text.as_str()) {
                        Ok(event) => {
                            idle.as_mut().reset(Instant::now() + self.idle_timeout);
                            self.shared.handle_event(event).await;
                        }
                        Err(e) => {
                            tracing::warn!("Dropping malformed frame: {} - {}", e, text.as_str());
                        }
                    },
                    Some(Ok(Message::Binary(data))) => {
                        idle.as_mut().reset(Instant::now() + self.idle_timeout);
                        self.shared.deliver_audio(data, None).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = self.sink.send(Message::Pong(data)).await {
                            tracing::error!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break TaskExit::Lost(SessionError::ConnectionLost(format!(
                            "closed by server: {frame:?}"
                        )));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break TaskExit::Lost(SessionError::WebSocketError(e.to_string()));
                    }
                    None => {
                        break TaskExit::Lost(SessionError::ConnectionLost(
                            "stream ended".to_string(),
                        ));
                    }
                },

                _ = &mut idle => break TaskExit::Idle,
            }
        };

        self.finish(exit).await;
        tracing::info!("Session connection task ended");
    }

    async fn write(&mut self, event: ClientEvent) -> SessionResult<()> {
        let json = match event.to_frame() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize {}: {}", event.name(), e);
                return Ok(());
            }
        };
        self.sink
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| SessionError::WebSocketError(e.to_string()))?;
        tracing::trace!("Sent {}", event.name());
        self.wire.record(&event);
        Ok(())
    }

    /// Send what is still queued, then close every open block, the prompt
    /// and the session.
    async fn close_gracefully(&mut self) {
        self.outbound.close();
        while let Ok(frame) = self.outbound.try_recv() {
            if let OutboundFrame::Event(event) = frame
                && self.write(event).await.is_err()
            {
                return;
            }
        }
        for event in self.wire.closing_sequence(&self.prompt_name) {
            if let Err(e) = self.write(event).await {
                tracing::warn!("Closing sequence interrupted: {}", e);
                return;
            }
        }
        if let Err(e) = self.sink.close().await {
            tracing::debug!("WebSocket close failed: {}", e);
        }
    }

    async fn finish(&mut self, exit: TaskExit) {
        match exit {
            TaskExit::Requested => {
                self.close_gracefully().await;
                self.shared.set_state(SessionState::Closed);
                emit(
                    &self.shared.disconnect_callback,
                    DisconnectEvent {
                        state: SessionState::Closed,
                        reason: None,
                    },
                )
                .await;
            }

            TaskExit::Idle => {
                tracing::warn!(
                    "No server events for {:?}, terminating session",
                    self.idle_timeout
                );
                self.close_gracefully().await;
                self.shared.set_state(SessionState::Error);
                let error = SessionError::IdleTimeout(self.idle_timeout);
                emit(&self.shared.error_callback, error.clone()).await;
                emit(
                    &self.shared.disconnect_callback,
                    DisconnectEvent {
                        state: SessionState::Error,
                        reason: Some(error.to_string()),
                    },
                )
                .await;
            }

            TaskExit::Lost(error) => {
                self.outbound.close();
                let reason = error.to_string();
                if self.shared.state() == SessionState::Closing {
                    tracing::info!("Connection closed during shutdown: {}", reason);
                    self.shared.set_state(SessionState::Closed);
                    emit(
                        &self.shared.disconnect_callback,
                        DisconnectEvent {
                            state: SessionState::Closed,
                            reason: Some(reason),
                        },
                    )
                    .await;
                    return;
                }

                tracing::error!("Connection lost: {}", reason);
                self.shared.set_state(SessionState::Error);
                emit(&self.shared.error_callback, error).await;
                emit(
                    &self.shared.disconnect_callback,
                    DisconnectEvent {
                        state: SessionState::Error,
                        reason: Some(reason),
                    },
                )
                .await;
            }
        }
    }
}

// =============================================================================
// Sonic Session
// =============================================================================

struct AudioForwarder {
    content_name: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Speech-to-speech session client.
///
/// # Thread Safety
///
/// Everything the connection task touches lives in an `Arc`'d shared block.
/// Callbacks are cloned out of their slot before being awaited, so a slow
/// subscriber never holds a lock.
pub struct SonicSession {
    config: SessionConfig,
    /// Prompt name of the current connection (UUID v4)
    prompt_name: String,
    shared: Arc<SessionShared>,
    ws_sender: Option<mpsc::Sender<OutboundFrame>>,
    connection_handle: Option<JoinHandle<()>>,
    audio_forwarder: Option<AudioForwarder>,
}

impl SonicSession {
    /// Prompt name used on the wire for the current connection.
    pub fn prompt_name(&self) -> &str {
        &self.prompt_name
    }

    /// Session id announced by the server in `completionStart`.
    pub fn server_session_id(&self) -> Option<String> {
        self.shared.server_session_id.read().clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether captured audio is being forwarded.
    pub fn is_streaming_audio(&self) -> bool {
        self.audio_forwarder.is_some()
    }

    fn validate_config(config: &SessionConfig) -> SessionResult<()> {
        validate_ws_endpoint(&config.endpoint)
            .map_err(|e| SessionError::InvalidConfiguration(format!("endpoint: {e}")))?;

        if config.voice_id.trim().is_empty() {
            return Err(SessionError::InvalidConfiguration(
                "voice_id is required".to_string(),
            ));
        }
        if config.input_sample_rate == 0 || config.output_sample_rate == 0 {
            return Err(SessionError::InvalidConfiguration(
                "sample rates must be positive".to_string(),
            ));
        }
        if config.idle_timeout.is_zero() {
            return Err(SessionError::InvalidConfiguration(
                "idle_timeout must be positive".to_string(),
            ));
        }
        if let Some(tool) = config.tools.iter().find(|t| t.name.trim().is_empty()) {
            return Err(SessionError::InvalidConfiguration(format!(
                "tool with empty name: {tool:?}"
            )));
        }
        Ok(())
    }

    fn build_request(&self) -> SessionResult<http::Request<()>> {
        let url = validate_ws_endpoint(&self.config.endpoint)
            .map_err(|e| SessionError::InvalidConfiguration(format!("endpoint: {e}")))?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;

        if self.config.auth_token.is_empty() {
            tracing::debug!("No auth token configured, connecting without Authorization header");
        } else {
            let value = HeaderValue::from_str(&format!("Bearer {}", self.config.auth_token))
                .map_err(|e| SessionError::InvalidConfiguration(format!("auth token: {e}")))?;
            request
                .headers_mut()
                .insert(http::header::AUTHORIZATION, value);
        }
        Ok(request)
    }

    fn startup_events(&self) -> Vec<ClientEvent> {
        let system_block = uuid::Uuid::new_v4().to_string();
        vec![
            ClientEvent::session_start(&self.config),
            ClientEvent::prompt_start(&self.prompt_name, &self.config),
            ClientEvent::text_content_start(&self.prompt_name, &system_block, ContentRole::System),
            ClientEvent::text_input(&self.prompt_name, &system_block, &self.config.system_prompt),
            ClientEvent::content_end(&self.prompt_name, &system_block),
        ]
    }

    /// Queue an event for the connection task.
    async fn send_event(&self, event: ClientEvent) -> SessionResult<()> {
        let sender = self.ws_sender.as_ref().ok_or(SessionError::NotConnected)?;
        sender
            .send(OutboundFrame::Event(event))
            .await
            .map_err(|_| SessionError::ConnectionLost("connection task ended".to_string()))
    }

    fn ensure_ready(&self) -> SessionResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    /// Cancel and join the audio forwarder, returning its block name.
    async fn stop_forwarder(&mut self) -> Option<String> {
        let forwarder = self.audio_forwarder.take()?;
        forwarder.cancel.cancel();
        if let Err(e) = forwarder.handle.await {
            tracing::warn!("Audio forwarder failed: {}", e);
        }
        self.shared.turns.lock().set_capture_active(false);
        Some(forwarder.content_name)
    }

    fn release_tasks(&mut self) {
        if let Some(forwarder) = self.audio_forwarder.take() {
            forwarder.cancel.cancel();
            forwarder.handle.abort();
        }
        self.ws_sender = None;
        if let Some(handle) = self.connection_handle.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl BaseSession for SonicSession {
    fn new(config: SessionConfig) -> SessionResult<Self> {
        Self::validate_config(&config)?;

        let shared = Arc::new(SessionShared::new(config.output_sample_rate));
        Ok(Self {
            config,
            prompt_name: uuid::Uuid::new_v4().to_string(),
            shared,
            ws_sender: None,
            connection_handle: None,
            audio_forwarder: None,
        })
    }

    async fn connect(&mut self) -> SessionResult<()> {
        match self.get_connection_state() {
            SessionState::Open | SessionState::SessionActive => return Ok(()),
            state @ (SessionState::Connecting | SessionState::Closing) => {
                return Err(SessionError::InvalidState(format!(
                    "cannot connect while {state}"
                )));
            }
            _ => {}
        }

        // Every connection is a fresh conversation
        self.release_tasks();
        self.shared.reset_conversation();
        self.prompt_name = uuid::Uuid::new_v4().to_string();
        self.shared.set_state(SessionState::Connecting);

        let request = match self.build_request() {
            Ok(request) => request,
            Err(e) => {
                self.shared.set_state(SessionState::Error);
                return Err(e);
            }
        };

        let (ws_stream, _response) = match tokio_tungstenite::connect_async(request).await {
            Ok(connected) => connected,
            Err(e) => {
                tracing::error!("Failed to connect to {}: {}", self.config.endpoint, e);
                self.shared.set_state(SessionState::Error);
                return Err(SessionError::ConnectionFailed(e.to_string()));
            }
        };

        tracing::info!("Connected to {}", self.config.endpoint);
        self.shared.set_state(SessionState::Open);

        let (sink, stream) = ws_stream.split();
        let (tx, rx) = mpsc::channel::<OutboundFrame>(WS_CHANNEL_CAPACITY);
        let task = ConnectionTask {
            sink,
            stream,
            outbound: rx,
            shared: self.shared.clone(),
            prompt_name: self.prompt_name.clone(),
            idle_timeout: self.config.idle_timeout,
            wire: WireLedger::default(),
        };
        self.connection_handle = Some(tokio::spawn(task.run()));
        self.ws_sender = Some(tx);

        for event in self.startup_events() {
            self.send_event(event).await?;
        }

        if self
            .shared
            .transition(SessionState::Open, SessionState::SessionActive)
        {
            tracing::info!(
                "Session started (prompt={}, voice={})",
                self.prompt_name,
                self.config.voice_id
            );
            Ok(())
        } else {
            Err(SessionError::ConnectionLost(
                "connection ended during startup".to_string(),
            ))
        }
    }

    async fn disconnect(&mut self) -> SessionResult<()> {
        self.stop_forwarder().await;

        let sender = self.ws_sender.take();
        let Some(mut handle) = self.connection_handle.take() else {
            return Ok(());
        };

        if !self.get_connection_state().is_terminal() {
            self.shared.set_state(SessionState::Closing);
            if let Some(sender) = sender
                && sender.send(OutboundFrame::Close).await.is_err()
            {
                tracing::debug!("Connection task already finished");
            }
        }

        match tokio::time::timeout(CLOSE_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Connection task failed: {}", e),
            Err(_) => {
                tracing::warn!(
                    "Connection task did not finish within {:?}, aborting",
                    CLOSE_TIMEOUT
                );
                handle.abort();
            }
        }

        self.shared
            .transition(SessionState::Closing, SessionState::Closed);
        tracing::info!(
            "Disconnected from {} ({})",
            self.config.endpoint,
            self.get_connection_state()
        );
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.shared.state() == SessionState::SessionActive
    }

    fn get_connection_state(&self) -> SessionState {
        self.shared.state()
    }

    async fn start_audio_stream(
        &mut self,
        mut frames: mpsc::UnboundedReceiver<AudioChunk>,
    ) -> SessionResult<()> {
        self.ensure_ready()?;
        if self.audio_forwarder.is_some() {
            return Err(SessionError::InvalidState(
                "audio stream already open".to_string(),
            ));
        }

        let content_name = uuid::Uuid::new_v4().to_string();
        self.send_event(ClientEvent::audio_content_start(
            &self.prompt_name,
            &content_name,
            self.config.input_sample_rate,
        ))
        .await?;
        self.shared.turns.lock().set_capture_active(true);

        let sender = self
            .ws_sender
            .clone()
            .ok_or(SessionError::NotConnected)?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let prompt_name = self.prompt_name.clone();
        let block = content_name.clone();

        let handle = tokio::spawn(async move {
            let mut forwarded: u64 = 0;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    chunk = frames.recv() => match chunk {
                        Some(chunk) => {
                            let event = ClientEvent::audio_input(&prompt_name, &block, &chunk.base64);
                            if sender.send(OutboundFrame::Event(event)).await.is_err() {
                                tracing::debug!("Connection task ended, stopping audio forwarder");
                                break;
                            }
                            forwarded += 1;
                        }
                        None => {
                            tracing::debug!("Capture channel closed");
                            break;
                        }
                    },
                }
            }
            tracing::debug!("Audio forwarder finished after {} chunks", forwarded);
        });

        self.audio_forwarder = Some(AudioForwarder {
            content_name,
            cancel,
            handle,
        });
        tracing::info!("Audio stream started");
        Ok(())
    }

    async fn stop_audio_stream(&mut self) -> SessionResult<()> {
        let Some(content_name) = self.stop_forwarder().await else {
            return Ok(());
        };
        if self.is_ready() {
            self.send_event(ClientEvent::content_end(&self.prompt_name, &content_name))
                .await?;
        }
        tracing::info!("Audio stream stopped");
        Ok(())
    }

    async fn send_text(&mut self, text: &str) -> SessionResult<()> {
        self.ensure_ready()?;

        let content_name = uuid::Uuid::new_v4().to_string();
        self.send_event(ClientEvent::text_content_start(
            &self.prompt_name,
            &content_name,
            ContentRole::User,
        ))
        .await?;
        self.send_event(ClientEvent::text_input(&self.prompt_name, &content_name, text))
            .await?;
        self.send_event(ClientEvent::content_end(&self.prompt_name, &content_name))
            .await
    }

    async fn send_tool_result(&mut self, tool_use_id: &str, result: &str) -> SessionResult<()> {
        self.ensure_ready()?;

        let content_name = uuid::Uuid::new_v4().to_string();
        self.send_event(ClientEvent::tool_content_start(
            &self.prompt_name,
            &content_name,
            tool_use_id,
        ))
        .await?;
        self.send_event(ClientEvent::tool_result(
            &self.prompt_name,
            &content_name,
            result,
        ))
        .await?;
        self.send_event(ClientEvent::content_end(&self.prompt_name, &content_name))
            .await
    }

    fn attach_player(&mut self, player: PlayerHandle) {
        *self.shared.player.write() = Some(player);
    }

    fn on_transcript(&mut self, callback: TranscriptCallback) -> SessionResult<()> {
        register_callback!(self.shared, transcript_callback, callback);
        Ok(())
    }

    fn on_audio(&mut self, callback: AudioOutputCallback) -> SessionResult<()> {
        register_callback!(self.shared, audio_callback, callback);
        Ok(())
    }

    fn on_tool_use(&mut self, callback: ToolUseCallback) -> SessionResult<()> {
        register_callback!(self.shared, tool_use_callback, callback);
        Ok(())
    }

    fn on_turn_state(&mut self, callback: TurnStateCallback) -> SessionResult<()> {
        register_callback!(self.shared, turn_state_callback, callback);
        Ok(())
    }

    fn on_error(&mut self, callback: SessionErrorCallback) -> SessionResult<()> {
        register_callback!(self.shared, error_callback, callback);
        Ok(())
    }

    fn on_disconnect(&mut self, callback: DisconnectCallback) -> SessionResult<()> {
        register_callback!(self.shared, disconnect_callback, callback);
        Ok(())
    }

    fn transcript(&self) -> Vec<ChatMessage> {
        self.shared.turns.lock().transcript().to_vec()
    }

    fn turn_indicators(&self) -> TurnIndicators {
        self.shared.turns.lock().indicators()
    }

    fn get_session_info(&self) -> serde_json::Value {
        serde_json::json!({
            "provider": "sonic",
            "api_type": "WebSocket bidirectional stream",
            "version": "1.0.0",
            "endpoint": self.config.endpoint,
            "state": self.get_connection_state().to_string(),
            "prompt_name": self.prompt_name,
            "server_session_id": self.server_session_id(),
            "voice_id": self.config.voice_id,
            "endpointing_sensitivity": self.config.endpointing_sensitivity.map(|s| s.as_str()),
            "input_sample_rate": self.config.input_sample_rate,
            "output_sample_rate": self.config.output_sample_rate,
            "idle_timeout_ms": self.config.idle_timeout.as_millis() as u64,
            "tools": self.config.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "transcript_entries": self.shared.turns.lock().transcript().len(),
            "features": {
                "bidirectional_audio": true,
                "barge_in": true,
                "tool_use": true,
                "crossmodal_input": true
            }
        })
    }
}

impl Drop for SonicSession {
    fn drop(&mut self) {
        self.release_tasks();
    }
}

// =============================================================================
// Tests
// =============================================================================
