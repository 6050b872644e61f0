use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use s2s_stream::utils::WavRecorder;
use s2s_stream::{
    BaseSession, ChatMessage, ClientConfig, SessionState, SonicSession,
    session::{DisconnectEvent, SessionAudio, SessionError, ToolUseRequest, TurnIndicators},
};

/// s2s-stream - Real-time speech-to-speech session client
#[derive(Parser, Debug)]
#[command(name = "s2s-stream")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Text message to send after connecting (repeatable)
    #[arg(short = 't', long = "text", value_name = "MSG")]
    text: Vec<String>,

    /// Stream the default (or selected) microphone
    #[arg(long)]
    mic: bool,

    /// Save received assistant audio to a WAV file
    #[arg(long = "save-output", value_name = "FILE.wav")]
    save_output: Option<PathBuf>,

    /// Do not play assistant audio
    #[arg(long = "no-playback")]
    no_playback: bool,

    /// Input device name
    #[arg(long = "input-device", value_name = "NAME")]
    input_device: Option<String>,

    /// Output device name
    #[arg(long = "output-device", value_name = "NAME")]
    output_device: Option<String>,

    /// List audio devices and exit
    #[arg(long = "list-devices")]
    list_devices: bool,
}

/// Events forwarded from session callbacks to the main loop.
enum UiEvent {
    ToolUse(ToolUseRequest),
    Disconnected(DisconnectEvent),
}

#[cfg(feature = "cpal-backend")]
mod devices {
    use anyhow::anyhow;
    use s2s_stream::core::audio::{
        AudioCapture, AudioChunk, AudioPlayer, CaptureConstraints, CpalInput, CpalOutput,
        list_input_devices, list_output_devices,
    };
    use s2s_stream::ClientConfig;
    use tokio::sync::mpsc;

    pub fn list() -> anyhow::Result<()> {
        println!("Input devices:");
        for name in list_input_devices().map_err(|e| anyhow!(e.to_string()))? {
            println!("  {name}");
        }
        println!("Output devices:");
        for name in list_output_devices().map_err(|e| anyhow!(e.to_string()))? {
            println!("  {name}");
        }
        Ok(())
    }

    pub fn start_player(
        device: Option<String>,
        config: &ClientConfig,
    ) -> anyhow::Result<Option<AudioPlayer>> {
        let mut player = AudioPlayer::with_settings(
            Box::new(CpalOutput::new(device)),
            config.output_sample_rate,
            config.initial_buffer_samples,
        );
        player.start().map_err(|e| anyhow!(e.to_string()))?;
        Ok(Some(player))
    }

    pub fn start_capture(
        device: Option<String>,
        config: &ClientConfig,
    ) -> anyhow::Result<(AudioCapture, mpsc::UnboundedReceiver<AudioChunk>)> {
        let constraints = CaptureConstraints {
            sample_rate: config.input_sample_rate,
            ..Default::default()
        };
        let mut capture =
            AudioCapture::with_constraints(Box::new(CpalInput::new(device)), constraints);
        let frames = capture.start().map_err(|e| anyhow!(e.to_string()))?;
        Ok((capture, frames))
    }
}

#[cfg(not(feature = "cpal-backend"))]
mod devices {
    use s2s_stream::ClientConfig;
    use s2s_stream::core::audio::{AudioCapture, AudioChunk, AudioPlayer};
    use tokio::sync::mpsc;

    const NO_BACKEND: &str = "built without the cpal-backend feature";

    pub fn list() -> anyhow::Result<()> {
        anyhow::bail!("Cannot list devices: {NO_BACKEND}")
    }

    pub fn start_player(
        _device: Option<String>,
        _config: &ClientConfig,
    ) -> anyhow::Result<Option<AudioPlayer>> {
        tracing::warn!("Playback disabled: {NO_BACKEND}");
        Ok(None)
    }

    pub fn start_capture(
        _device: Option<String>,
        _config: &ClientConfig,
    ) -> anyhow::Result<(AudioCapture, mpsc::UnboundedReceiver<AudioChunk>)> {
        anyhow::bail!("Cannot capture microphone: {NO_BACKEND}")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    if cli.list_devices {
        return devices::list();
    }

    // Load configuration from file or environment
    let config = if let Some(config_path) = &cli.config {
        info!("Loading configuration from {}", config_path.display());
        ClientConfig::from_file(config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ClientConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    if !config.has_auth_token() {
        tracing::warn!("No auth token configured, connecting anonymously");
    }

    let mut session =
        SonicSession::new(config.to_session_config()).map_err(|e| anyhow!(e.to_string()))?;
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel::<UiEvent>();

    register_printers(&mut session)?;

    let recorder = match &cli.save_output {
        Some(path) => Some(Arc::new(parking_lot::Mutex::new(Some(
            WavRecorder::create(path, config.output_sample_rate)
                .map_err(|e| anyhow!(e.to_string()))?,
        )))),
        None => None,
    };
    if let Some(recorder) = &recorder {
        let recorder = recorder.clone();
        session
            .on_audio(Arc::new(move |audio: SessionAudio| {
                if let Some(writer) = recorder.lock().as_mut()
                    && let Err(e) = writer.write_pcm16_le(&audio.data)
                {
                    tracing::error!("Failed to write WAV output: {}", e);
                }
                Box::pin(async {})
            }))
            .map_err(|e| anyhow!(e.to_string()))?;
    }

    let tool_tx = ui_tx.clone();
    session
        .on_tool_use(Arc::new(move |request: ToolUseRequest| {
            let _ = tool_tx.send(UiEvent::ToolUse(request));
            Box::pin(async {})
        }))
        .map_err(|e| anyhow!(e.to_string()))?;

    let disconnect_tx = ui_tx;
    session
        .on_disconnect(Arc::new(move |event: DisconnectEvent| {
            let _ = disconnect_tx.send(UiEvent::Disconnected(event));
            Box::pin(async {})
        }))
        .map_err(|e| anyhow!(e.to_string()))?;

    let mut player = if cli.no_playback {
        None
    } else {
        devices::start_player(cli.output_device.clone(), &config)?
    };
    if let Some(player) = &player {
        session.attach_player(player.handle().map_err(|e| anyhow!(e.to_string()))?);
    }

    session
        .connect()
        .await
        .map_err(|e| anyhow!("Failed to connect: {}", e))?;
    info!("Session ready: {}", session.get_session_info());

    let mut capture = None;
    if cli.mic {
        let (mic, frames) = devices::start_capture(cli.input_device.clone(), &config)?;
        session
            .start_audio_stream(frames)
            .await
            .map_err(|e| anyhow!(e.to_string()))?;
        capture = Some(mic);
        println!("Listening... press Ctrl+C to stop");
    }

    for message in &cli.text {
        println!("[USER] {message}");
        session
            .send_text(message)
            .await
            .map_err(|e| anyhow!(e.to_string()))?;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing session");
                break;
            }
            event = ui_rx.recv() => match event {
                Some(UiEvent::ToolUse(request)) => {
                    let result = serde_json::json!({
                        "error": format!("Tool {} is not available in this client", request.tool_name)
                    });
                    if let Err(e) = session
                        .send_tool_result(&request.tool_use_id, &result.to_string())
                        .await
                    {
                        tracing::error!("Failed to send tool result: {}", e);
                    }
                }
                Some(UiEvent::Disconnected(event)) => {
                    info!("Session ended in state {} ({:?})", event.state, event.reason);
                    break;
                }
                None => break,
            }
        }
    }

    if let Some(mut mic) = capture.take() {
        mic.stop();
    }
    if session.get_connection_state() == SessionState::SessionActive {
        session
            .stop_audio_stream()
            .await
            .map_err(|e| anyhow!(e.to_string()))?;
    }
    session
        .disconnect()
        .await
        .map_err(|e| anyhow!(e.to_string()))?;

    if let Some(player) = player.as_mut() {
        player.stop();
    }
    if let Some(recorder) = recorder
        && let Some(writer) = recorder.lock().take()
    {
        let samples = writer.finalize().map_err(|e| anyhow!(e.to_string()))?;
        info!("Saved {} samples of assistant audio", samples);
    }

    Ok(())
}

fn register_printers(session: &mut SonicSession) -> anyhow::Result<()> {
    session
        .on_transcript(Arc::new(|message: ChatMessage| {
            if message.end_of_response {
                println!("[{}] {}", message.role, message.text);
            } else {
                tracing::debug!("[{}] (partial) {}", message.role, message.text);
            }
            Box::pin(async {})
        }))
        .map_err(|e| anyhow!(e.to_string()))?;

    session
        .on_turn_state(Arc::new(|indicators: TurnIndicators| {
            if indicators.user_speaking {
                println!("... listening");
            } else if indicators.assistant_thinking {
                println!("... thinking");
            }
            Box::pin(async {})
        }))
        .map_err(|e| anyhow!(e.to_string()))?;

    session
        .on_error(Arc::new(|error: SessionError| {
            eprintln!("Session error: {error}");
            Box::pin(async {})
        }))
        .map_err(|e| anyhow!(e.to_string()))?;

    Ok(())
}
