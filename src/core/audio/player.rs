//! Playback engine.
//!
//! [`AudioPlayer`] wires a [`PlaybackProcessor`] into an [`AudioOutput`]
//! backend. The processor owns the [`ExpandableBuffer`] outright and lives on
//! the render thread; everything else reaches it through a
//! `crossbeam-channel` of [`PlaybackCommand`]s that is drained at the start
//! of every quantum. The render path therefore never waits on a lock held by
//! async code.
//!
//! ```text
//! session ──PlayerHandle──► [Write/Clear] ──► PlaybackProcessor ──► Analyser ──► device
//!                                                   └──► on_audio_played listeners
//! ```

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};

use super::analyser::Analyser;
use super::backend::AudioOutput;
use super::buffer::{DEFAULT_INITIAL_BUFFER_LENGTH, ExpandableBuffer};
use super::{AudioError, AudioResult, DEFAULT_OUTPUT_SAMPLE_RATE};

/// Listener for the exact samples delivered to the device each quantum.
///
/// Runs on the render thread and must not block.
pub type AudioPlayedListener = Arc<dyn Fn(&[f32]) + Send + Sync>;

/// Messages from the async side to the render thread.
pub enum PlaybackCommand {
    /// Append decoded samples
    Write(Vec<f32>),
    /// Discard everything pending (barge-in)
    Clear,
    /// Register a listener after the player started
    Listen(AudioPlayedListener),
}

impl fmt::Debug for PlaybackCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackCommand::Write(samples) => write!(f, "Write({} samples)", samples.len()),
            PlaybackCommand::Clear => write!(f, "Clear"),
            PlaybackCommand::Listen(_) => write!(f, "Listen"),
        }
    }
}

// =============================================================================
// Render side
// =============================================================================

/// Render-thread half of the player.
pub struct PlaybackProcessor {
    buffer: ExpandableBuffer,
    commands: Receiver<PlaybackCommand>,
    analyser: Analyser,
    listeners: Vec<AudioPlayedListener>,
}

impl PlaybackProcessor {
    pub fn new(
        buffer: ExpandableBuffer,
        commands: Receiver<PlaybackCommand>,
        analyser: Analyser,
        listeners: Vec<AudioPlayedListener>,
    ) -> Self {
        Self {
            buffer,
            commands,
            analyser,
            listeners,
        }
    }

    /// Render one quantum into `output`.
    pub fn process(&mut self, output: &mut [f32]) {
        self.apply_commands();
        self.buffer.read(output);
        self.analyser.publish(output);
        for listener in &self.listeners {
            listener(output);
        }
    }

    /// Apply queued commands in FIFO order.
    fn apply_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(PlaybackCommand::Write(samples)) => self.buffer.write(&samples),
                Ok(PlaybackCommand::Clear) => {
                    tracing::debug!(
                        "Barge-in: discarding {} pending samples",
                        self.buffer.pending()
                    );
                    self.buffer.clear_buffer();
                }
                Ok(PlaybackCommand::Listen(listener)) => self.listeners.push(listener),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    pub fn buffer(&self) -> &ExpandableBuffer {
        &self.buffer
    }
}

// =============================================================================
// Async side
// =============================================================================

/// Cloneable, thread-safe handle that feeds a running player.
#[derive(Clone, Debug)]
pub struct PlayerHandle {
    commands: Sender<PlaybackCommand>,
}

impl PlayerHandle {
    pub(crate) fn from_sender(commands: Sender<PlaybackCommand>) -> Self {
        Self { commands }
    }

    /// Queue samples for playback. Silently dropped if the player stopped.
    pub fn play_audio(&self, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        if self.commands.send(PlaybackCommand::Write(samples)).is_err() {
            tracing::trace!("Player stopped, dropping audio");
        }
    }

    /// Discard all pending playback immediately.
    pub fn barge_in(&self) {
        if self.commands.send(PlaybackCommand::Clear).is_err() {
            tracing::trace!("Player stopped, ignoring barge-in");
        }
    }
}

struct RunningPlayer {
    handle: PlayerHandle,
    analyser: Analyser,
}

/// Output graph: processor, analyser and device.
pub struct AudioPlayer {
    output: Box<dyn AudioOutput>,
    sample_rate: u32,
    initial_buffer_length: usize,
    listeners: Vec<AudioPlayedListener>,
    running: Option<RunningPlayer>,
}

impl AudioPlayer {
    /// Create a player for `output` with the default rate and buffering.
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self::with_settings(output, DEFAULT_OUTPUT_SAMPLE_RATE, DEFAULT_INITIAL_BUFFER_LENGTH)
    }

    pub fn with_settings(
        output: Box<dyn AudioOutput>,
        sample_rate: u32,
        initial_buffer_length: usize,
    ) -> Self {
        Self {
            output,
            sample_rate,
            initial_buffer_length,
            listeners: Vec::new(),
            running: None,
        }
    }

    /// Open the output device and install the render callback.
    ///
    /// A second call while running is a no-op. On device failure nothing is
    /// left initialized.
    pub fn start(&mut self) -> AudioResult<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let (tx, rx) = unbounded();
        let analyser = Analyser::new();
        let mut processor = PlaybackProcessor::new(
            ExpandableBuffer::new(self.initial_buffer_length),
            rx,
            analyser.clone(),
            self.listeners.clone(),
        );

        self.output.start(
            self.sample_rate,
            Box::new(move |output: &mut [f32]| processor.process(output)),
        )?;

        tracing::info!(
            "Audio player started on {} at {}Hz (initial buffer {} samples)",
            self.output.name(),
            self.sample_rate,
            self.initial_buffer_length
        );

        self.running = Some(RunningPlayer {
            handle: PlayerHandle::from_sender(tx),
            analyser,
        });
        Ok(())
    }

    /// Tear down the device and the processor.
    pub fn stop(&mut self) {
        if self.running.take().is_some() {
            self.output.stop();
            tracing::info!("Audio player stopped");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.running.is_some()
    }

    /// Queue samples for playback.
    pub fn play_audio(&self, samples: &[f32]) {
        match &self.running {
            Some(running) => running.handle.play_audio(samples.to_vec()),
            None => tracing::error!("play_audio called before the player was started"),
        }
    }

    /// Discard all pending playback immediately.
    pub fn barge_in(&self) {
        match &self.running {
            Some(running) => running.handle.barge_in(),
            None => tracing::error!("barge_in called before the player was started"),
        }
    }

    /// Mean absolute amplitude of the last rendered quantum, `0.0` when stopped.
    pub fn get_volume(&self) -> f32 {
        self.running
            .as_ref()
            .map(|running| running.analyser.volume())
            .unwrap_or(0.0)
    }

    /// Last rendered quantum, `None` when stopped.
    pub fn get_samples(&self) -> Option<Vec<f32>> {
        self.running
            .as_ref()
            .map(|running| running.analyser.samples())
    }

    /// Register a listener for every rendered quantum.
    pub fn on_audio_played(&mut self, listener: AudioPlayedListener) {
        if let Some(running) = &self.running
            && running
                .handle
                .commands
                .send(PlaybackCommand::Listen(listener.clone()))
                .is_err()
        {
            tracing::warn!("Render side gone, listener kept for next start");
        }
        self.listeners.push(listener);
    }

    /// Handle for feeding this player from other tasks.
    pub fn handle(&self) -> AudioResult<PlayerHandle> {
        self.running
            .as_ref()
            .map(|running| running.handle.clone())
            .ok_or(AudioError::NotInitialized)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::backend::PulledOutput;
    use parking_lot::Mutex;

    fn started_player(initial: usize) -> (AudioPlayer, PulledOutput) {
        let output = PulledOutput::new();
        let mut player =
            AudioPlayer::with_settings(Box::new(output.clone()), DEFAULT_OUTPUT_SAMPLE_RATE, initial);
        player.start().unwrap();
        (player, output)
    }

    #[test]
    fn test_uninitialized_player_is_neutral() {
        let player = AudioPlayer::new(Box::new(PulledOutput::new()));
        assert!(!player.is_initialized());
        assert_eq!(player.get_volume(), 0.0);
        assert!(player.get_samples().is_none());
        assert!(matches!(player.handle(), Err(AudioError::NotInitialized)));
        // Logged, not panicking
        player.play_audio(&[0.5; 16]);
        player.barge_in();
    }

    #[test]
    fn test_start_is_idempotent() {
        let (mut player, output) = started_player(4);
        player.start().unwrap();
        assert!(player.is_initialized());
        assert_eq!(output.sample_rate(), Some(24000));
    }

    #[test]
    fn test_play_audio_reaches_device() {
        let (player, output) = started_player(4);
        player.play_audio(&[0.5; 8]);

        let mut out = vec![0.0; 8];
        output.pull(&mut out);
        assert_eq!(out, vec![0.5; 8]);
        assert!((player.get_volume() - 0.5).abs() < 1e-6);
        assert_eq!(player.get_samples(), Some(vec![0.5; 8]));
    }

    #[test]
    fn test_barge_in_silences_next_quantum() {
        let (player, output) = started_player(4);
        player.play_audio(&[0.5; 64]);

        let mut out = vec![0.0; 8];
        output.pull(&mut out);
        assert_eq!(out, vec![0.5; 8]);

        player.barge_in();
        output.pull(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_commands_apply_in_order() {
        let (player, output) = started_player(1);
        player.play_audio(&[0.1; 4]);
        player.barge_in();
        player.play_audio(&[0.2; 4]);

        let mut out = vec![0.0; 4];
        output.pull(&mut out);
        assert_eq!(out, vec![0.2; 4]);
    }

    #[test]
    fn test_listeners_see_rendered_samples() {
        let output = PulledOutput::new();
        let mut player = AudioPlayer::with_settings(Box::new(output.clone()), 24000, 2);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let early = seen.clone();
        player.on_audio_played(Arc::new(move |samples: &[f32]| {
            early.lock().extend_from_slice(samples)
        }));
        player.start().unwrap();

        let late_count = Arc::new(Mutex::new(0usize));
        let late = late_count.clone();
        player.on_audio_played(Arc::new(move |samples: &[f32]| *late.lock() += samples.len()));

        player.play_audio(&[0.3, 0.3]);
        let mut out = vec![0.0; 4];
        output.pull(&mut out);

        assert_eq!(*seen.lock(), vec![0.3, 0.3, 0.0, 0.0]);
        assert_eq!(*late_count.lock(), 4);
    }

    #[test]
    fn test_stop_releases_device() {
        let (mut player, output) = started_player(4);
        let handle = player.handle().unwrap();
        player.stop();
        assert!(!player.is_initialized());
        assert!(!output.is_started());
        // Handle outlives the player without panicking
        handle.play_audio(vec![0.5; 4]);
        handle.barge_in();
    }

    #[test]
    fn test_handle_is_send_sync_clone() {
        fn assert_traits<T: Send + Sync + Clone>() {}
        assert_traits::<PlayerHandle>();
    }
}
