//! Audio engine for the streaming client.
//!
//! This module owns everything that touches sample data:
//!
//! - [`ExpandableBuffer`]: jitter-absorbing playback buffer with initial
//!   buffering, underflow accounting and instant flush (barge-in)
//! - [`AudioPlayer`]: output graph (render processor, analyser, device)
//! - [`AudioCapture`]: microphone frames cut into 512-sample PCM16 chunks
//! - [`AudioOutput`] / [`AudioInput`]: device backends. The host-driven
//!   [`PulledOutput`] / [`PushedInput`] are always available; the CPAL
//!   backend is behind the `cpal-backend` feature.
//! - [`StreamResampler`]: per-stream rate conversion for devices that do not
//!   run at the protocol rates
//!
//! # Audio Format
//!
//! Wire audio is PCM 16-bit signed little-endian mono. Capture defaults to
//! 16kHz, playback to 24kHz. Inside the engine samples are `f32` in
//! `[-1.0, 1.0]`.

pub mod analyser;
pub mod backend;
pub mod buffer;
pub mod capture;
#[cfg(feature = "cpal-backend")]
pub mod cpal_backend;
pub mod pcm;
pub mod player;
pub mod resample;

use thiserror::Error;

pub use analyser::Analyser;
pub use backend::{
    AudioInput, AudioOutput, CaptureCallback, CaptureConstraints, PulledOutput, PushedInput,
    RenderCallback,
};
pub use buffer::{DEFAULT_BUFFER_CAPACITY, DEFAULT_INITIAL_BUFFER_LENGTH, ExpandableBuffer};
pub use capture::{AudioCapture, AudioChunk, FRAME_SAMPLES};
#[cfg(feature = "cpal-backend")]
pub use cpal_backend::{CpalInput, CpalOutput, list_input_devices, list_output_devices};
pub use player::{AudioPlayedListener, AudioPlayer, PlaybackCommand, PlaybackProcessor, PlayerHandle};
pub use resample::StreamResampler;

/// Default microphone capture sample rate in Hz.
pub const DEFAULT_INPUT_SAMPLE_RATE: u32 = 16000;

/// Default assistant playback sample rate in Hz.
pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Errors raised by the audio engine.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Operation requires `start()` first
    #[error("Audio engine not initialized")]
    NotInitialized,

    /// Device could not be opened or failed while running
    #[error("Audio device error: {0}")]
    Device(String),

    /// Device does not offer a usable sample format
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Audio payload could not be encoded or decoded
    #[error("Audio encoding error: {0}")]
    Encoding(String),

    /// Sample-rate conversion could not be set up or failed mid-stream
    #[error("Resampler error: {0}")]
    Resample(String),
}

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            AudioError::NotInitialized.to_string(),
            "Audio engine not initialized"
        );
        let err = AudioError::Device("permission denied".to_string());
        assert!(err.to_string().contains("permission denied"));
    }
}
