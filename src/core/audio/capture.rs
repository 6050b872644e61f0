//! Microphone capture.
//!
//! Device callbacks hand mono `f32` samples to a [`FrameDispatcher`], which
//! cuts them into fixed 512-sample frames, converts each frame to PCM16 LE,
//! base64-encodes it and pushes an [`AudioChunk`] into an unbounded tokio
//! channel. Sending never blocks the device thread; there is no
//! backpressure, the transport is expected to absorb short bursts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use base64::prelude::*;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::AudioResult;
use super::backend::{AudioInput, CaptureConstraints};
use super::pcm::encode_pcm16_le;

/// Samples per captured frame.
pub const FRAME_SAMPLES: usize = 512;

/// One captured frame ready for transport.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// PCM16 little-endian mono bytes
    pub pcm: Bytes,
    /// Base64 form of `pcm`, as carried by `audioInput`
    pub base64: String,
}

impl AudioChunk {
    /// Encode normalized samples into a transport chunk.
    pub fn from_samples(samples: &[f32]) -> Self {
        let pcm = encode_pcm16_le(samples);
        let base64 = BASE64_STANDARD.encode(&pcm);
        Self {
            pcm: Bytes::from(pcm),
            base64,
        }
    }

    /// Number of PCM16 samples in the chunk.
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }
}

/// Cuts arbitrary device buffers into fixed-size encoded frames.
pub(crate) struct FrameDispatcher {
    frame_samples: usize,
    pending: Vec<f32>,
    sender: mpsc::UnboundedSender<AudioChunk>,
    frames_sent: Arc<AtomicU64>,
    closed: bool,
}

impl FrameDispatcher {
    pub(crate) fn new(
        frame_samples: usize,
        sender: mpsc::UnboundedSender<AudioChunk>,
        frames_sent: Arc<AtomicU64>,
    ) -> Self {
        Self {
            frame_samples: frame_samples.max(1),
            pending: Vec::with_capacity(frame_samples * 2),
            sender,
            frames_sent,
            closed: false,
        }
    }

    pub(crate) fn push(&mut self, samples: &[f32]) {
        if self.closed {
            return;
        }
        self.pending.extend_from_slice(samples);

        let mut offset = 0;
        while self.pending.len() - offset >= self.frame_samples {
            let frame = &self.pending[offset..offset + self.frame_samples];
            offset += self.frame_samples;
            if self.sender.send(AudioChunk::from_samples(frame)).is_err() {
                tracing::debug!("Capture receiver dropped, discarding further frames");
                self.closed = true;
                self.pending.clear();
                return;
            }
            self.frames_sent.fetch_add(1, Ordering::Relaxed);
        }
        self.pending.drain(..offset);
    }
}

/// Microphone capture stage.
pub struct AudioCapture {
    input: Box<dyn AudioInput>,
    constraints: CaptureConstraints,
    active: Arc<AtomicBool>,
    frames_sent: Arc<AtomicU64>,
}

impl AudioCapture {
    /// Capture with the default constraints (16kHz mono, voice processing on).
    pub fn new(input: Box<dyn AudioInput>) -> Self {
        Self::with_constraints(input, CaptureConstraints::default())
    }

    pub fn with_constraints(input: Box<dyn AudioInput>, constraints: CaptureConstraints) -> Self {
        Self {
            input,
            constraints,
            active: Arc::new(AtomicBool::new(false)),
            frames_sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open the input device and return the frame stream.
    ///
    /// Calling `start` while running restarts capture with a fresh channel.
    pub fn start(&mut self) -> AudioResult<mpsc::UnboundedReceiver<AudioChunk>> {
        if self.is_active() {
            self.stop();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut dispatcher = FrameDispatcher::new(FRAME_SAMPLES, tx, self.frames_sent.clone());
        self.input.start(
            &self.constraints,
            Box::new(move |samples: &[f32]| dispatcher.push(samples)),
        )?;

        self.active.store(true, Ordering::SeqCst);
        tracing::info!(
            "Audio capture started on {} at {}Hz (echo_cancellation={}, noise_suppression={}, auto_gain_control={})",
            self.input.name(),
            self.constraints.sample_rate,
            self.constraints.echo_cancellation,
            self.constraints.noise_suppression,
            self.constraints.auto_gain_control
        );
        Ok(rx)
    }

    /// Close the device. The frame channel closes once the callback drops.
    pub fn stop(&mut self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.input.stop();
            tracing::info!(
                "Audio capture stopped after {} frames",
                self.frames_sent.load(Ordering::Relaxed)
            );
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Frames delivered since this capture was created.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn constraints(&self) -> &CaptureConstraints {
        &self.constraints
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::backend::PushedInput;

    #[test]
    fn test_chunk_encoding() {
        let chunk = AudioChunk::from_samples(&[1.0, -1.0, 0.0]);
        assert_eq!(chunk.sample_count(), 3);
        assert_eq!(&chunk.pcm[..], &[0xff, 0x7f, 0x00, 0x80, 0x00, 0x00]);
        assert_eq!(chunk.base64, BASE64_STANDARD.encode(&chunk.pcm));
    }

    #[test]
    fn test_dispatcher_cuts_fixed_frames() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let counter = Arc::new(AtomicU64::new(0));
        let mut dispatcher = FrameDispatcher::new(FRAME_SAMPLES, tx, counter.clone());

        dispatcher.push(&vec![0.1; 300]);
        assert!(rx.try_recv().is_err());

        dispatcher.push(&vec![0.1; 800]);
        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.sample_count(), FRAME_SAMPLES);
        assert_eq!(second.sample_count(), FRAME_SAMPLES);
        assert!(rx.try_recv().is_err());
        assert_eq!(counter.load(Ordering::Relaxed), 2);

        // 1100 - 1024 = 76 carried over
        dispatcher.push(&vec![0.1; 436]);
        assert_eq!(rx.try_recv().unwrap().sample_count(), FRAME_SAMPLES);
    }

    #[test]
    fn test_dispatcher_stops_when_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut dispatcher = FrameDispatcher::new(4, tx, Arc::new(AtomicU64::new(0)));
        drop(rx);
        dispatcher.push(&[0.0; 16]);
        assert!(dispatcher.closed);
        assert!(dispatcher.pending.is_empty());
    }

    #[test]
    fn test_capture_start_push_stop() {
        let input = PushedInput::new();
        let mut capture = AudioCapture::new(Box::new(input.clone()));
        let mut frames = capture.start().unwrap();
        assert!(capture.is_active());

        assert!(input.push(&vec![0.5; FRAME_SAMPLES * 3 + 10]));
        for _ in 0..3 {
            let chunk = frames.try_recv().unwrap();
            assert_eq!(chunk.sample_count(), FRAME_SAMPLES);
        }
        assert_eq!(capture.frames_sent(), 3);

        capture.stop();
        assert!(!capture.is_active());
        assert!(!input.push(&[0.5; 10]));
        // Sender dropped with the callback
        assert!(matches!(
            frames.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
