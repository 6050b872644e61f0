//! Level tap on the rendered output.
//!
//! The render thread publishes every quantum it delivers to the device. The
//! volume is stored as `f32` bits in an atomic so readers never contend with
//! the render thread; the waveform snapshot is published with `try_lock` and
//! simply skipped for a quantum if a reader happens to hold the lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

/// Shared analyser state. Cloning yields another handle to the same tap.
#[derive(Clone, Debug, Default)]
pub struct Analyser {
    volume_bits: Arc<AtomicU32>,
    snapshot: Arc<Mutex<Vec<f32>>>,
}

impl Analyser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the quantum that was just rendered. Never blocks.
    pub fn publish(&self, samples: &[f32]) {
        self.volume_bits
            .store(mean_abs(samples).to_bits(), Ordering::Relaxed);

        if let Some(mut snapshot) = self.snapshot.try_lock() {
            snapshot.clear();
            snapshot.extend_from_slice(samples);
        }
    }

    /// Mean absolute amplitude of the last rendered quantum.
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    /// Copy of the last rendered quantum.
    pub fn samples(&self) -> Vec<f32> {
        self.snapshot.lock().clone()
    }
}

pub(crate) fn mean_abs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyser_defaults_to_silence() {
        let analyser = Analyser::new();
        assert_eq!(analyser.volume(), 0.0);
        assert!(analyser.samples().is_empty());
    }

    #[test]
    fn analyser_tracks_last_quantum() {
        let analyser = Analyser::new();
        analyser.publish(&[0.5, -0.5, 0.25, -0.25]);
        assert!((analyser.volume() - 0.375).abs() < 1e-6);
        assert_eq!(analyser.samples(), vec![0.5, -0.5, 0.25, -0.25]);

        analyser.publish(&[0.0; 4]);
        assert_eq!(analyser.volume(), 0.0);
    }

    #[test]
    fn publish_skips_snapshot_when_reader_holds_lock() {
        let analyser = Analyser::new();
        analyser.publish(&[0.1]);
        let guard = analyser.snapshot.lock();
        analyser.publish(&[0.9]);
        drop(guard);
        assert_eq!(analyser.samples(), vec![0.1]);
        assert!((analyser.volume() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn mean_abs_handles_empty() {
        assert_eq!(mean_abs(&[]), 0.0);
    }
}
