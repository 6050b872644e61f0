//! Expandable playback buffer.
//!
//! Network delivery of assistant audio is bursty, while the output device
//! pulls a fixed quantum on every render callback. [`ExpandableBuffer`] sits
//! between the two: writes append decoded samples (growing the backing
//! storage when needed), reads hand the device exactly one quantum, padding
//! with silence when supply runs short.
//!
//! Playback is gated by an initial-buffering threshold. Until enough audio
//! has accumulated every read yields silence, and once the buffer drains the
//! gate re-arms so a slow trickle of data does not turn into an audible
//! stutter/silence oscillation.
//!
//! The buffer itself is plain single-owner state. It is owned by the render
//! side [`PlaybackProcessor`](super::player::PlaybackProcessor) and is never
//! shared across threads.

/// Default backing capacity in samples (1 second at 24kHz).
pub const DEFAULT_BUFFER_CAPACITY: usize = 24_000;

/// Default number of samples that must accumulate before playback starts.
pub const DEFAULT_INITIAL_BUFFER_LENGTH: usize = 24_000;

/// Growable buffer of `f32` samples with a read cursor and a write cursor.
///
/// Invariant: `read_index <= write_index <= buffer.len()`.
#[derive(Debug)]
pub struct ExpandableBuffer {
    buffer: Vec<f32>,
    read_index: usize,
    write_index: usize,
    is_initial_buffering: bool,
    initial_buffer_length: usize,
    /// Silence samples emitted since real data last flowed.
    underflowed_samples: usize,
    /// Silence samples emitted over the buffer's lifetime.
    total_underflowed_samples: u64,
}

impl Default for ExpandableBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_BUFFER_LENGTH)
    }
}

impl ExpandableBuffer {
    /// Create a buffer that gates playback until `initial_buffer_length`
    /// samples are pending.
    pub fn new(initial_buffer_length: usize) -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY, initial_buffer_length)
    }

    /// Create a buffer with an explicit starting capacity.
    pub fn with_capacity(capacity: usize, initial_buffer_length: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity],
            read_index: 0,
            write_index: 0,
            is_initial_buffering: true,
            initial_buffer_length,
            underflowed_samples: 0,
            total_underflowed_samples: 0,
        }
    }

    /// Number of written samples not yet read.
    #[inline]
    pub fn pending(&self) -> usize {
        self.write_index - self.read_index
    }

    /// Current size of the backing storage.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Whether reads are currently gated to silence.
    #[inline]
    pub fn is_initial_buffering(&self) -> bool {
        self.is_initial_buffering
    }

    /// Threshold of pending samples that releases the playback gate.
    #[inline]
    pub fn initial_buffer_length(&self) -> usize {
        self.initial_buffer_length
    }

    /// Silence samples emitted since data last flowed.
    #[inline]
    pub fn underflowed_samples(&self) -> usize {
        self.underflowed_samples
    }

    /// Silence samples emitted over the buffer's lifetime.
    #[inline]
    pub fn total_underflowed_samples(&self) -> u64 {
        self.total_underflowed_samples
    }

    /// Append samples, compacting or growing the backing storage as needed.
    pub fn write(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }

        if self.write_index + samples.len() > self.buffer.len() {
            let pending = self.pending();
            if pending + samples.len() <= self.buffer.len() {
                // Enough room once the unread region moves to the front.
                self.buffer.copy_within(self.read_index..self.write_index, 0);
            } else {
                let new_len = (samples.len() + pending) * 2;
                let mut grown = vec![0.0; new_len];
                grown[..pending].copy_from_slice(&self.buffer[self.read_index..self.write_index]);
                tracing::trace!(
                    "Playback buffer grown from {} to {} samples",
                    self.buffer.len(),
                    new_len
                );
                self.buffer = grown;
            }
            self.write_index = pending;
            self.read_index = 0;
        }

        let end = self.write_index + samples.len();
        self.buffer[self.write_index..end].copy_from_slice(samples);
        self.write_index = end;

        if self.pending() >= self.initial_buffer_length {
            self.is_initial_buffering = false;
        }
    }

    /// Fill `destination` with the next samples, padding with silence.
    ///
    /// Never panics. While the initial-buffering gate is armed the whole
    /// destination is zeroed and nothing is consumed.
    pub fn read(&mut self, destination: &mut [f32]) {
        let copy_len = if self.is_initial_buffering {
            0
        } else {
            destination.len().min(self.pending())
        };

        let start = self.read_index;
        destination[..copy_len].copy_from_slice(&self.buffer[start..start + copy_len]);
        self.read_index += copy_len;

        if copy_len > 0 && self.underflowed_samples > 0 {
            tracing::debug!(
                "Playback recovered after underflow of {} samples",
                self.underflowed_samples
            );
            self.underflowed_samples = 0;
        }

        if copy_len < destination.len() {
            destination[copy_len..].fill(0.0);
            if !self.is_initial_buffering {
                let missing = destination.len() - copy_len;
                self.underflowed_samples += missing;
                self.total_underflowed_samples += missing as u64;
            }
        }

        if !self.is_initial_buffering && self.pending() == 0 {
            // Drained: gate again and reclaim the whole backing store.
            self.is_initial_buffering = true;
            self.read_index = 0;
            self.write_index = 0;
        }
    }

    /// Discard all pending audio immediately (barge-in).
    pub fn clear_buffer(&mut self) {
        self.read_index = 0;
        self.write_index = 0;
    }
}
