//! Streaming sample-rate conversion for device streams.
//!
//! Devices rarely run at the protocol rates, so the CPAL backend converts on
//! the device thread. A [`StreamResampler`] lives for the whole stream and
//! carries its filter state and fractional position across callbacks: the
//! output length tracks `input * to_rate / from_rate` over any number of
//! chunks instead of being rounded per call.
//!
//! With the `high-quality-audio` feature (default) conversion goes through a
//! windowed-sinc `rubato` resampler, which low-passes before decimating.
//! Without it a stateful linear interpolator is used.
//!
//! Both directions are supported:
//!
//! - push ([`StreamResampler::process`]): capture, device samples in,
//!   converted samples appended to a caller-owned `Vec`
//! - pull ([`StreamResampler::pull`]): playback, fills exactly one device
//!   quantum and asks the source for only as much audio as that needs
//!
//! Buffers are sized at construction. Steady-state calls do not allocate as
//! long as callers keep their quanta under [`MAX_QUANTUM`].

#[cfg(feature = "high-quality-audio")]
use rubato::{InterpolationParameters, InterpolationType, Resampler, SincFixedIn, WindowFunction};

use super::{AudioError, AudioResult};

/// Input frames handed to the converter per step.
pub const CHUNK_FRAMES: usize = 256;

/// Largest device quantum served without growing internal buffers.
pub const MAX_QUANTUM: usize = 8192;

const MIN_RATE: u32 = 1_000;
const MAX_RATE: u32 = 384_000;

/// Stateful mono resampler for one device stream.
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    engine: Engine,
    /// Source audio rendered for the next pull step
    scratch: Vec<f32>,
    /// Converted samples not yet handed to the device
    ready: Vec<f32>,
    failed: bool,
}

impl StreamResampler {
    /// Create a converter from `from_rate` to `to_rate` Hz.
    pub fn new(from_rate: u32, to_rate: u32) -> AudioResult<Self> {
        for rate in [from_rate, to_rate] {
            if !(MIN_RATE..=MAX_RATE).contains(&rate) {
                return Err(AudioError::Resample(format!(
                    "unsupported sample rate {rate}Hz"
                )));
            }
        }
        let ratio = to_rate as f64 / from_rate as f64;
        let engine = Engine::new(ratio)?;
        let ready_capacity = MAX_QUANTUM + engine.output_frames_max() + 1;

        tracing::debug!(
            "Resampler {}Hz -> {}Hz ({})",
            from_rate,
            to_rate,
            engine.kind()
        );

        Ok(Self {
            from_rate,
            to_rate,
            engine,
            scratch: vec![0.0; CHUNK_FRAMES],
            ready: Vec::with_capacity(ready_capacity),
            failed: false,
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Convert `input` and append every sample it completes to `out`.
    ///
    /// Input that does not fill a whole chunk is kept for the next call.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if self.failed {
            return;
        }
        if let Err(e) = self.engine.push(input, out) {
            self.fail(&e);
        }
    }

    /// Fill `out` with converted audio, rendering source audio on demand.
    ///
    /// `source` is called with chunks of [`CHUNK_FRAMES`] samples only while
    /// converted audio is short, so over time it is asked for exactly the
    /// audio the device consumes. Surplus output waits for the next call.
    pub fn pull<F>(&mut self, out: &mut [f32], mut source: F)
    where
        F: FnMut(&mut [f32]),
    {
        while !self.failed && self.ready.len() < out.len() {
            source(&mut self.scratch[..]);
            if let Err(e) = self.engine.push(&self.scratch, &mut self.ready) {
                self.fail(&e);
            }
        }

        let served = self.ready.len().min(out.len());
        out[..served].copy_from_slice(&self.ready[..served]);
        out[served..].fill(0.0);
        self.ready.drain(..served);
    }

    /// Converted samples waiting to be pulled.
    pub fn pending_output(&self) -> usize {
        self.ready.len()
    }

    fn fail(&mut self, error: &AudioError) {
        // Only reached on a converter fault; the stream outputs silence from here on
        tracing::warn!("Resampler stopped: {}", error);
        self.failed = true;
        self.ready.clear();
    }
}

// =============================================================================
// Engines
// =============================================================================

#[cfg(feature = "high-quality-audio")]
struct Engine {
    resampler: SincFixedIn<f32>,
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
    filled: usize,
}

#[cfg(feature = "high-quality-audio")]
impl Engine {
    fn new(ratio: f64) -> AudioResult<Self> {
        let params = InterpolationParameters {
            sinc_len: 64,
            f_cutoff: 0.90,
            interpolation: InterpolationType::Cubic,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_FRAMES, 1)
            .map_err(|e| AudioError::Resample(format!("failed to build sinc resampler: {e:?}")))?;
        let output = vec![vec![0.0; resampler.output_frames_max()]];

        Ok(Self {
            resampler,
            input: vec![vec![0.0; CHUNK_FRAMES]],
            output,
            filled: 0,
        })
    }

    fn kind(&self) -> &'static str {
        "sinc"
    }

    fn output_frames_max(&self) -> usize {
        self.output[0].len()
    }

    fn push(&mut self, mut samples: &[f32], out: &mut Vec<f32>) -> AudioResult<()> {
        while !samples.is_empty() {
            let take = (CHUNK_FRAMES - self.filled).min(samples.len());
            self.input[0][self.filled..self.filled + take].copy_from_slice(&samples[..take]);
            self.filled += take;
            samples = &samples[take..];

            if self.filled == CHUNK_FRAMES {
                self.filled = 0;
                let written = self.resampler.output_frames_next();
                self.resampler
                    .process_into_buffer(&self.input, &mut self.output, None)
                    .map_err(|e| AudioError::Resample(format!("{e:?}")))?;
                out.extend_from_slice(&self.output[0][..written]);
            }
        }
        Ok(())
    }
}

/// Linear interpolation that remembers the last sample and the fractional
/// read position between calls.
#[cfg(not(feature = "high-quality-audio"))]
struct Engine {
    /// Input samples per output sample
    step: f64,
    /// Read position relative to `prev` (index 0) of the next block
    pos: f64,
    prev: Option<f32>,
}

#[cfg(not(feature = "high-quality-audio"))]
impl Engine {
    fn new(ratio: f64) -> AudioResult<Self> {
        Ok(Self {
            step: 1.0 / ratio,
            pos: 0.0,
            prev: None,
        })
    }

    fn kind(&self) -> &'static str {
        "linear"
    }

    fn output_frames_max(&self) -> usize {
        (CHUNK_FRAMES as f64 / self.step).ceil() as usize + 1
    }

    fn push(&mut self, samples: &[f32], out: &mut Vec<f32>) -> AudioResult<()> {
        let Some(&last_sample) = samples.last() else {
            return Ok(());
        };
        let prev = *self.prev.get_or_insert(samples[0]);
        // Index 0 is `prev`, samples[i] sits at i + 1
        let at = |i: usize| if i == 0 { prev } else { samples[i - 1] };
        let end = samples.len() as f64;

        while self.pos < end {
            let idx = self.pos.floor() as usize;
            let frac = (self.pos - idx as f64) as f32;
            let (a, b) = (at(idx), at(idx + 1));
            out.push(a + (b - a) * frac);
            self.pos += self.step;
        }
        self.pos -= end;
        self.prev = Some(last_sample);
        Ok(())
    }
}
