//! Device backends for playback and capture.
//!
//! The player and the capture stage never talk to a sound API directly. They
//! hand a callback to an [`AudioOutput`] or [`AudioInput`] and the backend
//! invokes it on whatever thread drives the device.
//!
//! | Implementor | Driven by |
//! |---|---|
//! | [`PulledOutput`] / [`PushedInput`] | The host application (embedding, tests) |
//! | `CpalOutput` / `CpalInput` | A CPAL device thread (`cpal-backend` feature) |

use std::sync::Arc;

use parking_lot::Mutex;

use super::{AudioError, AudioResult};

/// Render callback: fill the slice with the next quantum of mono samples.
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Capture callback: receives mono samples at the requested rate.
pub type CaptureCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Microphone request parameters.
///
/// The processing flags are requests; backends honour the ones the platform
/// exposes and log the rest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureConstraints {
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            sample_rate: super::DEFAULT_INPUT_SAMPLE_RATE,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// An output device that repeatedly asks for rendered audio.
pub trait AudioOutput: Send {
    /// Open the device at `sample_rate` and begin invoking `render`.
    fn start(&mut self, sample_rate: u32, render: RenderCallback) -> AudioResult<()>;

    /// Close the device and drop the render callback.
    fn stop(&mut self);

    /// Human-readable device name for logs.
    fn name(&self) -> String;
}

/// An input device that pushes captured audio.
pub trait AudioInput: Send {
    /// Open the device and begin invoking `on_samples`.
    fn start(
        &mut self,
        constraints: &CaptureConstraints,
        on_samples: CaptureCallback,
    ) -> AudioResult<()>;

    /// Close the device and drop the capture callback.
    fn stop(&mut self);

    /// Human-readable device name for logs.
    fn name(&self) -> String;
}

// =============================================================================
// Host-driven backends
// =============================================================================

/// Output backend whose quanta are pulled by the host.
///
/// Clones share the same slot: hand one clone to the player and keep another
/// to call [`PulledOutput::pull`] from the thread that feeds the real sink.
#[derive(Clone, Default)]
pub struct PulledOutput {
    render: Arc<Mutex<Option<RenderCallback>>>,
    sample_rate: Arc<Mutex<Option<u32>>>,
}

impl PulledOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render one quantum into `destination`.
    ///
    /// Returns `false` (leaving `destination` silent) when no player is
    /// attached.
    pub fn pull(&self, destination: &mut [f32]) -> bool {
        match self.render.lock().as_mut() {
            Some(render) => {
                render(destination);
                true
            }
            None => {
                destination.fill(0.0);
                false
            }
        }
    }

    /// Sample rate requested by the attached player.
    pub fn sample_rate(&self) -> Option<u32> {
        *self.sample_rate.lock()
    }

    pub fn is_started(&self) -> bool {
        self.render.lock().is_some()
    }
}

impl AudioOutput for PulledOutput {
    fn start(&mut self, sample_rate: u32, render: RenderCallback) -> AudioResult<()> {
        let mut slot = self.render.lock();
        if slot.is_some() {
            return Err(AudioError::Device(
                "pulled output already has a renderer attached".to_string(),
            ));
        }
        *slot = Some(render);
        *self.sample_rate.lock() = Some(sample_rate);
        Ok(())
    }

    fn stop(&mut self) {
        self.render.lock().take();
        self.sample_rate.lock().take();
    }

    fn name(&self) -> String {
        "pulled-output".to_string()
    }
}

/// Input backend fed by the host.
///
/// Clones share the same slot: hand one clone to [`AudioCapture`] and call
/// [`PushedInput::push`] on another.
///
/// [`AudioCapture`]: super::AudioCapture
#[derive(Clone, Default)]
pub struct PushedInput {
    sink: Arc<Mutex<Option<CaptureCallback>>>,
}

impl PushedInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver mono samples to the capture pipeline.
    ///
    /// Returns `false` when capture is not running.
    pub fn push(&self, samples: &[f32]) -> bool {
        match self.sink.lock().as_mut() {
            Some(sink) => {
                sink(samples);
                true
            }
            None => false,
        }
    }

    pub fn is_started(&self) -> bool {
        self.sink.lock().is_some()
    }
}

impl AudioInput for PushedInput {
    fn start(
        &mut self,
        constraints: &CaptureConstraints,
        on_samples: CaptureCallback,
    ) -> AudioResult<()> {
        if constraints.channels != 1 {
            return Err(AudioError::UnsupportedFormat(format!(
                "pushed input is mono only, requested {} channels",
                constraints.channels
            )));
        }
        let mut slot = self.sink.lock();
        if slot.is_some() {
            return Err(AudioError::Device(
                "pushed input already has a consumer attached".to_string(),
            ));
        }
        *slot = Some(on_samples);
        Ok(())
    }

    fn stop(&mut self) {
        self.sink.lock().take();
    }

    fn name(&self) -> String {
        "pushed-input".to_string()
    }
}
