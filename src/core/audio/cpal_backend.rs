//! Native audio devices via CPAL.
//!
//! `cpal::Stream` is not `Send` on every platform, so each open device lives
//! on a dedicated worker thread that builds the stream, starts it and then
//! parks until asked to stop. The backend object itself only holds the stop
//! channel and the join handle.
//!
//! Devices rarely offer the protocol rates (16kHz in, 24kHz out) natively.
//! When the requested rate is unavailable the device's default config is used
//! and audio is converted on the device thread by a [`StreamResampler`] that
//! lives as long as the stream.
//! Multi-channel devices are downmixed on input and duplicated on output.

use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SampleRate, SizedSample, StreamConfig};
use crossbeam_channel::{Sender, bounded};

use super::backend::{AudioInput, AudioOutput, CaptureCallback, CaptureConstraints, RenderCallback};
use super::resample::{MAX_QUANTUM, StreamResampler};
use super::{AudioError, AudioResult};

/// List output device names.
pub fn list_output_devices() -> AudioResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::Device(format!("no output devices available: {e}")))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// List input device names.
pub fn list_input_devices() -> AudioResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::Device(format!("no input devices available: {e}")))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

struct StreamWorker {
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

impl StreamWorker {
    fn shutdown(self) {
        let _ = self.stop_tx.send(());
        if self.thread.join().is_err() {
            tracing::warn!("Audio worker thread panicked during shutdown");
        }
    }
}

/// Spawn a worker that opens a stream with `open` and keeps it alive.
fn spawn_worker<F>(label: &'static str, open: F) -> AudioResult<(StreamWorker, String)>
where
    F: FnOnce() -> AudioResult<(cpal::Stream, String)> + Send + 'static,
{
    let (ready_tx, ready_rx) = bounded::<AudioResult<String>>(1);
    let (stop_tx, stop_rx) = bounded::<()>(1);

    let thread = std::thread::Builder::new()
        .name(format!("s2s-{label}"))
        .spawn(move || {
            let stream = match open() {
                Ok((stream, name)) => {
                    let _ = ready_tx.send(Ok(name));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            // Parked until stop() or the backend is dropped
            let _ = stop_rx.recv();
            if let Err(e) = stream.pause() {
                tracing::debug!("Failed to pause {} stream: {}", label, e);
            }
            drop(stream);
        })
        .map_err(|e| AudioError::Device(format!("failed to spawn {label} thread: {e}")))?;

    let name = ready_rx
        .recv()
        .map_err(|_| AudioError::Device(format!("{label} thread exited before opening device")))??;

    Ok((StreamWorker { stop_tx, thread }, name))
}

fn find_device(
    devices: impl Iterator<Item = cpal::Device>,
    preferred: Option<&str>,
    fallback: Option<cpal::Device>,
) -> AudioResult<cpal::Device> {
    match preferred {
        Some(name) => {
            let mut devices = devices;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| AudioError::Device(format!("audio device '{name}' not found")))
        }
        None => fallback.ok_or_else(|| AudioError::Device("no default audio device".to_string())),
    }
}

// =============================================================================
// Output
// =============================================================================

/// Speaker output through CPAL.
#[derive(Default)]
pub struct CpalOutput {
    preferred_device: Option<String>,
    device_name: Option<String>,
    worker: Option<StreamWorker>,
}

impl CpalOutput {
    /// Use the default output device, or the named one.
    pub fn new(preferred_device: Option<String>) -> Self {
        Self {
            preferred_device,
            device_name: None,
            worker: None,
        }
    }
}

fn open_output(
    preferred: Option<String>,
    sample_rate: u32,
    render: RenderCallback,
) -> AudioResult<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    let device = find_device(devices, preferred.as_deref(), host.default_output_device())?;
    let name = device.name().unwrap_or_else(|_| "unknown output device".to_string());

    let supported = device
        .supported_output_configs()
        .map_err(|e| AudioError::Device(e.to_string()))?
        .find(|range| {
            range.min_sample_rate().0 <= sample_rate && range.max_sample_rate().0 >= sample_rate
        })
        .map(|range| range.with_sample_rate(SampleRate(sample_rate)));
    let supported = match supported {
        Some(config) => config,
        None => device
            .default_output_config()
            .map_err(|e| AudioError::Device(e.to_string()))?,
    };

    let format = supported.sample_format();
    let config: StreamConfig = supported.into();
    tracing::debug!(
        "Output config: format={:?} sample_rate={}Hz channels={}",
        format,
        config.sample_rate.0,
        config.channels
    );

    let stream = match format {
        SampleFormat::F32 => build_output::<f32>(&device, &config, sample_rate, render),
        SampleFormat::I16 => build_output::<i16>(&device, &config, sample_rate, render),
        SampleFormat::U16 => build_output::<u16>(&device, &config, sample_rate, render),
        other => {
            return Err(AudioError::UnsupportedFormat(format!(
                "output sample format {other:?}"
            )));
        }
    }?;
    stream.play().map_err(|e| AudioError::Device(e.to_string()))?;
    Ok((stream, name))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    source_rate: u32,
    mut render: RenderCallback,
) -> AudioResult<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels.max(1));
    let device_rate = config.sample_rate.0;
    let mut resampler = if device_rate == source_rate {
        None
    } else {
        Some(StreamResampler::new(source_rate, device_rate)?)
    };
    let mut mono = vec![0.0f32; MAX_QUANTUM];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                let frames = data.len() / channels;
                if mono.len() < frames {
                    mono.resize(frames, 0.0);
                }
                let rendered = &mut mono[..frames];
                match resampler.as_mut() {
                    Some(resampler) => resampler.pull(rendered, &mut render),
                    None => render(rendered),
                }
                for (frame, &sample) in data.chunks_mut(channels).zip(rendered.iter()) {
                    for out in frame {
                        *out = T::from_sample(sample);
                    }
                }
            },
            |err| tracing::warn!("Audio output stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::Device(e.to_string()))
}

impl AudioOutput for CpalOutput {
    fn start(&mut self, sample_rate: u32, render: RenderCallback) -> AudioResult<()> {
        if self.worker.is_some() {
            return Err(AudioError::Device("output already started".to_string()));
        }
        let preferred = self.preferred_device.clone();
        let (worker, name) =
            spawn_worker("output", move || open_output(preferred, sample_rate, render))?;
        self.device_name = Some(name);
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }

    fn name(&self) -> String {
        self.device_name
            .clone()
            .or_else(|| self.preferred_device.clone())
            .unwrap_or_else(|| "default output".to_string())
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Input
// =============================================================================

/// Microphone input through CPAL.
///
/// CPAL exposes no echo cancellation, noise suppression or gain control; the
/// requested flags are logged and left to the platform's input chain.
#[derive(Default)]
pub struct CpalInput {
    preferred_device: Option<String>,
    device_name: Option<String>,
    worker: Option<StreamWorker>,
}

impl CpalInput {
    /// Use the default input device, or the named one.
    pub fn new(preferred_device: Option<String>) -> Self {
        Self {
            preferred_device,
            device_name: None,
            worker: None,
        }
    }
}

fn open_input(
    preferred: Option<String>,
    constraints: CaptureConstraints,
    on_samples: CaptureCallback,
) -> AudioResult<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    let device = find_device(devices, preferred.as_deref(), host.default_input_device())?;
    let name = device.name().unwrap_or_else(|_| "unknown input device".to_string());

    let target_rate = constraints.sample_rate;
    let supported = device
        .supported_input_configs()
        .map_err(|e| AudioError::Device(e.to_string()))?
        .find(|range| {
            range.channels() == constraints.channels
                && range.min_sample_rate().0 <= target_rate
                && range.max_sample_rate().0 >= target_rate
        })
        .map(|range| range.with_sample_rate(SampleRate(target_rate)));
    let supported = match supported {
        Some(config) => config,
        None => device
            .default_input_config()
            .map_err(|e| AudioError::Device(e.to_string()))?,
    };

    let format = supported.sample_format();
    let config: StreamConfig = supported.into();
    tracing::debug!(
        "Input config: format={:?} sample_rate={}Hz channels={}",
        format,
        config.sample_rate.0,
        config.channels
    );

    let stream = match format {
        SampleFormat::F32 => build_input::<f32>(&device, &config, target_rate, on_samples),
        SampleFormat::I16 => build_input::<i16>(&device, &config, target_rate, on_samples),
        SampleFormat::U16 => build_input::<u16>(&device, &config, target_rate, on_samples),
        other => {
            return Err(AudioError::UnsupportedFormat(format!(
                "input sample format {other:?}"
            )));
        }
    }?;
    stream.play().map_err(|e| AudioError::Device(e.to_string()))?;
    Ok((stream, name))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    target_rate: u32,
    mut on_samples: CaptureCallback,
) -> AudioResult<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    let device_rate = config.sample_rate.0;
    let mut resampler = if device_rate == target_rate {
        None
    } else {
        Some(StreamResampler::new(device_rate, target_rate)?)
    };
    let mut mono = Vec::<f32>::with_capacity(MAX_QUANTUM);
    let mut converted = Vec::<f32>::with_capacity(MAX_QUANTUM);

    device
        .build_input_stream(
            config,
            move |data: &[T], _| {
                mono.clear();
                for frame in data.chunks(channels) {
                    let sum: f32 = frame.iter().map(|&s| f32::from_sample(s)).sum();
                    mono.push(sum / frame.len() as f32);
                }
                match resampler.as_mut() {
                    Some(resampler) => {
                        converted.clear();
                        resampler.process(&mono, &mut converted);
                        if !converted.is_empty() {
                            on_samples(&converted[..]);
                        }
                    }
                    None => on_samples(&mono[..]),
                }
            },
            |err| tracing::warn!("Audio input stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::Device(e.to_string()))
}

impl AudioInput for CpalInput {
    fn start(
        &mut self,
        constraints: &CaptureConstraints,
        on_samples: CaptureCallback,
    ) -> AudioResult<()> {
        if self.worker.is_some() {
            return Err(AudioError::Device("input already started".to_string()));
        }
        if constraints.echo_cancellation
            || constraints.noise_suppression
            || constraints.auto_gain_control
        {
            tracing::debug!(
                "Voice processing requested; CPAL captures raw input, relying on platform defaults"
            );
        }
        let preferred = self.preferred_device.clone();
        let constraints = *constraints;
        let (worker, name) =
            spawn_worker("input", move || open_input(preferred, constraints, on_samples))?;
        self.device_name = Some(name);
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }

    fn name(&self) -> String {
        self.device_name
            .clone()
            .or_else(|| self.preferred_device.clone())
            .unwrap_or_else(|| "default input".to_string())
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.stop();
    }
}
