//! WAV file sink for received assistant audio.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::core::audio::{AudioError, AudioResult};

/// Appends PCM16 mono chunks to a WAV file.
pub struct WavRecorder {
    writer: WavWriter<BufWriter<File>>,
    samples_written: u64,
}

impl WavRecorder {
    pub fn create(path: &Path, sample_rate: u32) -> AudioResult<Self> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)
            .map_err(|e| AudioError::Encoding(format!("{}: {e}", path.display())))?;
        Ok(Self {
            writer,
            samples_written: 0,
        })
    }

    /// Append little-endian PCM16 bytes. A trailing odd byte is ignored.
    pub fn write_pcm16_le(&mut self, pcm: &[u8]) -> AudioResult<()> {
        for pair in pcm.chunks_exact(2) {
            self.writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .map_err(|e| AudioError::Encoding(e.to_string()))?;
        }
        self.samples_written += (pcm.len() / 2) as u64;
        Ok(())
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Flush the header and close the file.
    pub fn finalize(self) -> AudioResult<u64> {
        let written = self.samples_written;
        self.writer
            .finalize()
            .map_err(|e| AudioError::Encoding(e.to_string()))?;
        Ok(written)
    }
}
