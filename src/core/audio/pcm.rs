//! PCM16 conversion helpers shared by capture, playback and the session.

use base64::prelude::*;

use super::{AudioError, AudioResult};

/// Scale between normalized `f32` and signed 16-bit samples.
const I16_SCALE: f32 = i16::MAX as f32 + 1.0;

/// Convert one normalized sample to PCM16, clamping to `[-32768, 32767]`.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample * I16_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert one PCM16 sample to a normalized `f32`.
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / I16_SCALE
}

/// Pack normalized samples as PCM16 little-endian bytes.
pub fn encode_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&f32_to_i16(sample).to_le_bytes());
    }
    bytes
}

/// Unpack PCM16 little-endian bytes into normalized samples.
///
/// A trailing odd byte is ignored.
pub fn decode_pcm16_le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16_to_f32(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// Decode a base64 PCM16 payload (as carried by `audioOutput`).
pub fn decode_base64_pcm16(content: &str) -> AudioResult<Vec<f32>> {
    let bytes = BASE64_STANDARD
        .decode(content)
        .map_err(|e| AudioError::Encoding(format!("invalid base64 audio: {e}")))?;
    if bytes.len() % 2 != 0 {
        tracing::debug!("Audio payload has odd length {}, dropping last byte", bytes.len());
    }
    Ok(decode_pcm16_le(&bytes))
}
