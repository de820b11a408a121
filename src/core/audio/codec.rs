//! PCM16 audio codec.
//!
//! Converts between floating point samples in `[-1.0, 1.0]`, signed 16-bit
//! little-endian PCM and the base64 text that travels inside protocol
//! messages.
//!
//! The contract is the round trip: for every sample `x` in `[-1.0, 1.0]`,
//! `decode(&encode(&[x]))[0]` differs from `x` by at most `1 / 32768`.
//! Encoding rounds to the nearest step instead of truncating, which is what
//! keeps the error inside that bound for both polarities.

use base64::prelude::*;
use thiserror::Error;

/// Scale between a float sample and a PCM16 step.
pub const PCM16_SCALE: f32 = 32768.0;

/// Bytes per encoded sample.
pub const PCM16_SAMPLE_BYTES: usize = 2;

/// Errors produced while decoding an encoded chunk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The chunk is not valid base64
    #[error("invalid base64 audio: {0}")]
    InvalidBase64(String),

    /// The decoded payload does not hold a whole number of samples
    #[error("PCM16 payload has odd length {0}")]
    OddLength(usize),
}

/// Convert one float sample to PCM16.
///
/// Out of range input is clamped. NaN maps to silence.
#[inline]
pub fn sample_to_pcm16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let scaled = (sample.clamp(-1.0, 1.0) * PCM16_SCALE).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert one PCM16 sample back to float.
#[inline]
pub fn pcm16_to_sample(value: i16) -> f32 {
    value as f32 / PCM16_SCALE
}

/// Serialize samples as PCM16 little-endian bytes.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * PCM16_SAMPLE_BYTES);
    for &sample in samples {
        bytes.extend_from_slice(&sample_to_pcm16(sample).to_le_bytes());
    }
    bytes
}

/// Reinterpret PCM16 little-endian bytes as float samples.
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>, DecodeError> {
    if bytes.len() % PCM16_SAMPLE_BYTES != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(PCM16_SAMPLE_BYTES)
        .map(|pair| pcm16_to_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Encode a frame of samples into a base64 PCM16 chunk.
pub fn encode(samples: &[f32]) -> String {
    BASE64_STANDARD.encode(encode_pcm16(samples))
}

/// Decode a base64 PCM16 chunk into float samples.
pub fn decode(chunk: &str) -> Result<Vec<f32>, DecodeError> {
    let bytes = BASE64_STANDARD
        .decode(chunk.trim())
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;
    decode_pcm16(&bytes)
}

/// Linear interpolation resampler for mono blocks.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() || from_rate == 0 || to_rate == 0 {
        return input.to_vec();
    }

    let out_len = ((input.len() as u64 * to_rate as u64) / from_rate as u64) as usize;
    let ratio = from_rate as f64 / to_rate as f64;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let a = input.get(idx).copied().unwrap_or(0.0);
        let b = input.get(idx + 1).copied().unwrap_or(a);
        output.push(a + (b - a) * frac as f32);
    }

    output
}

// =============================================================================
// Tests
// =============================================================================
