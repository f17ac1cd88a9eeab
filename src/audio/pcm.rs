//! PCM wire codec: float samples ↔ little-endian 16-bit PCM ↔ base64
//!
//! The duplex channel carries raw PCM16 embedded in JSON envelopes, so audio
//! makes two hops on the way out: f32 samples → LE i16 bytes → base64 text.
//! Decoding reverses both hops. Conversion is deterministic and pure; the only
//! failure mode is an inbound payload whose length can't be a whole number of
//! channel frames.

use base64::{engine::general_purpose::STANDARD, Engine};

use super::AudioError;

/// An immutable buffer of decoded output samples plus its playable duration.
///
/// Produced by [`decode_pcm16`]; consumed exactly once by the playback
/// scheduler, which takes full ownership of the sample data.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Interleaved f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate the chunk was encoded at.
    pub sample_rate: u32,
    /// Channel count (frames = samples / channels).
    pub channels: u16,
}

impl AudioChunk {
    /// Number of per-channel frames in this chunk.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Playable duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Encode float samples as little-endian 16-bit signed PCM.
///
/// Each sample is clamped to [-1.0, 1.0] before scaling. Non-finite input
/// (NaN/∞) becomes silence for that sample rather than an error - one bad
/// sample must never drop an entire block.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    out
}

/// Decode little-endian 16-bit signed PCM into an [`AudioChunk`].
///
/// Fails with `MalformedPayload` if the byte length is not a multiple of
/// 2 bytes per channel frame.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<AudioChunk, AudioError> {
    let frame_bytes = 2 * channels as usize;
    if frame_bytes == 0 || bytes.len() % frame_bytes != 0 {
        return Err(AudioError::MalformedPayload(format!(
            "{} bytes is not a whole number of {}-byte frames",
            bytes.len(),
            frame_bytes
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| {
            let value = i16::from_le_bytes([pair[0], pair[1]]);
            value as f32 / i16::MAX as f32
        })
        .collect();

    Ok(AudioChunk {
        samples,
        sample_rate,
        channels,
    })
}

/// Base64-encode a binary payload for embedding in a JSON envelope.
pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a base64 payload from a JSON envelope.
pub fn from_base64(text: &str) -> Result<Vec<u8>, AudioError> {
    STANDARD
        .decode(text)
        .map_err(|e| AudioError::MalformedPayload(format!("invalid base64: {}", e)))
}

/// Convert one float sample to i16, treating non-finite input as silence.
fn sample_to_i16(sample: f32) -> i16 {
    if !sample.is_finite() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_to_i16() {
        assert_eq!(sample_to_i16(0.0), 0);
        assert_eq!(sample_to_i16(1.0), i16::MAX);
        assert_eq!(sample_to_i16(-1.0), -i16::MAX);

        // Clamping
        assert_eq!(sample_to_i16(2.0), i16::MAX);
        assert_eq!(sample_to_i16(-2.0), -i16::MAX);
    }

    #[test]
    fn test_non_finite_becomes_silence() {
        assert_eq!(sample_to_i16(f32::NAN), 0);
        assert_eq!(sample_to_i16(f32::INFINITY), 0);
        assert_eq!(sample_to_i16(f32::NEG_INFINITY), 0);

        // A block containing a bad sample still encodes in full
        let bytes = encode_pcm16(&[0.5, f32::NAN, -0.5]);
        assert_eq!(bytes.len(), 6);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), 0);
    }

    #[test]
    fn test_encode_little_endian() {
        let bytes = encode_pcm16(&[1.0]);
        // i16::MAX = 0x7FFF, little-endian
        assert_eq!(bytes, vec![0xFF, 0x7F]);
    }

    #[test]
    fn test_round_trip_within_quantization_error() {
        let samples: Vec<f32> = (0..480)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16_000.0).sin() * 0.8)
            .collect();

        let bytes = encode_pcm16(&samples);
        let chunk = decode_pcm16(&bytes, 16_000, 1).expect("decode");

        assert_eq!(chunk.samples.len(), samples.len());
        let max_error = samples
            .iter()
            .zip(chunk.samples.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        // One 16-bit quantization step
        assert!(max_error <= 1.0 / i16::MAX as f32, "error {}", max_error);
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        let err = decode_pcm16(&[0u8; 3], 24_000, 1).unwrap_err();
        assert!(matches!(err, AudioError::MalformedPayload(_)));

        // Stereo frames are 4 bytes; 6 bytes is not a whole number of them
        let err = decode_pcm16(&[0u8; 6], 24_000, 2).unwrap_err();
        assert!(matches!(err, AudioError::MalformedPayload(_)));
    }

    #[test]
    fn test_chunk_duration() {
        let chunk = decode_pcm16(&[0u8; 24_000 * 2], 24_000, 1).expect("decode");
        assert_eq!(chunk.frames(), 24_000);
        assert!((chunk.duration() - 1.0).abs() < f64::EPSILON);

        // Stereo halves the frame count for the same byte length
        let chunk = decode_pcm16(&[0u8; 24_000 * 2], 24_000, 2).expect("decode");
        assert_eq!(chunk.frames(), 12_000);
        assert!((chunk.duration() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_base64_round_trip() {
        let bytes = encode_pcm16(&[0.25, -0.75, 0.0]);
        let text = to_base64(&bytes);
        assert_eq!(from_base64(&text).expect("decode"), bytes);
    }

    #[test]
    fn test_base64_invalid_input() {
        assert!(matches!(
            from_base64("not!!base64"),
            Err(AudioError::MalformedPayload(_))
        ));
    }
}
