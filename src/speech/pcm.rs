//! Decoding of raw PCM payloads returned by the speech API.
//!
//! The API answers with base64-encoded, little-endian, signed 16-bit mono PCM.
//! There is no container header, so the sample rate comes from configuration.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PcmError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("PCM16 payload has an odd byte count ({0})")]
    OddByteCount(usize),

    #[error("audio payload is empty")]
    Empty,
}

/// A decoded, playable audio buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Interleaved samples in [-1.0, 1.0).
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioClip {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as f64 / f64::from(self.channels);
        Duration::from_secs_f64(frames / f64::from(self.sample_rate))
    }
}

/// Decode a base64 PCM16 payload into an [`AudioClip`].
pub fn decode_pcm16(payload: &str, sample_rate: u32, channels: u16) -> Result<AudioClip, PcmError> {
    let bytes = STANDARD.decode(payload.trim())?;
    if bytes.is_empty() {
        return Err(PcmError::Empty);
    }
    if bytes.len() % 2 != 0 {
        return Err(PcmError::OddByteCount(bytes.len()));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();

    Ok(AudioClip {
        samples,
        sample_rate,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_samples(samples: &[i16]) -> String {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        STANDARD.encode(bytes)
    }

    #[test]
    fn decodes_little_endian_samples() {
        let payload = encode_samples(&[0, 16384, -32768, 32767]);
        let clip = decode_pcm16(&payload, 24000, 1).unwrap();

        assert_eq!(clip.sample_rate, 24000);
        assert_eq!(clip.channels, 1);
        assert_eq!(clip.samples[0], 0.0);
        assert_eq!(clip.samples[1], 0.5);
        assert_eq!(clip.samples[2], -1.0);
        assert!(clip.samples[3] < 1.0 && clip.samples[3] > 0.999);
    }

    #[test]
    fn duration_follows_sample_rate() {
        let payload = encode_samples(&vec![0i16; 12000]);
        let clip = decode_pcm16(&payload, 24000, 1).unwrap();
        assert_eq!(clip.duration(), Duration::from_millis(500));
    }

    #[test]
    fn rejects_odd_byte_count() {
        let payload = STANDARD.encode([1u8, 2, 3]);
        assert!(matches!(
            decode_pcm16(&payload, 24000, 1),
            Err(PcmError::OddByteCount(3))
        ));
    }

    #[test]
    fn rejects_empty_and_invalid_payloads() {
        assert!(matches!(decode_pcm16("", 24000, 1), Err(PcmError::Empty)));
        assert!(matches!(
            decode_pcm16("not base64!!", 24000, 1),
            Err(PcmError::Base64(_))
        ));
    }
}
