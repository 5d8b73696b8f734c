//! Audio format definitions and utilities.

use serde::{Deserialize, Serialize};

/// Sample rate of audio sent to the live endpoint (Hz).
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of audio produced by the live endpoint (Hz).
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Mime tag for raw PCM chunks on the wire.
pub const PCM_MIME: &str = "audio/pcm";

/// Complete audio format specification.
///
/// The live protocol is fixed-format: 16 kHz/16-bit/mono up,
/// 24 kHz/16-bit/mono down. Anything else is a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of audio channels (1 = mono).
    pub channels: u8,
    /// Bits per sample.
    pub bits_per_sample: u8,
}

impl AudioFormat {
    /// PCM16 format at 16 kHz (capture/outbound).
    pub fn pcm16_16khz() -> Self {
        Self { sample_rate: INPUT_SAMPLE_RATE, channels: 1, bits_per_sample: 16 }
    }

    /// PCM16 format at 24 kHz (synthesized/inbound).
    pub fn pcm16_24khz() -> Self {
        Self { sample_rate: OUTPUT_SAMPLE_RATE, channels: 1, bits_per_sample: 16 }
    }

    /// Calculate bytes per second for this format.
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * (self.bits_per_sample / 8) as u32
    }

    /// Calculate duration in milliseconds for a given number of bytes.
    pub fn duration_ms(&self, bytes: usize) -> f64 {
        let bytes_per_ms = self.bytes_per_second() as f64 / 1000.0;
        bytes as f64 / bytes_per_ms
    }
}
