//! Audio plumbing
//!
//! Raw PCM flows as little-endian bytes from an [`AudioSource`] into the shared
//! [`AudioBuffer`], and responses leave through an [`AudioSink`].

mod buffer;
mod capture;
mod playback;
mod sink;
mod source;
mod wav;

pub use buffer::AudioBuffer;
pub use capture::MicSource;
pub use playback::SpeakerSink;
pub use sink::{AudioSink, WavDirSink, fetch_stream, pcm_to_mono_f32};
pub use source::{AudioSource, ReplaySource};
pub use wav::{pcm_to_wav, wav_to_pcm};

use crate::config::Settings;
use crate::{Error, Result};

/// PCM layout shared by every component of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Samples per second, per channel
    pub sample_rate: u32,
    /// Bytes per sample
    pub width: u16,
    /// Interleaved channel count
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            width: 2,
            channels: 1,
        }
    }
}

impl AudioFormat {
    /// Read `audio.sample_rate`, `audio.width` and `audio.channels`
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed or out of range
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let defaults = Self::default();
        let format = Self {
            sample_rate: settings.u32_or("audio.sample_rate", defaults.sample_rate)?,
            width: settings.u16_or("audio.width", defaults.width)?,
            channels: settings.u16_or("audio.channels", defaults.channels)?,
        };
        format.validate()?;
        Ok(format)
    }

    /// Check the format describes usable PCM
    ///
    /// # Errors
    ///
    /// Returns error for a zero rate, zero channels, or a width outside 1..=4
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("audio.sample_rate must be non-zero".to_string()));
        }
        if !(1..=4).contains(&self.width) {
            return Err(Error::Config(format!(
                "audio.width must be 1 to 4 bytes, got {}",
                self.width
            )));
        }
        if self.channels == 0 {
            return Err(Error::Config("audio.channels must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Bits per sample
    #[must_use]
    pub const fn bits_per_sample(&self) -> u16 {
        self.width * 8
    }

    /// Bytes in one sample frame (all channels)
    #[must_use]
    pub const fn frame_size(&self) -> usize {
        self.width as usize * self.channels as usize
    }

    /// Byte length of `ms` milliseconds of audio, rounded down to whole
    /// sample frames
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn bytes_for_ms(&self, ms: u64) -> usize {
        let frames = ms * self.sample_rate as u64 / 1000;
        frames as usize * self.frame_size()
    }

    /// Duration in milliseconds of `bytes` bytes of audio
    #[must_use]
    pub const fn ms_for_bytes(&self, bytes: usize) -> u64 {
        bytes as u64 * 1000 / (self.frame_size() as u64 * self.sample_rate as u64)
    }
}

/// Decode 16-bit little-endian PCM; a trailing odd byte is ignored
#[must_use]
pub fn pcm16_to_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode samples as 16-bit little-endian PCM
#[must_use]
pub fn samples_to_pcm16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Root-mean-square of signed little-endian samples of `width` bytes
///
/// A trailing partial sample is ignored; an empty frame has zero energy.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(frame: &[u8], width: usize) -> f64 {
    if width == 0 || frame.len() < width {
        return 0.0;
    }

    let mut sum_squares = 0.0f64;
    let mut count = 0usize;
    for sample in frame.chunks_exact(width) {
        let value = f64::from(signed_sample(sample));
        sum_squares += value * value;
        count += 1;
    }

    (sum_squares / count as f64).sqrt()
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn signed_sample(bytes: &[u8]) -> i32 {
    let raw = bytes
        .iter()
        .enumerate()
        .fold(0i32, |acc, (i, b)| acc | (i32::from(*b) << (8 * i)));
    let shift = 32 - 8 * bytes.len() as u32;
    (raw << shift) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_for_ms() {
        let format = AudioFormat::default();
        assert_eq!(format.bytes_for_ms(120), 3840);
        assert_eq!(format.bytes_for_ms(30), 960);
        assert_eq!(format.ms_for_bytes(3840), 120);

        let stereo = AudioFormat {
            channels: 2,
            ..AudioFormat::default()
        };
        assert_eq!(stereo.bytes_for_ms(10), 640);
    }

    #[test]
    fn test_bytes_for_ms_whole_sample_frames() {
        let format = AudioFormat {
            sample_rate: 11025,
            ..AudioFormat::default()
        };
        // 330.75 samples -> 330
        assert_eq!(format.bytes_for_ms(30), 660);

        let stereo = AudioFormat {
            channels: 2,
            ..format
        };
        for ms in [1, 7, 30, 120, 1001] {
            assert_eq!(format.bytes_for_ms(ms) % format.frame_size(), 0);
            assert_eq!(stereo.bytes_for_ms(ms) % stereo.frame_size(), 0);
        }
    }

    #[test]
    fn test_rms_signed_samples() {
        let frame = samples_to_pcm16(&[1000, -1000, 1000, -1000]);
        assert!((rms(&frame, 2) - 1000.0).abs() < 1e-9);

        let silence = vec![0u8; 64];
        assert!(rms(&silence, 2).abs() < f64::EPSILON);

        // 8-bit samples are signed
        assert!((rms(&[0xFF, 0x01], 1) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pcm16_conversion() {
        let samples = vec![0, 1, -1, i16::MAX, i16::MIN];
        assert_eq!(pcm16_to_samples(&samples_to_pcm16(&samples)), samples);
        assert_eq!(pcm16_to_samples(&[1, 0, 7]), vec![1]);
    }

    #[test]
    fn test_validate_rejects_bad_width() {
        let format = AudioFormat {
            width: 5,
            ..AudioFormat::default()
        };
        assert!(format.validate().unwrap_err().is_config());
    }
}
