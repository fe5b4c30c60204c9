//! WAV encoding and decoding for captured and played audio

use std::io::Cursor;

use super::AudioFormat;
use crate::{Error, Result};

/// Wrap raw little-endian PCM in a WAV container
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn pcm_to_wav(pcm: &[u8], format: &AudioFormat) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bits_per_sample(),
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        let width = usize::from(format.width);
        for sample in pcm.chunks_exact(width) {
            let result = match width {
                1 => writer.write_sample(i8::from_le_bytes([sample[0]])),
                2 => writer.write_sample(i16::from_le_bytes([sample[0], sample[1]])),
                3 => {
                    let raw = i32::from_le_bytes([0, sample[0], sample[1], sample[2]]) >> 8;
                    writer.write_sample(raw)
                }
                _ => writer.write_sample(i32::from_le_bytes([
                    sample[0], sample[1], sample[2], sample[3],
                ])),
            };
            result.map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Decode a WAV file into raw little-endian PCM and its format
///
/// Integer WAVs keep their sample width; float WAVs are converted to 16-bit.
///
/// # Errors
///
/// Returns error if the data is not a readable WAV file
pub fn wav_to_pcm(wav: &[u8]) -> Result<(Vec<u8>, AudioFormat)> {
    let mut reader =
        hound::WavReader::new(Cursor::new(wav)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();

    match spec.sample_format {
        hound::SampleFormat::Int => {
            let width = spec.bits_per_sample.div_ceil(8);
            let mut pcm = Vec::with_capacity(reader.len() as usize * usize::from(width));
            for sample in reader.samples::<i32>() {
                let sample = sample.map_err(|e| Error::Audio(e.to_string()))?;
                pcm.extend_from_slice(&sample.to_le_bytes()[..usize::from(width)]);
            }
            let format = AudioFormat {
                sample_rate: spec.sample_rate,
                width,
                channels: spec.channels,
            };
            Ok((pcm, format))
        }
        hound::SampleFormat::Float => {
            let mut pcm = Vec::with_capacity(reader.len() as usize * 2);
            for sample in reader.samples::<f32>() {
                let sample = sample.map_err(|e| Error::Audio(e.to_string()))?;
                #[allow(clippy::cast_possible_truncation)]
                let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                pcm.extend_from_slice(&sample_i16.to_le_bytes());
            }
            let format = AudioFormat {
                sample_rate: spec.sample_rate,
                width: 2,
                channels: spec.channels,
            };
            Ok((pcm, format))
        }
    }
}
