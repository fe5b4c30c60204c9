//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use super::{AudioSink, fetch_stream, pcm_to_mono_f32, wav_to_pcm};
use crate::dialog::ResponseAudio;
use crate::{Error, Result};

/// Mono samples at a known rate, ready for the device
struct Decoded {
    samples: Vec<f32>,
    sample_rate: u32,
}

/// Plays responses on the default output device
pub struct SpeakerSink {
    device: Device,
    client: reqwest::Client,
}

impl SpeakerSink {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self {
            device,
            client: reqwest::Client::new(),
        })
    }

    /// Mono output at `sample_rate`, falling back to stereo
    fn output_config(&self, sample_rate: u32) -> Result<StreamConfig> {
        let rate = SampleRate(sample_rate);
        let supports = |channels: u16| {
            self.device.supported_output_configs().ok()?.find(|c| {
                c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
            })
        };

        let supported = supports(1).or_else(|| supports(2)).ok_or_else(|| {
            Error::Audio(format!("no output config supports {sample_rate} Hz"))
        })?;

        Ok(supported.with_sample_rate(rate).config())
    }

    fn decode(audio: &ResponseAudio) -> Result<Decoded> {
        match audio {
            ResponseAudio::Wav(data) => {
                let (pcm, format) = wav_to_pcm(data)?;
                Ok(Decoded {
                    samples: pcm_to_mono_f32(&pcm, &format),
                    sample_rate: format.sample_rate,
                })
            }
            ResponseAudio::Mp3(data) => decode_mp3(data),
            ResponseAudio::Pcm { data, format } => Ok(Decoded {
                samples: pcm_to_mono_f32(data, format),
                sample_rate: format.sample_rate,
            }),
            ResponseAudio::Stream { url } => {
                Err(Error::Audio(format!("stream must be fetched before decoding: {url}")))
            }
        }
    }

    /// Play samples in a blocking manner
    fn play_samples_blocking(&self, decoded: Decoded) -> Result<()> {
        if decoded.samples.is_empty() {
            return Ok(());
        }

        let config = self.output_config(decoded.sample_rate)?;
        let channels = usize::from(config.channels);

        let samples = Arc::new(decoded.samples);
        let sample_count = samples.len();
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let samples_clone = Arc::clone(&samples);
        let position_clone = Arc::clone(&position);
        let finished_clone = Arc::clone(&finished);

        let stream = self
            .device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position_clone.load(Ordering::Relaxed);

                    for frame in data.chunks_mut(channels) {
                        let sample = samples_clone.get(pos).copied().unwrap_or_else(|| {
                            finished_clone.store(true, Ordering::Release);
                            0.0
                        });
                        frame.fill(sample);

                        if pos < samples_clone.len() {
                            pos += 1;
                        }
                    }

                    position_clone.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (sample_count as u64 * 1000) / u64::from(decoded.sample_rate);

        // Poll for completion with timeout
        let start = Instant::now();
        let timeout = Duration::from_millis(duration_ms + 500);

        while !finished.load(Ordering::Acquire) {
            if start.elapsed() > timeout {
                tracing::warn!(duration_ms, "playback did not report completion");
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        // Let the device drain its last period
        std::thread::sleep(Duration::from_millis(100));

        drop(stream);
        tracing::debug!(samples = sample_count, "playback complete");

        Ok(())
    }
}

#[async_trait(?Send)]
impl AudioSink for SpeakerSink {
    async fn play(&mut self, audio: &ResponseAudio) -> Result<()> {
        let decoded = if let ResponseAudio::Stream { url } = audio {
            Self::decode(&fetch_stream(&self.client, url).await?)?
        } else {
            Self::decode(audio)?
        };

        self.play_samples_blocking(decoded)
    }

    fn name(&self) -> &'static str {
        "speaker"
    }
}

/// Decode MP3 bytes to mono f32 samples
#[allow(clippy::cast_sign_loss)]
fn decode_mp3(mp3_data: &[u8]) -> Result<Decoded> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate.max(0) as u32;

                let frame_samples: Vec<f32> = if frame.channels == 2 {
                    frame
                        .data
                        .chunks(2)
                        .map(|chunk| {
                            let left = f32::from(chunk[0]) / 32768.0;
                            let right =
                                f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                            f32::midpoint(left, right)
                        })
                        .collect()
                } else {
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect()
                };

                samples.extend(frame_samples);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() {
        return Ok(Decoded {
            samples,
            sample_rate: 1,
        });
    }
    if sample_rate == 0 {
        return Err(Error::Audio("MP3 stream has no sample rate".to_string()));
    }

    Ok(Decoded {
        samples,
        sample_rate,
    })
}
