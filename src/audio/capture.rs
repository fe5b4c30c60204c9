//! Audio capture from microphone

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};

use super::{AudioBuffer, AudioFormat, AudioSource};
use crate::{Error, Result};

/// Captures 16-bit PCM from the default input device
pub struct MicSource {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
}

impl MicSource {
    /// Open the default input device in the configured format
    ///
    /// # Errors
    ///
    /// Returns error if no device supports the format; the microphone always
    /// delivers 16-bit samples, so other widths are rejected
    pub fn new(format: &AudioFormat) -> Result<Self> {
        if format.width != 2 {
            return Err(Error::Config(format!(
                "microphone capture produces 16-bit audio, but audio.width is {}",
                format.width
            )));
        }

        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == format.channels
                    && c.min_sample_rate() <= SampleRate(format.sample_rate)
                    && c.max_sample_rate() >= SampleRate(format.sample_rate)
            })
            .ok_or_else(|| {
                Error::Config(format!(
                    "input device does not support {} Hz with {} channel(s)",
                    format.sample_rate, format.channels
                ))
            })?;

        let sample_format = supported_config.sample_format();
        let config = supported_config
            .with_sample_rate(SampleRate(format.sample_rate))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = format.sample_rate,
            channels = config.channels,
            ?sample_format,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            sample_format,
            stream: None,
        })
    }

    fn build_stream(&self, buffer: Arc<AudioBuffer>) -> Result<Stream> {
        let err_fn = |err| {
            tracing::error!(error = %err, "audio capture error");
        };

        let stream = match self.sample_format {
            SampleFormat::I16 => self.device.build_input_stream(
                &self.config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let pcm: Vec<u8> = data.iter().flat_map(|s| s.to_le_bytes()).collect();
                    buffer.extend(&pcm);
                },
                err_fn,
                None,
            ),
            SampleFormat::U16 => self.device.build_input_stream(
                &self.config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    let pcm: Vec<u8> = data
                        .iter()
                        .flat_map(|&s| {
                            #[allow(clippy::cast_possible_truncation)]
                            let centered = (i32::from(s) - 32768) as i16;
                            centered.to_le_bytes()
                        })
                        .collect();
                    buffer.extend(&pcm);
                },
                err_fn,
                None,
            ),
            SampleFormat::F32 => self.device.build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let pcm: Vec<u8> = data
                        .iter()
                        .flat_map(|&s| {
                            #[allow(clippy::cast_possible_truncation)]
                            let sample = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
                            sample.to_le_bytes()
                        })
                        .collect();
                    buffer.extend(&pcm);
                },
                err_fn,
                None,
            ),
            other => {
                return Err(Error::Audio(format!("unsupported sample format: {other:?}")));
            }
        };

        stream.map_err(|e| Error::Audio(e.to_string()))
    }
}

impl AudioSource for MicSource {
    fn start(&mut self, buffer: Arc<AudioBuffer>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = self.build_stream(buffer)?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    fn name(&self) -> &'static str {
        "microphone"
    }
}
