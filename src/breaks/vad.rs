//! Voice-activity break detection

use webrtc_vad::{SampleRate, Vad, VadMode};

use super::{BreakDetector, SilenceRun};
use crate::audio::{AudioFormat, pcm16_to_samples};
use crate::config::VadBreakConfig;
use crate::{Error, Result};

/// Classifies one frame of 16-bit samples as speech or not
pub trait VoiceActivity {
    /// Whether `frame` contains speech
    ///
    /// # Errors
    ///
    /// Returns error if the model rejects the frame
    fn is_speech(&mut self, frame: &[i16]) -> Result<bool>;
}

/// WebRTC voice activity model
pub struct WebRtcVoiceActivity {
    vad: Vad,
}

impl WebRtcVoiceActivity {
    /// Create a model for `format` and `frame_ms` frames
    ///
    /// # Errors
    ///
    /// Returns error unless the audio is 16-bit mono at 8, 16, 32 or 48 kHz
    /// and frames are 10, 20 or 30 ms
    pub fn new(format: &AudioFormat, frame_ms: u64, aggressiveness_mode: u8) -> Result<Self> {
        if format.width != 2 || format.channels != 1 {
            return Err(Error::Config(format!(
                "vad break detector needs 16-bit mono audio, got {}-bit with {} channel(s)",
                format.bits_per_sample(),
                format.channels
            )));
        }

        let sample_rate = match format.sample_rate {
            8000 => SampleRate::Rate8kHz,
            16000 => SampleRate::Rate16kHz,
            32000 => SampleRate::Rate32kHz,
            48000 => SampleRate::Rate48kHz,
            other => {
                return Err(Error::Config(format!(
                    "vad break detector supports 8000, 16000, 32000 or 48000 Hz, got {other}"
                )));
            }
        };

        if !matches!(frame_ms, 10 | 20 | 30) {
            return Err(Error::Config(format!(
                "break.vad.frame_ms must be 10, 20 or 30, got {frame_ms}"
            )));
        }

        let mode = match aggressiveness_mode {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            3 => VadMode::VeryAggressive,
            other => {
                return Err(Error::Config(format!(
                    "break.vad.aggressiveness_mode must be between 0 and 3, got {other}"
                )));
            }
        };

        let mut vad = Vad::new();
        vad.set_mode(mode);
        vad.set_sample_rate(sample_rate);

        Ok(Self { vad })
    }
}

impl VoiceActivity for WebRtcVoiceActivity {
    fn is_speech(&mut self, frame: &[i16]) -> Result<bool> {
        self.vad
            .is_voice_segment(frame)
            .map_err(|()| Error::Vad(format!("rejected a frame of {} samples", frame.len())))
    }
}

/// Treats a frame as silence when the voice activity model finds no speech
pub struct VadBreakDetector {
    run: SilenceRun,
    model: Box<dyn VoiceActivity>,
}

impl std::fmt::Debug for VadBreakDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VadBreakDetector")
            .field("run", &self.run)
            .finish_non_exhaustive()
    }
}

impl VadBreakDetector {
    /// Create a detector backed by the WebRTC model
    ///
    /// # Errors
    ///
    /// Returns error if the model cannot handle the format or frame size
    pub fn new(format: &AudioFormat, config: &VadBreakConfig) -> Result<Self> {
        let model = WebRtcVoiceActivity::new(
            format,
            config.timing.frame_ms,
            config.aggressiveness_mode,
        )?;

        tracing::debug!(
            frame_ms = config.timing.frame_ms,
            silence_ms = config.timing.silence_ms,
            mode = config.aggressiveness_mode,
            "vad break detector initialized"
        );

        Self::with_model(format, config, Box::new(model))
    }

    /// Create a detector around any voice activity model
    ///
    /// # Errors
    ///
    /// Returns error if the audio is not 16-bit or a frame would hold no audio
    pub fn with_model(
        format: &AudioFormat,
        config: &VadBreakConfig,
        model: Box<dyn VoiceActivity>,
    ) -> Result<Self> {
        if format.width != 2 {
            return Err(Error::Config(format!(
                "vad break detector needs 16-bit audio, got {}-bit",
                format.bits_per_sample()
            )));
        }

        Ok(Self {
            run: SilenceRun::new(format, &config.timing)?,
            model,
        })
    }
}

impl BreakDetector for VadBreakDetector {
    fn reset(&mut self) {
        self.run.reset();
    }

    fn is_break(&mut self, chunk: &[u8]) -> Result<bool> {
        let model = &mut self.model;
        self.run
            .feed(chunk, |frame| model.is_speech(&pcm16_to_samples(frame)))
    }

    fn name(&self) -> &'static str {
        "vad"
    }
}
