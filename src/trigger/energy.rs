//! Energy-based reference hotword engine
//!
//! Fires its single hotword when sustained speech-level energy is heard. It
//! cannot tell words apart, but it exercises the full trigger path without a
//! trained model.

use super::{EngineOutput, TriggerEngine};
use crate::Result;
use crate::audio::pcm16_to_samples;

/// Normalized RMS treated as speech at sensitivity 0.5
const ENERGY_THRESHOLD: f32 = 0.03;

/// Normalized RMS below which a frame counts as silence
const SILENCE_FLOOR: f32 = 0.003;

const SAMPLE_RATE: u32 = 16000;

/// 30 ms analysis frames
const FRAME_SAMPLES: usize = 480;

/// Reports hotword 1 after `min_speech_ms` of loud audio
#[derive(Debug)]
pub struct EnergyTriggerEngine {
    min_speech_samples: usize,
    threshold: f32,
    gain: f32,
    pending: Vec<i16>,
    speech_samples: usize,
}

impl EnergyTriggerEngine {
    /// Create an engine requiring `min_speech_ms` of sustained speech
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(min_speech_ms: u64) -> Self {
        let min_speech_samples = (min_speech_ms * u64::from(SAMPLE_RATE) / 1000) as usize;

        tracing::debug!(min_speech_ms, "energy trigger engine initialized");

        Self {
            min_speech_samples: min_speech_samples.max(FRAME_SAMPLES),
            threshold: ENERGY_THRESHOLD,
            gain: 1.0,
            pending: Vec::with_capacity(FRAME_SAMPLES * 2),
            speech_samples: 0,
        }
    }

    /// Current speech threshold after sensitivity scaling
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl TriggerEngine for EnergyTriggerEngine {
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn num_channels(&self) -> u16 {
        1
    }

    fn bits_per_sample(&self) -> u16 {
        16
    }

    fn num_hotwords(&self) -> usize {
        1
    }

    fn set_sensitivity(&mut self, sensitivity: f32) {
        // Higher sensitivity lowers the bar
        self.threshold = ENERGY_THRESHOLD * (1.5 - sensitivity);
    }

    fn set_audio_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.speech_samples = 0;
    }

    fn run_detection(&mut self, pcm: &[u8]) -> Result<EngineOutput> {
        self.pending.extend(pcm16_to_samples(pcm));

        let mut output = EngineOutput::Silence;
        let mut consumed = 0;

        while self.pending.len() - consumed >= FRAME_SAMPLES {
            let frame = &self.pending[consumed..consumed + FRAME_SAMPLES];
            consumed += FRAME_SAMPLES;

            let energy = calculate_energy(frame) * self.gain;
            if energy >= SILENCE_FLOOR {
                output = EngineOutput::NoMatch;
            }

            if energy > self.threshold {
                self.speech_samples += FRAME_SAMPLES;
                tracing::trace!(energy, speech_samples = self.speech_samples, "speech frame");

                if self.speech_samples >= self.min_speech_samples {
                    tracing::debug!(
                        speech_samples = self.speech_samples,
                        "sustained speech, hotword fired"
                    );
                    self.reset();
                    return Ok(EngineOutput::Hotword(1));
                }
            } else {
                self.speech_samples = 0;
            }
        }

        self.pending.drain(..consumed);
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "energy"
    }
}

/// RMS of 16-bit samples, normalized to [0, 1]
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let s = f32::from(s) / 32768.0;
            s * s
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}
