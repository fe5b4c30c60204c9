//! Hotword detection
//!
//! The numerical model lives behind [`TriggerEngine`]. [`TriggerDetector`]
//! checks the engine against the session's audio format once at
//! construction, then maps the engine's 1-based hotword numbers to the
//! configured keyword names.

mod energy;

pub use energy::EnergyTriggerEngine;

use std::fmt;
use std::num::NonZeroU32;

use crate::audio::AudioFormat;
use crate::config::{Config, TriggerConfig};
use crate::{Error, Result};

/// 1-based position of a keyword in the engine's hotword list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeywordIndex(NonZeroU32);

impl KeywordIndex {
    /// `None` for zero
    #[must_use]
    pub const fn new(index: u32) -> Option<Self> {
        match NonZeroU32::new(index) {
            Some(index) => Some(Self(index)),
            None => None,
        }
    }

    /// The 1-based index
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for KeywordIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an engine made of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOutput {
    /// Too quiet to analyze
    Silence,
    /// Audio present, no hotword
    NoMatch,
    /// Hotword number `n`, 1-based
    Hotword(u32),
}

/// A hotword spotting model
///
/// Engines may keep state across calls and accept chunks of any length.
pub trait TriggerEngine {
    /// Required input sample rate
    fn sample_rate(&self) -> u32;

    /// Required input channel count
    fn num_channels(&self) -> u16;

    /// Required input bit depth
    fn bits_per_sample(&self) -> u16;

    /// Number of hotwords the model recognizes
    fn num_hotwords(&self) -> usize;

    /// Detection sensitivity in [0, 1]
    fn set_sensitivity(&mut self, sensitivity: f32);

    /// Gain applied to input before detection
    fn set_audio_gain(&mut self, gain: f32);

    /// Discard accumulated state
    fn reset(&mut self);

    /// Analyze the next chunk of PCM
    ///
    /// # Errors
    ///
    /// Returns [`Error::Trigger`] if the model fails
    fn run_detection(&mut self, pcm: &[u8]) -> Result<EngineOutput>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Maps engine detections to configured keyword names
pub struct TriggerDetector {
    engine: Box<dyn TriggerEngine>,
    keywords: Vec<String>,
}

impl TriggerDetector {
    /// Wrap `engine` after checking it against the audio format
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the engine's rate, channels or bit
    /// depth differ from `format`, if sensitivity is outside [0, 1], or if
    /// the keyword names do not match the engine's hotword count
    pub fn new(
        mut engine: Box<dyn TriggerEngine>,
        format: &AudioFormat,
        config: &TriggerConfig,
    ) -> Result<Self> {
        if engine.sample_rate() != format.sample_rate {
            return Err(Error::Config(format!(
                "{} engine needs {} Hz audio but audio.sample_rate is {}",
                engine.name(),
                engine.sample_rate(),
                format.sample_rate
            )));
        }
        if engine.num_channels() != format.channels {
            return Err(Error::Config(format!(
                "{} engine needs {} channel(s) but audio.channels is {}",
                engine.name(),
                engine.num_channels(),
                format.channels
            )));
        }
        if engine.bits_per_sample() != format.bits_per_sample() {
            return Err(Error::Config(format!(
                "{} engine needs {}-bit audio but audio.width gives {}-bit",
                engine.name(),
                engine.bits_per_sample(),
                format.bits_per_sample()
            )));
        }
        if !(0.0..=1.0).contains(&config.sensitivity) {
            return Err(Error::Config(format!(
                "trigger sensitivity must be between 0 and 1, got {}",
                config.sensitivity
            )));
        }

        let keywords = resolve_keywords(&config.keywords, engine.num_hotwords())?;

        engine.set_sensitivity(config.sensitivity);
        engine.set_audio_gain(config.audio_gain);

        tracing::debug!(
            engine = engine.name(),
            keywords = ?keywords,
            sensitivity = config.sensitivity,
            audio_gain = config.audio_gain,
            "trigger detector initialized"
        );

        Ok(Self { engine, keywords })
    }

    /// Build the engine named by `trigger.engine`
    ///
    /// # Errors
    ///
    /// Returns error for an unknown engine or an incompatible format
    pub fn from_config(config: &Config) -> Result<Self> {
        let engine: Box<dyn TriggerEngine> = match config.trigger.engine.as_str() {
            "energy" => Box::new(EnergyTriggerEngine::new(config.trigger.min_speech_ms)),
            other => {
                return Err(Error::Config(format!("unknown trigger engine `{other}`")));
            }
        };
        Self::new(engine, &config.audio, &config.trigger)
    }

    /// Feed the next chunk, returning the keyword that fired, if any
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails
    pub fn detect(&mut self, chunk: &[u8]) -> Result<Option<KeywordIndex>> {
        match self.engine.run_detection(chunk)? {
            EngineOutput::Silence | EngineOutput::NoMatch => Ok(None),
            EngineOutput::Hotword(n) => {
                let index = KeywordIndex::new(n);
                if index.is_none() {
                    tracing::debug!(engine = self.engine.name(), "engine reported hotword 0");
                }
                Ok(index)
            }
        }
    }

    /// Discard engine state
    pub fn reset(&mut self) {
        self.engine.reset();
    }

    /// Name of the keyword at `index`
    #[must_use]
    pub fn keyword_name(&self, index: KeywordIndex) -> Option<&str> {
        let position = usize::try_from(index.get() - 1).ok()?;
        self.keywords.get(position).map(String::as_str)
    }

    /// Index of the keyword called `name`
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<KeywordIndex> {
        let position = self.keywords.iter().position(|k| k == name)?;
        KeywordIndex::new(u32::try_from(position + 1).ok()?)
    }

    /// Keyword names in engine order
    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Name of the wrapped engine
    #[must_use]
    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }
}

fn resolve_keywords(configured: &[String], num_hotwords: usize) -> Result<Vec<String>> {
    if configured.is_empty() {
        return Ok((1..=num_hotwords).map(|n| format!("hotword{n}")).collect());
    }

    if configured.len() != num_hotwords {
        return Err(Error::Config(format!(
            "trigger.keywords names {} keyword(s) but the engine has {num_hotwords} hotword(s)",
            configured.len()
        )));
    }

    for (i, name) in configured.iter().enumerate() {
        if configured[..i].contains(name) {
            return Err(Error::Config(format!("duplicate keyword `{name}`")));
        }
    }

    Ok(configured.to_vec())
}
