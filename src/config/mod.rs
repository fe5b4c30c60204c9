//! Configuration management for wakeloop
//!
//! Configuration is a flat mapping of dotted keys (`audio.sample_rate`,
//! `break.vad.silence_ms`, ...) to scalar values. Files may use nested tables;
//! they are flattened on load (see [`file`]). Every typed section below falls
//! back to a documented default when its key is unset, and rejects a key that
//! is present with the wrong type.

pub mod file;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use crate::audio::AudioFormat;
use crate::{Error, Result};

/// Flat key-value configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    values: BTreeMap<String, Value>,
}

impl Settings {
    /// Create an empty settings map (every section uses its defaults)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key, replacing any previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Builder-style [`Settings::set`]
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Apply a `key=value` assignment, as given on the command line
    ///
    /// The value is read as a bool, integer or float when it parses as one,
    /// otherwise it is kept as a string.
    ///
    /// # Errors
    ///
    /// Returns error if the assignment has no `=` or an empty key
    pub fn apply_assignment(&mut self, assignment: &str) -> Result<()> {
        let (key, raw) = assignment
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("expected key=value, got `{assignment}`")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::Config(format!("empty key in `{assignment}`")));
        }
        self.set(key, parse_scalar(raw.trim()));
        Ok(())
    }

    /// Raw value for a key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Check whether a key is set
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Iterate over all keys in sorted order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of keys set
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no keys are set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Unsigned integer value, or `default` when unset
    ///
    /// # Errors
    ///
    /// Returns error if the key is set to something other than a non-negative integer
    pub fn u64_or(&self, key: &str, default: u64) -> Result<u64> {
        match self.values.get(key) {
            None => Ok(default),
            Some(value) => value
                .as_u64()
                .ok_or_else(|| type_error(key, "a non-negative integer", value)),
        }
    }

    /// `u32` value, or `default` when unset
    ///
    /// # Errors
    ///
    /// Returns error if the value is not an integer in range
    pub fn u32_or(&self, key: &str, default: u32) -> Result<u32> {
        let value = self.u64_or(key, u64::from(default))?;
        u32::try_from(value).map_err(|_| Error::Config(format!("`{key}` is out of range: {value}")))
    }

    /// `u16` value, or `default` when unset
    ///
    /// # Errors
    ///
    /// Returns error if the value is not an integer in range
    pub fn u16_or(&self, key: &str, default: u16) -> Result<u16> {
        let value = self.u64_or(key, u64::from(default))?;
        u16::try_from(value).map_err(|_| Error::Config(format!("`{key}` is out of range: {value}")))
    }

    /// Floating point value (integers accepted), or `default` when unset
    ///
    /// # Errors
    ///
    /// Returns error if the value is not numeric
    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64> {
        match self.values.get(key) {
            None => Ok(default),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| type_error(key, "a number", value)),
        }
    }

    /// Optional string value
    ///
    /// # Errors
    ///
    /// Returns error if the key is set to a non-string
    pub fn string(&self, key: &str) -> Result<Option<String>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(value) => Err(type_error(key, "a string", value)),
        }
    }

    /// String value, or `default` when unset
    ///
    /// # Errors
    ///
    /// Returns error if the key is set to a non-string
    pub fn string_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self.string(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// List of strings; a single string is read as a comma-separated list
    ///
    /// # Errors
    ///
    /// Returns error if the value is neither a string nor an array of strings
    pub fn string_list(&self, key: &str) -> Result<Vec<String>> {
        match self.values.get(key) {
            None => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(ToString::to_string)
                        .ok_or_else(|| type_error(key, "a list of strings", item))
                })
                .collect(),
            Some(value) => Err(type_error(key, "a list of strings", value)),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut settings = Self::new();
        for (k, v) in iter {
            settings.set(k, v);
        }
        settings
    }
}

fn type_error(key: &str, expected: &str, got: &Value) -> Error {
    Error::Config(format!("`{key}` must be {expected}, got {got}"))
}

fn parse_scalar(raw: &str) -> Value {
    if let Ok(b) = raw.parse::<bool>() {
        return Value::Bool(b);
    }
    if let Ok(n) = raw.parse::<u64>() {
        return Value::from(n);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::from(f);
    }
    Value::String(raw.trim_matches('"').to_string())
}

/// Sizes of the two audio buffer windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    /// Duration of the rolling snapshot window
    pub snapshot_ms: u64,
    /// Maximum capture duration, `None` for unbounded
    pub max_capture_ms: Option<u64>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            snapshot_ms: 120,
            max_capture_ms: Some(6000),
        }
    }
}

impl BufferConfig {
    /// Read `audio.buffer.*`
    ///
    /// # Errors
    ///
    /// Returns error on malformed values or a zero-length snapshot window
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let defaults = Self::default();
        let snapshot_ms = settings.u64_or("audio.buffer.snapshot_ms", defaults.snapshot_ms)?;
        if snapshot_ms == 0 {
            return Err(Error::Config(
                "audio.buffer.snapshot_ms must be greater than zero".to_string(),
            ));
        }
        let max_capture_ms = settings.u64_or("audio.buffer.max_capture_ms", 6000)?;

        Ok(Self {
            snapshot_ms,
            max_capture_ms: (max_capture_ms > 0).then_some(max_capture_ms),
        })
    }
}

/// Which break detector a session uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakKind {
    /// Energy threshold
    Rms,
    /// Voice activity model
    Vad,
}

impl BreakKind {
    /// Parse the `break.detector` value
    ///
    /// # Errors
    ///
    /// Returns error for an unknown detector name
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rms" => Ok(Self::Rms),
            "vad" => Ok(Self::Vad),
            other => Err(Error::Config(format!(
                "unknown break detector `{other}` (expected `rms` or `vad`)"
            ))),
        }
    }
}

/// Framing shared by both break detector variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakTiming {
    /// Analysis frame duration
    pub frame_ms: u64,
    /// Silence run that ends an utterance
    pub silence_ms: u64,
    /// Grace period ignored after each reset
    pub drop_start_ms: u64,
}

impl BreakTiming {
    fn from_settings(settings: &Settings, variant: &str, defaults: Self) -> Result<Self> {
        let frame_ms = settings.u64_or(&format!("break.{variant}.frame_ms"), defaults.frame_ms)?;
        if frame_ms == 0 {
            return Err(Error::Config(format!(
                "break.{variant}.frame_ms must be greater than zero"
            )));
        }
        Ok(Self {
            frame_ms,
            silence_ms: settings
                .u64_or(&format!("break.{variant}.silence_ms"), defaults.silence_ms)?,
            drop_start_ms: settings.u64_or(
                &format!("break.{variant}.drop_start_ms"),
                defaults.drop_start_ms,
            )?,
        })
    }
}

/// Settings for the energy-threshold break detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RmsBreakConfig {
    pub timing: BreakTiming,
    /// Frames with RMS at or below this value count as silence
    pub silence_rms: f64,
}

impl Default for RmsBreakConfig {
    fn default() -> Self {
        Self {
            timing: BreakTiming {
                frame_ms: 30,
                silence_ms: 200,
                drop_start_ms: 60,
            },
            silence_rms: 0.5,
        }
    }
}

impl RmsBreakConfig {
    /// Read `break.rms.*`
    ///
    /// # Errors
    ///
    /// Returns error on malformed values
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            timing: BreakTiming::from_settings(settings, "rms", defaults.timing)?,
            silence_rms: settings.f64_or("break.rms.silence_rms", defaults.silence_rms)?,
        })
    }
}

/// Settings for the voice-activity break detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VadBreakConfig {
    pub timing: BreakTiming,
    /// WebRTC VAD aggressiveness, 0 (least) to 3 (most)
    pub aggressiveness_mode: u8,
}

impl Default for VadBreakConfig {
    fn default() -> Self {
        Self {
            timing: BreakTiming {
                frame_ms: 30,
                silence_ms: 400,
                drop_start_ms: 60,
            },
            aggressiveness_mode: 2,
        }
    }
}

impl VadBreakConfig {
    /// Read `break.vad.*`
    ///
    /// # Errors
    ///
    /// Returns error on malformed values or an aggressiveness above 3
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let defaults = Self::default();
        let mode = settings.u64_or(
            "break.vad.aggressiveness_mode",
            u64::from(defaults.aggressiveness_mode),
        )?;
        let aggressiveness_mode = u8::try_from(mode)
            .ok()
            .filter(|m| *m <= 3)
            .ok_or_else(|| {
                Error::Config(format!(
                    "break.vad.aggressiveness_mode must be between 0 and 3, got {mode}"
                ))
            })?;

        Ok(Self {
            timing: BreakTiming::from_settings(settings, "vad", defaults.timing)?,
            aggressiveness_mode,
        })
    }
}

/// Hotword detection settings
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerConfig {
    /// Engine name (`energy`)
    pub engine: String,
    /// Keyword names, in engine hotword order; empty uses engine defaults
    pub keywords: Vec<String>,
    /// Detection sensitivity in [0, 1]
    pub sensitivity: f32,
    /// Input gain applied by the engine
    pub audio_gain: f32,
    /// Sustained speech needed by the energy engine
    pub min_speech_ms: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            engine: "energy".to_string(),
            keywords: Vec::new(),
            sensitivity: 0.5,
            audio_gain: 1.0,
            min_speech_ms: 300,
        }
    }
}

impl TriggerConfig {
    /// Read `trigger.*` and `trigger.<engine>.*`
    ///
    /// # Errors
    ///
    /// Returns error on malformed values
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let defaults = Self::default();
        let engine = settings.string_or("trigger.engine", &defaults.engine)?;
        let prefix = format!("trigger.{engine}");

        Ok(Self {
            keywords: settings.string_list("trigger.keywords")?,
            sensitivity: settings
                .f64_or(&format!("{prefix}.sensitivity"), f64::from(defaults.sensitivity))?
                as f32,
            audio_gain: settings
                .f64_or(&format!("{prefix}.audio_gain"), f64::from(defaults.audio_gain))?
                as f32,
            min_speech_ms: settings
                .u64_or(&format!("{prefix}.min_speech_ms"), defaults.min_speech_ms)?,
            engine,
        })
    }
}

/// Session loop timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Backoff between empty buffer polls
    pub poll_interval: Duration,
    /// Bound on a single dialog exchange
    pub response_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(30),
            response_timeout: Duration::from_millis(8000),
        }
    }
}

impl SessionConfig {
    /// Read `listen_sleep_time` (seconds) and `dialog.response_timeout_ms`
    ///
    /// # Errors
    ///
    /// Returns error on malformed or negative values
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let sleep_secs = settings.f64_or("listen_sleep_time", 0.03)?;
        let poll_interval = Duration::try_from_secs_f64(sleep_secs).map_err(|_| {
            Error::Config(format!("listen_sleep_time must be non-negative, got {sleep_secs}"))
        })?;
        let timeout_ms = settings.u64_or("dialog.response_timeout_ms", 8000)?;

        Ok(Self {
            poll_interval,
            response_timeout: Duration::from_millis(timeout_ms),
        })
    }
}

/// HTTP dialog backend settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpDialogConfig {
    /// Endpoint receiving utterances
    pub url: String,
    /// Bearer token
    pub api_key: String,
}

impl HttpDialogConfig {
    /// Read `dialog.http.*`
    ///
    /// # Errors
    ///
    /// Returns error if the url or api key is missing
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let url = settings
            .string("dialog.http.url")?
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::Config("dialog.http.url is required".to_string()))?;
        let api_key = settings
            .string("dialog.http.api_key")?
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("dialog.http.api_key is required".to_string()))?;

        Ok(Self { url, api_key })
    }
}

/// Fully parsed configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub audio: AudioFormat,
    pub buffer: BufferConfig,
    pub break_kind: BreakKind,
    pub rms: RmsBreakConfig,
    pub vad: VadBreakConfig,
    pub trigger: TriggerConfig,
    pub session: SessionConfig,
    /// Chunk size used when replaying recorded audio
    pub replay_chunk_ms: u64,
    /// Directory receiving played responses instead of the speaker
    pub output_directory: Option<String>,
}

impl Config {
    /// Parse every section from flat settings
    ///
    /// # Errors
    ///
    /// Returns error if any section is malformed
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            audio: AudioFormat::from_settings(settings)?,
            buffer: BufferConfig::from_settings(settings)?,
            break_kind: BreakKind::parse(&settings.string_or("break.detector", "vad")?)?,
            rms: RmsBreakConfig::from_settings(settings)?,
            vad: VadBreakConfig::from_settings(settings)?,
            trigger: TriggerConfig::from_settings(settings)?,
            session: SessionConfig::from_settings(settings)?,
            replay_chunk_ms: settings.u64_or("source.replay.chunk_ms", 64)?.max(1),
            output_directory: settings.string("output.directory")?,
        })
    }

    /// Load settings from a file (or the default location when present),
    /// apply `key=value` overrides, and parse
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or any value is malformed
    pub fn load(path: Option<&Path>, overrides: &[String]) -> Result<(Settings, Self)> {
        let mut settings = match path {
            Some(path) => file::load_settings(path)?,
            None => match file::default_config_path().filter(|p| p.exists()) {
                Some(default_path) => file::load_settings(&default_path)?,
                None => Settings::new(),
            },
        };

        for assignment in overrides {
            settings.apply_assignment(assignment)?;
        }

        let config = Self::from_settings(&settings)?;
        tracing::debug!(keys = settings.len(), "configuration loaded");
        Ok((settings, config))
    }
}
