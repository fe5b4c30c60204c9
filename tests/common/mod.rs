//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use wakeloop::audio::{AudioFormat, ReplaySource, samples_to_pcm16};
use wakeloop::breaks::RmsBreakDetector;
use wakeloop::config::{BreakTiming, BufferConfig, RmsBreakConfig, SessionConfig, TriggerConfig};
use wakeloop::{
    AudioSink, DialogContext, DialogHandler, DialogSession, EngineOutput, Response,
    ResponseAudio, SessionParts, TriggerDetector, TriggerEngine,
};

/// Duration of one replayed chunk
pub const CHUNK_MS: u64 = 20;

/// Backoff between empty polls in session tests
pub const POLL: Duration = Duration::from_millis(10);

/// Generate a 16 kHz mono sine wave as 16-bit PCM
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn generate_sine_pcm(frequency: f32, ms: u64, amplitude: f32) -> Vec<u8> {
    let rate = AudioFormat::default().sample_rate;
    let num_samples = (u64::from(rate) * ms / 1000) as usize;
    let samples: Vec<i16> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / rate as f32;
            (amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()) as i16
        })
        .collect();
    samples_to_pcm16(&samples)
}

/// Generate 16 kHz mono silence
pub fn generate_silence_pcm(ms: u64) -> Vec<u8> {
    vec![0; AudioFormat::default().bytes_for_ms(ms)]
}

/// Speech-level audio
pub fn speech(ms: u64) -> Vec<u8> {
    generate_sine_pcm(440.0, ms, 8000.0)
}

/// Split PCM into `CHUNK_MS` chunks
pub fn chunks(pcm: &[u8]) -> Vec<Vec<u8>> {
    pcm.chunks(AudioFormat::default().bytes_for_ms(CHUNK_MS))
        .map(<[u8]>::to_vec)
        .collect()
}

/// Replays `pcm` in `CHUNK_MS` chunks
pub fn replay(pcm: &[u8]) -> ReplaySource {
    ReplaySource::from_chunks(chunks(pcm), Duration::from_millis(CHUNK_MS))
}

/// Engine that plays back a fixed script of outputs, then reports no match
pub struct ScriptedEngine {
    pub sample_rate: u32,
    pub hotwords: usize,
    script: VecDeque<EngineOutput>,
    calls: Arc<Mutex<usize>>,
}

impl ScriptedEngine {
    pub fn new(script: impl IntoIterator<Item = EngineOutput>) -> Self {
        Self {
            sample_rate: 16000,
            hotwords: 1,
            script: script.into_iter().collect(),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Never fires
    pub fn idle() -> Self {
        Self::new(Vec::new())
    }

    #[must_use]
    pub fn with_hotwords(mut self, hotwords: usize) -> Self {
        self.hotwords = hotwords;
        self
    }

    /// Counter of `run_detection` calls, readable after the engine is moved
    pub fn calls(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.calls)
    }
}

impl TriggerEngine for ScriptedEngine {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
    fn num_channels(&self) -> u16 {
        1
    }
    fn bits_per_sample(&self) -> u16 {
        16
    }
    fn num_hotwords(&self) -> usize {
        self.hotwords
    }
    fn set_sensitivity(&mut self, _sensitivity: f32) {}
    fn set_audio_gain(&mut self, _gain: f32) {}
    fn reset(&mut self) {}
    fn run_detection(&mut self, _pcm: &[u8]) -> wakeloop::Result<EngineOutput> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.script.pop_front().unwrap_or(EngineOutput::NoMatch))
    }
    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Sink that records what it was asked to play
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub played: Arc<Mutex<Vec<ResponseAudio>>>,
}

#[async_trait(?Send)]
impl AudioSink for RecordingSink {
    async fn play(&mut self, audio: &ResponseAudio) -> wakeloop::Result<()> {
        self.played.lock().unwrap().push(audio.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// One request seen by [`ScriptedHandler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerCall {
    pub audio_len: usize,
    pub context: Option<String>,
}

/// Dialog backend answering from a queue of responses
#[derive(Default)]
pub struct ScriptedHandler {
    responses: Mutex<VecDeque<Response>>,
    pub calls: Mutex<Vec<HandlerCall>>,
    pub delay: Option<Duration>,
}

impl ScriptedHandler {
    pub fn new(responses: impl IntoIterator<Item = Response>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn answer(&self, audio: &[u8], context: Option<&DialogContext>) -> Response {
        self.calls.lock().unwrap().push(HandlerCall {
            audio_len: audio.len(),
            context: context.map(|c| c.token().to_string()),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Response::new(ResponseAudio::Wav(Vec::new())))
    }
}

#[async_trait]
impl DialogHandler for ScriptedHandler {
    async fn ask(&self, audio: &[u8]) -> wakeloop::Result<Response> {
        Ok(self.answer(audio, None).await)
    }

    async fn respond_to(
        &self,
        audio: &[u8],
        context: &DialogContext,
    ) -> wakeloop::Result<Response> {
        Ok(self.answer(audio, Some(context)).await)
    }
}

/// A response expecting another turn
pub fn continuing(token: &str) -> Response {
    Response::new(ResponseAudio::Mp3(vec![0xFF, 0xFB, 0x90]))
        .with_continuation(DialogContext::new(token))
}

/// A final response
pub fn final_response() -> Response {
    Response::new(ResponseAudio::Mp3(vec![0xFF, 0xFB, 0x10]))
}

/// RMS break detector: 20 ms frames, 200 ms silence, no grace period
pub fn rms_breaks() -> RmsBreakDetector {
    RmsBreakDetector::new(
        &AudioFormat::default(),
        &RmsBreakConfig {
            timing: BreakTiming {
                frame_ms: 20,
                silence_ms: 200,
                drop_start_ms: 0,
            },
            silence_rms: 500.0,
        },
    )
    .expect("rms detector")
}

/// Session with a 10 ms poll interval and 500 ms response timeout
pub fn session(
    source: ReplaySource,
    engine: ScriptedEngine,
    keywords: &[&str],
    buffer: BufferConfig,
    sink: RecordingSink,
) -> DialogSession {
    let format = AudioFormat::default();
    let trigger = TriggerDetector::new(
        Box::new(engine),
        &format,
        &TriggerConfig {
            keywords: keywords.iter().map(ToString::to_string).collect(),
            ..TriggerConfig::default()
        },
    )
    .expect("trigger detector");

    DialogSession::new(
        format,
        &buffer,
        SessionConfig {
            poll_interval: POLL,
            response_timeout: Duration::from_millis(500),
        },
        SessionParts {
            source: Box::new(source),
            sink: Box::new(sink),
            breaks: Box::new(rms_breaks()),
            trigger,
        },
    )
}
