//! Dialog session state machine
//!
//! A [`DialogSession`] owns one audio source, one sink and both detectors,
//! and walks through:
//!
//! ```text
//! Idle -> AwaitingHotword -> Capturing -> Exchanging -> Playing -> AwaitingHotword
//! ```
//!
//! Any state moves to `Terminated` once the session's cancellation token is
//! cancelled, either through [`DialogSession::terminate`] or a
//! [`SessionHandle`] held by another task.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::{AudioBuffer, AudioFormat, AudioSink, AudioSource};
use crate::breaks::{self, BreakDetector};
use crate::config::{BufferConfig, Config, SessionConfig};
use crate::dialog::{DialogContext, DialogHandler, Response};
use crate::trigger::{KeywordIndex, TriggerDetector};
use crate::{Error, Result};

/// Where a session is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, source not started
    Idle,
    /// Feeding audio to the trigger detector
    AwaitingHotword,
    /// Accumulating an utterance
    Capturing,
    /// Waiting on the dialog backend
    Exchanging,
    /// Playing a response
    Playing,
    /// Cancelled; the source is stopped
    Terminated,
}

/// Counters for a session's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Polls that found no new audio and backed off
    pub idle_polls: u64,
    /// Accepted hotwords
    pub triggers: u64,
    /// Completed captures
    pub captures: u64,
}

/// An accepted hotword
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub index: KeywordIndex,
    pub keyword: String,
}

/// Why a capture ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceEnd {
    /// The break detector found the end of speech
    Break,
    /// The capture window filled up
    MaxDuration,
}

/// One captured utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub audio: Vec<u8>,
    pub ended_by: UtteranceEnd,
}

/// Result of [`DialogSession::capture_until_break`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Utterance(Utterance),
    /// The session was terminated; nothing was captured
    Cancelled,
}

/// The most recent turn
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub last_capture: Option<Vec<u8>>,
    pub last_response: Option<Response>,
}

impl SessionContext {
    /// Continuation offered by the last response, if any
    #[must_use]
    pub fn continuation(&self) -> Option<&DialogContext> {
        self.last_response.as_ref()?.continuation.as_ref()
    }
}

/// Terminates a session from another task
#[derive(Debug, Clone)]
pub struct SessionHandle {
    token: CancellationToken,
}

impl SessionHandle {
    /// Ask the session to stop; its loops return within one poll interval
    pub fn terminate(&self) {
        self.token.cancel();
    }

    /// Whether termination has been requested
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Collaborators a session takes ownership of
pub struct SessionParts {
    pub source: Box<dyn AudioSource>,
    pub sink: Box<dyn AudioSink>,
    pub breaks: Box<dyn BreakDetector>,
    pub trigger: TriggerDetector,
}

/// Drives hotword wait, capture, dialog exchange and playback
pub struct DialogSession {
    id: Uuid,
    format: AudioFormat,
    buffer: Arc<AudioBuffer>,
    source: Box<dyn AudioSource>,
    sink: Box<dyn AudioSink>,
    breaks: Box<dyn BreakDetector>,
    trigger: TriggerDetector,
    config: SessionConfig,
    token: CancellationToken,
    listening: bool,
    released: bool,
    state: SessionState,
    stats: SessionStats,
    context: SessionContext,
}

impl DialogSession {
    /// Assemble a session from already-built parts
    #[must_use]
    pub fn new(
        format: AudioFormat,
        buffer: &BufferConfig,
        config: SessionConfig,
        parts: SessionParts,
    ) -> Self {
        let id = Uuid::new_v4();

        tracing::debug!(
            session_id = %id,
            source = parts.source.name(),
            sink = parts.sink.name(),
            break_detector = parts.breaks.name(),
            trigger_engine = parts.trigger.engine_name(),
            poll_ms = config.poll_interval.as_millis(),
            "session created"
        );

        Self {
            id,
            format,
            buffer: Arc::new(AudioBuffer::new(&format, buffer)),
            source: parts.source,
            sink: parts.sink,
            breaks: parts.breaks,
            trigger: parts.trigger,
            config,
            token: CancellationToken::new(),
            listening: false,
            released: false,
            state: SessionState::Idle,
            stats: SessionStats::default(),
            context: SessionContext::default(),
        }
    }

    /// Build detectors from configuration and bind them to `source` and `sink`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if either detector rejects the format
    pub fn from_config(
        config: &Config,
        source: Box<dyn AudioSource>,
        sink: Box<dyn AudioSink>,
    ) -> Result<Self> {
        let parts = SessionParts {
            source,
            sink,
            breaks: breaks::from_config(config)?,
            trigger: TriggerDetector::from_config(config)?,
        };
        Ok(Self::new(config.audio, &config.buffer, config.session, parts))
    }

    /// Start the audio source
    ///
    /// Calling it again while listening does nothing.
    ///
    /// # Errors
    ///
    /// Returns a usage error after termination, or the source's start error
    pub fn listen(&mut self) -> Result<()> {
        if self.is_terminated() {
            return Err(Error::Usage("cannot listen on a terminated session".to_string()));
        }
        if self.listening {
            return Ok(());
        }

        self.source.start(Arc::clone(&self.buffer))?;
        self.listening = true;
        self.state = SessionState::AwaitingHotword;

        tracing::info!(session_id = %self.id, source = self.source.name(), "listening");
        Ok(())
    }

    /// Wait until a hotword fires
    ///
    /// With a non-empty `watch_for`, only those keywords are accepted; others
    /// are logged and ignored. Returns `None` if the session is terminated
    /// while waiting.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the session is not listening or a watched
    /// name is not a configured keyword, or the trigger engine's error
    pub async fn wait_for_trigger(&mut self, watch_for: &[&str]) -> Result<Option<Trigger>> {
        if !self.ensure_listening("wait_for_trigger")? {
            return Ok(None);
        }
        if let Some(unknown) = watch_for
            .iter()
            .find(|name| self.trigger.index_of(name).is_none())
        {
            return Err(Error::Usage(format!(
                "`{unknown}` is not a configured keyword (have {:?})",
                self.trigger.keywords()
            )));
        }

        self.state = SessionState::AwaitingHotword;
        self.trigger.reset();
        tracing::debug!(watch_for = ?watch_for, "waiting for hotword");

        loop {
            if self.token.is_cancelled() {
                self.observe_termination();
                return Ok(None);
            }

            let chunk = self.buffer.get_snapshot_data();
            if chunk.is_empty() {
                self.stats.idle_polls += 1;
                if !self.backoff().await {
                    self.observe_termination();
                    return Ok(None);
                }
                continue;
            }

            let Some(index) = self.trigger.detect(&chunk)? else {
                continue;
            };
            let Some(keyword) = self.trigger.keyword_name(index) else {
                tracing::debug!(%index, "engine fired an unmapped hotword");
                continue;
            };
            if !watch_for.is_empty() && !watch_for.iter().any(|name| *name == keyword) {
                tracing::debug!(keyword, "ignoring unwatched hotword");
                continue;
            }

            let trigger = Trigger {
                index,
                keyword: keyword.to_string(),
            };
            self.stats.triggers += 1;
            tracing::info!(keyword = %trigger.keyword, %index, "hotword detected");
            return Ok(Some(trigger));
        }
    }

    /// Capture audio until the break detector reports the end of speech
    ///
    /// The capture also ends when the capture window fills up. The captured
    /// audio is kept as the session's last capture.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the session is not listening, or the break
    /// detector's error
    pub async fn capture_until_break(&mut self) -> Result<CaptureOutcome> {
        if !self.ensure_listening("capture_until_break")? {
            return Ok(CaptureOutcome::Cancelled);
        }

        self.state = SessionState::Capturing;
        self.breaks.reset();
        self.buffer.start_capture();
        tracing::debug!(detector = self.breaks.name(), "capture started");

        let ended_by = loop {
            if self.token.is_cancelled() {
                self.observe_termination();
                return Ok(CaptureOutcome::Cancelled);
            }

            let chunk = self.buffer.get_snapshot_data();
            if !chunk.is_empty() {
                match self.breaks.is_break(&chunk) {
                    Ok(true) => break UtteranceEnd::Break,
                    Ok(false) => {}
                    Err(e) => {
                        self.buffer.stop_capture();
                        self.state = self.resting_state();
                        return Err(e);
                    }
                }
            }

            if !self.buffer.is_capturing() {
                break UtteranceEnd::MaxDuration;
            }

            if chunk.is_empty() && !self.backoff().await {
                self.observe_termination();
                return Ok(CaptureOutcome::Cancelled);
            }
        };

        self.buffer.stop_capture();
        let audio = self.buffer.get_capture_data();
        self.stats.captures += 1;
        self.context.last_capture = Some(audio.clone());
        self.state = self.resting_state();

        tracing::info!(
            bytes = audio.len(),
            duration_ms = self.format.ms_for_bytes(audio.len()),
            ?ended_by,
            "utterance captured"
        );

        Ok(CaptureOutcome::Utterance(Utterance { audio, ended_by }))
    }

    /// Start a new exchange with `audio`, or the last capture when `None`
    ///
    /// Returns `None` if the backend does not answer within the response
    /// timeout or the session is terminated meanwhile.
    ///
    /// # Errors
    ///
    /// Returns a usage error when there is no audio to send, or the handler's
    /// error
    pub async fn ask(
        &mut self,
        handler: &dyn DialogHandler,
        audio: Option<&[u8]>,
    ) -> Result<Option<Response>> {
        let audio = self.outgoing_audio(audio, "ask")?;
        tracing::debug!(handler = handler.name(), bytes = audio.len(), "asking");
        self.exchange(handler.ask(&audio)).await
    }

    /// Continue an exchange
    ///
    /// `context` defaults to the continuation of the last response.
    ///
    /// # Errors
    ///
    /// Returns a usage error when there is no audio to send or no dialog to
    /// continue, or the handler's error
    pub async fn respond_to(
        &mut self,
        handler: &dyn DialogHandler,
        audio: Option<&[u8]>,
        context: Option<&DialogContext>,
    ) -> Result<Option<Response>> {
        let context = match context {
            Some(context) => context.clone(),
            None => self.context.continuation().cloned().ok_or_else(|| {
                Error::Usage("respond_to needs a response that expects more dialog".to_string())
            })?,
        };
        let audio = self.outgoing_audio(audio, "respond_to")?;

        tracing::debug!(handler = handler.name(), bytes = audio.len(), "responding");
        self.exchange(handler.respond_to(&audio, &context)).await
    }

    /// Play a response through the sink, returning once playback is done
    ///
    /// # Errors
    ///
    /// Returns the sink's error
    pub async fn play(&mut self, response: &Response) -> Result<()> {
        if response.audio.is_empty() {
            tracing::debug!("nothing to play");
            return Ok(());
        }

        self.state = SessionState::Playing;
        tracing::debug!(sink = self.sink.name(), kind = response.audio.kind(), "playing response");

        let result = self.sink.play(&response.audio).await;

        // Whatever the source heard during playback is not a hotword candidate
        let _ = self.buffer.get_snapshot_data();
        self.state = self.resting_state();

        result
    }

    /// Stop listening and release the source
    pub fn terminate(&mut self) {
        self.token.cancel();
        self.observe_termination();
    }

    /// A handle that can terminate this session from another task
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            token: self.token.clone(),
        }
    }

    /// Session identifier used in logs
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.listening
    }

    /// Whether termination was requested, even if not yet observed
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.released || self.token.is_cancelled()
    }

    #[must_use]
    pub const fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Last capture and last response
    #[must_use]
    pub const fn context(&self) -> &SessionContext {
        &self.context
    }

    #[must_use]
    pub const fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Configured keyword names
    #[must_use]
    pub fn keywords(&self) -> &[String] {
        self.trigger.keywords()
    }

    /// `Ok(false)` when a listening session has just been cancelled
    fn ensure_listening(&mut self, operation: &str) -> Result<bool> {
        if !self.listening {
            let reason = if self.released {
                "the session is terminated"
            } else {
                "call listen first"
            };
            return Err(Error::Usage(format!(
                "{operation} requires a listening session; {reason}"
            )));
        }
        if self.token.is_cancelled() {
            self.observe_termination();
            return Ok(false);
        }
        Ok(true)
    }

    fn outgoing_audio(&self, audio: Option<&[u8]>, operation: &str) -> Result<Vec<u8>> {
        match audio {
            Some(audio) => Ok(audio.to_vec()),
            None => self.context.last_capture.clone().ok_or_else(|| {
                Error::Usage(format!("{operation} without audio needs a prior capture"))
            }),
        }
    }

    async fn exchange<F>(&mut self, request: F) -> Result<Option<Response>>
    where
        F: Future<Output = Result<Response>>,
    {
        self.state = SessionState::Exchanging;
        let timeout = self.config.response_timeout;

        let outcome = tokio::select! {
            biased;
            () = self.token.cancelled() => None,
            result = tokio::time::timeout(timeout, request) => Some(result),
        };

        let response = match outcome {
            None => {
                self.observe_termination();
                return Ok(None);
            }
            Some(Err(_elapsed)) => {
                tracing::warn!(timeout_ms = timeout.as_millis(), "dialog response timed out");
                None
            }
            Some(Ok(Err(e))) => {
                self.state = self.resting_state();
                return Err(e);
            }
            Some(Ok(Ok(response))) => {
                tracing::debug!(
                    kind = response.audio.kind(),
                    expects_more_dialog = response.expects_more_dialog(),
                    "dialog response"
                );
                self.context.last_response = Some(response.clone());
                Some(response)
            }
        };

        self.state = self.resting_state();
        Ok(response)
    }

    /// Sleep one poll interval; `false` if cancelled first
    async fn backoff(&self) -> bool {
        tokio::select! {
            biased;
            () = self.token.cancelled() => false,
            () = tokio::time::sleep(self.config.poll_interval) => true,
        }
    }

    fn resting_state(&self) -> SessionState {
        if self.released {
            SessionState::Terminated
        } else if self.listening {
            SessionState::AwaitingHotword
        } else {
            SessionState::Idle
        }
    }

    fn observe_termination(&mut self) {
        self.state = SessionState::Terminated;
        if self.released {
            return;
        }
        self.released = true;

        self.buffer.stop_capture();
        self.source.stop();
        self.listening = false;

        tracing::info!(session_id = %self.id, stats = ?self.stats, "session terminated");
    }
}

impl Drop for DialogSession {
    fn drop(&mut self) {
        self.source.stop();
    }
}
