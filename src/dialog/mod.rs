//! Dialog backend contract
//!
//! A [`DialogHandler`] turns a captured utterance into a playable
//! [`Response`]. A response that carries a [`DialogContext`] expects another
//! turn: the next utterance goes to [`DialogHandler::respond_to`] together
//! with that context instead of starting a fresh exchange.

mod http;

pub use http::HttpDialogHandler;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::audio::AudioFormat;

/// Playable audio returned by a dialog backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseAudio {
    /// Complete WAV file
    Wav(Vec<u8>),
    /// Complete MP3 file
    Mp3(Vec<u8>),
    /// Raw little-endian PCM
    Pcm { data: Vec<u8>, format: AudioFormat },
    /// Remote audio to be fetched by the sink
    Stream { url: String },
}

impl ResponseAudio {
    /// Whether the sink has to fetch the audio itself
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stream { .. })
    }

    /// Whether there is nothing to play
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Wav(data) | Self::Mp3(data) | Self::Pcm { data, .. } => data.is_empty(),
            Self::Stream { url } => url.is_empty(),
        }
    }

    /// Short label for logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Wav(_) => "wav",
            Self::Mp3(_) => "mp3",
            Self::Pcm { .. } => "pcm",
            Self::Stream { .. } => "stream",
        }
    }
}

/// Opaque continuation state handed back by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogContext {
    token: String,
}

impl DialogContext {
    /// Wrap a backend continuation token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// The backend's token
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// One dialog turn's reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Audio to play back
    pub audio: ResponseAudio,
    /// Present when the backend expects another turn
    pub continuation: Option<DialogContext>,
}

impl Response {
    /// A final response
    #[must_use]
    pub const fn new(audio: ResponseAudio) -> Self {
        Self {
            audio,
            continuation: None,
        }
    }

    /// Mark the response as expecting another turn
    #[must_use]
    pub fn with_continuation(mut self, context: DialogContext) -> Self {
        self.continuation = Some(context);
        self
    }

    /// Whether the backend expects the user to keep talking
    #[must_use]
    pub const fn expects_more_dialog(&self) -> bool {
        self.continuation.is_some()
    }
}

/// A dialog backend, such as a cloud voice assistant
///
/// `audio` is raw PCM in the session's configured format.
#[async_trait]
pub trait DialogHandler: Send + Sync {
    /// Start a new exchange with a fresh utterance
    ///
    /// # Errors
    ///
    /// Returns error if the backend rejects or fails the request
    async fn ask(&self, audio: &[u8]) -> Result<Response>;

    /// Continue an exchange the previous response left open
    ///
    /// # Errors
    ///
    /// Returns error if the backend rejects or fails the request
    async fn respond_to(&self, audio: &[u8], context: &DialogContext) -> Result<Response>;

    /// Short name for logs
    fn name(&self) -> &'static str {
        "dialog"
    }
}
