//! HTTP dialog backend
//!
//! Posts each utterance as a WAV upload and expects a JSON reply:
//!
//! ```json
//! { "audio": "<base64>", "format": "mp3", "expects_more_dialog": true, "context": "abc" }
//! ```
//!
//! `url` may replace `audio` for responses the sink should fetch itself.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;

use super::{DialogContext, DialogHandler, Response, ResponseAudio};
use crate::audio::{AudioFormat, pcm_to_wav};
use crate::config::HttpDialogConfig;
use crate::{Error, Result};

/// Reply body from the dialog endpoint
#[derive(Debug, Deserialize)]
struct DialogReply {
    audio: Option<String>,
    url: Option<String>,
    #[serde(default)]
    format: ReplyFormat,
    #[serde(default)]
    expects_more_dialog: bool,
    context: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ReplyFormat {
    #[default]
    Wav,
    Mp3,
    Pcm,
}

/// Talks to a dialog service over HTTP
pub struct HttpDialogHandler {
    client: reqwest::Client,
    url: String,
    api_key: String,
    format: AudioFormat,
}

impl HttpDialogHandler {
    /// Create a handler for the configured endpoint
    ///
    /// `format` describes the PCM the session captures.
    #[must_use]
    pub fn new(config: HttpDialogConfig, format: AudioFormat) -> Self {
        tracing::debug!(url = %config.url, "http dialog handler initialized");
        Self {
            client: reqwest::Client::new(),
            url: config.url,
            api_key: config.api_key,
            format,
        }
    }

    async fn exchange(&self, audio: &[u8], context: Option<&DialogContext>) -> Result<Response> {
        tracing::debug!(
            audio_bytes = audio.len(),
            continuation = context.is_some(),
            "sending utterance"
        );

        let wav = pcm_to_wav(audio, &self.format)?;
        let mut form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(wav)
                .file_name("utterance.wav")
                .mime_str("audio/wav")
                .map_err(|e| Error::Dialog(e.to_string()))?,
        );
        if let Some(context) = context {
            form = form.text("context", context.token().to_string());
        }

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "dialog request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "dialog API error");
            return Err(Error::Dialog(format!("dialog API error {status}: {body}")));
        }

        let reply: DialogReply = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse dialog reply");
            e
        })?;

        self.build_response(reply)
    }

    fn build_response(&self, reply: DialogReply) -> Result<Response> {
        let audio = match (reply.audio, reply.url) {
            (Some(encoded), _) => {
                let data = BASE64
                    .decode(encoded.as_bytes())
                    .map_err(|e| Error::Dialog(format!("invalid audio encoding: {e}")))?;
                match reply.format {
                    ReplyFormat::Wav => ResponseAudio::Wav(data),
                    ReplyFormat::Mp3 => ResponseAudio::Mp3(data),
                    ReplyFormat::Pcm => ResponseAudio::Pcm {
                        data,
                        format: self.format,
                    },
                }
            }
            (None, Some(url)) => ResponseAudio::Stream { url },
            (None, None) => {
                return Err(Error::Dialog("reply carries neither audio nor url".to_string()));
            }
        };

        let mut response = Response::new(audio);
        if reply.expects_more_dialog {
            response = response.with_continuation(DialogContext::new(
                reply.context.unwrap_or_default(),
            ));
        }

        tracing::info!(
            kind = response.audio.kind(),
            expects_more_dialog = response.expects_more_dialog(),
            "dialog reply received"
        );
        Ok(response)
    }
}

#[async_trait]
impl DialogHandler for HttpDialogHandler {
    async fn ask(&self, audio: &[u8]) -> Result<Response> {
        self.exchange(audio, None).await
    }

    async fn respond_to(&self, audio: &[u8], context: &DialogContext) -> Result<Response> {
        self.exchange(audio, Some(context)).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
