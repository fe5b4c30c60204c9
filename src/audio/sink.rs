//! Output sinks for dialog responses

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{AudioFormat, pcm_to_wav, signed_sample};
use crate::dialog::ResponseAudio;
use crate::{Error, Result};

/// Plays response audio to completion
#[async_trait(?Send)]
pub trait AudioSink {
    /// Play `audio`, returning only once playback has finished
    ///
    /// # Errors
    ///
    /// Returns error if the audio cannot be decoded or the device fails
    async fn play(&mut self, audio: &ResponseAudio) -> Result<()>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Download a streamed response and sniff its container
///
/// # Errors
///
/// Returns error if the request fails or returns a non-success status
pub async fn fetch_stream(client: &reqwest::Client, url: &str) -> Result<ResponseAudio> {
    tracing::debug!(url, "fetching response stream");

    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Audio(format!("stream fetch failed with {status}: {url}")));
    }

    let data = response.bytes().await?.to_vec();
    tracing::debug!(bytes = data.len(), "response stream fetched");

    if data.starts_with(b"RIFF") {
        Ok(ResponseAudio::Wav(data))
    } else {
        Ok(ResponseAudio::Mp3(data))
    }
}

/// Convert interleaved PCM to mono `f32` in [-1, 1] by averaging channels
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn pcm_to_mono_f32(pcm: &[u8], format: &AudioFormat) -> Vec<f32> {
    let width = usize::from(format.width);
    let channels = usize::from(format.channels);
    let scale = (1u64 << (format.bits_per_sample() - 1)) as f32;

    pcm.chunks_exact(format.frame_size())
        .map(|frame| {
            let sum: f32 = frame
                .chunks_exact(width)
                .map(|sample| signed_sample(sample) as f32 / scale)
                .sum();
            sum / channels as f32
        })
        .collect()
}

/// Writes each response to a numbered file instead of playing it
pub struct WavDirSink {
    directory: PathBuf,
    client: reqwest::Client,
    written: usize,
}

impl WavDirSink {
    /// Write responses into `directory`, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        tracing::debug!(directory = %directory.display(), "response directory sink ready");

        Ok(Self {
            directory,
            client: reqwest::Client::new(),
            written: 0,
        })
    }

    /// Directory receiving responses
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Number of responses written so far
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }

    fn next_path(&mut self, extension: &str) -> PathBuf {
        self.written += 1;
        self.directory
            .join(format!("response-{:03}.{extension}", self.written))
    }
}

#[async_trait(?Send)]
impl AudioSink for WavDirSink {
    async fn play(&mut self, audio: &ResponseAudio) -> Result<()> {
        let fetched;
        let audio = if let ResponseAudio::Stream { url } = audio {
            fetched = fetch_stream(&self.client, url).await?;
            &fetched
        } else {
            audio
        };

        let (path, bytes) = match audio {
            ResponseAudio::Wav(data) => (self.next_path("wav"), data.clone()),
            ResponseAudio::Mp3(data) => (self.next_path("mp3"), data.clone()),
            ResponseAudio::Pcm { data, format } => (self.next_path("wav"), pcm_to_wav(data, format)?),
            ResponseAudio::Stream { url } => {
                return Err(Error::Audio(format!("stream did not resolve: {url}")));
            }
        };

        tokio::fs::write(&path, bytes).await?;
        tracing::info!(path = %path.display(), "response written");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "directory"
    }
}
