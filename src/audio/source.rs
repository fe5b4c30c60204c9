//! Audio sources feeding the shared buffer

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::{AudioBuffer, AudioFormat, wav_to_pcm};
use crate::{Error, Result};

/// Delivers raw PCM into an [`AudioBuffer`] asynchronously
///
/// The format is fixed for the lifetime of a session and must match the
/// configured [`AudioFormat`].
pub trait AudioSource {
    /// Begin delivering audio into `buffer`
    ///
    /// # Errors
    ///
    /// Returns error if the device or task cannot be started
    fn start(&mut self, buffer: Arc<AudioBuffer>) -> Result<()>;

    /// Stop delivering audio and release the device
    fn stop(&mut self);

    /// Whether audio is currently being delivered
    fn is_running(&self) -> bool;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Replays recorded PCM in fixed-size chunks at real-time pace
///
/// Useful for headless runs and tests: the chunks are pushed from a spawned
/// tokio task, exactly as a device callback would push them.
pub struct ReplaySource {
    chunks: Vec<Vec<u8>>,
    interval: Duration,
    start_delay: Duration,
    task: Option<JoinHandle<()>>,
}

impl ReplaySource {
    /// Split `pcm` into `chunk_ms` chunks delivered every `chunk_ms`
    #[must_use]
    pub fn new(pcm: &[u8], format: &AudioFormat, chunk_ms: u64) -> Self {
        let chunk_ms = chunk_ms.max(1);
        let chunk_bytes = format.bytes_for_ms(chunk_ms).max(format.frame_size());
        let chunks = pcm.chunks(chunk_bytes).map(<[u8]>::to_vec).collect();
        Self::from_chunks(chunks, Duration::from_millis(chunk_ms))
    }

    /// Deliver the given chunks, one every `interval`
    #[must_use]
    pub const fn from_chunks(chunks: Vec<Vec<u8>>, interval: Duration) -> Self {
        Self {
            chunks,
            interval,
            start_delay: Duration::ZERO,
            task: None,
        }
    }

    /// Load a WAV file whose format must match `format`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or its format differs
    pub fn from_wav_file(path: &Path, format: &AudioFormat, chunk_ms: u64) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let (pcm, file_format) = wav_to_pcm(&bytes)?;

        if file_format != *format {
            return Err(Error::Config(format!(
                "{} is {} Hz, {} channel(s), {}-bit but audio is configured as {} Hz, {} channel(s), {}-bit",
                path.display(),
                file_format.sample_rate,
                file_format.channels,
                file_format.bits_per_sample(),
                format.sample_rate,
                format.channels,
                format.bits_per_sample(),
            )));
        }

        tracing::debug!(path = %path.display(), bytes = pcm.len(), "loaded replay audio");
        Ok(Self::new(&pcm, format, chunk_ms))
    }

    /// Wait before delivering the first chunk
    #[must_use]
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Append digital silence after the recording
    #[must_use]
    pub fn with_trailing_silence(mut self, format: &AudioFormat, ms: u64) -> Self {
        let chunk_bytes = self
            .chunks
            .first()
            .map_or_else(|| format.bytes_for_ms(ms), Vec::len)
            .max(1);
        let mut remaining = format.bytes_for_ms(ms);
        while remaining > 0 {
            let len = remaining.min(chunk_bytes);
            self.chunks.push(vec![0; len]);
            remaining -= len;
        }
        self
    }

    /// Number of chunks queued for delivery
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

impl AudioSource for ReplaySource {
    fn start(&mut self, buffer: Arc<AudioBuffer>) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Audio("replay source requires a tokio runtime".to_string()))?;

        let chunks = self.chunks.clone();
        let interval = self.interval;
        let start_delay = self.start_delay;

        self.task = Some(handle.spawn(async move {
            if !start_delay.is_zero() {
                tokio::time::sleep(start_delay).await;
            }
            for chunk in chunks {
                buffer.extend(&chunk);
                tokio::time::sleep(interval).await;
            }
            tracing::debug!("replay source exhausted");
        }));

        tracing::debug!(chunks = self.chunks.len(), "replay source started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("replay source stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn name(&self) -> &'static str {
        "replay"
    }
}

impl Drop for ReplaySource {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
