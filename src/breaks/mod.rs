//! End-of-utterance detection
//!
//! A break is a long enough run of non-speech frames. Both detectors share
//! the framing in [`SilenceRun`] and differ only in how a single frame is
//! classified: [`RmsBreakDetector`] compares its energy to a threshold,
//! [`VadBreakDetector`] asks a voice activity model.

mod rms;
mod vad;

pub use rms::RmsBreakDetector;
pub use vad::{VadBreakDetector, VoiceActivity, WebRtcVoiceActivity};

use crate::audio::AudioFormat;
use crate::config::{BreakKind, BreakTiming, Config};
use crate::{Error, Result};

/// Consumes a capture chunk by chunk and reports the end of the utterance
pub trait BreakDetector {
    /// Forget all state; call before every capture
    fn reset(&mut self);

    /// Feed the next chunk, returning true once the silence run is long enough
    ///
    /// # Errors
    ///
    /// Returns error if the frame classifier fails
    fn is_break(&mut self, chunk: &[u8]) -> Result<bool>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Build the detector selected by `break.detector`
///
/// # Errors
///
/// Returns error if the detector cannot work with the audio format
pub fn from_config(config: &Config) -> Result<Box<dyn BreakDetector>> {
    let detector: Box<dyn BreakDetector> = match config.break_kind {
        BreakKind::Rms => Box::new(RmsBreakDetector::new(&config.audio, &config.rms)?),
        BreakKind::Vad => Box::new(VadBreakDetector::new(&config.audio, &config.vad)?),
    };

    tracing::debug!(detector = detector.name(), "break detector ready");
    Ok(detector)
}

/// Frame slicing and silence accounting shared by the detectors
#[derive(Debug)]
pub(crate) struct SilenceRun {
    frame_bytes: usize,
    frame_ms: u64,
    silence_ms: u64,
    drop_start_bytes: usize,
    dropped: usize,
    pending: Vec<u8>,
    run_ms: u64,
}

impl SilenceRun {
    pub(crate) fn new(format: &AudioFormat, timing: &BreakTiming) -> Result<Self> {
        let frame_bytes = format.bytes_for_ms(timing.frame_ms);
        if frame_bytes == 0 {
            return Err(Error::Config(format!(
                "a {} ms break frame holds no audio at {} Hz",
                timing.frame_ms, format.sample_rate
            )));
        }

        Ok(Self {
            frame_bytes,
            frame_ms: timing.frame_ms,
            silence_ms: timing.silence_ms,
            drop_start_bytes: format.bytes_for_ms(timing.drop_start_ms),
            dropped: 0,
            pending: Vec::with_capacity(frame_bytes * 2),
            run_ms: 0,
        })
    }

    pub(crate) fn reset(&mut self) {
        self.dropped = 0;
        self.pending.clear();
        self.run_ms = 0;
    }

    pub(crate) const fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Silence accumulated so far
    pub(crate) const fn run_ms(&self) -> u64 {
        self.run_ms
    }

    /// Slice `chunk` into frames and classify each, `true` meaning speech
    ///
    /// Frames after the one completing the run stay pending.
    pub(crate) fn feed<F>(&mut self, chunk: &[u8], mut is_speech: F) -> Result<bool>
    where
        F: FnMut(&[u8]) -> Result<bool>,
    {
        let mut data = chunk;
        if self.dropped < self.drop_start_bytes {
            let skip = (self.drop_start_bytes - self.dropped).min(data.len());
            self.dropped += skip;
            data = &data[skip..];
        }
        self.pending.extend_from_slice(data);

        let mut consumed = 0;
        let outcome = loop {
            if self.pending.len() - consumed < self.frame_bytes {
                break Ok(false);
            }
            let frame = &self.pending[consumed..consumed + self.frame_bytes];
            consumed += self.frame_bytes;

            match is_speech(frame) {
                Ok(true) => self.run_ms = 0,
                Ok(false) => {
                    self.run_ms += self.frame_ms;
                    if self.run_ms >= self.silence_ms {
                        tracing::debug!(silence_ms = self.run_ms, "break detected");
                        break Ok(true);
                    }
                }
                Err(e) => break Err(e),
            }
        };

        self.pending.drain(..consumed);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(silence_ms: u64, drop_start_ms: u64) -> SilenceRun {
        SilenceRun::new(
            &AudioFormat::default(),
            &BreakTiming {
                frame_ms: 20,
                silence_ms,
                drop_start_ms,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_partial_frames_carry_over() {
        let mut silence = run(40, 0);
        let frame = silence.frame_bytes();
        let mut classified = 0;

        // Half a frame: nothing to classify yet
        assert!(
            !silence
                .feed(&vec![0; frame / 2], |_| {
                    classified += 1;
                    Ok(false)
                })
                .unwrap()
        );
        assert_eq!(classified, 0);

        // Completes the first frame and half of the second
        assert!(
            !silence
                .feed(&vec![0; frame], |_| {
                    classified += 1;
                    Ok(false)
                })
                .unwrap()
        );
        assert_eq!(classified, 1);
        assert_eq!(silence.run_ms(), 20);
    }

    #[test]
    fn test_drop_start_straddling_chunk() {
        let mut silence = run(1000, 30);
        let frame = silence.frame_bytes();
        let drop = AudioFormat::default().bytes_for_ms(30);

        // Chunk covers the grace period plus exactly one frame
        let mut frames = 0;
        silence
            .feed(&vec![0; drop + frame], |_| {
                frames += 1;
                Ok(false)
            })
            .unwrap();
        assert_eq!(frames, 1);
        assert_eq!(silence.run_ms(), 20);
    }

    #[test]
    fn test_classifier_error_propagates() {
        let mut silence = run(100, 0);
        let frame = silence.frame_bytes();
        let err = silence
            .feed(&vec![0; frame], |_| Err(Error::Vad("model failed".to_string())))
            .unwrap_err();
        assert!(matches!(err, Error::Vad(_)));
    }

    #[test]
    fn test_zero_length_frame_rejected() {
        let format = AudioFormat {
            sample_rate: 10,
            ..AudioFormat::default()
        };
        let timing = BreakTiming {
            frame_ms: 10,
            silence_ms: 100,
            drop_start_ms: 0,
        };
        assert!(SilenceRun::new(&format, &timing).unwrap_err().is_config());
    }
}
