//! Energy-threshold break detection

use super::{BreakDetector, SilenceRun};
use crate::Result;
use crate::audio::{AudioFormat, rms};
use crate::config::RmsBreakConfig;

/// Treats a frame as silence when its RMS is at or below a threshold
#[derive(Debug)]
pub struct RmsBreakDetector {
    run: SilenceRun,
    width: usize,
    silence_rms: f64,
}

impl RmsBreakDetector {
    /// Create a detector for `format`
    ///
    /// # Errors
    ///
    /// Returns error if a frame would hold no audio
    pub fn new(format: &AudioFormat, config: &RmsBreakConfig) -> Result<Self> {
        let run = SilenceRun::new(format, &config.timing)?;

        tracing::debug!(
            frame_ms = config.timing.frame_ms,
            silence_ms = config.timing.silence_ms,
            silence_rms = config.silence_rms,
            "rms break detector initialized"
        );

        Ok(Self {
            run,
            width: usize::from(format.width),
            silence_rms: config.silence_rms,
        })
    }
}

impl BreakDetector for RmsBreakDetector {
    fn reset(&mut self) {
        self.run.reset();
    }

    fn is_break(&mut self, chunk: &[u8]) -> Result<bool> {
        let width = self.width;
        let threshold = self.silence_rms;
        self.run.feed(chunk, |frame| Ok(rms(frame, width) > threshold))
    }

    fn name(&self) -> &'static str {
        "rms"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::samples_to_pcm16;
    use crate::config::BreakTiming;

    fn detector() -> RmsBreakDetector {
        RmsBreakDetector::new(
            &AudioFormat::default(),
            &RmsBreakConfig {
                timing: BreakTiming {
                    frame_ms: 20,
                    silence_ms: 200,
                    drop_start_ms: 0,
                },
                silence_rms: 100.0,
            },
        )
        .unwrap()
    }

    fn frame(amplitude: i16) -> Vec<u8> {
        // 20 ms at 16 kHz
        samples_to_pcm16(&[amplitude, amplitude.saturating_neg()].repeat(160))
    }

    #[test]
    fn test_breaks_after_silence_run() {
        let mut detector = detector();
        for n in 1..10 {
            assert!(!detector.is_break(&frame(0)).unwrap(), "frame {n}");
        }
        assert!(detector.is_break(&frame(0)).unwrap());
    }

    #[test]
    fn test_loud_frame_resets_run() {
        let mut detector = detector();
        for _ in 0..9 {
            detector.is_break(&frame(0)).unwrap();
        }
        assert!(!detector.is_break(&frame(5000)).unwrap());
        assert!(!detector.is_break(&frame(0)).unwrap());
    }

    #[test]
    fn test_threshold_is_inclusive_for_silence() {
        let mut detector = detector();
        for _ in 0..9 {
            detector.is_break(&frame(100)).unwrap();
        }
        assert!(detector.is_break(&frame(100)).unwrap());
    }

    #[test]
    fn test_reset_clears_run() {
        let mut detector = detector();
        for _ in 0..9 {
            detector.is_break(&frame(0)).unwrap();
        }
        detector.reset();
        assert!(!detector.is_break(&frame(0)).unwrap());
    }
}
