//! Dual-window audio buffer
//!
//! Every chunk delivered by a source lands in a small rolling snapshot window
//! that the session drains for hotword spotting. While a capture is active the
//! same chunk is also appended to a growing capture window that holds a whole
//! utterance. Both windows sit behind one mutex so the device callback and the
//! session loop never observe a torn update.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::AudioFormat;
use crate::config::BufferConfig;
use crate::lock::lock_or_recover;

/// Audio shared between a source (producer) and a session (consumer)
#[derive(Debug)]
pub struct AudioBuffer {
    inner: Mutex<Windows>,
}

#[derive(Debug)]
struct Windows {
    snapshot: VecDeque<u8>,
    snapshot_capacity: usize,
    capture: Vec<u8>,
    capture_capacity: Option<usize>,
    capturing: bool,
}

impl AudioBuffer {
    /// Size both windows for the given format
    #[must_use]
    pub fn new(format: &AudioFormat, config: &BufferConfig) -> Self {
        let snapshot_capacity = format
            .bytes_for_ms(config.snapshot_ms)
            .max(format.frame_size());
        let capture_capacity = config.max_capture_ms.map(|ms| format.bytes_for_ms(ms));

        tracing::debug!(
            snapshot_bytes = snapshot_capacity,
            capture_bytes = ?capture_capacity,
            "audio buffer initialized"
        );

        Self {
            inner: Mutex::new(Windows {
                snapshot: VecDeque::with_capacity(snapshot_capacity),
                snapshot_capacity,
                capture: Vec::with_capacity(capture_capacity.unwrap_or(0)),
                capture_capacity,
                capturing: false,
            }),
        }
    }

    /// Append newly delivered audio
    ///
    /// The snapshot window keeps only its most recent `snapshot_capacity`
    /// bytes. While capturing, the chunk is also appended to the capture window;
    /// once that window is full, capturing stops on its own and any excess in
    /// the chunk is left out of the capture.
    pub fn extend(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let mut windows = lock_or_recover(&self.inner, "audio buffer extend");
        windows.push_snapshot(data);

        if windows.capturing {
            windows.push_capture(data);
        }
    }

    /// Drain everything appended to the snapshot window since the last call
    #[must_use]
    pub fn get_snapshot_data(&self) -> Vec<u8> {
        let mut windows = lock_or_recover(&self.inner, "audio buffer snapshot");
        windows.snapshot.drain(..).collect()
    }

    /// Begin a new capture, discarding bytes from any previous one
    pub fn start_capture(&self) {
        let mut windows = lock_or_recover(&self.inner, "audio buffer start capture");
        windows.capture.clear();
        windows.capturing = true;
    }

    /// Stop capturing; captured bytes stay available
    pub fn stop_capture(&self) {
        lock_or_recover(&self.inner, "audio buffer stop capture").capturing = false;
    }

    /// Copy of the capture window
    #[must_use]
    pub fn get_capture_data(&self) -> Vec<u8> {
        lock_or_recover(&self.inner, "audio buffer capture data")
            .capture
            .clone()
    }

    /// Whether a capture is in progress
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        lock_or_recover(&self.inner, "audio buffer is capturing").capturing
    }

    /// Maximum bytes held by the snapshot window
    #[must_use]
    pub fn snapshot_capacity(&self) -> usize {
        lock_or_recover(&self.inner, "audio buffer capacity").snapshot_capacity
    }

    /// Maximum bytes held by the capture window, `None` when unbounded
    #[must_use]
    pub fn capture_capacity(&self) -> Option<usize> {
        lock_or_recover(&self.inner, "audio buffer capacity").capture_capacity
    }
}

impl Windows {
    fn push_snapshot(&mut self, data: &[u8]) {
        let capacity = self.snapshot_capacity;

        if data.len() >= capacity {
            self.snapshot.clear();
            self.snapshot.extend(&data[data.len() - capacity..]);
            return;
        }

        let overflow = (self.snapshot.len() + data.len()).saturating_sub(capacity);
        if overflow > 0 {
            self.snapshot.drain(..overflow);
        }
        self.snapshot.extend(data);
    }

    fn push_capture(&mut self, data: &[u8]) {
        let Some(capacity) = self.capture_capacity else {
            self.capture.extend_from_slice(data);
            return;
        };

        let room = capacity.saturating_sub(self.capture.len());
        let take = room.min(data.len());
        self.capture.extend_from_slice(&data[..take]);

        if self.capture.len() >= capacity {
            self.capturing = false;
            tracing::debug!(bytes = self.capture.len(), "capture window full");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(snapshot_ms: u64, max_capture_ms: Option<u64>) -> AudioBuffer {
        AudioBuffer::new(
            &AudioFormat::default(),
            &BufferConfig {
                snapshot_ms,
                max_capture_ms,
            },
        )
    }

    #[test]
    fn test_snapshot_evicts_oldest() {
        // 1 ms at 16 kHz, 16-bit mono = 32 bytes
        let buffer = buffer(1, None);
        let data: Vec<u8> = (0..40).collect();
        buffer.extend(&data[..20]);
        buffer.extend(&data[20..]);

        let snapshot = buffer.get_snapshot_data();
        assert_eq!(snapshot.len(), 32);
        assert_eq!(snapshot, data[8..].to_vec());
    }

    #[test]
    fn test_snapshot_eviction_keeps_whole_samples() {
        let format = AudioFormat {
            sample_rate: 11025,
            ..AudioFormat::default()
        };
        let buffer = AudioBuffer::new(
            &format,
            &BufferConfig {
                snapshot_ms: 30,
                max_capture_ms: None,
            },
        );
        assert_eq!(buffer.snapshot_capacity(), 660);

        let samples: Vec<i16> = (0..500).collect();
        buffer.extend(&crate::audio::samples_to_pcm16(&samples));

        let kept = crate::audio::pcm16_to_samples(&buffer.get_snapshot_data());
        assert_eq!(kept, samples[170..].to_vec());
    }

    #[test]
    fn test_oversized_chunk_keeps_tail() {
        let buffer = buffer(1, None);
        let data: Vec<u8> = (0..100).collect();
        buffer.extend(&data);
        assert_eq!(buffer.get_snapshot_data(), data[68..].to_vec());
    }

    #[test]
    fn test_snapshot_drain_is_exhaustive() {
        let buffer = buffer(120, None);
        buffer.extend(&[1, 2, 3, 4]);
        assert_eq!(buffer.get_snapshot_data(), vec![1, 2, 3, 4]);
        assert!(buffer.get_snapshot_data().is_empty());
    }

    #[test]
    fn test_capture_only_while_capturing() {
        let buffer = buffer(120, Some(1000));
        buffer.extend(&[9; 10]);
        buffer.start_capture();
        buffer.extend(&[1; 6]);
        buffer.stop_capture();
        buffer.extend(&[2; 6]);

        assert_eq!(buffer.get_capture_data(), vec![1; 6]);
        // capture data survives re-query
        assert_eq!(buffer.get_capture_data().len(), 6);
    }

    #[test]
    fn test_start_capture_clears_previous() {
        let buffer = buffer(120, None);
        buffer.start_capture();
        buffer.extend(&[1; 8]);
        buffer.start_capture();
        assert!(buffer.get_capture_data().is_empty());
        assert!(buffer.is_capturing());
    }

    #[test]
    fn test_capture_auto_stops_at_capacity() {
        // 10 ms = 320 bytes
        let buffer = buffer(120, Some(10));
        assert_eq!(buffer.capture_capacity(), Some(320));

        buffer.start_capture();
        buffer.extend(&[5; 200]);
        assert!(buffer.is_capturing());
        buffer.extend(&[6; 200]);
        assert!(!buffer.is_capturing());

        let captured = buffer.get_capture_data();
        assert_eq!(captured.len(), 320);
        assert_eq!(&captured[..200], &[5; 200][..]);
        assert_eq!(&captured[200..], &[6; 120][..]);
    }
}
