//! `RecordingSession`: raw capture accumulation.
//!
//! Chunks are stored as captured, in arrival order. Nothing is processed
//! until the session is stopped and its buffer handed off. The one exception
//! is a non-finite sample from a glitching device, which is stored as silence
//! so a single bad value cannot invalidate the whole recording.

use tracing::{debug, error, warn};

use crate::buffering::{ChunkAssembler, SampleBuffer};
use crate::error::{Result, VoxError};
use crate::ipc::events::StreamState;

#[derive(Debug)]
pub struct RecordingSession {
    sample_rate: u32,
    chunks: Vec<Vec<f32>>,
    assembler: ChunkAssembler,
    capturing: bool,
    repaired: usize,
}

impl RecordingSession {
    pub fn new(sample_rate: u32, chunk_size: usize) -> Self {
        Self {
            sample_rate,
            chunks: Vec::new(),
            assembler: ChunkAssembler::new(chunk_size),
            capturing: false,
            repaired: 0,
        }
    }

    /// Begin a new capture, discarding anything left from a previous one.
    ///
    /// # Errors
    /// `VoxError::StateConflict` if already capturing.
    pub fn start(&mut self) -> Result<()> {
        if self.capturing {
            return Err(VoxError::conflict("start recording", StreamState::Capturing));
        }
        self.chunks.clear();
        self.assembler.clear();
        self.repaired = 0;
        self.capturing = true;
        Ok(())
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Append one captured chunk. Ignored when not capturing.
    pub fn push_chunk(&mut self, chunk: &[f32]) {
        if self.capturing && !chunk.is_empty() {
            let mut owned = chunk.to_vec();
            self.repaired += silence_non_finite(&mut owned);
            self.chunks.push(owned);
        }
    }

    /// Append arbitrary-length device output, regrouped into fixed chunks.
    pub fn push_samples(&mut self, samples: &[f32]) {
        if !self.capturing {
            return;
        }
        let chunks = &mut self.chunks;
        let repaired = &mut self.repaired;
        self.assembler.push(samples, |chunk| {
            let mut owned = chunk.to_vec();
            *repaired += silence_non_finite(&mut owned);
            chunks.push(owned);
        });
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Non-finite samples replaced with silence since `start`.
    pub fn repaired_samples(&self) -> usize {
        self.repaired
    }

    /// Concatenate everything captured, including a trailing partial chunk.
    /// Returns `None` when nothing was captured or the session was not running.
    pub fn stop(&mut self) -> Option<SampleBuffer> {
        if !self.capturing {
            return None;
        }
        self.capturing = false;
        let mut tail = self.assembler.pending().to_vec();
        self.assembler.clear();
        self.repaired += silence_non_finite(&mut tail);
        if !tail.is_empty() {
            self.chunks.push(tail);
        }
        let chunks = std::mem::take(&mut self.chunks);
        debug!(chunks = chunks.len(), "recording session stopped");
        if self.repaired > 0 {
            warn!(samples = self.repaired, "non-finite capture samples replaced with silence");
        }
        if chunks.is_empty() {
            return None;
        }
        match SampleBuffer::from_chunks(chunks.iter().map(Vec::as_slice), self.sample_rate) {
            Ok(buffer) => Some(buffer),
            Err(e) => {
                error!(error = %e, sample_rate = self.sample_rate, "recording could not be assembled");
                None
            }
        }
    }
}

fn silence_non_finite(samples: &mut [f32]) -> usize {
    let mut count = 0;
    for s in samples.iter_mut().filter(|s| !s.is_finite()) {
        *s = 0.0;
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn n_chunks_of_c_samples_yield_n_times_c() {
        let mut session = RecordingSession::new(44_100, 1024);
        session.start().unwrap();
        for n in 0..7 {
            session.push_chunk(&vec![n as f32 / 10.0; 1024]);
        }
        assert_eq!(session.chunk_count(), 7);
        let buf = session.stop().unwrap();
        assert_eq!(buf.len(), 7 * 1024);
        assert_eq!(buf.samples()[0], 0.0);
        assert!((buf.samples()[6 * 1024] - 0.6).abs() < 1e-6);
        assert!(!session.is_capturing());
    }

    #[test]
    fn zero_chunks_is_none_not_error() {
        let mut session = RecordingSession::new(44_100, 1024);
        session.start().unwrap();
        assert!(session.stop().is_none());
    }

    #[test]
    fn double_start_conflicts() {
        let mut session = RecordingSession::new(44_100, 256);
        session.start().unwrap();
        assert!(matches!(
            session.start(),
            Err(VoxError::StateConflict { .. })
        ));
    }

    #[test]
    fn uneven_device_blocks_are_regrouped() {
        let mut session = RecordingSession::new(16_000, 100);
        session.start().unwrap();
        session.push_samples(&[0.1; 130]);
        session.push_samples(&[0.2; 130]);
        assert_eq!(session.chunk_count(), 2);
        let buf = session.stop().unwrap();
        assert_eq!(buf.len(), 260);
    }

    #[test]
    fn non_finite_capture_sample_becomes_silence() {
        let mut session = RecordingSession::new(44_100, 4);
        session.start().unwrap();
        session.push_chunk(&[0.1, 0.2, f32::NAN, 0.3]);
        session.push_chunk(&[0.4; 4]);
        session.push_samples(&[f32::INFINITY, 0.5]);
        let buf = session.stop().expect("recording survives a bad sample");
        assert_eq!(buf.len(), 10);
        assert_eq!(&buf.samples()[..4], &[0.1, 0.2, 0.0, 0.3]);
        assert_eq!(&buf.samples()[8..], &[0.0, 0.5]);
        assert_eq!(session.repaired_samples(), 2);
    }

    #[test]
    fn pushes_outside_capture_are_ignored() {
        let mut session = RecordingSession::new(16_000, 4);
        session.push_chunk(&[0.5; 4]);
        session.start().unwrap();
        assert_eq!(session.chunk_count(), 0);
        assert!(session.stop().is_none());
    }
}
