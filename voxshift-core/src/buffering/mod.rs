//! Sample containers and the lock-free SPSC ring used between real-time
//! callbacks and the stream owner thread.
//!
//! Uses `ringbuf::HeapRb<f32>` which provides a wait-free `push_slice`
//! safe to call from the real-time audio callback.

pub mod sample_buffer;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};
pub use sample_buffer::SampleBuffer;

/// Type alias for the producer half, held by the writing callback.
pub type SampleProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half, held by the reading side.
pub type SampleConsumer = ringbuf::HeapCons<f32>;

/// Capture ring capacity: 2^22 = 4 194 304 f32 samples ≈ 95 s at 44.1 kHz.
/// The stream owner thread drains it every few milliseconds, so this only
/// matters if that thread is descheduled for a long time.
pub const CAPTURE_RING_CAPACITY: usize = 1 << 22;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_sample_ring(capacity: usize) -> (SampleProducer, SampleConsumer) {
    HeapRb::<f32>::new(capacity.max(1)).split()
}

/// Fixed-size chunk assembler for the real-time path.
///
/// Devices deliver whatever frame count they like per callback; the effect
/// chain wants exactly `chunk_size`. The backing storage is allocated once.
#[derive(Debug)]
pub struct ChunkAssembler {
    buf: Vec<f32>,
    chunk_size: usize,
}

impl ChunkAssembler {
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            buf: Vec::with_capacity(chunk_size),
            chunk_size,
        }
    }

    /// Feed samples; `on_chunk` is called once per completed chunk.
    pub fn push(&mut self, mut samples: &[f32], mut on_chunk: impl FnMut(&[f32])) {
        while !samples.is_empty() {
            let want = self.chunk_size - self.buf.len();
            let take = want.min(samples.len());
            self.buf.extend_from_slice(&samples[..take]);
            samples = &samples[take..];
            if self.buf.len() == self.chunk_size {
                on_chunk(&self.buf);
                self.buf.clear();
            }
        }
    }

    /// Samples waiting for the next full chunk.
    pub fn pending(&self) -> &[f32] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
