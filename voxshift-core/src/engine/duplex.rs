//! Real-time stream plumbing.
//!
//! ## Threading
//!
//! ```text
//! owner thread (one per active stream)
//!     ├─ opens the device streams (StreamGuard is !Send)
//!     ├─ signals open success/failure back to the control call
//!     ├─ waits on { stop, device fault, drain tick }
//!     └─ drops the streams, final drain, hands back the recording
//!
//! input callback  ──► ChunkAssembler ──► ChunkProcessor ──► ring ──► output callback
//!   (duplex mode)                         (EffectChain)                (mono → N ch)
//!
//! input callback  ──► capture ring ──► owner thread ──► RecordingSession
//!   (capture mode)
//! ```
//!
//! Callbacks never lock, log only on faults, and reuse their scratch storage.
//! `ActiveStream::stop` joins the owner thread, which drops the streams first,
//! so no callback can run once it returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Sender};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::audio::{write_to_channels, AudioBackend, StreamGuard, StreamSettings};
use crate::buffering::{
    create_sample_ring, ChunkAssembler, Consumer, Producer, SampleBuffer, SampleConsumer,
    CAPTURE_RING_CAPACITY,
};
use crate::dsp::EffectChain;
use crate::error::{Result, VoxError};
use crate::profile::ProfileReader;

use super::recording::RecordingSession;

/// Counters shared between the callbacks and the control API.
#[derive(Debug, Default)]
pub struct StreamDiagnostics {
    pub chunks_processed: AtomicU64,
    pub chunk_faults: AtomicU64,
    pub profile_swap_misses: AtomicU64,
    pub output_underruns: AtomicU64,
    pub dropped_input_frames: AtomicU64,
    pub captured_samples: AtomicU64,
}

impl StreamDiagnostics {
    pub fn reset(&self) {
        self.chunks_processed.store(0, Ordering::Relaxed);
        self.chunk_faults.store(0, Ordering::Relaxed);
        self.profile_swap_misses.store(0, Ordering::Relaxed);
        self.output_underruns.store(0, Ordering::Relaxed);
        self.dropped_input_frames.store(0, Ordering::Relaxed);
        self.captured_samples.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            chunk_faults: self.chunk_faults.load(Ordering::Relaxed),
            profile_swap_misses: self.profile_swap_misses.load(Ordering::Relaxed),
            output_underruns: self.output_underruns.load(Ordering::Relaxed),
            dropped_input_frames: self.dropped_input_frames.load(Ordering::Relaxed),
            captured_samples: self.captured_samples.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub chunks_processed: u64,
    pub chunk_faults: u64,
    pub profile_swap_misses: u64,
    pub output_underruns: u64,
    pub dropped_input_frames: u64,
    pub captured_samples: u64,
}

/// Per-chunk transform run inside the input callback.
///
/// A failing chunk is replaced by its unmodified input; the stream keeps going.
pub struct ChunkProcessor {
    chain: EffectChain,
    reader: ProfileReader,
    sample_rate: u32,
    position: u64,
    work: Vec<f32>,
    diagnostics: Arc<StreamDiagnostics>,
}

impl ChunkProcessor {
    pub fn new(
        reader: ProfileReader,
        sample_rate: u32,
        chunk_size: usize,
        diagnostics: Arc<StreamDiagnostics>,
    ) -> Self {
        Self {
            chain: EffectChain::realtime(),
            reader,
            sample_rate,
            position: 0,
            work: Vec::with_capacity(chunk_size),
            diagnostics,
        }
    }

    /// Absolute index of the next chunk's first sample.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn process(&mut self, chunk: &[f32]) -> &[f32] {
        if !self.reader.refresh() {
            self.diagnostics
                .profile_swap_misses
                .fetch_add(1, Ordering::Relaxed);
        }
        self.work.clear();
        self.work.extend_from_slice(chunk);
        let result = self.chain.process(
            &mut self.work,
            self.sample_rate,
            self.reader.profile(),
            self.position,
        );
        self.position += chunk.len() as u64;
        match result {
            Ok(()) => {
                self.diagnostics
                    .chunks_processed
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.diagnostics.chunk_faults.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, position = self.position, "chunk fault, passing input through");
                self.work.clear();
                self.work.extend_from_slice(chunk);
            }
        }
        &self.work
    }
}

/// Called once, from the owner thread, when a device reports an error.
pub type FaultHook = Box<dyn FnOnce(String) + Send + 'static>;

/// What an owner thread needs to open and run one stream set.
#[derive(Clone)]
pub struct StreamPlan {
    pub backend: Arc<dyn AudioBackend>,
    pub input: StreamSettings,
    pub output: StreamSettings,
    pub chunk_size: usize,
    /// Processed-audio ring size, in chunks.
    pub ring_chunks: usize,
    pub drain_interval: Duration,
    pub diagnostics: Arc<StreamDiagnostics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Duplex,
    Capture,
}

/// Work done on the owner thread between waits.
trait OwnerWork: Send + 'static {
    fn drain(&mut self);
    fn finish(self: Box<Self>) -> Option<SampleBuffer>;
}

struct DuplexWork;

impl OwnerWork for DuplexWork {
    fn drain(&mut self) {}

    fn finish(self: Box<Self>) -> Option<SampleBuffer> {
        None
    }
}

struct CaptureWork {
    consumer: SampleConsumer,
    session: RecordingSession,
    scratch: Vec<f32>,
    diagnostics: Arc<StreamDiagnostics>,
}

impl OwnerWork for CaptureWork {
    fn drain(&mut self) {
        loop {
            let n = self.consumer.pop_slice(&mut self.scratch);
            if n == 0 {
                break;
            }
            self.session.push_samples(&self.scratch[..n]);
            self.diagnostics
                .captured_samples
                .fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    fn finish(mut self: Box<Self>) -> Option<SampleBuffer> {
        self.drain();
        self.session.stop()
    }
}

/// A running stream and its owner thread.
pub struct ActiveStream {
    kind: StreamKind,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<Option<SampleBuffer>>>,
}

impl ActiveStream {
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// True once the owner thread has exited on its own (device fault).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Close the device streams and wait for the owner thread. Returns the
    /// recording for capture streams.
    pub fn stop(mut self) -> Option<SampleBuffer> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<SampleBuffer> {
        let _ = self.stop_tx.try_send(());
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(recording) => recording,
            Err(_) => {
                error!(kind = ?self.kind, "stream owner thread panicked");
                None
            }
        }
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

/// Open capture → effect chain → playback.
pub fn spawn_duplex(plan: StreamPlan, reader: ProfileReader, on_fault: FaultHook) -> Result<ActiveStream> {
    let chunk = plan.chunk_size.max(1);
    let open_plan = plan.clone();
    let open = move |fault_tx: Sender<String>| -> Result<Vec<StreamGuard>> {
        let plan = open_plan;
        let (mut producer, mut consumer) = create_sample_ring(chunk * plan.ring_chunks.max(2));
        let diagnostics = Arc::clone(&plan.diagnostics);

        let out_fault = fault_tx.clone();
        let out_diag = Arc::clone(&diagnostics);
        let mut mono = vec![0.0f32; chunk * 4];
        let output = plan.backend.open_output(
            &plan.output,
            Box::new(move |out: &mut [f32], channels: u16| {
                let frames = out.len() / usize::from(channels.max(1));
                if mono.len() < frames {
                    mono.resize(frames, 0.0);
                }
                let filled = consumer.pop_slice(&mut mono[..frames]);
                if filled < frames {
                    mono[filled..frames].fill(0.0);
                    out_diag.output_underruns.fetch_add(1, Ordering::Relaxed);
                }
                write_to_channels(&mono[..frames], out, channels);
            }),
            Box::new(move |msg| {
                let _ = out_fault.try_send(msg);
            }),
        )?;

        let mut assembler = ChunkAssembler::new(chunk);
        let mut processor =
            ChunkProcessor::new(reader, plan.input.sample_rate, chunk, Arc::clone(&diagnostics));
        let in_diag = diagnostics;
        let input = plan.backend.open_input(
            &plan.input,
            Box::new(move |data: &[f32]| {
                assembler.push(data, |frame| {
                    let processed = processor.process(frame);
                    let written = producer.push_slice(processed);
                    if written < processed.len() {
                        in_diag
                            .dropped_input_frames
                            .fetch_add((processed.len() - written) as u64, Ordering::Relaxed);
                    }
                });
            }),
            Box::new(move |msg| {
                let _ = fault_tx.try_send(msg);
            }),
        )?;

        Ok(vec![input, output])
    };
    spawn_owner(StreamKind::Duplex, plan.drain_interval, open, Box::new(DuplexWork), on_fault)
}

/// Open capture only, feeding `session` (already started).
pub fn spawn_capture(
    plan: StreamPlan,
    session: RecordingSession,
    on_fault: FaultHook,
) -> Result<ActiveStream> {
    let (producer, consumer) = create_sample_ring(CAPTURE_RING_CAPACITY);
    let diagnostics = Arc::clone(&plan.diagnostics);
    let work = CaptureWork {
        consumer,
        session,
        scratch: vec![0.0; plan.chunk_size.max(1) * 4],
        diagnostics: Arc::clone(&diagnostics),
    };
    let open_plan = plan.clone();
    let open = move |fault_tx: Sender<String>| -> Result<Vec<StreamGuard>> {
        let mut producer = producer;
        let input = open_plan.backend.open_input(
            &open_plan.input,
            Box::new(move |data: &[f32]| {
                let written = producer.push_slice(data);
                if written < data.len() {
                    diagnostics
                        .dropped_input_frames
                        .fetch_add((data.len() - written) as u64, Ordering::Relaxed);
                }
            }),
            Box::new(move |msg| {
                let _ = fault_tx.try_send(msg);
            }),
        )?;
        Ok(vec![input])
    };
    spawn_owner(StreamKind::Capture, plan.drain_interval, open, Box::new(work), on_fault)
}

fn spawn_owner<O>(
    kind: StreamKind,
    drain_interval: Duration,
    open: O,
    mut work: Box<dyn OwnerWork>,
    on_fault: FaultHook,
) -> Result<ActiveStream>
where
    O: FnOnce(Sender<String>) -> Result<Vec<StreamGuard>> + Send + 'static,
{
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let (fault_tx, fault_rx) = bounded::<String>(4);
    let (open_tx, open_rx) = bounded::<Result<()>>(1);
    let interval = drain_interval.max(Duration::from_millis(1));

    let handle = thread::Builder::new()
        .name(format!("voxshift-{kind:?}").to_ascii_lowercase())
        .spawn(move || {
            // Streams are opened and dropped on this thread only.
            let guards = match open(fault_tx) {
                Ok(g) => {
                    let _ = open_tx.send(Ok(()));
                    g
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    return None;
                }
            };

            let fault = loop {
                let event = select! {
                    recv(stop_rx) -> _ => Some(None),
                    recv(fault_rx) -> msg => Some(Some(msg.unwrap_or_else(|_| "device stream closed".into()))),
                    default(interval) => None,
                };
                match event {
                    Some(end) => break end,
                    None => work.drain(),
                }
            };

            drop(guards);
            debug!(?kind, "device streams closed");
            let recording = work.finish();
            if let Some(msg) = fault {
                error!(?kind, error = %msg, "device fault, stream stopped");
                on_fault(msg);
            }
            recording
        })
        .map_err(|e| VoxError::Other(anyhow::anyhow!("failed to spawn stream thread: {e}")))?;

    match open_rx.recv() {
        Ok(Ok(())) => {
            info!(?kind, "stream running");
            Ok(ActiveStream {
                kind,
                stop_tx,
                handle: Some(handle),
            })
        }
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(VoxError::Other(anyhow::anyhow!(
                "stream owner thread died unexpectedly"
            )))
        }
    }
}
