//! `SyntheticBackend`: a clock-driven stand-in for real devices.
//!
//! Every opened stream gets its own thread that invokes the callback once per
//! block, so the engine's state machine, ring buffers and owner threads run
//! exactly as they would against hardware. Input is generated from a signal
//! function of the absolute sample index; output is recorded for inspection.
//! Dropping the returned guard stops and joins the clock thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::audio::{
    AudioBackend, FaultCallback, InputCallback, OutputCallback, StreamGuard, StreamSettings,
};
use crate::error::{Result, VoxError};

type SignalFn = Arc<dyn Fn(u64) -> f32 + Send + Sync>;

/// Upper bound on recorded output samples.
const MAX_RECORDED_OUTPUT: usize = 1 << 22;

struct Shared {
    fail_open: AtomicBool,
    pending_fault: AtomicBool,
    input_callbacks: AtomicU64,
    output_callbacks: AtomicU64,
    open_streams: AtomicU64,
    output: Mutex<Vec<f32>>,
}

#[derive(Clone)]
pub struct SyntheticBackend {
    block_frames: usize,
    period: Duration,
    supported_rate: Option<u32>,
    signal: SignalFn,
    shared: Arc<Shared>,
}

impl SyntheticBackend {
    /// Silent input, 256-frame blocks every millisecond, any sample rate.
    pub fn new() -> Self {
        Self {
            block_frames: 256,
            period: Duration::from_millis(1),
            supported_rate: None,
            signal: Arc::new(|_| 0.0),
            shared: Arc::new(Shared {
                fail_open: AtomicBool::new(false),
                pending_fault: AtomicBool::new(false),
                input_callbacks: AtomicU64::new(0),
                output_callbacks: AtomicU64::new(0),
                open_streams: AtomicU64::new(0),
                output: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Input sample at absolute index `i` is `signal(i)`.
    pub fn with_signal(mut self, signal: impl Fn(u64) -> f32 + Send + Sync + 'static) -> Self {
        self.signal = Arc::new(signal);
        self
    }

    pub fn with_block(mut self, block_frames: usize, period: Duration) -> Self {
        self.block_frames = block_frames.max(1);
        self.period = period;
        self
    }

    /// Only this rate can be opened; others fail with `DeviceUnavailable`.
    pub fn with_supported_rate(mut self, sample_rate: u32) -> Self {
        self.supported_rate = Some(sample_rate);
        self
    }

    /// Make subsequent opens fail as if no device were present.
    pub fn set_fail_open(&self, fail: bool) {
        self.shared.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Report a device error on the next tick of the first running stream.
    pub fn inject_fault(&self) {
        self.shared.pending_fault.store(true, Ordering::SeqCst);
    }

    pub fn input_callbacks(&self) -> u64 {
        self.shared.input_callbacks.load(Ordering::SeqCst)
    }

    pub fn output_callbacks(&self) -> u64 {
        self.shared.output_callbacks.load(Ordering::SeqCst)
    }

    /// Streams currently open (guards not yet dropped).
    pub fn open_streams(&self) -> u64 {
        self.shared.open_streams.load(Ordering::SeqCst)
    }

    /// Take everything written to output streams so far (interleaved).
    pub fn take_output(&self) -> Vec<f32> {
        std::mem::take(&mut *self.shared.output.lock())
    }

    fn check_open(&self, settings: &StreamSettings) -> Result<()> {
        if self.shared.fail_open.load(Ordering::SeqCst) {
            return Err(VoxError::DeviceUnavailable("synthetic device offline".into()));
        }
        if let Some(rate) = self.supported_rate {
            if rate != settings.sample_rate {
                return Err(VoxError::DeviceUnavailable(format!(
                    "synthetic device runs at {rate} Hz, {} Hz requested",
                    settings.sample_rate
                )));
            }
        }
        Ok(())
    }

    fn spawn_clock(
        &self,
        label: &'static str,
        mut tick: impl FnMut() + Send + 'static,
        mut on_fault: FaultCallback,
    ) -> Result<ClockThread> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let shared = Arc::clone(&self.shared);
        let period = self.period;
        let handle = thread::Builder::new()
            .name(format!("voxshift-synthetic-{label}"))
            .spawn(move || {
                while !stop_flag.load(Ordering::SeqCst) {
                    if shared.pending_fault.swap(false, Ordering::SeqCst) {
                        on_fault(format!("synthetic {label} device lost"));
                    }
                    tick();
                    thread::sleep(period);
                }
            })
            .map_err(|e| VoxError::DeviceUnavailable(e.to_string()))?;
        self.shared.open_streams.fetch_add(1, Ordering::SeqCst);
        debug!(label, "synthetic stream opened");
        Ok(ClockThread {
            stop,
            handle: Some(handle),
            shared: Arc::clone(&self.shared),
        })
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open_input(
        &self,
        settings: &StreamSettings,
        mut on_data: InputCallback,
        on_fault: FaultCallback,
    ) -> Result<StreamGuard> {
        self.check_open(settings)?;
        let signal = Arc::clone(&self.signal);
        let shared = Arc::clone(&self.shared);
        let mut block = vec![0.0f32; self.block_frames];
        let mut position = 0u64;
        let clock = self.spawn_clock(
            "input",
            move || {
                for slot in block.iter_mut() {
                    *slot = signal(position);
                    position += 1;
                }
                on_data(&block);
                shared.input_callbacks.fetch_add(1, Ordering::SeqCst);
            },
            on_fault,
        )?;
        Ok(StreamGuard::new(settings.sample_rate, 1, clock))
    }

    fn open_output(
        &self,
        settings: &StreamSettings,
        mut on_data: OutputCallback,
        on_fault: FaultCallback,
    ) -> Result<StreamGuard> {
        self.check_open(settings)?;
        let channels = settings.channels.max(1);
        let shared = Arc::clone(&self.shared);
        let mut block = vec![0.0f32; self.block_frames * usize::from(channels)];
        let clock = self.spawn_clock(
            "output",
            move || {
                on_data(&mut block, channels);
                shared.output_callbacks.fetch_add(1, Ordering::SeqCst);
                let mut out = shared.output.lock();
                if out.len() + block.len() <= MAX_RECORDED_OUTPUT {
                    out.extend_from_slice(&block);
                }
            },
            on_fault,
        )?;
        Ok(StreamGuard::new(settings.sample_rate, channels, clock))
    }
}

struct ClockThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl Drop for ClockThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.shared.open_streams.fetch_sub(1, Ordering::SeqCst);
    }
}
