//! Device boundary.
//!
//! # Design constraints
//!
//! Stream callbacks run on an OS audio thread at elevated priority. They
//! **must not**:
//! - Allocate heap memory on the steady-state path
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! Callbacks handed to an [`AudioBackend`] therefore only touch SPSC ring
//! buffers, atomics and pre-sized scratch vectors.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). [`StreamGuard`] inherits that restriction: it is opened and
//! dropped on the same owner thread (see `engine::duplex`). Dropping the
//! guard closes the stream; no callback runs after the drop returns.

pub mod cpal_backend;
pub mod playback;
pub mod resample;
pub mod stub;

use std::any::Any;

use crate::error::Result;

pub use cpal_backend::CpalBackend;
pub use playback::{play_blocking, PlaybackEnd};
pub use stub::SyntheticBackend;

/// Receives mono `f32` input frames.
pub type InputCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;
/// Fills an interleaved output buffer; the second argument is its channel count.
pub type OutputCallback = Box<dyn FnMut(&mut [f32], u16) + Send + 'static>;
/// Invoked with a description when the device reports a stream error.
pub type FaultCallback = Box<dyn FnMut(String) + Send + 'static>;

/// Requested stream format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub sample_rate: u32,
    pub channels: u16,
    /// Device name to prefer; the host default is used when absent or not found.
    pub preferred_device: Option<String>,
}

impl StreamSettings {
    pub fn mono_input(sample_rate: u32, preferred_device: Option<String>) -> Self {
        Self {
            sample_rate,
            channels: 1,
            preferred_device,
        }
    }
}

/// An open device stream. Not `Send`; see the module docs.
pub struct StreamGuard {
    /// Rate the stream actually runs at.
    pub sample_rate: u32,
    /// Channel count the callback sees (always 1 for input).
    pub channels: u16,
    _keepalive: Box<dyn Any>,
}

impl StreamGuard {
    pub fn new(sample_rate: u32, channels: u16, keepalive: impl Any) -> Self {
        Self {
            sample_rate,
            channels,
            _keepalive: Box::new(keepalive),
        }
    }
}

impl std::fmt::Debug for StreamGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamGuard")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

/// Opens capture and playback streams.
///
/// Implementations must run the stream at exactly the requested sample rate
/// or fail with `VoxError::DeviceUnavailable`; the engine never negotiates
/// rates between devices.
pub trait AudioBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Open a capture stream delivering mono samples to `on_data`.
    ///
    /// # Errors
    /// `VoxError::DeviceUnavailable` when no matching device/config exists.
    fn open_input(
        &self,
        settings: &StreamSettings,
        on_data: InputCallback,
        on_fault: FaultCallback,
    ) -> Result<StreamGuard>;

    /// Open a playback stream pulling interleaved samples from `on_data`.
    ///
    /// # Errors
    /// `VoxError::DeviceUnavailable` when no matching device/config exists.
    fn open_output(
        &self,
        settings: &StreamSettings,
        on_data: OutputCallback,
        on_fault: FaultCallback,
    ) -> Result<StreamGuard>;
}

/// Copy `mono` into every channel of the interleaved `out`. Frames beyond
/// `mono.len()` are zeroed.
pub fn write_to_channels(mono: &[f32], out: &mut [f32], channels: u16) {
    let ch = usize::from(channels.max(1));
    for (f, frame) in out.chunks_mut(ch).enumerate() {
        let v = mono.get(f).copied().unwrap_or(0.0);
        frame.fill(v);
    }
}
