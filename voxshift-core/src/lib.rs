//! # voxshift-core
//!
//! Reusable voice transformation engine SDK.
//!
//! ## Architecture
//!
//! ```text
//! real-time path
//!   Microphone → input callback → ChunkAssembler → EffectChain → SPSC ring
//!                                       ▲                           │
//!                                  ProfileSlot                output callback → speakers
//!
//! offline path
//!   Microphone → capture ring → RecordingSession → SampleBuffer
//!                                                     │
//!                                 BackgroundWorker ◄──┘
//!                                     │
//!                         ConversionGateway::convert (local / remote)
//!                                     │
//!                        broadcast::Sender<ConversionEvent>, playback, WAV
//! ```
//!
//! Audio callbacks never lock, never perform I/O, and reuse their buffers.
//! Everything that may block runs on the background worker.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod convert;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod profile;
pub mod wav;

// Convenience re-exports for downstream crates
pub use audio::{AudioBackend, CpalBackend, PlaybackEnd, SyntheticBackend};
pub use buffering::SampleBuffer;
pub use convert::{ConversionGateway, LocalGateway, VoiceSelector};
pub use dsp::{DurationPolicy, EffectChain};
pub use engine::{
    ConversionReport, DiagnosticsSnapshot, EngineConfig, TaskHandle, TaskOutcome, VoxEngine,
};
pub use error::{Result, VoxError};
pub use ipc::events::{ConversionEvent, EngineStatusEvent, StreamState};
pub use profile::{preset, VoiceProfile, PRESET_NAMES};

#[cfg(feature = "remote")]
pub use convert::{RemoteGateway, RemoteGatewayConfig};
