use thiserror::Error;

use crate::ipc::events::StreamState;

/// All errors produced by voxshift-core.
#[derive(Debug, Error)]
pub enum VoxError {
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("cannot {requested} while engine is {current:?}")]
    StateConflict {
        requested: &'static str,
        current: StreamState,
    },

    #[error("chunk processing fault: {0}")]
    ChunkProcessingFault(String),

    #[error("conversion failed: {0}")]
    ConversionFailed(String),

    #[error("operation requires a non-empty buffer")]
    EmptyBuffer,

    #[error("invalid sample buffer: {0}")]
    InvalidBuffer(String),

    #[error("invalid voice profile: {0}")]
    InvalidProfile(String),

    #[error("unknown voice profile: {0}")]
    UnknownProfile(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VoxError {
    /// Shorthand used by the control API when a start/stop request does not
    /// match the current state.
    pub fn conflict(requested: &'static str, current: StreamState) -> Self {
        Self::StateConflict { requested, current }
    }
}

pub type Result<T> = std::result::Result<T, VoxError>;
