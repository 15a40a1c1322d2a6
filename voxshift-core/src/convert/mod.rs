//! Conversion gateway abstraction.
//!
//! The `ConversionGateway` trait decouples the engine from how a recording is
//! turned into a converted buffer: locally through the effect chain, or by a
//! remote speech-to-speech service. The engine only ever sees
//! `VoxError::ConversionFailed(reason)` from a gateway, never transport detail.

pub mod local;

#[cfg(feature = "remote")]
pub mod remote;

pub use local::LocalGateway;

#[cfg(feature = "remote")]
pub use remote::{RemoteGateway, RemoteGatewayConfig};

use serde::{Deserialize, Serialize};

use crate::buffering::SampleBuffer;
use crate::error::Result;
use crate::profile::VoiceProfile;

/// What the converted voice should sound like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum VoiceSelector {
    /// An explicit effect profile (slider values or an edited preset).
    Profile(VoiceProfile),
    /// A built-in preset by name.
    Preset { name: String },
    /// A remote target voice.
    #[serde(rename_all = "camelCase")]
    Voice {
        voice_id: String,
        #[serde(default)]
        model_id: Option<String>,
    },
}

impl VoiceSelector {
    /// Short label used in file names and events.
    pub fn label(&self) -> String {
        match self {
            VoiceSelector::Profile(p) => p.name.clone(),
            VoiceSelector::Preset { name } => name.clone(),
            VoiceSelector::Voice { voice_id, .. } => voice_id.clone(),
        }
    }
}

/// Contract for conversion backends.
///
/// Called from the background work context only; implementations may block,
/// allocate and perform I/O.
pub trait ConversionGateway: Send + Sync + 'static {
    /// Backend name for logs and events.
    fn name(&self) -> &'static str;

    /// Convert `buffer` according to `selector`.
    ///
    /// # Errors
    /// `VoxError::EmptyBuffer` for a zero-length input, otherwise
    /// `VoxError::ConversionFailed` for every backend failure.
    fn convert(&self, buffer: &SampleBuffer, selector: &VoiceSelector) -> Result<SampleBuffer>;
}
