//! `LocalGateway`: offline conversion through the effect chain.

use parking_lot::Mutex;
use tracing::debug;

use crate::buffering::SampleBuffer;
use crate::convert::{ConversionGateway, VoiceSelector};
use crate::dsp::{DurationPolicy, EffectChain};
use crate::error::{Result, VoxError};
use crate::profile::{preset, VoiceProfile};

/// Deterministic, network-free gateway. Uses the `Restretch` duration policy
/// since whole recordings are not latency bound.
pub struct LocalGateway {
    chain: Mutex<EffectChain>,
}

impl LocalGateway {
    pub fn new() -> Self {
        Self::with_policy(DurationPolicy::Restretch)
    }

    pub fn with_policy(policy: DurationPolicy) -> Self {
        Self {
            chain: Mutex::new(EffectChain::new(policy)),
        }
    }

    fn resolve(selector: &VoiceSelector) -> Result<VoiceProfile> {
        match selector {
            VoiceSelector::Profile(p) => Ok(p.clone()),
            VoiceSelector::Preset { name } => preset(name),
            VoiceSelector::Voice { voice_id, .. } => Err(VoxError::ConversionFailed(format!(
                "remote voice '{voice_id}' is not available to the local converter"
            ))),
        }
    }
}

impl Default for LocalGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionGateway for LocalGateway {
    fn name(&self) -> &'static str {
        "local"
    }

    fn convert(&self, buffer: &SampleBuffer, selector: &VoiceSelector) -> Result<SampleBuffer> {
        if buffer.is_empty() {
            return Err(VoxError::EmptyBuffer);
        }
        Self::resolve(selector)
            .and_then(|profile| {
                debug!(
                    profile = %profile.name,
                    samples = buffer.len(),
                    sample_rate = buffer.sample_rate(),
                    "local conversion"
                );
                self.chain.lock().apply(buffer, &profile)
            })
            .map_err(|e| match e {
                VoxError::ConversionFailed(_) => e,
                other => VoxError::ConversionFailed(other.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> SampleBuffer {
        let samples = (0..8192)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * 200.0 / 44_100.0).sin() * 0.6)
            .collect();
        SampleBuffer::new(samples, 44_100).unwrap()
    }

    #[test]
    fn converts_with_preset_and_keeps_length() {
        let gw = LocalGateway::new();
        let input = recording();
        let out = gw
            .convert(&input, &VoiceSelector::Preset { name: "chipmunk".into() })
            .unwrap();
        assert_eq!(out.len(), input.len());
        assert_ne!(out, input);
    }

    #[test]
    fn empty_input_is_reported() {
        let gw = LocalGateway::new();
        let err = gw
            .convert(&SampleBuffer::empty(44_100), &VoiceSelector::Preset { name: "deep".into() })
            .unwrap_err();
        assert!(matches!(err, VoxError::EmptyBuffer));
    }

    #[test]
    fn failures_surface_as_conversion_failed() {
        let gw = LocalGateway::new();
        let unknown = gw.convert(&recording(), &VoiceSelector::Preset { name: "banshee".into() });
        assert!(matches!(unknown, Err(VoxError::ConversionFailed(_))));

        let remote = gw.convert(
            &recording(),
            &VoiceSelector::Voice {
                voice_id: "21m00Tcm4TlvDq8ikWAM".into(),
                model_id: None,
            },
        );
        assert!(matches!(remote, Err(VoxError::ConversionFailed(_))));
    }
}
