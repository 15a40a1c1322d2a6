//! Ring modulator.
//!
//! ```text
//! t_i   = (start + i) / sample_rate
//! c_i   = sin(2π · carrier_hz · t_i)
//! out_i = in_i · c_i · wet + in_i · dry
//! ```
//!
//! Stateless and sample-parallel. The carrier phase is derived from the
//! absolute stream index `start + i`, never from a chunk-local index, so
//! consecutive chunks join without a phase reset.

use serde::{Deserialize, Serialize};

use crate::buffering::SampleBuffer;

/// Weights of the modulated and dry components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RingBlend {
    pub wet: f32,
    pub dry: f32,
}

impl RingBlend {
    /// Even mix, the classic robot tone.
    pub const BALANCED: RingBlend = RingBlend { wet: 0.5, dry: 0.5 };
    /// Carrier-heavy mix.
    pub const HARSH: RingBlend = RingBlend { wet: 0.7, dry: 0.3 };
}

impl Default for RingBlend {
    fn default() -> Self {
        Self::BALANCED
    }
}

/// Modulate a whole buffer, carrier phase starting at frame 0 in every
/// channel.
pub fn modulate(
    buffer: &SampleBuffer,
    sample_rate: u32,
    carrier_hz: f32,
    blend: RingBlend,
) -> SampleBuffer {
    buffer.map_channels(|plane, _| modulate_at(plane, sample_rate, carrier_hz, blend, 0))
}

/// Modulate `samples` in place; `start` is the absolute index of `samples[0]`
/// within the stream.
pub fn modulate_at(
    samples: &mut [f32],
    sample_rate: u32,
    carrier_hz: f32,
    blend: RingBlend,
    start: u64,
) {
    if sample_rate == 0 {
        return;
    }
    let cycles_per_sample = carrier_hz as f64 / sample_rate as f64;
    for (i, s) in samples.iter_mut().enumerate() {
        let cycles = ((start + i as u64) as f64 * cycles_per_sample).fract();
        let carrier = (std::f64::consts::TAU * cycles).sin() as f32;
        *s = *s * carrier * blend.wet + *s * blend.dry;
    }
}
