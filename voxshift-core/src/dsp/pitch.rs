//! Resampling pitch shifter.
//!
//! ## Algorithm
//!
//! 1. Resample the signal to `floor(len / ratio)` samples with
//!    `ratio = 2^(semitones / 12)`. Played back at the original rate this
//!    transposes pitch and changes duration.
//! 2. Restore the original sample count according to [`DurationPolicy`].
//!
//! `semitones == 0` returns the input untouched, and a computed target length
//! of zero also leaves the input unchanged.

use serde::{Deserialize, Serialize};

use super::spectral_resample::SpectralResampler;
use super::stretch::TimeStretcher;
use crate::buffering::SampleBuffer;

/// How the shifted signal is brought back to the input's sample count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DurationPolicy {
    /// Zero-pad or truncate to the original length. Cheap; introduces a phase
    /// discontinuity at every chunk boundary. Used on the real-time path.
    PadTrim,
    /// Phase-vocoder time stretch back to the original length. Smooth, more
    /// compute. Used for offline conversion.
    Restretch,
}

/// Frequency ratio for a signed semitone offset.
pub fn pitch_ratio(semitones: f32) -> f32 {
    2f32.powf(semitones / 12.0)
}

pub struct PitchShifter {
    resampler: SpectralResampler,
    stretcher: TimeStretcher,
    shifted: Vec<f32>,
}

impl PitchShifter {
    pub fn new() -> Self {
        Self {
            resampler: SpectralResampler::new(),
            stretcher: TimeStretcher::new(),
            shifted: Vec::new(),
        }
    }

    /// Transpose `buffer` by `semitones`, returning a buffer of the same length.
    pub fn shift(
        &mut self,
        buffer: &SampleBuffer,
        semitones: f32,
        policy: DurationPolicy,
    ) -> SampleBuffer {
        if semitones == 0.0 {
            return buffer.clone();
        }
        buffer.map_channels(|plane, _| self.shift_in_place(plane, semitones, policy))
    }

    /// In-place variant for the chunk path. Length is preserved.
    pub fn shift_in_place(&mut self, samples: &mut Vec<f32>, semitones: f32, policy: DurationPolicy) {
        if semitones == 0.0 || samples.is_empty() {
            return;
        }
        let len = samples.len();
        let ratio = pitch_ratio(semitones) as f64;
        let target = (len as f64 / ratio).floor() as usize;
        if target == 0 {
            return;
        }

        self.resampler
            .resample_into(samples, target, &mut self.shifted);

        match policy {
            DurationPolicy::PadTrim => {
                self.shifted.resize(len, 0.0);
                std::mem::swap(samples, &mut self.shifted);
            }
            DurationPolicy::Restretch => {
                self.stretcher.stretch_into(&self.shifted, len, samples);
            }
        }
    }
}

impl Default for PitchShifter {
    fn default() -> Self {
        Self::new()
    }
}
