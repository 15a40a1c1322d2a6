//! Short-time spectral-envelope warp.
//!
//! ## Algorithm
//!
//! ```text
//! zero-pad to a multiple of the window
//! for each frame at hop offsets:
//!     Hann → FFT → |X|, ∠X
//!     |Y[k]| = lerp(|X|, k / factor)   (clamped to the last bin)
//!     Y[k]   = |Y[k]| · e^{i∠X[k]}      (original phase kept)
//!     IFFT → Hann → overlap-add
//! trim to the input length, peak-normalise to 0.9
//! ```
//!
//! `factor > 1` moves formants up, `factor < 1` moves them down. A factor of
//! exactly 1.0 still runs the full analysis/resynthesis.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::build_hann_window;
use super::spectral_resample::run_fft;
use crate::buffering::SampleBuffer;
use crate::error::{Result, VoxError};

pub const FORMANT_WINDOW: usize = 2048;
pub const FORMANT_HOP: usize = 512;
/// Peak level after resynthesis.
pub const NORMALIZED_PEAK: f32 = 0.9;

pub struct FormantShifter {
    window_size: usize,
    hop: usize,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    frame: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    padded: Vec<f32>,
    accum: Vec<f32>,
}

impl FormantShifter {
    pub fn new() -> Self {
        Self::with_window(FORMANT_WINDOW, FORMANT_HOP)
    }

    /// Custom analysis geometry. `hop` is clamped to `1..=window_size`.
    pub fn with_window(window_size: usize, hop: usize) -> Self {
        let window_size = window_size.max(4);
        let mut planner = FftPlanner::<f32>::new();
        Self {
            window_size,
            hop: hop.clamp(1, window_size),
            window: build_hann_window(window_size),
            forward: planner.plan_fft_forward(window_size),
            inverse: planner.plan_fft_inverse(window_size),
            frame: vec![Complex::new(0.0, 0.0); window_size],
            magnitudes: vec![0.0; window_size / 2 + 1],
            scratch: Vec::new(),
            padded: Vec::new(),
            accum: Vec::new(),
        }
    }

    /// Warp the spectral envelope of `buffer` by `factor`.
    ///
    /// # Errors
    /// `VoxError::InvalidProfile` when `factor` is not a positive finite number.
    pub fn shift(&mut self, buffer: &SampleBuffer, factor: f32) -> Result<SampleBuffer> {
        buffer.try_map_channels(|plane, _| self.shift_in_place(plane, factor))
    }

    /// In-place variant for the chunk path. Length is preserved.
    pub fn shift_in_place(&mut self, samples: &mut Vec<f32>, factor: f32) -> Result<()> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(VoxError::InvalidProfile(format!(
                "formant factor must be positive, got {factor}"
            )));
        }
        let len = samples.len();
        if len == 0 {
            return Ok(());
        }

        let n = self.window_size;
        let bins = n / 2 + 1;
        let last_bin = (bins - 1) as f32;
        let padded_len = len.div_ceil(n) * n;

        self.padded.clear();
        self.padded.extend_from_slice(samples);
        self.padded.resize(padded_len, 0.0);
        self.accum.clear();
        self.accum.resize(padded_len, 0.0);

        let scale = 1.0 / n as f32;
        let mut start = 0;
        while start + n <= padded_len {
            for (i, slot) in self.frame.iter_mut().enumerate() {
                *slot = Complex::new(self.padded[start + i] * self.window[i], 0.0);
            }
            run_fft(&self.forward, &mut self.frame, &mut self.scratch);

            for k in 0..bins {
                self.magnitudes[k] = self.frame[k].norm();
            }
            for k in 0..bins {
                let src = (k as f32 / factor).min(last_bin);
                let lo = src.floor() as usize;
                let hi = (lo + 1).min(bins - 1);
                let frac = src - lo as f32;
                let mag = self.magnitudes[lo] * (1.0 - frac) + self.magnitudes[hi] * frac;
                let phase = self.frame[k].arg();
                self.frame[k] = Complex::from_polar(mag, phase);
            }
            for k in 1..n / 2 {
                self.frame[n - k] = self.frame[k].conj();
            }
            run_fft(&self.inverse, &mut self.frame, &mut self.scratch);

            for i in 0..n {
                self.accum[start + i] += self.frame[i].re * scale * self.window[i];
            }
            start += self.hop;
        }

        samples.clear();
        samples.extend_from_slice(&self.accum[..len]);
        normalize_peak(samples, NORMALIZED_PEAK);
        Ok(())
    }
}

impl Default for FormantShifter {
    fn default() -> Self {
        Self::new()
    }
}

/// Scale so the largest absolute sample equals `target`. Silence is left alone.
pub fn normalize_peak(samples: &mut [f32], target: f32) {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak > 0.0 {
        let gain = target / peak;
        for s in samples.iter_mut() {
            *s *= gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_signals::sine;

    #[test]
    fn preserves_length_for_unaligned_input() {
        let mut fs = FormantShifter::new();
        for len in [1usize, 100, 2047, 2048, 2049, 5000] {
            let input = SampleBuffer::new(sine(220.0, 44_100, len, 0.5), 44_100).unwrap();
            let out = fs.shift(&input, 1.2).unwrap();
            assert_eq!(out.len(), len);
        }
    }

    #[test]
    fn unit_factor_is_near_identity_on_sine() {
        let mut fs = FormantShifter::new();
        let len = 8 * FORMANT_WINDOW;
        let input = SampleBuffer::new(sine(440.0, 44_100, len, 0.9), 44_100).unwrap();
        let out = fs.shift(&input, 1.0).unwrap();
        assert_eq!(out.len(), len);

        // Fully overlapped region only; the first and last frames are tapered.
        let worst = input.samples()[FORMANT_WINDOW..len - FORMANT_WINDOW]
            .iter()
            .zip(&out.samples()[FORMANT_WINDOW..len - FORMANT_WINDOW])
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(worst < 5e-3, "max per-sample error {worst}");
    }

    #[test]
    fn output_is_peak_normalized() {
        let mut fs = FormantShifter::new();
        let input = SampleBuffer::new(sine(300.0, 44_100, 6000, 0.2), 44_100).unwrap();
        let out = fs.shift(&input, 0.8).unwrap();
        assert!((out.peak() - NORMALIZED_PEAK).abs() < 1e-5);
    }

    #[test]
    fn silence_stays_silent() {
        let mut fs = FormantShifter::new();
        let input = SampleBuffer::new(vec![0.0; 3000], 44_100).unwrap();
        let out = fs.shift(&input, 1.5).unwrap();
        assert!(out.samples().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn rejects_non_positive_factor() {
        let mut fs = FormantShifter::new();
        let input = SampleBuffer::new(vec![0.1; 16], 44_100).unwrap();
        assert!(matches!(fs.shift(&input, 0.0), Err(VoxError::InvalidProfile(_))));
        assert!(fs.shift(&input, f32::NAN).is_err());
    }

    #[test]
    fn raising_factor_moves_energy_up() {
        let mut fs = FormantShifter::new();
        let sr = 44_100;
        let input = SampleBuffer::new(sine(500.0, sr, 4 * FORMANT_WINDOW, 0.5), sr).unwrap();
        let out = fs.shift(&input, 2.0).unwrap();
        let f = crate::dsp::test_signals::dominant_frequency(out.samples(), sr);
        assert!(f > 700.0, "dominant {f}");
    }
}
