//! Band-limited resampling to an exact sample count.
//!
//! The whole input is transformed, its spectrum truncated or zero-extended to
//! the target length, and transformed back. Unlike the streaming rubato
//! converter this hits an arbitrary output length exactly, which is what the
//! pitch shifter needs.

use std::collections::HashMap;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftDirection, FftPlanner};

/// Plans keyed by length and direction. `FftPlanner` is `!Send`; the plans
/// it returns are not.
#[derive(Default)]
pub(crate) struct FftCache {
    plans: HashMap<(usize, bool), Arc<dyn Fft<f32>>>,
}

impl FftCache {
    pub(crate) fn plan(&mut self, len: usize, direction: FftDirection) -> Arc<dyn Fft<f32>> {
        let forward = direction == FftDirection::Forward;
        Arc::clone(
            self.plans
                .entry((len, forward))
                .or_insert_with(|| FftPlanner::new().plan_fft(len, direction)),
        )
    }
}

pub struct SpectralResampler {
    plans: FftCache,
    spectrum: Vec<Complex<f32>>,
    resized: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl SpectralResampler {
    pub fn new() -> Self {
        Self {
            plans: FftCache::default(),
            spectrum: Vec::new(),
            resized: Vec::new(),
            scratch: Vec::new(),
        }
    }

    /// Resample `input` to exactly `target_len` samples, writing into `out`.
    ///
    /// Empty input or a zero target leaves `out` empty.
    pub fn resample_into(&mut self, input: &[f32], target_len: usize, out: &mut Vec<f32>) {
        out.clear();
        let n = input.len();
        let m = target_len;
        if n == 0 || m == 0 {
            return;
        }
        if n == m {
            out.extend_from_slice(input);
            return;
        }

        self.spectrum.clear();
        self.spectrum
            .extend(input.iter().map(|&s| Complex::new(s, 0.0)));
        let forward = self.plans.plan(n, FftDirection::Forward);
        run_fft(&forward, &mut self.spectrum, &mut self.scratch);

        self.resized.clear();
        self.resized.resize(m, Complex::new(0.0, 0.0));

        // Bins strictly below the shared Nyquist are copied from both halves.
        let shared = n.min(m);
        let half = (shared - 1) / 2;
        self.resized[0] = self.spectrum[0];
        for k in 1..=half {
            self.resized[k] = self.spectrum[k];
            self.resized[m - k] = self.spectrum[n - k];
        }
        if shared % 2 == 0 {
            let nyq = shared / 2;
            if m > n {
                let split = self.spectrum[nyq] * 0.5;
                self.resized[nyq] = split;
                self.resized[m - nyq] = split;
            } else {
                self.resized[nyq] = self.spectrum[nyq] + self.spectrum[n - nyq];
            }
        }

        let inverse = self.plans.plan(m, FftDirection::Inverse);
        run_fft(&inverse, &mut self.resized, &mut self.scratch);

        let scale = 1.0 / n as f32;
        out.extend(self.resized.iter().map(|c| c.re * scale));
    }
}

impl Default for SpectralResampler {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn run_fft(
    fft: &Arc<dyn Fft<f32>>,
    buffer: &mut [Complex<f32>],
    scratch: &mut Vec<Complex<f32>>,
) {
    let needed = fft.get_inplace_scratch_len();
    if scratch.len() < needed {
        scratch.resize(needed, Complex::new(0.0, 0.0));
    }
    fft.process_with_scratch(buffer, &mut scratch[..needed]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_signals::{dominant_frequency, sine};

    #[test]
    fn hits_exact_target_length() {
        let mut rs = SpectralResampler::new();
        let input = sine(440.0, 44_100, 1000, 0.5);
        let mut out = Vec::new();
        for target in [1usize, 2, 499, 500, 1001, 1500, 4000] {
            rs.resample_into(&input, target, &mut out);
            assert_eq!(out.len(), target);
            assert!(out.iter().all(|s| s.is_finite()));
        }
    }

    #[test]
    fn degenerate_lengths_yield_empty_output() {
        let mut rs = SpectralResampler::new();
        let mut out = vec![1.0];
        rs.resample_into(&[], 10, &mut out);
        assert!(out.is_empty());
        rs.resample_into(&[0.1, 0.2], 0, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn halving_length_doubles_frequency_per_sample() {
        let mut rs = SpectralResampler::new();
        let input = sine(441.0, 44_100, 8192, 0.5);
        let mut out = Vec::new();
        rs.resample_into(&input, 4096, &mut out);
        // Interpreted at the original rate the tone is an octave up.
        let f = dominant_frequency(&out, 44_100);
        assert!((f - 882.0).abs() < 15.0, "dominant {f}");
    }

    #[test]
    fn preserves_amplitude_of_in_band_tone() {
        let mut rs = SpectralResampler::new();
        // Exactly 10 cycles so the tone sits on a bin.
        let input: Vec<f32> = (0..1000)
            .map(|i| 0.6 * (2.0 * std::f32::consts::PI * 10.0 * i as f32 / 1000.0).cos())
            .collect();
        let mut out = Vec::new();
        rs.resample_into(&input, 2000, &mut out);
        let peak = out.iter().fold(0.0f32, |a, s| a.max(s.abs()));
        assert!((peak - 0.6).abs() < 1e-3, "peak {peak}");
    }
}
