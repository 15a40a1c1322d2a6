//! Phase-vocoder time stretch.
//!
//! Changes duration without changing pitch: analysis frames are read at a hop
//! of `synthesis_hop * len / target`, each bin's instantaneous frequency is
//! estimated from the phase advance between frames, and the synthesis phase is
//! accumulated at the synthesis hop. Output is overlap-added with a squared
//! Hann normalisation.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::spectral_resample::run_fft;
use super::{build_hann_window, wrap_phase};

/// Analysis/synthesis frame length.
pub const STRETCH_WINDOW: usize = 1024;
/// Synthesis hop (75 % overlap).
pub const STRETCH_HOP: usize = STRETCH_WINDOW / 4;

pub struct TimeStretcher {
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    frame: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    prev_phase: Vec<f32>,
    synth_phase: Vec<f32>,
    accum: Vec<f32>,
    norm: Vec<f32>,
}

impl TimeStretcher {
    pub fn new() -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let bins = STRETCH_WINDOW / 2 + 1;
        Self {
            window: build_hann_window(STRETCH_WINDOW),
            forward: planner.plan_fft_forward(STRETCH_WINDOW),
            inverse: planner.plan_fft_inverse(STRETCH_WINDOW),
            frame: vec![Complex::new(0.0, 0.0); STRETCH_WINDOW],
            scratch: Vec::new(),
            prev_phase: vec![0.0; bins],
            synth_phase: vec![0.0; bins],
            accum: Vec::new(),
            norm: Vec::new(),
        }
    }

    /// Stretch `input` to exactly `target_len` samples, writing into `out`.
    pub fn stretch_into(&mut self, input: &[f32], target_len: usize, out: &mut Vec<f32>) {
        out.clear();
        if target_len == 0 {
            return;
        }
        if input.is_empty() {
            out.resize(target_len, 0.0);
            return;
        }
        if input.len() == target_len {
            out.extend_from_slice(input);
            return;
        }

        let n = STRETCH_WINDOW;
        let hs = STRETCH_HOP;
        let bins = n / 2 + 1;
        let rate = input.len() as f64 / target_len as f64;
        let frames = target_len.div_ceil(hs) + 1;

        self.accum.clear();
        self.accum.resize(frames * hs + n, 0.0);
        self.norm.clear();
        self.norm.resize(frames * hs + n, 0.0);

        let mut prev_pos: Option<usize> = None;
        for j in 0..frames {
            let pos = (j as f64 * hs as f64 * rate).round() as usize;
            for (i, slot) in self.frame.iter_mut().enumerate() {
                let s = input.get(pos + i).copied().unwrap_or(0.0);
                *slot = Complex::new(s * self.window[i], 0.0);
            }
            run_fft(&self.forward, &mut self.frame, &mut self.scratch);

            let analysis_hop = match prev_pos {
                Some(p) => (pos - p).max(1) as f32,
                None => (hs as f64 * rate).max(1.0) as f32,
            };
            for k in 0..bins {
                let mag = self.frame[k].norm();
                let phase = self.frame[k].arg();
                if j == 0 {
                    self.synth_phase[k] = phase;
                } else {
                    let omega = 2.0 * PI * k as f32 / n as f32;
                    let deviation =
                        wrap_phase(phase - self.prev_phase[k] - omega * analysis_hop);
                    let inst = omega + deviation / analysis_hop;
                    self.synth_phase[k] = wrap_phase(self.synth_phase[k] + inst * hs as f32);
                }
                self.prev_phase[k] = phase;
                self.frame[k] = Complex::from_polar(mag, self.synth_phase[k]);
            }
            for k in 1..n / 2 {
                self.frame[n - k] = self.frame[k].conj();
            }
            run_fft(&self.inverse, &mut self.frame, &mut self.scratch);

            let base = j * hs;
            let scale = 1.0 / n as f32;
            for i in 0..n {
                let w = self.window[i];
                self.accum[base + i] += self.frame[i].re * scale * w;
                self.norm[base + i] += w * w;
            }
            prev_pos = Some(pos);
        }

        out.extend((0..target_len).map(|t| {
            let w = self.norm[t];
            if w > 1e-3 {
                self.accum[t] / w
            } else {
                0.0
            }
        }));
    }
}

impl Default for TimeStretcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_signals::{dominant_frequency, sine};

    #[test]
    fn output_has_requested_length() {
        let mut ts = TimeStretcher::new();
        let input = sine(300.0, 16_000, 3000, 0.5);
        let mut out = Vec::new();
        for target in [1usize, 1500, 3001, 6000] {
            ts.stretch_into(&input, target, &mut out);
            assert_eq!(out.len(), target);
            assert!(out.iter().all(|s| s.is_finite()));
        }
    }

    #[test]
    fn doubling_duration_keeps_pitch() {
        let mut ts = TimeStretcher::new();
        let input = sine(882.0, 44_100, 8192, 0.5);
        let mut out = Vec::new();
        ts.stretch_into(&input, 16_384, &mut out);
        let f = dominant_frequency(&out, 44_100);
        assert!((f - 882.0).abs() < 20.0, "dominant {f}");
    }

    #[test]
    fn empty_input_becomes_silence_of_target_length() {
        let mut ts = TimeStretcher::new();
        let mut out = Vec::new();
        ts.stretch_into(&[], 64, &mut out);
        assert_eq!(out, vec![0.0; 64]);
    }
}
