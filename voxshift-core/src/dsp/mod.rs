//! Signal-processing stages: pitch shift, formant warp, ring modulation and
//! the ordered chain that combines them.
//!
//! Every stage keeps its FFT plans and scratch vectors between calls so the
//! real-time path only allocates when a chunk is larger than anything seen
//! before.

pub mod chain;
pub mod formant;
pub mod pitch;
pub mod ring_mod;
pub mod spectral_resample;
pub mod stretch;

pub use chain::EffectChain;
pub use formant::FormantShifter;
pub use pitch::{DurationPolicy, PitchShifter};
pub use ring_mod::RingBlend;

/// Periodic Hann window of length `n`.
pub(crate) fn build_hann_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}

/// Wrap a phase value into `[-PI, PI)`.
pub(crate) fn wrap_phase(phase: f32) -> f32 {
    use std::f32::consts::PI;
    (phase + PI).rem_euclid(2.0 * PI) - PI
}

#[cfg(test)]
pub(crate) mod test_signals {
    use rustfft::{num_complex::Complex, FftPlanner};

    pub fn sine(freq: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    /// Frequency (Hz) of the strongest positive-frequency FFT bin.
    pub fn dominant_frequency(samples: &[f32], sample_rate: u32) -> f32 {
        let n = samples.len();
        let mut buf: Vec<Complex<f32>> = samples.iter().map(|&s| Complex::new(s, 0.0)).collect();
        FftPlanner::<f32>::new().plan_fft_forward(n).process(&mut buf);
        let (bin, _) = buf[1..n / 2]
            .iter()
            .enumerate()
            .map(|(i, c)| (i + 1, c.norm_sqr()))
            .fold((0, 0.0f32), |best, cur| if cur.1 > best.1 { cur } else { best });
        bin as f32 * sample_rate as f32 / n as f32
    }
}
