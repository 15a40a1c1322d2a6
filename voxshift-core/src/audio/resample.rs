//! Whole-buffer sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! The engine runs at one configured rate, but a remote converter answers at
//! its own fixed rate, an output device may insist on 48 kHz, and WAV files
//! arrive at whatever rate they were written with. `RateConverter` bridges
//! that gap off the real-time path, where allocation is allowed.
//!
//! Equal source and target rates make the converter a passthrough; no rubato
//! session is created.
//!
//! ```ignore
//! let mut rc = RateConverter::new(44_100, 48_000, 1024)?;
//! let out = rc.convert_all(&samples)?; // delay compensated, exact length
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

use crate::error::{Result, VoxError};

/// Upper bound on silence blocks fed to flush the filter tail.
const MAX_FLUSH_BLOCKS: usize = 64;

/// Converts mono f32 audio between two fixed sample rates.
pub struct RateConverter {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    /// Input not yet handed to rubato; always shorter than `block` between calls.
    pending: Vec<f32>,
    /// Input frames rubato consumes per call.
    block: usize,
    /// Rubato output scratch, one channel.
    scratch: Vec<Vec<f32>>,
    source_rate: u32,
    target_rate: u32,
}

impl RateConverter {
    /// # Errors
    /// `VoxError::InvalidBuffer` for a zero rate or block, or when rubato
    /// rejects the ratio.
    pub fn new(source_rate: u32, target_rate: u32, block: usize) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 || block == 0 {
            return Err(VoxError::InvalidBuffer(format!(
                "cannot resample {source_rate} Hz -> {target_rate} Hz in blocks of {block}"
            )));
        }
        let resampler = if source_rate == target_rate {
            None
        } else {
            let ratio = target_rate as f64 / source_rate as f64;
            let r = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, block, 1)
                .map_err(|e| VoxError::InvalidBuffer(format!("resampler init: {e}")))?;
            debug!(source_rate, target_rate, block, delay = r.output_delay(), "resampler ready");
            Some(r)
        };
        let scratch = match &resampler {
            Some(r) => vec![vec![0.0; r.output_frames_max()]],
            None => Vec::new(),
        };
        Ok(Self {
            resampler,
            pending: Vec::new(),
            block,
            scratch,
            source_rate,
            target_rate,
        })
    }

    /// Returns `true` when source and target rates match.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Feed `samples`, appending every complete block's output to `out`.
    /// A partial trailing block stays pending for the next call.
    ///
    /// # Errors
    /// `VoxError::InvalidBuffer` when rubato fails on a block. Pending input
    /// is discarded so the converter can be reused.
    pub fn feed(&mut self, samples: &[f32], out: &mut Vec<f32>) -> Result<()> {
        let Some(resampler) = self.resampler.as_mut() else {
            out.extend_from_slice(samples);
            return Ok(());
        };
        self.pending.extend_from_slice(samples);

        let mut offset = 0;
        while self.pending.len() - offset >= self.block {
            let block = &self.pending[offset..offset + self.block];
            match resampler.process_into_buffer(&[block], &mut self.scratch, None) {
                Ok((_, produced)) => out.extend_from_slice(&self.scratch[0][..produced]),
                Err(e) => {
                    self.pending.clear();
                    resampler.reset();
                    return Err(VoxError::InvalidBuffer(format!("resampling failed: {e}")));
                }
            }
            offset += self.block;
        }
        self.pending.drain(..offset);
        Ok(())
    }

    /// Convert a complete buffer in one go.
    ///
    /// Flushes the tail with silence, drops the filter delay and trims to
    /// `round(len * target / source)` samples.
    pub fn convert_all(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(delay) = self.resampler.as_ref().map(|r| r.output_delay()) else {
            return Ok(samples.to_vec());
        };
        let expected = (samples.len() as f64 * self.target_rate as f64 / self.source_rate as f64)
            .round() as usize;

        let mut out = Vec::with_capacity(expected + delay + self.block);
        self.feed(samples, &mut out)?;
        let silence = vec![0.0; self.block];
        for _ in 0..MAX_FLUSH_BLOCKS {
            if out.len() >= expected + delay {
                break;
            }
            self.feed(&silence, &mut out)?;
        }
        self.pending.clear();
        if let Some(r) = self.resampler.as_mut() {
            r.reset();
        }

        out.drain(..delay.min(out.len()));
        out.resize(expected, 0.0);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn equal_rates_pass_through() {
        let mut rc = RateConverter::new(44_100, 44_100, 1024).unwrap();
        assert!(rc.is_passthrough());
        let samples = tone(44_100, 777);
        let mut out = Vec::new();
        rc.feed(&samples, &mut out).unwrap();
        assert_eq!(out, samples);
        assert_eq!(rc.convert_all(&samples).unwrap(), samples);
    }

    #[test]
    fn rejects_zero_rates() {
        assert!(matches!(
            RateConverter::new(0, 48_000, 1024),
            Err(VoxError::InvalidBuffer(_))
        ));
        assert!(RateConverter::new(44_100, 0, 1024).is_err());
    }

    #[test]
    fn device_rate_upsampling_keeps_duration_and_level() {
        let mut rc = RateConverter::new(44_100, 48_000, 1024).unwrap();
        let out = rc.convert_all(&vec![0.5f32; 44_100]).unwrap();
        assert_eq!(out.len(), 48_000);
        assert!((out[24_000] - 0.5).abs() < 0.01, "mid sample {}", out[24_000]);
    }

    #[test]
    fn device_rate_downsampling_hits_exact_length() {
        let mut rc = RateConverter::new(48_000, 44_100, 1024).unwrap();
        let out = rc.convert_all(&tone(48_000, 12_000)).unwrap();
        assert_eq!(out.len(), 11_025);
        assert!(out.iter().all(|s| s.is_finite() && s.abs() < 0.6));
    }

    #[test]
    fn half_rate_playback_conversion() {
        let mut rc = RateConverter::new(22_050, 44_100, 512).unwrap();
        let out = rc.convert_all(&tone(22_050, 2_205)).unwrap();
        assert_eq!(out.len(), 4_410);

        let mut down = RateConverter::new(44_100, 22_050, 512).unwrap();
        assert_eq!(down.convert_all(&out).unwrap().len(), 2_205);
    }

    #[test]
    fn partial_block_stays_pending_until_filled() {
        let mut rc = RateConverter::new(44_100, 48_000, 1024).unwrap();
        let mut out = Vec::new();
        rc.feed(&[0.1; 600], &mut out).unwrap();
        assert!(out.is_empty());
        rc.feed(&[0.1; 600], &mut out).unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn converter_is_reusable_after_convert_all() {
        let mut rc = RateConverter::new(44_100, 48_000, 1024).unwrap();
        let first = rc.convert_all(&vec![0.25; 4_410]).unwrap();
        let second = rc.convert_all(&vec![0.25; 4_410]).unwrap();
        assert_eq!(first.len(), 4_800);
        assert_eq!(first, second);
    }
}
