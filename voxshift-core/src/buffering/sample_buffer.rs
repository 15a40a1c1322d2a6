//! Typed sample container every effect, session and gateway operates on.

use crate::audio::resample::RateConverter;
use crate::error::{Result, VoxError};

/// A contiguous run of PCM samples at a known sample rate.
///
/// Samples coming from capture or decode are finite and clamped to
/// `[-1.0, 1.0]`. Effect outputs are finite but may leave that range until
/// the chain's clip stage. A zero-length buffer is valid ("no audio yet").
/// Stereo buffers are interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl SampleBuffer {
    /// Mono buffer. Rejects a zero sample rate or non-finite samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        Self::with_channels(samples, sample_rate, 1)
    }

    /// Buffer with an explicit channel count (1 or 2, interleaved).
    pub fn with_channels(mut samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(VoxError::InvalidBuffer("sample rate must be positive".into()));
        }
        if !(1..=2).contains(&channels) {
            return Err(VoxError::InvalidBuffer(format!(
                "unsupported channel count {channels}"
            )));
        }
        if samples.len() % channels as usize != 0 {
            return Err(VoxError::InvalidBuffer(format!(
                "{} samples is not a whole number of {channels}-channel frames",
                samples.len()
            )));
        }
        if let Some(idx) = samples.iter().position(|s| !s.is_finite()) {
            return Err(VoxError::InvalidBuffer(format!(
                "non-finite sample at index {idx}"
            )));
        }
        for s in samples.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Empty mono buffer.
    pub fn empty(sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate: sample_rate.max(1),
            channels: 1,
        }
    }

    /// Concatenate mono chunks in order.
    pub fn from_chunks<'a, I>(chunks: I, sample_rate: u32) -> Result<Self>
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        let chunks: Vec<&[f32]> = chunks.into_iter().collect();
        let total = chunks.iter().map(|c| c.len()).sum();
        let mut samples = Vec::with_capacity(total);
        for chunk in chunks {
            samples.extend_from_slice(chunk);
        }
        Self::new(samples, sample_rate)
    }

    /// Run `f` over each channel's samples and re-interleave the results,
    /// keeping the channel count. Every channel is padded or trimmed back to
    /// the input frame count. `f` also receives the channel index.
    ///
    /// Effect output is finite by construction of the DSP stages; range is
    /// not enforced here.
    pub(crate) fn try_map_channels<F>(&self, mut f: F) -> Result<SampleBuffer>
    where
        F: FnMut(&mut Vec<f32>, usize) -> Result<()>,
    {
        let mut planes = self.planes();
        for (c, plane) in planes.iter_mut().enumerate() {
            f(plane, c)?;
        }
        Ok(self.from_planes(planes))
    }

    /// Infallible form of [`try_map_channels`](Self::try_map_channels).
    pub(crate) fn map_channels<F>(&self, mut f: F) -> SampleBuffer
    where
        F: FnMut(&mut Vec<f32>, usize),
    {
        let mut planes = self.planes();
        for (c, plane) in planes.iter_mut().enumerate() {
            f(plane, c);
        }
        self.from_planes(planes)
    }

    fn planes(&self) -> Vec<Vec<f32>> {
        let ch = self.channels as usize;
        if ch == 1 {
            return vec![self.samples.clone()];
        }
        (0..ch)
            .map(|c| self.samples.iter().skip(c).step_by(ch).copied().collect())
            .collect()
    }

    fn from_planes(&self, mut planes: Vec<Vec<f32>>) -> SampleBuffer {
        let frames = self.frames();
        for plane in planes.iter_mut() {
            plane.resize(frames, 0.0);
        }
        let samples = if planes.len() == 1 {
            planes.swap_remove(0)
        } else {
            let mut out = Vec::with_capacity(self.samples.len());
            for i in 0..frames {
                out.extend(planes.iter().map(|plane| plane[i]));
            }
            out
        };
        self.with_samples(samples)
    }

    fn with_samples(&self, samples: Vec<f32>) -> SampleBuffer {
        debug_assert!(samples.iter().all(|s| s.is_finite()));
        Self {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Total sample count across all channels.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the buffer contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Returns the duration of this buffer in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Largest absolute sample value.
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Average interleaved channels down to mono. Mono buffers are cloned.
    pub fn to_mono(&self) -> SampleBuffer {
        if self.channels == 1 {
            return self.clone();
        }
        let ch = self.channels as usize;
        let samples = self
            .samples
            .chunks_exact(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect();
        Self {
            samples,
            sample_rate: self.sample_rate,
            channels: 1,
        }
    }

    /// Mono copy of this buffer at `target_rate`. Same-rate input is cloned.
    pub fn resampled(&self, target_rate: u32) -> Result<SampleBuffer> {
        if target_rate == 0 {
            return Err(VoxError::InvalidBuffer("target rate must be positive".into()));
        }
        let mono = self.to_mono();
        if target_rate == self.sample_rate {
            return Ok(mono);
        }
        let mut converter = RateConverter::new(self.sample_rate, target_rate, 1024)?;
        let samples = converter.convert_all(&mono.samples)?;
        Self::new(samples, target_rate)
    }
}
