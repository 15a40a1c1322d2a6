//! Ordered effect composition.
//!
//! Stages always run in this order, skipping those the profile leaves
//! neutral:
//!
//! 1. pitch shift
//! 2. formant warp
//! 3. ring modulation
//! 4. gain, then hard clip to `[-1.0, 1.0]`
//!
//! Reordering changes the result: the formant warp normalises its output,
//! and the ring carrier multiplies the already pitched and warped signal.

use crate::buffering::SampleBuffer;
use crate::error::{Result, VoxError};
use crate::profile::VoiceProfile;

use super::formant::FormantShifter;
use super::pitch::{DurationPolicy, PitchShifter};
use super::ring_mod;

pub struct EffectChain {
    policy: DurationPolicy,
    pitch: PitchShifter,
    formant: FormantShifter,
}

impl EffectChain {
    pub fn new(policy: DurationPolicy) -> Self {
        Self {
            policy,
            pitch: PitchShifter::new(),
            formant: FormantShifter::new(),
        }
    }

    /// Chain for the per-chunk path (`PadTrim`).
    pub fn realtime() -> Self {
        Self::new(DurationPolicy::PadTrim)
    }

    /// Chain for whole-recording conversion (`Restretch`).
    pub fn offline() -> Self {
        Self::new(DurationPolicy::Restretch)
    }

    pub fn policy(&self) -> DurationPolicy {
        self.policy
    }

    /// Apply `profile` to a whole buffer. A neutral profile returns the input
    /// unchanged. Each channel of a stereo buffer runs through the chain on
    /// its own, so the output keeps the input's length and layout.
    pub fn apply(&mut self, buffer: &SampleBuffer, profile: &VoiceProfile) -> Result<SampleBuffer> {
        if profile.is_neutral() || buffer.is_empty() {
            profile.validate()?;
            return Ok(buffer.clone());
        }
        let sample_rate = buffer.sample_rate();
        buffer.try_map_channels(|plane, _| self.process(plane, sample_rate, profile, 0))
    }

    /// Apply `profile` in place to mono `samples`. `position` is the absolute
    /// stream index of `samples[0]`, used for the ring carrier phase.
    ///
    /// On error `samples` may be partially processed; callers that need the
    /// original must keep a copy.
    pub fn process(
        &mut self,
        samples: &mut Vec<f32>,
        sample_rate: u32,
        profile: &VoiceProfile,
        position: u64,
    ) -> Result<()> {
        profile.validate()?;
        if profile.is_neutral() || samples.is_empty() {
            return Ok(());
        }

        self.pitch
            .shift_in_place(samples, profile.pitch_semitones, self.policy);

        if profile.formant_factor != 1.0 {
            self.formant
                .shift_in_place(samples, profile.formant_factor)?;
        }

        if let Some(ring) = &profile.ring {
            ring_mod::modulate_at(samples, sample_rate, ring.carrier_hz, ring.blend, position);
        }

        let gain = profile.gain;
        for s in samples.iter_mut() {
            let v = *s * gain;
            if !v.is_finite() {
                return Err(VoxError::ChunkProcessingFault(
                    "non-finite sample after effect chain".into(),
                ));
            }
            *s = v.clamp(-1.0, 1.0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_signals::sine;
    use crate::profile::{preset, PRESET_NAMES};

    fn voice(len: usize) -> SampleBuffer {
        SampleBuffer::new(sine(220.0, 44_100, len, 0.8), 44_100).unwrap()
    }

    #[test]
    fn neutral_profile_is_exact_identity() {
        let mut chain = EffectChain::realtime();
        let input = voice(3000);
        let out = chain.apply(&input, &VoiceProfile::neutral()).unwrap();
        assert_eq!(out, input);

        let stereo = SampleBuffer::with_channels(vec![0.1, -0.1, 0.2, -0.2], 44_100, 2).unwrap();
        assert_eq!(chain.apply(&stereo, &VoiceProfile::neutral()).unwrap(), stereo);
    }

    #[test]
    fn every_preset_keeps_length_and_range() {
        for policy in [DurationPolicy::PadTrim, DurationPolicy::Restretch] {
            let mut chain = EffectChain::new(policy);
            let input = voice(4096);
            for name in PRESET_NAMES {
                let out = chain.apply(&input, &preset(name).unwrap()).unwrap();
                assert_eq!(out.len(), input.len(), "{name}");
                assert!(out.samples().iter().all(|s| (-1.0..=1.0).contains(s)), "{name}");
            }
        }
    }

    #[test]
    fn stereo_input_keeps_length_and_layout() {
        let mono = sine(220.0, 44_100, 2048, 0.5);
        let interleaved: Vec<f32> = mono.iter().flat_map(|&s| [s, s * 0.5]).collect();
        let stereo = SampleBuffer::with_channels(interleaved, 44_100, 2).unwrap();

        for name in PRESET_NAMES {
            let profile = preset(name).unwrap();
            let out = EffectChain::offline().apply(&stereo, &profile).unwrap();
            assert_eq!(out.len(), stereo.len(), "{name}");
            assert_eq!(out.channels(), 2, "{name}");
            assert_eq!(out.sample_rate(), 44_100, "{name}");
        }

        // Left channel matches the same signal processed as mono.
        let profile = preset("male").unwrap();
        let left = EffectChain::offline()
            .apply(&SampleBuffer::new(mono, 44_100).unwrap(), &profile)
            .unwrap();
        let out = EffectChain::offline().apply(&stereo, &profile).unwrap();
        for (a, b) in out.samples().iter().step_by(2).zip(left.samples()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn gain_stage_clips_loud_output() {
        let mut chain = EffectChain::realtime();
        let mut profile = preset("robot").unwrap();
        profile.gain = 10.0;
        let out = chain.apply(&voice(2048), &profile).unwrap();
        assert!(out.peak() <= 1.0);
        assert!(out.samples().iter().any(|&s| s == 1.0 || s == -1.0));
    }

    #[test]
    fn gain_only_profile_scales_samples() {
        let mut chain = EffectChain::realtime();
        let profile = VoiceProfile::custom(0.0, 1.0, None, 0.5).unwrap();
        let input = voice(512);
        let out = chain.apply(&input, &profile).unwrap();
        for (a, b) in input.samples().iter().zip(out.samples()) {
            assert!((a * 0.5 - b).abs() < 1e-7);
        }
    }

    #[test]
    fn invalid_profile_is_rejected() {
        let mut chain = EffectChain::realtime();
        let mut profile = VoiceProfile::neutral();
        profile.formant_factor = -1.0;
        assert!(matches!(
            chain.apply(&voice(64), &profile),
            Err(VoxError::InvalidProfile(_))
        ));
    }

    #[test]
    fn empty_buffer_passes_through() {
        let mut chain = EffectChain::offline();
        let empty = SampleBuffer::empty(44_100);
        assert!(chain.apply(&empty, &preset("deep").unwrap()).unwrap().is_empty());
    }

    #[test]
    fn ring_phase_follows_stream_position() {
        let mut chain = EffectChain::realtime();
        let profile = preset("robot").unwrap();
        let input = sine(300.0, 44_100, 2048, 0.5);

        let mut whole = input.clone();
        chain.process(&mut whole, 44_100, &profile, 0).unwrap();

        let mut first = input[..1024].to_vec();
        let mut second = input[1024..].to_vec();
        chain.process(&mut first, 44_100, &profile, 0).unwrap();
        chain.process(&mut second, 44_100, &profile, 1024).unwrap();
        first.extend(second);

        for (a, b) in whole.iter().zip(&first) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}
