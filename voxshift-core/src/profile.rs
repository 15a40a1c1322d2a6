//! Voice profiles, the preset registry, and the slot that publishes the
//! active profile to the audio callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::dsp::RingBlend;
use crate::error::{Result, VoxError};

/// Largest pitch offset accepted, in semitones.
pub const MAX_PITCH_SEMITONES: f32 = 24.0;

/// Carrier settings for the ring modulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RingModulation {
    pub carrier_hz: f32,
    #[serde(default)]
    pub blend: RingBlend,
}

/// Immutable effect parameters. Replaced wholesale, never edited while in use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceProfile {
    pub name: String,
    pub pitch_semitones: f32,
    pub formant_factor: f32,
    #[serde(default)]
    pub ring: Option<RingModulation>,
    pub gain: f32,
}

impl VoiceProfile {
    /// Pitch 0, formant 1.0, no modulation, gain 1.0.
    pub fn neutral() -> Self {
        Self {
            name: "normal".into(),
            pitch_semitones: 0.0,
            formant_factor: 1.0,
            ring: None,
            gain: 1.0,
        }
    }

    /// Ad hoc profile from slider values. `mod_freq` of `None` or zero
    /// disables ring modulation.
    pub fn custom(
        pitch_semitones: f32,
        formant_factor: f32,
        mod_freq: Option<f32>,
        gain: f32,
    ) -> Result<Self> {
        let ring = mod_freq.filter(|hz| *hz != 0.0).map(|carrier_hz| RingModulation {
            carrier_hz,
            blend: RingBlend::BALANCED,
        });
        let profile = Self {
            name: "custom".into(),
            pitch_semitones,
            formant_factor,
            ring,
            gain,
        };
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.pitch_semitones.is_finite()
            || self.pitch_semitones.abs() > MAX_PITCH_SEMITONES
        {
            return Err(VoxError::InvalidProfile(format!(
                "pitch {} outside ±{MAX_PITCH_SEMITONES} semitones",
                self.pitch_semitones
            )));
        }
        if !(self.formant_factor.is_finite() && self.formant_factor > 0.0) {
            return Err(VoxError::InvalidProfile(format!(
                "formant factor must be positive, got {}",
                self.formant_factor
            )));
        }
        if !(self.gain.is_finite() && self.gain >= 0.0) {
            return Err(VoxError::InvalidProfile(format!(
                "gain must be non-negative, got {}",
                self.gain
            )));
        }
        if let Some(ring) = &self.ring {
            if !(ring.carrier_hz.is_finite() && ring.carrier_hz > 0.0) {
                return Err(VoxError::InvalidProfile(format!(
                    "carrier frequency must be positive, got {}",
                    ring.carrier_hz
                )));
            }
            let RingBlend { wet, dry } = ring.blend;
            if !(wet.is_finite() && dry.is_finite() && wet >= 0.0 && dry >= 0.0) {
                return Err(VoxError::InvalidProfile(format!(
                    "ring blend weights must be non-negative, got {wet}/{dry}"
                )));
            }
        }
        Ok(())
    }

    /// True when applying this profile cannot change the signal.
    pub fn is_neutral(&self) -> bool {
        self.pitch_semitones == 0.0
            && self.formant_factor == 1.0
            && self.ring.is_none()
            && self.gain == 1.0
    }
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self::neutral()
    }
}

pub const PRESET_NAMES: [&str; 7] = [
    "normal", "male", "female", "robot", "chipmunk", "deep", "whisper",
];

/// Look up a built-in preset. Names are matched after [`normalize_profile_name`].
pub fn preset(name: &str) -> Result<VoiceProfile> {
    let name = normalize_profile_name(name);
    let base = VoiceProfile {
        name: name.clone(),
        ..VoiceProfile::neutral()
    };
    let profile = match name.as_str() {
        "normal" => base,
        "male" => VoiceProfile {
            pitch_semitones: -4.0,
            ..base
        },
        "female" => VoiceProfile {
            pitch_semitones: 4.0,
            ..base
        },
        "robot" => VoiceProfile {
            ring: Some(RingModulation {
                carrier_hz: 50.0,
                blend: RingBlend::BALANCED,
            }),
            ..base
        },
        "chipmunk" => VoiceProfile {
            pitch_semitones: 8.0,
            ..base
        },
        "deep" => VoiceProfile {
            pitch_semitones: -8.0,
            ..base
        },
        "whisper" => VoiceProfile {
            formant_factor: 1.1,
            gain: 0.5,
            ..base
        },
        _ => return Err(VoxError::UnknownProfile(name)),
    };
    Ok(profile)
}

pub fn normalize_profile_name(raw: &str) -> String {
    let name = raw.trim().to_ascii_lowercase();
    match name.as_str() {
        "" | "neutral" | "none" | "default" => "normal".into(),
        "man" | "masculine" => "male".into(),
        "woman" | "feminine" => "female".into(),
        "robotic" | "bot" => "robot".into(),
        "squeaky" | "helium" => "chipmunk".into(),
        "low" | "giant" => "deep".into(),
        "soft" | "breathy" => "whisper".into(),
        _ => name,
    }
}

/// Publishes the active profile from the control context to the audio
/// context. Writers swap the whole `Arc`; readers clone it under a
/// non-blocking `try_read`.
///
/// Replaced snapshots are parked in `retired` so the audio side never drops
/// the last reference. They are freed by a later `store` once no reader
/// holds them.
pub struct ProfileSlot {
    current: RwLock<Arc<VoiceProfile>>,
    version: AtomicU64,
    retired: Mutex<Vec<Arc<VoiceProfile>>>,
}

impl ProfileSlot {
    pub fn new(profile: VoiceProfile) -> Self {
        Self {
            current: RwLock::new(Arc::new(profile)),
            version: AtomicU64::new(1),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Replace the active profile. Returns the new version.
    pub fn store(&self, profile: VoiceProfile) -> u64 {
        let next = Arc::new(profile);
        let previous = std::mem::replace(&mut *self.current.write(), next);
        let mut retired = self.retired.lock();
        retired.retain(|p| Arc::strong_count(p) > 1);
        retired.push(previous);
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Replaced snapshots still parked for deferred release.
    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }

    pub fn load(&self) -> Arc<VoiceProfile> {
        self.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn reader(self: &Arc<Self>) -> ProfileReader {
        ProfileReader {
            cached: self.load(),
            seen: self.version(),
            slot: Arc::clone(self),
        }
    }
}

impl Default for ProfileSlot {
    fn default() -> Self {
        Self::new(VoiceProfile::neutral())
    }
}

/// Audio-side view of a [`ProfileSlot`]. Holds the last snapshot it managed
/// to read; never waits on the writer.
pub struct ProfileReader {
    slot: Arc<ProfileSlot>,
    cached: Arc<VoiceProfile>,
    seen: u64,
}

impl ProfileReader {
    /// Pick up a newer profile if one was published. Returns `false` when a
    /// newer version exists but the slot was write-locked, in which case the
    /// previous snapshot stays in use for this chunk.
    pub fn refresh(&mut self) -> bool {
        let version = self.slot.version();
        if version == self.seen {
            return true;
        }
        match self.slot.current.try_read() {
            Some(guard) => {
                self.cached = Arc::clone(&*guard);
                self.seen = version;
                true
            }
            None => false,
        }
    }

    pub fn profile(&self) -> &VoiceProfile {
        &self.cached
    }
}
