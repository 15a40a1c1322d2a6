//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use voxshift_core::profile::{normalize_profile_name, PRESET_NAMES};
use voxshift_core::EngineConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
    pub sample_rate: u32,
    pub chunk_size: usize,
    /// Preset used for live streaming and local conversion.
    pub profile: String,
    /// `"local"` or `"remote"`.
    pub converter: String,
    /// Remote target voice, display name or id.
    pub remote_voice: String,
    pub remote_model: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub play_converted: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            preferred_output_device: None,
            sample_rate: 44_100,
            chunk_size: 1024,
            profile: "normal".into(),
            converter: "local".into(),
            remote_voice: "Rachel".into(),
            remote_model: None,
            output_dir: None,
            play_converted: true,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.preferred_input_device = normalize_device(self.preferred_input_device.take());
        self.preferred_output_device = normalize_device(self.preferred_output_device.take());
        self.sample_rate = self.sample_rate.clamp(8_000, 192_000);
        self.chunk_size = self.chunk_size.clamp(64, 8_192);
        self.profile = normalize_preset(&self.profile);
        self.converter = normalize_converter(&self.converter);
        self.remote_voice = match self.remote_voice.trim() {
            "" => "Rachel".into(),
            v => v.to_string(),
        };
        self.remote_model = self
            .remote_model
            .as_ref()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        self.output_dir = self
            .output_dir
            .take()
            .filter(|p| !p.as_os_str().is_empty());
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            sample_rate: self.sample_rate,
            chunk_size: self.chunk_size,
            preferred_input_device: self.preferred_input_device.clone(),
            preferred_output_device: self.preferred_output_device.clone(),
            ..EngineConfig::default()
        }
    }
}

fn normalize_device(raw: Option<String>) -> Option<String> {
    raw.map(|d| d.trim().to_string()).filter(|d| !d.is_empty())
}

/// Canonical preset name; unknown names fall back to `normal`.
pub fn normalize_preset(raw: &str) -> String {
    let name = normalize_profile_name(raw);
    if PRESET_NAMES.contains(&name.as_str()) {
        name
    } else {
        "normal".into()
    }
}

pub fn normalize_converter(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "remote" | "cloud" | "elevenlabs" => "remote".into(),
        _ => "local".into(),
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voxshift")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("voxshift")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("voxshift-settings-{tag}-{}", std::process::id()))
            .join("settings.json")
    }

    #[test]
    fn normalize_clamps_and_canonicalises() {
        let mut s = AppSettings {
            preferred_input_device: Some("   ".into()),
            sample_rate: 1,
            chunk_size: 1 << 20,
            profile: " Robotic ".into(),
            converter: "ElevenLabs".into(),
            remote_voice: "".into(),
            remote_model: Some(" ".into()),
            ..AppSettings::default()
        };
        s.normalize();
        assert_eq!(s.preferred_input_device, None);
        assert_eq!(s.sample_rate, 8_000);
        assert_eq!(s.chunk_size, 8_192);
        assert_eq!(s.profile, "robot");
        assert_eq!(s.converter, "remote");
        assert_eq!(s.remote_voice, "Rachel");
        assert_eq!(s.remote_model, None);
    }

    #[test]
    fn unknown_preset_falls_back_to_normal() {
        assert_eq!(normalize_preset("opera"), "normal");
        assert_eq!(normalize_preset("DEEP"), "deep");
    }

    #[test]
    fn missing_or_corrupt_file_gives_defaults() {
        let path = temp_path("corrupt");
        assert_eq!(load_settings(&path), AppSettings::default());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();
        assert_eq!(load_settings(&path), AppSettings::default());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn save_then_load_keeps_values_and_fills_missing_fields() {
        let path = temp_path("save");
        let settings = AppSettings {
            profile: "whisper".into(),
            chunk_size: 512,
            ..AppSettings::default()
        };
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path), settings);

        fs::write(&path, r#"{"profile":"female"}"#).unwrap();
        let partial = load_settings(&path);
        assert_eq!(partial.profile, "female");
        assert_eq!(partial.sample_rate, 44_100);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn engine_config_carries_device_choices() {
        let settings = AppSettings {
            preferred_output_device: Some("Headphones".into()),
            chunk_size: 2048,
            ..AppSettings::default()
        };
        let cfg = settings.engine_config();
        assert_eq!(cfg.chunk_size, 2048);
        assert_eq!(cfg.preferred_output_device.as_deref(), Some("Headphones"));
        assert_eq!(cfg.output_channels, 2);
    }
}
