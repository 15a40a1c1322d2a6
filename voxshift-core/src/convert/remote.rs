//! `RemoteGateway`: speech-to-speech conversion over HTTP.
//!
//! Request: multipart POST to `<endpoint>/<voice_id>` with the recording as
//! a mono 16-bit WAV file part plus `model_id`, `voice_settings` and
//! `output_format` text fields. Response: raw little-endian 16-bit PCM at
//! `output_rate`.

use std::time::Duration;

use reqwest::blocking::multipart;
use tracing::{debug, warn};

use crate::buffering::SampleBuffer;
use crate::convert::{ConversionGateway, VoiceSelector};
use crate::error::{Result, VoxError};
use crate::wav::{decode_pcm16_le, encode_wav_bytes};

pub const DEFAULT_ENDPOINT: &str = "https://api.elevenlabs.io/v1/speech-to-speech";
pub const ENGLISH_MODEL: &str = "eleven_english_sts_v2";
pub const MULTILINGUAL_MODEL: &str = "eleven_multilingual_sts_v2";

/// Selectable speech-to-speech models (display name, model id).
pub const REMOTE_MODELS: [(&str, &str); 2] = [
    ("English Only", ENGLISH_MODEL),
    ("Multilingual", MULTILINGUAL_MODEL),
];

/// Built-in target voices (display name, voice id).
pub const REMOTE_VOICES: [(&str, &str); 8] = [
    ("Rachel (Female)", "21m00Tcm4TlvDq8ikWAM"),
    ("Domi (Female)", "AZnzlk1XvdvUeBnXmlld"),
    ("Bella (Female)", "EXAVITQu4vr4xnSDxMaL"),
    ("Antoni (Male)", "ErXwobaYiN019PkySvjV"),
    ("Josh (Male)", "TxGEqnHWrfWFTfGW9XjX"),
    ("Arnold (Male)", "VR6AewLTigWG4xSOukaG"),
    ("Adam (Male)", "pNInz6obpgDQGcFmaJgB"),
    ("Sam (Male)", "yoZ06aMxZJJ28mfd3POQ"),
];

/// Voice id for a catalog display name (case-insensitive, with or without
/// the parenthesised suffix).
pub fn voice_id_for(name: &str) -> Option<&'static str> {
    let wanted = name.trim().to_ascii_lowercase();
    REMOTE_VOICES.iter().find_map(|(display, id)| {
        let display = display.to_ascii_lowercase();
        let short = display.split(" (").next().unwrap_or(&display);
        (display == wanted || short == wanted).then_some(*id)
    })
}

#[derive(Debug, Clone)]
pub struct RemoteGatewayConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub default_model: String,
    /// Rate of the PCM the service returns.
    pub output_rate: u32,
    pub timeout: Duration,
    pub stability: f32,
    pub similarity_boost: f32,
}

impl Default for RemoteGatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            api_key: None,
            default_model: MULTILINGUAL_MODEL.into(),
            output_rate: 44_100,
            timeout: Duration::from_secs(60),
            stability: 0.5,
            similarity_boost: 0.75,
        }
    }
}

impl RemoteGatewayConfig {
    /// Defaults overridden by `VOXSHIFT_REMOTE_API_KEY` and
    /// `VOXSHIFT_REMOTE_ENDPOINT`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.api_key = std::env::var("VOXSHIFT_REMOTE_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        if let Ok(endpoint) = std::env::var("VOXSHIFT_REMOTE_ENDPOINT") {
            let endpoint = endpoint.trim();
            if !endpoint.is_empty() {
                cfg.endpoint = endpoint.to_string();
            }
        }
        cfg
    }
}

pub struct RemoteGateway {
    config: RemoteGatewayConfig,
}

impl RemoteGateway {
    pub fn new(config: RemoteGatewayConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RemoteGatewayConfig {
        &self.config
    }

    fn request(&self, buffer: &SampleBuffer, voice_id: &str, model_id: &str) -> Result<SampleBuffer> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| failed("no API key configured (set VOXSHIFT_REMOTE_API_KEY)"))?;

        let wav_bytes = encode_wav_bytes(&buffer.to_mono())
            .map_err(|e| failed(format!("encode upload: {e}")))?;
        let file_part = multipart::Part::bytes(wav_bytes)
            .file_name("recording.wav")
            .mime_str("audio/wav")
            .map_err(|e| failed(format!("multipart: {e}")))?;
        let voice_settings = serde_json::json!({
            "stability": self.config.stability,
            "similarity_boost": self.config.similarity_boost,
        })
        .to_string();
        let form = multipart::Form::new()
            .part("audio", file_part)
            .text("model_id", model_id.to_string())
            .text("voice_settings", voice_settings)
            .text("output_format", format!("pcm_{}", self.config.output_rate));

        let client = reqwest::blocking::Client::builder()
            .timeout(self.config.timeout)
            .build()
            .map_err(|e| failed(format!("client build: {e}")))?;

        let url = format!("{}/{}", self.config.endpoint.trim_end_matches('/'), voice_id);
        debug!(%url, model_id, samples = buffer.len(), "remote conversion request");
        let response = client
            .post(&url)
            .header("xi-api-key", api_key)
            .multipart(form)
            .send()
            .map_err(|e| failed(format!("request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let message = error_message(&body);
            warn!(%status, reason = %message, "remote conversion rejected");
            return Err(failed(format!("API error ({status}): {message}")));
        }

        let bytes = response
            .bytes()
            .map_err(|e| failed(format!("response body: {e}")))?;
        if bytes.is_empty() {
            return Err(failed("empty response payload"));
        }
        decode_pcm16_le(&bytes, self.config.output_rate)
            .map_err(|e| failed(format!("malformed payload: {e}")))
    }
}

impl ConversionGateway for RemoteGateway {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn convert(&self, buffer: &SampleBuffer, selector: &VoiceSelector) -> Result<SampleBuffer> {
        if buffer.is_empty() {
            return Err(VoxError::EmptyBuffer);
        }
        match selector {
            VoiceSelector::Voice { voice_id, model_id } => {
                let model = model_id.as_deref().unwrap_or(&self.config.default_model);
                self.request(buffer, voice_id, model)
            }
            other => Err(failed(format!(
                "remote converter needs a target voice, got '{}'",
                other.label()
            ))),
        }
    }
}

fn failed(reason: impl Into<String>) -> VoxError {
    VoxError::ConversionFailed(reason.into())
}

/// `detail.message` from a JSON error body, else the JSON itself, else the
/// raw text.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => json
            .get("detail")
            .and_then(|d| d.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| json.to_string()),
        Err(_) => body.trim().to_string(),
    }
}
