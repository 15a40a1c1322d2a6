//! WAV persistence and PCM framing.
//!
//! Saved files are canonical 16-bit linear PCM with the buffer's own rate and
//! channel count. Float samples map to integers by `round(x * 32767)` after
//! clamping, and back by `x / 32767`.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::info;

use crate::buffering::SampleBuffer;
use crate::error::{Result, VoxError};

const PCM16_SCALE: f32 = i16::MAX as f32;

pub fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * PCM16_SCALE).round() as i16
}

pub fn from_pcm16(value: i16) -> f32 {
    (value as f32 / PCM16_SCALE).max(-1.0)
}

fn pcm16_spec(buffer: &SampleBuffer) -> hound::WavSpec {
    hound::WavSpec {
        channels: buffer.channels(),
        sample_rate: buffer.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Write `buffer` as a 16-bit PCM WAV file.
pub fn write_wav(path: &Path, buffer: &SampleBuffer) -> Result<()> {
    let mut writer = hound::WavWriter::create(path, pcm16_spec(buffer))?;
    for &s in buffer.samples() {
        writer.write_sample(to_pcm16(s))?;
    }
    writer.finalize()?;
    Ok(())
}

/// Encode `buffer` as an in-memory 16-bit PCM WAV (upload payload).
pub fn encode_wav_bytes(buffer: &SampleBuffer) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::with_capacity(44 + buffer.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, pcm16_spec(buffer))?;
        for &s in buffer.samples() {
            writer.write_sample(to_pcm16(s))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Read a WAV file. Integer and float formats are accepted; more than two
/// channels are averaged down to mono.
pub fn read_wav(path: &Path) -> Result<SampleBuffer> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1);

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            // Full scale follows the stored width: 127 for 8-bit, 32767 for 16-bit.
            let max = ((1_i64 << (spec.bits_per_sample.clamp(8, 32) - 1)) - 1) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    if channels <= 2 {
        return SampleBuffer::with_channels(interleaved, spec.sample_rate, channels);
    }
    let ch = usize::from(channels);
    let mono = interleaved
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect();
    SampleBuffer::new(mono, spec.sample_rate)
}

/// Interpret raw little-endian 16-bit mono PCM.
pub fn decode_pcm16_le(bytes: &[u8], sample_rate: u32) -> Result<SampleBuffer> {
    if bytes.len() % 2 != 0 {
        return Err(VoxError::InvalidBuffer(format!(
            "PCM payload has odd length {}",
            bytes.len()
        )));
    }
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| from_pcm16(i16::from_le_bytes([pair[0], pair[1]])))
        .collect();
    SampleBuffer::new(samples, sample_rate)
}

/// `converted_<voice>_<YYYYmmdd_HHMMSS>.wav`, with the voice label reduced to
/// filename-safe characters.
pub fn output_file_name(voice: &str, at: DateTime<Local>) -> String {
    let label: String = voice
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let label = if label.is_empty() { "voice".into() } else { label };
    format!("converted_{label}_{}.wav", at.format("%Y%m%d_%H%M%S"))
}

/// Save `buffer` into `dir` under [`output_file_name`]. Creates `dir` if needed.
pub fn save_converted(
    dir: &Path,
    voice: &str,
    buffer: &SampleBuffer,
    at: DateTime<Local>,
) -> Result<PathBuf> {
    if buffer.is_empty() {
        return Err(VoxError::EmptyBuffer);
    }
    std::fs::create_dir_all(dir)?;
    let path = dir.join(output_file_name(voice, at));
    write_wav(&path, buffer)?;
    info!(path = %path.display(), samples = buffer.len(), "converted audio saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "voxshift-wav-{tag}-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn round_trip_within_quantization_error() {
        let samples: Vec<f32> = (0..2000).map(|i| ((i as f32) * 0.013).sin() * 0.95).collect();
        let buffer = SampleBuffer::new(samples, 22_050).unwrap();
        let dir = scratch_dir("rt");
        let path = dir.join("rt.wav");

        write_wav(&path, &buffer).unwrap();
        let loaded = read_wav(&path).unwrap();

        assert_eq!(loaded.sample_rate(), 22_050);
        assert_eq!(loaded.channels(), 1);
        assert_eq!(loaded.len(), buffer.len());
        for (a, b) in buffer.samples().iter().zip(loaded.samples()) {
            assert!((a - b).abs() <= 1.0 / 32767.0 + 1e-7, "{a} vs {b}");
        }
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn header_matches_buffer_format() {
        let buffer = SampleBuffer::with_channels(vec![0.5, -0.5, 0.25, -0.25], 48_000, 2).unwrap();
        let bytes = encode_wav_bytes(&buffer).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(bytes.len(), 44 + 8);

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 48_000);
        assert_eq!(spec.bits_per_sample, 16);
    }

    #[test]
    fn eight_bit_input_is_scaled_to_full_range() {
        let dir = scratch_dir("pcm8");
        let path = dir.join("quiet.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 8,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for v in [127i8, -127, 64, 0] {
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();

        let buf = read_wav(&path).unwrap();
        assert_eq!(buf.sample_rate(), 8_000);
        assert_eq!(buf.samples()[0], 1.0);
        assert_eq!(buf.samples()[1], -1.0);
        assert!((buf.samples()[2] - 64.0 / 127.0).abs() < 1e-6);
        assert_eq!(buf.samples()[3], 0.0);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn pcm16_scaling_rounds_and_clamps() {
        assert_eq!(to_pcm16(1.0), 32767);
        assert_eq!(to_pcm16(-1.0), -32767);
        assert_eq!(to_pcm16(2.0), 32767);
        assert_eq!(to_pcm16(0.5), 16384);
        assert_eq!(from_pcm16(i16::MIN), -1.0);
    }

    #[test]
    fn decode_pcm16_le_checks_length() {
        let bytes = [0xff, 0x7f, 0x01, 0x80];
        let buf = decode_pcm16_le(&bytes, 16_000).unwrap();
        assert_eq!(buf.samples(), &[1.0, -1.0]);
        assert!(matches!(
            decode_pcm16_le(&bytes[..3], 16_000),
            Err(VoxError::InvalidBuffer(_))
        ));
    }

    #[test]
    fn output_name_embeds_voice_and_timestamp() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            output_file_name("Rachel (calm)", at),
            "converted_rachel__calm__20240309_140507.wav"
        );
        assert_eq!(output_file_name("  ", at), "converted_voice_20240309_140507.wav");
    }

    #[test]
    fn save_converted_rejects_empty_buffer() {
        let dir = scratch_dir("empty");
        let at = Local.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            save_converted(&dir, "robot", &SampleBuffer::empty(44_100), at),
            Err(VoxError::EmptyBuffer)
        ));
        let path = save_converted(&dir, "robot", &SampleBuffer::new(vec![0.1; 10], 44_100).unwrap(), at)
            .unwrap();
        assert!(path.ends_with("converted_robot_20240101_000000.wav"));
        std::fs::remove_dir_all(dir).ok();
    }
}
