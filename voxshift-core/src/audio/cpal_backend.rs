//! Hardware streams through cpal.

use crate::audio::{
    AudioBackend, FaultCallback, InputCallback, OutputCallback, StreamGuard, StreamSettings,
};
use crate::error::{Result, VoxError};

/// Host-default cpal backend. Without the `audio-cpal` feature every open
/// fails with `DeviceUnavailable`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "audio-cpal")]
mod imp {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, SampleFormat, SampleRate, StreamConfig, SupportedStreamConfigRange};
    use tracing::{error, info, warn};

    use super::*;

    #[derive(Clone, Copy)]
    pub(super) enum Direction {
        Input,
        Output,
    }

    impl Direction {
        fn label(self) -> &'static str {
            match self {
                Direction::Input => "input",
                Direction::Output => "output",
            }
        }
    }

    fn unavailable(msg: impl std::fmt::Display) -> VoxError {
        VoxError::DeviceUnavailable(msg.to_string())
    }

    /// Preferred device by exact name, otherwise the host default, otherwise
    /// the first device listed.
    pub(super) fn select_device(direction: Direction, preferred: Option<&str>) -> Result<Device> {
        let host = cpal::default_host();
        let list = || -> std::result::Result<Box<dyn Iterator<Item = Device>>, cpal::DevicesError> {
            Ok(match direction {
                Direction::Input => Box::new(host.input_devices()?),
                Direction::Output => Box::new(host.output_devices()?),
            })
        };

        if let Some(preferred_name) = preferred {
            match list() {
                Ok(mut devices) => {
                    let found = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });
                    if let Some(device) = found {
                        return Ok(device);
                    }
                    warn!(
                        "preferred {} device '{}' not found, falling back",
                        direction.label(),
                        preferred_name
                    );
                }
                Err(e) => {
                    warn!("failed to list {} devices while resolving preference: {e}", direction.label());
                }
            }
        }

        let default = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        if let Some(device) = default {
            return Ok(device);
        }
        let mut devices = list().map_err(unavailable)?;
        let fallback = devices
            .next()
            .ok_or_else(|| unavailable(format!("no {} device", direction.label())))?;
        warn!("no default {} device, falling back to first available", direction.label());
        Ok(fallback)
    }

    fn format_rank(format: SampleFormat) -> Option<u8> {
        match format {
            SampleFormat::F32 => Some(0),
            SampleFormat::I16 => Some(1),
            SampleFormat::U8 => Some(2),
            _ => None,
        }
    }

    /// Pick a supported range that contains `sample_rate`, preferring the
    /// requested channel count and then F32 > I16 > U8.
    pub(super) fn select_config(
        ranges: impl Iterator<Item = SupportedStreamConfigRange>,
        sample_rate: u32,
        channels: u16,
    ) -> Option<(StreamConfig, SampleFormat)> {
        ranges
            .filter(|r| {
                r.min_sample_rate().0 <= sample_rate && sample_rate <= r.max_sample_rate().0
            })
            .filter_map(|r| format_rank(r.sample_format()).map(|rank| (rank, r)))
            .min_by_key(|(rank, r)| (r.channels() != channels, r.channels(), *rank))
            .map(|(_, r)| {
                let format = r.sample_format();
                let supported = r.with_sample_rate(SampleRate(sample_rate));
                let mut config: StreamConfig = supported.config();
                config.buffer_size = cpal::BufferSize::Default;
                (config, format)
            })
    }

    pub(super) fn open_input(
        settings: &StreamSettings,
        mut on_data: InputCallback,
        mut on_fault: FaultCallback,
    ) -> Result<StreamGuard> {
        let device = select_device(Direction::Input, settings.preferred_device.as_deref())?;
        let name = device.name().unwrap_or_default();
        let ranges = device.supported_input_configs().map_err(unavailable)?;
        let (config, format) = select_config(ranges, settings.sample_rate, 1).ok_or_else(|| {
            unavailable(format!(
                "input device '{name}' does not support {} Hz",
                settings.sample_rate
            ))
        })?;
        let channels = config.channels;
        let ch = usize::from(channels.max(1));
        info!(device = %name, sample_rate = settings.sample_rate, channels, ?format, "opening input stream");

        let err_fn = move |err: cpal::StreamError| {
            error!("audio input stream error: {err}");
            on_fault(err.to_string());
        };

        let mut mix: Vec<f32> = Vec::new();
        let stream = match format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    if ch == 1 {
                        on_data(data);
                        return;
                    }
                    let frames = data.len() / ch;
                    mix.resize(frames, 0.0);
                    for (f, slot) in mix.iter_mut().enumerate() {
                        let base = f * ch;
                        *slot = data[base..base + ch].iter().sum::<f32>() / ch as f32;
                    }
                    on_data(&mix);
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _info: &cpal::InputCallbackInfo| {
                    let frames = data.len() / ch;
                    mix.resize(frames, 0.0);
                    for (f, slot) in mix.iter_mut().enumerate() {
                        let base = f * ch;
                        let sum: f32 = data[base..base + ch].iter().map(|&s| s as f32 / 32768.0).sum();
                        *slot = sum / ch as f32;
                    }
                    on_data(&mix);
                },
                err_fn,
                None,
            ),
            SampleFormat::U8 => device.build_input_stream(
                &config,
                move |data: &[u8], _info: &cpal::InputCallbackInfo| {
                    let frames = data.len() / ch;
                    mix.resize(frames, 0.0);
                    for (f, slot) in mix.iter_mut().enumerate() {
                        let base = f * ch;
                        let sum: f32 = data[base..base + ch]
                            .iter()
                            .map(|&s| (s as f32 - 128.0) / 128.0)
                            .sum();
                        *slot = sum / ch as f32;
                    }
                    on_data(&mix);
                },
                err_fn,
                None,
            ),
            fmt => return Err(unavailable(format!("unsupported sample format: {fmt:?}"))),
        }
        .map_err(unavailable)?;

        stream.play().map_err(unavailable)?;
        Ok(StreamGuard::new(settings.sample_rate, 1, stream))
    }

    pub(super) fn open_output(
        settings: &StreamSettings,
        mut on_data: OutputCallback,
        mut on_fault: FaultCallback,
    ) -> Result<StreamGuard> {
        let device = select_device(Direction::Output, settings.preferred_device.as_deref())?;
        let name = device.name().unwrap_or_default();
        let ranges = device.supported_output_configs().map_err(unavailable)?;
        let (config, format) = select_config(ranges, settings.sample_rate, settings.channels)
            .ok_or_else(|| {
                unavailable(format!(
                    "output device '{name}' does not support {} Hz",
                    settings.sample_rate
                ))
            })?;
        let channels = config.channels;
        info!(device = %name, sample_rate = settings.sample_rate, channels, ?format, "opening output stream");

        let err_fn = move |err: cpal::StreamError| {
            error!("audio output stream error: {err}");
            on_fault(err.to_string());
        };

        let mut scratch: Vec<f32> = Vec::new();
        let stream = match format {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    on_data(data, channels);
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _info: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    on_data(&mut scratch, channels);
                    for (dst, &s) in data.iter_mut().zip(&scratch) {
                        *dst = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                    }
                },
                err_fn,
                None,
            ),
            SampleFormat::U8 => device.build_output_stream(
                &config,
                move |data: &mut [u8], _info: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    on_data(&mut scratch, channels);
                    for (dst, &s) in data.iter_mut().zip(&scratch) {
                        *dst = (s.clamp(-1.0, 1.0) * 127.0 + 128.0).round() as u8;
                    }
                },
                err_fn,
                None,
            ),
            fmt => return Err(unavailable(format!("unsupported sample format: {fmt:?}"))),
        }
        .map_err(unavailable)?;

        stream.play().map_err(unavailable)?;
        Ok(StreamGuard::new(settings.sample_rate, channels, stream))
    }
}

#[cfg(feature = "audio-cpal")]
impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open_input(
        &self,
        settings: &StreamSettings,
        on_data: InputCallback,
        on_fault: FaultCallback,
    ) -> Result<StreamGuard> {
        imp::open_input(settings, on_data, on_fault)
    }

    fn open_output(
        &self,
        settings: &StreamSettings,
        on_data: OutputCallback,
        on_fault: FaultCallback,
    ) -> Result<StreamGuard> {
        imp::open_output(settings, on_data, on_fault)
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open_input(
        &self,
        _settings: &StreamSettings,
        _on_data: InputCallback,
        _on_fault: FaultCallback,
    ) -> Result<StreamGuard> {
        Err(VoxError::DeviceUnavailable(
            "compiled without audio-cpal feature".into(),
        ))
    }

    fn open_output(
        &self,
        _settings: &StreamSettings,
        _on_data: OutputCallback,
        _on_fault: FaultCallback,
    ) -> Result<StreamGuard> {
        Err(VoxError::DeviceUnavailable(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
