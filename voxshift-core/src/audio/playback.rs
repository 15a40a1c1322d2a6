//! Blocking playback of a fully materialised buffer. Background context only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select};
use tracing::{debug, info, warn};

use crate::audio::{write_to_channels, AudioBackend, StreamSettings};
use crate::buffering::SampleBuffer;
use crate::error::{Result, VoxError};

/// Slack added on top of the buffer duration before giving up on the device.
const PLAYBACK_GRACE: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How a playback call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    Finished,
    Cancelled,
    /// The device stopped pulling samples before the buffer ran out.
    TimedOut { played: usize, total: usize },
}

/// Play `buffer` on an output stream opened with `settings`, blocking until
/// it has been consumed, the device faults, or `keep_going` returns false.
///
/// The buffer is downmixed to mono and resampled to `settings.sample_rate`
/// when its rate differs; every output channel gets the same signal.
pub fn play_blocking(
    backend: &dyn AudioBackend,
    settings: &StreamSettings,
    buffer: &SampleBuffer,
    keep_going: &dyn Fn() -> bool,
) -> Result<PlaybackEnd> {
    play_with_grace(backend, settings, buffer, keep_going, PLAYBACK_GRACE)
}

fn play_with_grace(
    backend: &dyn AudioBackend,
    settings: &StreamSettings,
    buffer: &SampleBuffer,
    keep_going: &dyn Fn() -> bool,
    grace: Duration,
) -> Result<PlaybackEnd> {
    if buffer.is_empty() {
        return Err(VoxError::EmptyBuffer);
    }
    let mut mono = buffer.to_mono();
    if mono.sample_rate() != settings.sample_rate {
        debug!(from = mono.sample_rate(), to = settings.sample_rate, "resampling for playback");
        mono = mono.resampled(settings.sample_rate)?;
    }
    let samples = Arc::new(mono.into_samples());
    let total = samples.len();
    let duration = Duration::from_secs_f64(total as f64 / settings.sample_rate.max(1) as f64);

    let (done_tx, done_rx) = bounded::<()>(1);
    let (fault_tx, fault_rx) = bounded::<String>(1);
    let cursor = Arc::new(AtomicUsize::new(0));

    let source = Arc::clone(&samples);
    let read = Arc::clone(&cursor);
    let guard = backend.open_output(
        settings,
        Box::new(move |out: &mut [f32], channels: u16| {
            let ch = usize::from(channels.max(1));
            let frames = out.len() / ch;
            let start = read.load(Ordering::Relaxed).min(total);
            let end = (start + frames).min(total);
            write_to_channels(&source[start..end], out, channels);
            read.store(end, Ordering::Relaxed);
            if end == total {
                let _ = done_tx.try_send(());
            }
        }),
        Box::new(move |msg| {
            let _ = fault_tx.try_send(msg);
        }),
    )?;
    info!(samples = total, sample_rate = settings.sample_rate, "playback started");

    let deadline = Instant::now() + duration + grace;
    let outcome = loop {
        let step = select! {
            recv(done_rx) -> _ => Some(Ok(PlaybackEnd::Finished)),
            recv(fault_rx) -> msg => {
                let msg = msg.unwrap_or_else(|_| "output stream closed".into());
                Some(Err(VoxError::DeviceUnavailable(msg)))
            },
            default(POLL_INTERVAL) => None,
        };
        if let Some(result) = step {
            break result;
        }
        if !keep_going() {
            break Ok(PlaybackEnd::Cancelled);
        }
        if Instant::now() > deadline {
            let played = cursor.load(Ordering::Relaxed);
            warn!(played, total, "playback did not finish in time, closing stream");
            break Ok(PlaybackEnd::TimedOut { played, total });
        }
    };
    drop(guard);
    debug!(?outcome, "playback ended");
    outcome
}
