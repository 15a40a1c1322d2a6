//! `VoxEngine`: the control boundary.
//!
//! ## Lifecycle
//!
//! ```text
//! VoxEngine::new()
//!     ├─► start_streaming()   Idle → Streaming   (duplex owner thread)
//!     │       └─► stop_streaming()   → Idle, device streams closed
//!     ├─► start_recording()   Idle → Capturing   (capture owner thread)
//!     │       └─► stop_recording()   → Idle, Option<SampleBuffer>
//!     ├─► request_conversion()  → Converting, background worker
//!     │       └─► commit (token still current) → Idle + ConversionEvent
//!     └─► playback()            background worker, state unchanged
//! ```
//!
//! Streaming and Capturing are mutually exclusive; a second start is rejected
//! with `StateConflict` and changes nothing. A device fault forces the state
//! back to `Idle` from the stream's owner thread.
//!
//! ## Sessions
//!
//! Every start and every conversion request advances the session counter.
//! Background results carry the token they were submitted under and are
//! discarded when it is no longer current.

pub mod duplex;
pub mod recording;
pub mod tasks;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    audio::{playback, AudioBackend, CpalBackend, PlaybackEnd, StreamSettings},
    buffering::SampleBuffer,
    convert::{ConversionGateway, VoiceSelector},
    error::{Result, VoxError},
    ipc::events::{ConversionEvent, EngineStatusEvent, StreamState},
    profile::{normalize_profile_name, preset, ProfileSlot, VoiceProfile},
};

pub use duplex::{ChunkProcessor, DiagnosticsSnapshot, StreamDiagnostics};
pub use recording::RecordingSession;
pub use tasks::{BackgroundWorker, SessionCounter, SessionToken, TaskHandle, TaskOutcome};

use duplex::{ActiveStream, FaultHook, StreamKind, StreamPlan};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `VoxEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rate for both device streams (Hz). Default: 44100.
    pub sample_rate: u32,
    /// Samples per real-time chunk. Default: 1024 (~23 ms at 44.1 kHz).
    pub chunk_size: usize,
    /// Output stream channel count; the mono signal is copied to each.
    /// Default: 2.
    pub output_channels: u16,
    /// `None` falls back to the host default device.
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
    /// Processed-audio ring between input and output callbacks, in chunks.
    /// Default: 8.
    pub ring_capacity_chunks: usize,
    /// How often the owner thread drains the capture ring. Default: 5 ms.
    pub drain_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            chunk_size: 1024,
            output_channels: 2,
            preferred_input_device: None,
            preferred_output_device: None,
            ring_capacity_chunks: 8,
            drain_interval_ms: 5,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(VoxError::Other(anyhow::anyhow!("sample_rate must be positive")));
        }
        if self.chunk_size == 0 {
            return Err(VoxError::Other(anyhow::anyhow!("chunk_size must be positive")));
        }
        if self.output_channels == 0 {
            return Err(VoxError::Other(anyhow::anyhow!(
                "output_channels must be positive"
            )));
        }
        Ok(())
    }

    fn output_settings(&self) -> StreamSettings {
        StreamSettings {
            sample_rate: self.sample_rate,
            channels: self.output_channels,
            preferred_device: self.preferred_output_device.clone(),
        }
    }
}

/// Result of a conversion request. The source buffer always comes back, so a
/// failed conversion can be retried without recording again.
#[derive(Debug)]
pub struct ConversionReport {
    pub source: SampleBuffer,
    pub selector: VoiceSelector,
    pub gateway: &'static str,
    pub generation: u64,
    pub result: Result<SampleBuffer>,
}

/// Canonical state plus its event stream. Touched by the control API and by
/// owner threads on device faults; never by audio callbacks.
struct StatusHub {
    state: Mutex<StreamState>,
    tx: broadcast::Sender<EngineStatusEvent>,
}

impl StatusHub {
    fn get(&self) -> StreamState {
        *self.state.lock()
    }

    fn set(&self, status: StreamState, detail: Option<String>) {
        let mut state = self.state.lock();
        *state = status;
        let _ = self.tx.send(EngineStatusEvent { status, detail });
    }

    /// Move to `to` only if currently `from`.
    fn transition(&self, from: StreamState, to: StreamState, detail: Option<String>) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        let _ = self.tx.send(EngineStatusEvent { status: to, detail });
        true
    }
}

/// The top-level engine handle.
///
/// `VoxEngine` is `Send + Sync`; wrap it in an `Arc` to share it with event
/// forwarders.
pub struct VoxEngine {
    config: EngineConfig,
    backend: Arc<dyn AudioBackend>,
    gateway: Arc<dyn ConversionGateway>,
    /// The one open stream set, if any. Held across every start/stop so
    /// control requests are serialised.
    active: Mutex<Option<ActiveStream>>,
    status: Arc<StatusHub>,
    profile: Arc<ProfileSlot>,
    sessions: SessionCounter,
    worker: BackgroundWorker,
    diagnostics: Arc<StreamDiagnostics>,
    conversion_tx: broadcast::Sender<ConversionEvent>,
    seq: Arc<AtomicU64>,
}

impl VoxEngine {
    /// Create an idle engine. No device is opened until a start call.
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn AudioBackend>,
        gateway: Arc<dyn ConversionGateway>,
    ) -> Result<Self> {
        config.validate()?;
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (conversion_tx, _) = broadcast::channel(BROADCAST_CAP);
        info!(
            backend = backend.name(),
            gateway = gateway.name(),
            sample_rate = config.sample_rate,
            chunk_size = config.chunk_size,
            "engine created"
        );
        Ok(Self {
            config,
            backend,
            gateway,
            active: Mutex::new(None),
            status: Arc::new(StatusHub {
                state: Mutex::new(StreamState::Idle),
                tx: status_tx,
            }),
            profile: Arc::new(ProfileSlot::default()),
            sessions: SessionCounter::new(),
            worker: BackgroundWorker::new()?,
            diagnostics: Arc::new(StreamDiagnostics::default()),
            conversion_tx,
            seq: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Engine on the host's real audio devices.
    pub fn with_default_backend(
        config: EngineConfig,
        gateway: Arc<dyn ConversionGateway>,
    ) -> Result<Self> {
        Self::new(config, Arc::new(CpalBackend), gateway)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Profiles ─────────────────────────────────────────────────────────────

    /// Publish a new profile. A running stream picks it up at its next chunk.
    pub fn set_profile(&self, profile: VoiceProfile) -> Result<()> {
        profile.validate()?;
        let name = profile.name.clone();
        let version = self.profile.store(profile);
        debug!(profile = %name, version, "voice profile published");
        Ok(())
    }

    /// Publish a preset by name (aliases accepted).
    pub fn set_profile_by_name(&self, name: &str) -> Result<()> {
        self.set_profile(preset(&normalize_profile_name(name))?)
    }

    pub fn profile(&self) -> Arc<VoiceProfile> {
        self.profile.load()
    }

    // ── Streaming ────────────────────────────────────────────────────────────

    /// Open input and output streams and run the effect chain per chunk.
    ///
    /// Blocks until both devices are confirmed open (or fail).
    ///
    /// # Errors
    /// - `VoxError::StateConflict` if already streaming or capturing.
    /// - `VoxError::DeviceUnavailable` if a device cannot be opened.
    pub fn start_streaming(&self) -> Result<()> {
        let mut active = self.active.lock();
        self.reap_finished(&mut active);
        let current = self.status.get();
        if matches!(current, StreamState::Streaming | StreamState::Capturing) {
            return Err(VoxError::conflict("start streaming", current));
        }

        self.diagnostics.reset();
        let token = self.sessions.advance();
        self.status.set(StreamState::Streaming, None);
        match duplex::spawn_duplex(
            self.stream_plan(),
            self.profile.reader(),
            self.fault_hook(StreamState::Streaming),
        ) {
            Ok(stream) => {
                *active = Some(stream);
                info!(generation = token.generation(), "streaming started");
                Ok(())
            }
            Err(e) => {
                self.status.set(StreamState::Idle, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Close the duplex streams. No callback runs after this returns.
    ///
    /// # Errors
    /// `VoxError::StateConflict` if no duplex stream is open.
    pub fn stop_streaming(&self) -> Result<()> {
        let mut active = self.active.lock();
        let stream = match active.take() {
            Some(s) if s.kind() == StreamKind::Duplex => s,
            other => {
                *active = other;
                return Err(VoxError::conflict("stop streaming", self.status.get()));
            }
        };
        stream.stop();
        self.status
            .transition(StreamState::Streaming, StreamState::Idle, None);
        info!(diagnostics = ?self.diagnostics.snapshot(), "streaming stopped");
        Ok(())
    }

    // ── Recording ────────────────────────────────────────────────────────────

    /// Open the input stream and accumulate raw chunks.
    ///
    /// # Errors
    /// - `VoxError::StateConflict` if already streaming or capturing.
    /// - `VoxError::DeviceUnavailable` if the input device cannot be opened.
    pub fn start_recording(&self) -> Result<()> {
        let mut active = self.active.lock();
        self.reap_finished(&mut active);
        let current = self.status.get();
        if matches!(current, StreamState::Streaming | StreamState::Capturing) {
            return Err(VoxError::conflict("start recording", current));
        }

        let mut session = RecordingSession::new(self.config.sample_rate, self.config.chunk_size);
        session.start()?;
        self.diagnostics.reset();
        let token = self.sessions.advance();
        self.status.set(StreamState::Capturing, None);
        match duplex::spawn_capture(
            self.stream_plan(),
            session,
            self.fault_hook(StreamState::Capturing),
        ) {
            Ok(stream) => {
                *active = Some(stream);
                info!(generation = token.generation(), "recording started");
                Ok(())
            }
            Err(e) => {
                self.status.set(StreamState::Idle, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Close the input stream and hand back everything captured. `Ok(None)`
    /// when nothing was captured. A capture cut short by a device fault still
    /// returns what it got.
    ///
    /// # Errors
    /// `VoxError::StateConflict` if no recording is open.
    pub fn stop_recording(&self) -> Result<Option<SampleBuffer>> {
        let mut active = self.active.lock();
        let stream = match active.take() {
            Some(s) if s.kind() == StreamKind::Capture => s,
            other => {
                *active = other;
                return Err(VoxError::conflict("stop recording", self.status.get()));
            }
        };
        let recording = stream.stop();
        self.status
            .transition(StreamState::Capturing, StreamState::Idle, None);
        info!(
            samples = recording.as_ref().map_or(0, SampleBuffer::len),
            "recording stopped"
        );
        Ok(recording)
    }

    // ── Background work ──────────────────────────────────────────────────────

    /// Convert `buffer` on the background worker.
    ///
    /// The state moves to `Converting` until the result is committed. The
    /// handle resolves `Stale` if another start or conversion happened first.
    ///
    /// # Errors
    /// - `VoxError::EmptyBuffer` for a zero-length buffer.
    /// - `VoxError::StateConflict` while streaming or capturing.
    pub fn request_conversion(
        &self,
        buffer: SampleBuffer,
        selector: VoiceSelector,
    ) -> Result<TaskHandle<ConversionReport>> {
        if buffer.is_empty() {
            return Err(VoxError::EmptyBuffer);
        }
        let _active = self.active.lock();
        let current = self.status.get();
        if matches!(current, StreamState::Streaming | StreamState::Capturing) {
            return Err(VoxError::conflict("convert", current));
        }

        let token = self.sessions.advance();
        let generation = token.generation();
        self.status.set(StreamState::Converting, None);
        info!(
            generation,
            gateway = self.gateway.name(),
            voice = %selector.label(),
            samples = buffer.len(),
            "conversion requested"
        );

        let gateway = Arc::clone(&self.gateway);
        let work = move || {
            let result = gateway.convert(&buffer, &selector);
            if let Err(e) = &result {
                warn!(generation, error = %e, "conversion failed");
            }
            ConversionReport {
                source: buffer,
                selector,
                gateway: gateway.name(),
                generation,
                result,
            }
        };

        let status = Arc::clone(&self.status);
        let tx = self.conversion_tx.clone();
        let seq = Arc::clone(&self.seq);
        let commit = move |report: &ConversionReport| {
            let (ok, samples, sample_rate, detail) = match &report.result {
                Ok(out) => (true, out.len(), out.sample_rate(), None),
                Err(e) => (false, 0, 0, Some(e.to_string())),
            };
            status.transition(StreamState::Converting, StreamState::Idle, detail.clone());
            let _ = tx.send(ConversionEvent {
                seq: seq.fetch_add(1, Ordering::Relaxed),
                generation: report.generation,
                gateway: report.gateway.to_string(),
                ok,
                samples,
                sample_rate,
                detail,
            });
        };

        Ok(self.worker.submit("conversion", token, work, commit))
    }

    /// Play a materialised buffer on the output device from the background
    /// worker. Cancelled when a new session starts.
    ///
    /// # Errors
    /// - `VoxError::EmptyBuffer` for a zero-length buffer.
    /// - `VoxError::StateConflict` while streaming or capturing.
    pub fn playback(&self, buffer: SampleBuffer) -> Result<TaskHandle<Result<PlaybackEnd>>> {
        if buffer.is_empty() {
            return Err(VoxError::EmptyBuffer);
        }
        let _active = self.active.lock();
        let current = self.status.get();
        if matches!(current, StreamState::Streaming | StreamState::Capturing) {
            return Err(VoxError::conflict("play back", current));
        }

        let token = self.sessions.token();
        let still_current = token.clone();
        let backend = Arc::clone(&self.backend);
        let settings = self.config.output_settings();
        Ok(self.worker.submit(
            "playback",
            token,
            move || {
                playback::play_blocking(&*backend, &settings, &buffer, &|| {
                    still_current.is_current()
                })
            },
            |_| {},
        ))
    }

    // ── Observability ────────────────────────────────────────────────────────

    pub fn status(&self) -> StreamState {
        self.status.get()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status.tx.subscribe()
    }

    pub fn subscribe_conversions(&self) -> broadcast::Receiver<ConversionEvent> {
        self.conversion_tx.subscribe()
    }

    /// Counters of the current (or last) stream.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Current session generation.
    pub fn generation(&self) -> u64 {
        self.sessions.generation()
    }

    /// Close any open stream and invalidate in-flight background work.
    pub fn shutdown(&self) {
        let mut active = self.active.lock();
        if let Some(stream) = active.take() {
            debug!(kind = ?stream.kind(), "closing stream on shutdown");
            stream.stop();
        }
        self.sessions.advance();
        if self.status.get() != StreamState::Idle {
            self.status.set(StreamState::Idle, None);
        }
        info!("engine shut down");
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn stream_plan(&self) -> StreamPlan {
        StreamPlan {
            backend: Arc::clone(&self.backend),
            input: StreamSettings::mono_input(
                self.config.sample_rate,
                self.config.preferred_input_device.clone(),
            ),
            output: self.config.output_settings(),
            chunk_size: self.config.chunk_size,
            ring_chunks: self.config.ring_capacity_chunks,
            drain_interval: Duration::from_millis(self.config.drain_interval_ms),
            diagnostics: Arc::clone(&self.diagnostics),
        }
    }

    fn fault_hook(&self, running: StreamState) -> FaultHook {
        let status = Arc::clone(&self.status);
        Box::new(move |msg| {
            status.transition(running, StreamState::Idle, Some(msg));
        })
    }

    /// Drop a stream whose owner thread already exited after a device fault.
    fn reap_finished(&self, active: &mut Option<ActiveStream>) {
        if !active.as_ref().is_some_and(ActiveStream::is_finished) {
            return;
        }
        if let Some(stream) = active.take() {
            let kind = stream.kind();
            if stream.stop().is_some() {
                warn!(?kind, "discarding recording from faulted capture");
            }
        }
    }
}

impl Drop for VoxEngine {
    fn drop(&mut self) {
        if self.active.get_mut().is_some() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SyntheticBackend;
    use crate::convert::LocalGateway;

    fn engine() -> (VoxEngine, Arc<SyntheticBackend>) {
        let synth = Arc::new(SyntheticBackend::new().with_block(256, Duration::from_millis(1)));
        let engine = VoxEngine::new(
            EngineConfig {
                chunk_size: 256,
                drain_interval_ms: 1,
                ..EngineConfig::default()
            },
            synth.clone(),
            Arc::new(LocalGateway::new()),
        )
        .unwrap();
        (engine, synth)
    }

    #[test]
    fn config_validation_rejects_zero_sizes() {
        assert!(EngineConfig::default().validate().is_ok());
        let bad = EngineConfig {
            chunk_size: 0,
            ..EngineConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn stop_without_start_conflicts() {
        let (engine, _) = engine();
        assert!(matches!(
            engine.stop_streaming(),
            Err(VoxError::StateConflict { .. })
        ));
        assert!(matches!(
            engine.stop_recording(),
            Err(VoxError::StateConflict { .. })
        ));
        assert_eq!(engine.status(), StreamState::Idle);
    }

    #[test]
    fn set_profile_by_alias_and_reject_invalid() {
        let (engine, _) = engine();
        engine.set_profile_by_name("Robotic").unwrap();
        assert_eq!(engine.profile().name, "robot");
        let mut bad = VoiceProfile::neutral();
        bad.formant_factor = 0.0;
        assert!(engine.set_profile(bad).is_err());
        assert_eq!(engine.profile().name, "robot");
        assert!(matches!(
            engine.set_profile_by_name("opera"),
            Err(VoxError::UnknownProfile(_))
        ));
    }

    #[test]
    fn status_events_follow_transitions() {
        let (engine, _) = engine();
        let mut rx = engine.subscribe_status();
        engine.start_streaming().unwrap();
        engine.stop_streaming().unwrap();
        assert_eq!(rx.try_recv().unwrap().status, StreamState::Streaming);
        assert_eq!(rx.try_recv().unwrap().status, StreamState::Idle);
    }

    #[test]
    fn shutdown_closes_open_streams() {
        let (engine, synth) = engine();
        engine.start_recording().unwrap();
        engine.shutdown();
        assert_eq!(synth.open_streams(), 0);
        assert_eq!(engine.status(), StreamState::Idle);
    }
}
