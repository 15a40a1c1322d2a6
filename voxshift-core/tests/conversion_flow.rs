use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use voxshift_core::{
    ConversionGateway, EngineConfig, LocalGateway, PlaybackEnd, SampleBuffer, StreamState,
    SyntheticBackend, TaskOutcome, VoiceSelector, VoxEngine, VoxError,
};

fn tone(len: usize) -> SampleBuffer {
    let samples = (0..len)
        .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 44_100.0).sin())
        .collect();
    SampleBuffer::new(samples, 44_100).unwrap()
}

fn engine(gateway: Arc<dyn ConversionGateway>) -> (VoxEngine, Arc<SyntheticBackend>) {
    let synth = Arc::new(SyntheticBackend::new().with_block(512, Duration::from_millis(1)));
    let engine = VoxEngine::new(
        EngineConfig {
            chunk_size: 512,
            drain_interval_ms: 1,
            ..EngineConfig::default()
        },
        synth.clone(),
        gateway,
    )
    .unwrap();
    (engine, synth)
}

/// Blocks inside `convert` until released.
struct GatedGateway {
    release: Mutex<Receiver<()>>,
}

impl GatedGateway {
    fn new() -> (Arc<Self>, Sender<()>) {
        let (tx, rx) = bounded(1);
        (
            Arc::new(Self {
                release: Mutex::new(rx),
            }),
            tx,
        )
    }
}

impl ConversionGateway for GatedGateway {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn convert(
        &self,
        buffer: &SampleBuffer,
        _selector: &VoiceSelector,
    ) -> voxshift_core::Result<SampleBuffer> {
        let _ = self.release.lock().recv_timeout(Duration::from_secs(5));
        Ok(buffer.clone())
    }
}

#[test]
fn local_conversion_completes_and_reports() {
    let (engine, _) = engine(Arc::new(LocalGateway::new()));
    let mut events = engine.subscribe_conversions();
    let source = tone(8_192);

    let handle = engine
        .request_conversion(
            source.clone(),
            VoiceSelector::Preset {
                name: "deep".into(),
            },
        )
        .unwrap();

    let report = handle.wait().completed().expect("current session");
    assert_eq!(report.gateway, "local");
    assert_eq!(report.source, source);
    let converted = report.result.unwrap();
    assert_eq!(converted.len(), source.len());
    assert!(converted.samples().iter().all(|s| (-1.0..=1.0).contains(s)));
    assert_eq!(engine.status(), StreamState::Idle);

    let event = events.try_recv().unwrap();
    assert!(event.ok);
    assert_eq!(event.samples, source.len());
    assert_eq!(event.gateway, "local");
}

#[test]
fn failed_conversion_hands_back_the_source() {
    let (engine, _) = engine(Arc::new(LocalGateway::new()));
    let mut events = engine.subscribe_conversions();
    let source = tone(2_048);

    let report = engine
        .request_conversion(
            source.clone(),
            VoiceSelector::Voice {
                voice_id: "21m00Tcm4TlvDq8ikWAM".into(),
                model_id: None,
            },
        )
        .unwrap()
        .wait()
        .completed()
        .unwrap();

    assert!(matches!(report.result, Err(VoxError::ConversionFailed(_))));
    assert_eq!(report.source, source);
    assert_eq!(engine.status(), StreamState::Idle);
    let event = events.try_recv().unwrap();
    assert!(!event.ok);
    assert!(event.detail.is_some());
}

#[test]
fn empty_buffer_is_rejected_before_submission() {
    let (engine, _) = engine(Arc::new(LocalGateway::new()));
    let generation = engine.generation();
    let err = engine
        .request_conversion(SampleBuffer::empty(44_100), VoiceSelector::Preset {
            name: "robot".into(),
        })
        .err()
        .unwrap();
    assert!(matches!(err, VoxError::EmptyBuffer));
    assert!(matches!(
        engine.playback(SampleBuffer::empty(44_100)).err().unwrap(),
        VoxError::EmptyBuffer
    ));
    assert_eq!(engine.generation(), generation);
    assert_eq!(engine.status(), StreamState::Idle);
}

#[test]
fn conversion_is_rejected_while_streaming() {
    let (engine, _) = engine(Arc::new(LocalGateway::new()));
    engine.start_streaming().unwrap();
    let err = engine
        .request_conversion(tone(1_024), VoiceSelector::Preset {
            name: "male".into(),
        })
        .err()
        .unwrap();
    assert!(matches!(
        err,
        VoxError::StateConflict {
            current: StreamState::Streaming,
            ..
        }
    ));
    assert!(matches!(
        engine.playback(tone(1_024)).err().unwrap(),
        VoxError::StateConflict { .. }
    ));
    engine.stop_streaming().unwrap();
}

#[test]
fn result_from_a_superseded_session_is_discarded() {
    let (gateway, release) = GatedGateway::new();
    let (engine, _) = engine(gateway);
    let mut events = engine.subscribe_conversions();

    let handle = engine
        .request_conversion(tone(1_024), VoiceSelector::Preset {
            name: "female".into(),
        })
        .unwrap();
    assert_eq!(engine.status(), StreamState::Converting);
    engine.start_recording().unwrap();
    release.send(()).unwrap();

    assert!(matches!(handle.wait(), TaskOutcome::Stale));
    assert_eq!(engine.status(), StreamState::Capturing);
    assert!(events.try_recv().is_err());
    engine.stop_recording().unwrap();
}

#[test]
fn on_complete_delivers_report_off_the_caller_thread() {
    let (engine, _) = engine(Arc::new(LocalGateway::new()));
    let (tx, rx) = bounded(1);
    engine
        .request_conversion(tone(4_096), VoiceSelector::Preset {
            name: "robot".into(),
        })
        .unwrap()
        .on_complete(move |outcome| {
            let len = outcome.completed().and_then(|r| r.result.ok()).map(|b| b.len());
            let _ = tx.send(len);
        });
    assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), Some(4_096));
}

#[test]
fn recorded_then_converted_then_played() {
    let (engine, synth) = engine(Arc::new(LocalGateway::new()));
    engine.start_recording().unwrap();
    while synth.input_callbacks() < 4 {
        std::thread::sleep(Duration::from_millis(2));
    }
    let recording = engine.stop_recording().unwrap().unwrap();

    let report = engine
        .request_conversion(recording, VoiceSelector::Preset {
            name: "chipmunk".into(),
        })
        .unwrap()
        .wait()
        .completed()
        .unwrap();
    let converted = report.result.unwrap();
    assert_eq!(converted.len(), report.source.len());

    synth.take_output();
    let end = engine.playback(converted.clone()).unwrap().wait();
    assert!(matches!(end, TaskOutcome::Completed(Ok(PlaybackEnd::Finished))));
    assert!(synth.take_output().len() >= converted.len() * 2);
    assert_eq!(synth.open_streams(), 0);
}
