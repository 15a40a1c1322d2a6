//! Event types broadcast to the control surface.
//!
//! | Event | Source |
//! |-------|--------|
//! | `EngineStatusEvent` | `VoxEngine::subscribe_status` |
//! | `ConversionEvent` | `VoxEngine::subscribe_conversions` |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted whenever the engine changes state, including forced transitions
/// to `Idle` after a device fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: StreamState,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// What the engine is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    /// No device stream open.
    Idle,
    /// Input stream open, chunks accumulating in a recording session.
    Capturing,
    /// Duplex stream open, chunks transformed and played back live.
    Streaming,
    /// A background conversion is in flight; devices are closed.
    Converting,
}

// ---------------------------------------------------------------------------
// Conversion events
// ---------------------------------------------------------------------------

/// Emitted when a background conversion finishes and its session is still
/// current. Stale results are dropped without an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Session generation the request was submitted under.
    pub generation: u64,
    /// Name of the gateway that served the request (`"local"`, `"remote"`).
    pub gateway: String,
    pub ok: bool,
    /// Sample count of the converted buffer, 0 on failure.
    pub samples: usize,
    pub sample_rate: u32,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_status_event_serializes_with_lowercase_status() {
        let event = EngineStatusEvent {
            status: StreamState::Streaming,
            detail: Some("live".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "streaming");
        assert_eq!(json["detail"], "live");

        let round_trip: EngineStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.status, StreamState::Streaming);
        assert_eq!(round_trip.detail.as_deref(), Some("live"));
    }

    #[test]
    fn stream_state_rejects_non_lowercase_values() {
        let err = serde_json::from_str::<StreamState>(r#""Idle""#);
        assert!(err.is_err(), "expected invalid casing to fail");
    }

    #[test]
    fn conversion_event_serializes_with_camel_case_fields() {
        let event = ConversionEvent {
            seq: 2,
            generation: 5,
            gateway: "local".into(),
            ok: true,
            samples: 44_100,
            sample_rate: 44_100,
            detail: None,
        };

        let json = serde_json::to_value(&event).expect("serialize conversion event");
        assert_eq!(json["seq"], 2);
        assert_eq!(json["generation"], 5);
        assert_eq!(json["sampleRate"], 44_100);
        assert!(json["detail"].is_null());

        let round_trip: ConversionEvent =
            serde_json::from_value(json).expect("deserialize conversion event");
        assert!(round_trip.ok);
        assert_eq!(round_trip.samples, 44_100);
    }
}
