//! Application payload encodings carried as opaque bytes by the bridge.
//!
//! The wire formats are shared with collaborator processes and must stay
//! bit-compatible: meter readings are JSON objects, camera commands are
//! two-element JSON arrays with `null` source for the stop form, chat lines
//! are plain UTF-8 text, and change notifications are minimal `{"id": ...}`
//! objects.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::bus::{BusError, Result};

/// Meter reading state, encoded as an integer on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MeterState {
    /// Regular measured value.
    Value = 1,
    /// Meter came online.
    Online = 2,
    /// Meter went offline.
    Offline = 3,
}

impl From<MeterState> for u8 {
    fn from(state: MeterState) -> u8 {
        state as u8
    }
}

impl TryFrom<u8> for MeterState {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(MeterState::Value),
            2 => Ok(MeterState::Online),
            3 => Ok(MeterState::Offline),
            other => Err(format!("unknown meter state {}", other)),
        }
    }
}

/// One meter measurement: `{"id": "...", "ts": ..., "value": ..., "state": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    /// Meter identifier (hierarchical routing uses it as the instance id).
    pub id: String,
    /// Unix timestamp, seconds.
    pub ts: f64,
    /// Measured value.
    pub value: f64,
    /// Reading state.
    pub state: MeterState,
}

/// Camera command tuple: `[cam_id, source_uri]`, with `null` source meaning
/// stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CamCommand(pub i64, pub Option<String>);

impl CamCommand {
    /// Start capturing `source_uri` on camera `cam_id`.
    pub fn start(cam_id: i64, source_uri: impl Into<String>) -> Self {
        Self(cam_id, Some(source_uri.into()))
    }

    /// Stop capturing on camera `cam_id`.
    pub fn stop(cam_id: i64) -> Self {
        Self(cam_id, None)
    }

    pub fn cam_id(&self) -> i64 {
        self.0
    }

    pub fn source_uri(&self) -> Option<&str> {
        self.1.as_deref()
    }

    pub fn is_stop(&self) -> bool {
        self.1.is_none()
    }
}

/// Database-update notification: `{"id": "..."}` on the updates exchange.
///
/// The original worker published these with an empty body, which its own
/// viewer could never parse; carrying the id makes the notification usable
/// while the routing key stays `meter.<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNotice {
    /// Identifier of the entity whose stored data changed.
    pub id: String,
}

/// Decode a JSON payload. The bridge never interprets payloads itself; this
/// is the application-side boundary where opaque bytes become structure.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| BusError::Decode(e.to_string()))
}

/// Encode a value as a JSON payload.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| BusError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_reading_round_trip() {
        let reading = MeterReading {
            id: "m1".to_string(),
            ts: 1000.0,
            value: 42.0,
            state: MeterState::Value,
        };
        let bytes = encode(&reading).unwrap();
        let decoded: MeterReading = decode(&bytes).unwrap();
        assert_eq!(decoded, reading);
    }

    #[test]
    fn test_meter_state_encodes_as_integer() {
        let json = serde_json::to_value(MeterState::Value).unwrap();
        assert_eq!(json, serde_json::json!(1));
        assert_eq!(serde_json::to_value(MeterState::Online).unwrap(), serde_json::json!(2));
        assert_eq!(serde_json::to_value(MeterState::Offline).unwrap(), serde_json::json!(3));
    }

    #[test]
    fn test_meter_reading_decodes_collaborator_form() {
        // Exactly what meter_emu publishes.
        let bytes = br#"{"id":"m1","ts":1000.0,"value":42,"state":1}"#;
        let reading: MeterReading = decode(bytes).unwrap();
        assert_eq!(reading.id, "m1");
        assert_eq!(reading.ts, 1000.0);
        assert_eq!(reading.value, 42.0);
        assert_eq!(reading.state, MeterState::Value);
    }

    #[test]
    fn test_unknown_meter_state_is_decode_error() {
        let bytes = br#"{"id":"m1","ts":1.0,"value":0,"state":9}"#;
        let result: Result<MeterReading> = decode(bytes);
        assert!(matches!(result, Err(BusError::Decode(_))));
    }

    #[test]
    fn test_cam_command_is_json_array() {
        let start = CamCommand::start(7, "rtsp://cam/h264.sdp");
        let bytes = encode(&start).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"[7,"rtsp://cam/h264.sdp"]"#
        );

        let stop = CamCommand::stop(7);
        let bytes = encode(&stop).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "[7,null]");
    }

    #[test]
    fn test_cam_command_round_trip() {
        for command in [CamCommand::start(3, "rtsp://x"), CamCommand::stop(3)] {
            let bytes = encode(&command).unwrap();
            let decoded: CamCommand = decode(&bytes).unwrap();
            assert_eq!(decoded, command);
        }
        assert!(CamCommand::stop(3).is_stop());
        assert!(!CamCommand::start(3, "rtsp://x").is_stop());
    }

    #[test]
    fn test_update_notice_round_trip() {
        let notice = UpdateNotice { id: "m1".to_string() };
        let bytes = encode(&notice).unwrap();
        assert_eq!(String::from_utf8(bytes.clone()).unwrap(), r#"{"id":"m1"}"#);
        let decoded: UpdateNotice = decode(&bytes).unwrap();
        assert_eq!(decoded, notice);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let result: Result<MeterReading> = decode(b"not json");
        assert!(matches!(result, Err(BusError::Decode(_))));
    }
}
