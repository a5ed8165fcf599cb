//! Inbound control messages.
//!
//! Wire form: `{"action": "CREATE", "device_id": "cam-1", "device_stream_url": "rtsp://..."}`.
//! Decoding produces a closed [`ControlAction`] where each variant carries
//! exactly the payload it needs, so a CREATE without a stream URL never
//! leaves the decoder.

use crate::{CoreError, Result};
use serde::Deserialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    Create { stream_url: String },
    Remove,
    Pause,
    Resume,
    Stop,
    Start,
}

impl ControlAction {
    pub fn name(&self) -> &'static str {
        match self {
            ControlAction::Create { .. } => "CREATE",
            ControlAction::Remove => "REMOVE",
            ControlAction::Pause => "PAUSE",
            ControlAction::Resume => "RESUME",
            ControlAction::Stop => "STOP",
            ControlAction::Start => "START",
        }
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, ControlAction::Remove)
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub device_id: String,
    pub action: ControlAction,
}

#[derive(Debug, Deserialize)]
struct RawControlMessage {
    action: String,
    device_id: String,
    #[serde(default)]
    device_stream_url: Option<String>,
}

impl ControlMessage {
    pub fn new(device_id: impl Into<String>, action: ControlAction) -> Self {
        Self {
            device_id: device_id.into(),
            action,
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let raw: RawControlMessage = serde_json::from_slice(body)
            .map_err(|e| CoreError::InvalidMessage(e.to_string()))?;

        if raw.device_id.trim().is_empty() {
            return Err(CoreError::MissingField("device_id"));
        }

        let action = match raw.action.as_str() {
            "CREATE" => {
                let stream_url = raw
                    .device_stream_url
                    .filter(|url| !url.trim().is_empty())
                    .ok_or(CoreError::MissingField("device_stream_url"))?;
                ControlAction::Create { stream_url }
            }
            "REMOVE" => ControlAction::Remove,
            "PAUSE" => ControlAction::Pause,
            "RESUME" => ControlAction::Resume,
            "STOP" => ControlAction::Stop,
            "START" => ControlAction::Start,
            other => return Err(CoreError::UnknownAction(other.to_string())),
        };

        Ok(Self {
            device_id: raw.device_id,
            action,
        })
    }
}

/// Best-effort view of a body that failed to decode, used to address a
/// failure acknowledgment when the sender can still be identified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub device_id: Option<String>,
    pub action: Option<String>,
}

impl MessageEnvelope {
    pub fn peek(body: &[u8]) -> Self {
        let value = match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(value) => value,
            Err(_) => return Self::default(),
        };
        let field = |name: &str| {
            value
                .get(name)
                .and_then(serde_json::Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        };
        Self {
            device_id: field("device_id"),
            action: field("action"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_create_with_stream_url() {
        let body = br#"{"action":"CREATE","device_id":"cam-1","device_stream_url":"rtsp://10.0.0.2/live"}"#;
        let message = ControlMessage::decode(body).unwrap();

        assert_eq!(message.device_id, "cam-1");
        assert_eq!(
            message.action,
            ControlAction::Create {
                stream_url: "rtsp://10.0.0.2/live".to_string()
            }
        );
        assert_eq!(message.action.name(), "CREATE");
    }

    #[test]
    fn test_decode_create_without_stream_url_fails() {
        let body = br#"{"action":"CREATE","device_id":"cam-1"}"#;
        assert_eq!(
            ControlMessage::decode(body),
            Err(CoreError::MissingField("device_stream_url"))
        );
    }

    #[test]
    fn test_decode_create_with_blank_stream_url_fails() {
        let body = br#"{"action":"CREATE","device_id":"cam-1","device_stream_url":"  "}"#;
        assert!(ControlMessage::decode(body).is_err());
    }

    #[test]
    fn test_decode_remove_ignores_stream_url() {
        let body = br#"{"action":"REMOVE","device_id":"cam-1","device_stream_url":"rtsp://x"}"#;
        let message = ControlMessage::decode(body).unwrap();
        assert_eq!(message.action, ControlAction::Remove);
        assert!(message.action.is_remove());
    }

    #[test]
    fn test_decode_all_simple_actions() {
        for (name, action) in [
            ("REMOVE", ControlAction::Remove),
            ("PAUSE", ControlAction::Pause),
            ("RESUME", ControlAction::Resume),
            ("STOP", ControlAction::Stop),
            ("START", ControlAction::Start),
        ] {
            let body = format!(r#"{{"action":"{name}","device_id":"cam-7"}}"#);
            let message = ControlMessage::decode(body.as_bytes()).unwrap();
            assert_eq!(message.action, action);
            assert_eq!(message.action.name(), name);
        }
    }

    #[test]
    fn test_decode_unknown_action() {
        let body = br#"{"action":"REBOOT","device_id":"cam-1"}"#;
        assert_eq!(
            ControlMessage::decode(body),
            Err(CoreError::UnknownAction("REBOOT".to_string()))
        );
    }

    #[test]
    fn test_decode_rejects_non_json() {
        let result = ControlMessage::decode(b"not json at all");
        assert!(matches!(result, Err(CoreError::InvalidMessage(_))));
    }

    #[test]
    fn test_decode_rejects_missing_device_id() {
        let result = ControlMessage::decode(br#"{"action":"PAUSE"}"#);
        assert!(matches!(result, Err(CoreError::InvalidMessage(_))));
    }

    #[test]
    fn test_decode_rejects_empty_device_id() {
        let result = ControlMessage::decode(br#"{"action":"PAUSE","device_id":""}"#);
        assert_eq!(result, Err(CoreError::MissingField("device_id")));
    }

    #[test]
    fn test_envelope_peek_salvages_fields() {
        let envelope = MessageEnvelope::peek(br#"{"action":"CREATE","device_id":"cam-3"}"#);
        assert_eq!(envelope.device_id.as_deref(), Some("cam-3"));
        assert_eq!(envelope.action.as_deref(), Some("CREATE"));
    }

    #[test]
    fn test_envelope_peek_on_garbage() {
        assert_eq!(MessageEnvelope::peek(b"\xff\xfe"), MessageEnvelope::default());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn property_arbitrary_bytes_never_panic(body in prop::collection::vec(any::<u8>(), 0..256)) {
                let _ = ControlMessage::decode(&body);
                let _ = MessageEnvelope::peek(&body);
            }

            #[test]
            fn property_device_id_is_preserved(device_id in "[a-z][a-z0-9-]{0,30}") {
                let body = format!(r#"{{"action":"PAUSE","device_id":"{device_id}"}}"#);
                let message = ControlMessage::decode(body.as_bytes()).unwrap();
                prop_assert_eq!(message.device_id, device_id);
            }
        }
    }
}
