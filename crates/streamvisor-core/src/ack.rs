//! Outcome reports published back to the broker.

use crate::{CoreError, Result};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum AckCode {
    Ok = 2000,
    Failed = 4000,
    InvalidMessage = 4001,
}

impl AckCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn is_success(self) -> bool {
        matches!(self, AckCode::Ok)
    }
}

impl Serialize for AckCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.as_u16())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusAck {
    pub code: AckCode,
    pub device_id: String,
    pub state: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteAck {
    pub device_id: String,
}

/// Which outbound queue an acknowledgment belongs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckQueue {
    Status,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AckMessage {
    Status(StatusAck),
    Delete(DeleteAck),
}

impl AckMessage {
    pub fn ok(device_id: impl Into<String>, state: impl Into<String>) -> Self {
        AckMessage::Status(StatusAck {
            code: AckCode::Ok,
            device_id: device_id.into(),
            state: state.into(),
            message: "OK".to_string(),
        })
    }

    /// Status acknowledgment for an unsuccessful action.
    pub fn failure(
        code: AckCode,
        device_id: impl Into<String>,
        state: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        AckMessage::Status(StatusAck {
            code,
            device_id: device_id.into(),
            state: state.into(),
            message: message.into(),
        })
    }

    pub fn deleted(device_id: impl Into<String>) -> Self {
        AckMessage::Delete(DeleteAck {
            device_id: device_id.into(),
        })
    }

    pub fn queue(&self) -> AckQueue {
        match self {
            AckMessage::Status(_) => AckQueue::Status,
            AckMessage::Delete(_) => AckQueue::Delete,
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            AckMessage::Status(ack) => &ack.device_id,
            AckMessage::Delete(ack) => &ack.device_id,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CoreError::SerializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn as_json(ack: &AckMessage) -> Value {
        serde_json::from_slice(&ack.to_bytes().unwrap()).unwrap()
    }

    #[test]
    fn test_ok_ack_wire_format() {
        let ack = AckMessage::ok("cam-1", "CREATE");
        assert_eq!(
            as_json(&ack),
            json!({"code": 2000, "device_id": "cam-1", "state": "CREATE", "message": "OK"})
        );
        assert_eq!(ack.queue(), AckQueue::Status);
    }

    #[test]
    fn test_failed_ack_wire_format() {
        let ack = AckMessage::failure(
            AckCode::Failed,
            "cam-1",
            "REMOVE",
            "Instance not found: cam-1",
        );
        assert_eq!(
            as_json(&ack),
            json!({
                "code": 4000,
                "device_id": "cam-1",
                "state": "REMOVE",
                "message": "Instance not found: cam-1"
            })
        );
        assert_eq!(ack.queue(), AckQueue::Status);
    }

    #[test]
    fn test_delete_ack_wire_format() {
        let ack = AckMessage::deleted("cam-1");
        assert_eq!(as_json(&ack), json!({"device_id": "cam-1"}));
        assert_eq!(ack.queue(), AckQueue::Delete);
        assert_eq!(ack.device_id(), "cam-1");
    }

    #[test]
    fn test_invalid_message_code() {
        let ack = AckMessage::failure(
            AckCode::InvalidMessage,
            "cam-2",
            "CREATE",
            "Missing field: device_stream_url",
        );
        match ack {
            AckMessage::Status(status) => {
                assert_eq!(status.code, AckCode::InvalidMessage);
                assert_eq!(status.code.as_u16(), 4001);
                assert!(!status.code.is_success());
            }
            AckMessage::Delete(_) => panic!("expected status ack"),
        }
    }

    #[test]
    fn test_code_values() {
        assert_eq!(AckCode::Ok.as_u16(), 2000);
        assert_eq!(AckCode::Failed.as_u16(), 4000);
        assert!(AckCode::Ok.is_success());
    }
}
