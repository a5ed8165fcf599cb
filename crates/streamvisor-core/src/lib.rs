pub mod ack;
pub mod instance;
pub mod message;

pub use ack::{AckCode, AckMessage, AckQueue, DeleteAck, StatusAck};
pub use instance::{Instance, InstanceStatus};
pub use message::{ControlAction, ControlMessage, MessageEnvelope};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Invalid timestamps for instance {instance_id}: updated_at precedes created_at")]
    InvalidTimestamps { instance_id: String },
    #[error("Invalid instance status: {0}")]
    InvalidStatus(String),
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
