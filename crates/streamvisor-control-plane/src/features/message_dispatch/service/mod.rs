use crate::features::instance_management::controller::InstanceController;
use crate::features::message_dispatch::repo::AckPublisher;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use std::sync::Arc;
use streamvisor_core::{AckMessage, ControlMessage, MessageEnvelope};
use tracing::{error, info, warn};

const UNKNOWN_ACTION: &str = "UNKNOWN";

/// What the broker should do with a delivery once it was processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The message reached instance management; `ack` was published.
    Handled { ack: AckMessage },
    /// The body could not be decoded. `ack` is set when the sender could
    /// still be identified and was told.
    Rejected {
        ack: Option<AckMessage>,
        reason: String,
    },
}

/// Turns one control message into exactly one lifecycle action and one
/// acknowledgment.
///
/// Handler failures become failure acknowledgments; only publish failures
/// are returned to the caller.
pub struct DispatchService {
    instances: Arc<InstanceController>,
    publisher: Arc<dyn AckPublisher>,
}

impl DispatchService {
    pub fn new(instances: Arc<InstanceController>, publisher: Arc<dyn AckPublisher>) -> Self {
        Self {
            instances,
            publisher,
        }
    }

    pub async fn process(&self, body: &[u8]) -> ControlPlaneResult<DispatchOutcome> {
        let message = match ControlMessage::decode(body) {
            Ok(message) => message,
            Err(e) => return self.reject(body, e.into()).await,
        };

        let ack = self.execute(&message).await;
        self.publisher.publish(&ack).await?;
        Ok(DispatchOutcome::Handled { ack })
    }

    /// Run the action and build its acknowledgment. Never fails.
    pub async fn execute(&self, message: &ControlMessage) -> AckMessage {
        let device_id = message.device_id.as_str();
        let action = message.action.name();

        match self.instances.handle(message).await {
            Ok(()) if message.action.is_remove() => {
                info!(device_id = %device_id, action, "Action completed");
                AckMessage::deleted(device_id)
            }
            Ok(()) => {
                info!(device_id = %device_id, action, "Action completed");
                AckMessage::ok(device_id, action)
            }
            Err(e) => {
                error!(device_id = %device_id, action, error = %e, "Action failed");
                AckMessage::failure(e.ack_code(), device_id, action, e.to_string())
            }
        }
    }

    async fn reject(
        &self,
        body: &[u8],
        error: ControlPlaneError,
    ) -> ControlPlaneResult<DispatchOutcome> {
        let reason = error.to_string();
        let envelope = MessageEnvelope::peek(body);
        let Some(device_id) = envelope.device_id else {
            error!(reason = %reason, "Dropping undecodable control message without device_id");
            return Ok(DispatchOutcome::Rejected { ack: None, reason });
        };

        warn!(device_id = %device_id, reason = %reason, "Rejecting invalid control message");
        let action = envelope.action.unwrap_or_else(|| UNKNOWN_ACTION.to_string());
        let ack = AckMessage::failure(error.ack_code(), device_id, action, reason.clone());
        self.publisher.publish(&ack).await?;

        Ok(DispatchOutcome::Rejected {
            ack: Some(ack),
            reason,
        })
    }
}
