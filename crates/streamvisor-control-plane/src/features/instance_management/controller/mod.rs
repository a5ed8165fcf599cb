use crate::features::instance_management::service::InstanceService;
use crate::shared::error::ControlPlaneResult;
use std::sync::Arc;
use streamvisor_core::{ControlMessage, Instance};
use tracing::info;

/// Entry point into instance management for decoded control messages
pub struct InstanceController {
    service: Arc<InstanceService>,
}

impl InstanceController {
    pub fn new(service: Arc<InstanceService>) -> Self {
        Self { service }
    }

    /// Thin wrapper that delegates to service
    pub async fn handle(&self, message: &ControlMessage) -> ControlPlaneResult<()> {
        info!(device_id = %message.device_id, action = %message.action, "Received control request");
        self.service.handle(message).await
    }

    pub async fn get_instance(&self, instance_id: &str) -> ControlPlaneResult<Instance> {
        info!(instance_id = %instance_id, "Received query instance request");
        self.service.get_instance(instance_id).await
    }
}
