use crate::features::instance_management::repo::{ContainerRuntime, InstanceRepository};
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use chrono::Utc;
use std::sync::Arc;
use streamvisor_core::{ControlAction, ControlMessage, Instance, InstanceStatus};
use streamvisor_runtime::{RuntimeError, DEFAULT_STOP_TIMEOUT};
use tracing::{error, info, warn};

/// Width of the `id` column in the instance store.
pub const MAX_INSTANCE_ID_LEN: usize = 50;

/// Service for managing stream-processor instances.
///
/// Each action pairs one container operation with the matching store
/// mutation. The container is touched first; the record only moves once
/// the runtime confirmed the transition.
pub struct InstanceService {
    repo: Arc<dyn InstanceRepository>,
    runtime: Arc<dyn ContainerRuntime>,
}

impl InstanceService {
    pub fn new(repo: Arc<dyn InstanceRepository>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { repo, runtime }
    }

    pub async fn handle(&self, message: &ControlMessage) -> ControlPlaneResult<()> {
        let id = message.device_id.as_str();
        match &message.action {
            ControlAction::Create { stream_url } => self.provision(id, stream_url).await,
            ControlAction::Remove => self.remove(id).await,
            ControlAction::Pause => self.pause(id).await,
            ControlAction::Resume => self.resume(id).await,
            ControlAction::Stop => self.stop(id).await,
            ControlAction::Start => self.start(id).await,
        }
    }

    pub async fn get_instance(&self, instance_id: &str) -> ControlPlaneResult<Instance> {
        self.repo
            .get(instance_id)
            .await?
            .ok_or_else(|| ControlPlaneError::InstanceNotFound(instance_id.to_string()))
    }

    pub async fn create_instance(&self, instance: Instance) -> ControlPlaneResult<String> {
        instance.validate()?;
        let id = self.repo.create(instance).await?;
        info!(instance_id = %id, "Instance created");
        Ok(id)
    }

    pub async fn update_instance(&self, instance: &Instance) -> ControlPlaneResult<()> {
        instance.validate()?;
        match self.repo.update(instance).await? {
            0 => Err(ControlPlaneError::InstanceNotFound(instance.id().to_string())),
            _ => {
                info!(instance_id = %instance.id(), status = %instance.status(), "Instance updated");
                Ok(())
            }
        }
    }

    pub async fn delete_instance(&self, instance_id: &str) -> ControlPlaneResult<()> {
        match self.repo.delete(instance_id).await? {
            0 => Err(ControlPlaneError::InstanceNotFound(instance_id.to_string())),
            _ => {
                info!(instance_id = %instance_id, "Instance deleted");
                Ok(())
            }
        }
    }

    /// Persist an ACTIVE record, then run its container.
    ///
    /// A failed run rolls the record back, so no instance is left without
    /// a container.
    async fn provision(&self, id: &str, stream_url: &str) -> ControlPlaneResult<()> {
        if id.len() > MAX_INSTANCE_ID_LEN {
            return Err(ControlPlaneError::ValidationError(format!(
                "device_id longer than {MAX_INSTANCE_ID_LEN} characters"
            )));
        }
        if self.repo.get(id).await?.is_some() {
            return Err(ControlPlaneError::InstanceAlreadyExists(id.to_string()));
        }

        self.create_instance(Instance::activated(id)).await?;

        let args = vec!["--source".to_string(), stream_url.to_string()];
        if let Err(e) = self.runtime.run_container(id, &args).await {
            error!(instance_id = %id, error = %e, "Container did not start, rolling back instance");
            if let Err(rollback) = self.repo.delete(id).await {
                error!(instance_id = %id, error = %rollback, "Rollback of instance record failed");
            }
            return Err(e.into());
        }

        info!(instance_id = %id, "Instance provisioned");
        Ok(())
    }

    async fn remove(&self, id: &str) -> ControlPlaneResult<()> {
        self.get_instance(id).await?;

        match self
            .runtime
            .remove_container(id, false, DEFAULT_STOP_TIMEOUT)
            .await
        {
            Ok(()) => {}
            Err(RuntimeError::ContainerNotFound(_)) => {
                warn!(instance_id = %id, "Container already gone, deleting instance record");
            }
            Err(e) => return Err(e.into()),
        }

        self.delete_instance(id).await
    }

    async fn pause(&self, id: &str) -> ControlPlaneResult<()> {
        let instance = self.get_instance(id).await?;
        self.runtime.pause_container(id).await?;
        self.apply_status(&instance, InstanceStatus::Paused).await
    }

    async fn resume(&self, id: &str) -> ControlPlaneResult<()> {
        let instance = self.get_instance(id).await?;
        self.runtime.unpause_container(id).await?;
        self.apply_status(&instance, InstanceStatus::Active).await
    }

    async fn stop(&self, id: &str) -> ControlPlaneResult<()> {
        let instance = self.get_instance(id).await?;
        self.runtime.stop_container(id, DEFAULT_STOP_TIMEOUT).await?;
        self.apply_status(&instance, InstanceStatus::Inactive).await
    }

    async fn start(&self, id: &str) -> ControlPlaneResult<()> {
        let instance = self.get_instance(id).await?;
        self.runtime.start_container(id).await?;
        self.apply_status(&instance, InstanceStatus::Active).await
    }

    async fn apply_status(
        &self,
        instance: &Instance,
        status: InstanceStatus,
    ) -> ControlPlaneResult<()> {
        let updated = instance.transition(status, Utc::now())?;
        self.update_instance(&updated).await
    }
}
