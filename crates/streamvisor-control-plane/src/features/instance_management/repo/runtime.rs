//! Container runtime seam used by instance management.

use async_trait::async_trait;
use std::time::Duration;
use streamvisor_runtime::{ContainerController, ContainerEngine, RuntimeResult};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn run_container(&self, name: &str, args: &[String]) -> RuntimeResult<()>;

    async fn start_container(&self, name: &str) -> RuntimeResult<()>;

    async fn stop_container(&self, name: &str, timeout: Duration) -> RuntimeResult<()>;

    async fn pause_container(&self, name: &str) -> RuntimeResult<()>;

    async fn unpause_container(&self, name: &str) -> RuntimeResult<()>;

    async fn remove_container(&self, name: &str, force: bool, timeout: Duration)
        -> RuntimeResult<()>;
}

#[async_trait]
impl<E: ContainerEngine> ContainerRuntime for ContainerController<E> {
    async fn run_container(&self, name: &str, args: &[String]) -> RuntimeResult<()> {
        ContainerController::run_container(self, name, args).await
    }

    async fn start_container(&self, name: &str) -> RuntimeResult<()> {
        ContainerController::start_container(self, name).await
    }

    async fn stop_container(&self, name: &str, timeout: Duration) -> RuntimeResult<()> {
        ContainerController::stop_container(self, name, timeout).await
    }

    async fn pause_container(&self, name: &str) -> RuntimeResult<()> {
        ContainerController::pause_container(self, name).await
    }

    async fn unpause_container(&self, name: &str) -> RuntimeResult<()> {
        ContainerController::unpause_container(self, name).await
    }

    async fn remove_container(
        &self,
        name: &str,
        force: bool,
        timeout: Duration,
    ) -> RuntimeResult<()> {
        ContainerController::remove_container(self, name, force, timeout).await
    }
}
