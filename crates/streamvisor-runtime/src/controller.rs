//! Container lifecycle controller.
//!
//! Drives the engine through the execution bridge. `run_container` and
//! `start_container` only return `Ok` once the worker logged its final
//! goal; on any goal failure the container is force-removed before the
//! error is returned, so a failed start never leaves a container behind.
//!
//! Forced cleanup runs on its own bridge. A log scan that timed out keeps
//! its worker until the container is gone, so cleanup must never wait on
//! the workers those scans hold.

use crate::bridge::ExecutionBridge;
use crate::config::{RunConfig, DEFAULT_STOP_TIMEOUT};
use crate::engine::{ContainerEngine, ContainerStatus, ManagedContainer};
use crate::error::{RuntimeError, RuntimeResult};
use crate::goal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct ContainerController<E: ContainerEngine> {
    engine: Arc<E>,
    bridge: ExecutionBridge,
    cleanup: ExecutionBridge,
    config: Arc<RunConfig>,
}

impl<E: ContainerEngine> Clone for ContainerController<E> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            bridge: self.bridge.clone(),
            cleanup: self.cleanup.clone(),
            config: self.config.clone(),
        }
    }
}

impl<E: ContainerEngine> ContainerController<E> {
    pub fn new(engine: Arc<E>, config: RunConfig) -> Self {
        let bridge = ExecutionBridge::new(config.workers);
        let cleanup = ExecutionBridge::new(config.workers);
        Self {
            engine,
            bridge,
            cleanup,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub async fn check_health(&self) -> RuntimeResult<()> {
        let engine = self.engine.clone();
        self.bridge
            .run("ping", move || engine.ping())
            .await
            .map_err(|e| {
                error!(error = %e, "Container engine not responsive");
                match e {
                    RuntimeError::EngineUnavailable(_) => e,
                    other => RuntimeError::EngineUnavailable(other.to_string()),
                }
            })
    }

    pub async fn get_container(&self, name: &str) -> RuntimeResult<ManagedContainer> {
        self.inspect_on(&self.bridge, name).await
    }

    async fn inspect_on(
        &self,
        bridge: &ExecutionBridge,
        name: &str,
    ) -> RuntimeResult<ManagedContainer> {
        info!(container = %name, "Getting container");
        let engine = self.engine.clone();
        let owned = name.to_string();
        bridge
            .run("inspect", move || engine.inspect(&owned))
            .await
            .inspect_err(|e| match e {
                RuntimeError::ContainerNotFound(_) => {
                    error!(container = %name, "Container not found")
                }
                other => error!(container = %name, error = %other, "Error getting container"),
            })
    }

    pub async fn run_container(&self, name: &str, extra_args: &[String]) -> RuntimeResult<()> {
        info!(container = %name, image = %self.config.image, "Creating container");
        let spec = self.config.container_spec(name, extra_args);
        let engine = self.engine.clone();

        self.bridge
            .run("create", move || engine.create(&spec))
            .await
            .inspect_err(|e| error!(container = %name, error = %e, "Error creating container"))?;

        let engine = self.engine.clone();
        let owned = name.to_string();
        if let Err(e) = self.bridge.run("start", move || engine.start(&owned)).await {
            error!(container = %name, error = %e, "Error starting container");
            self.discard(name).await;
            return Err(e);
        }

        self.await_goals(name).await
    }

    pub async fn start_container(&self, name: &str) -> RuntimeResult<()> {
        let container = self.get_container(name).await?;
        info!(container = %name, status = %container.status, "Starting container");

        let engine = self.engine.clone();
        let owned = name.to_string();
        self.bridge
            .run("start", move || engine.start(&owned))
            .await
            .inspect_err(|e| error!(container = %name, error = %e, "Error starting container"))?;

        self.await_goals(name).await
    }

    pub async fn stop_container(&self, name: &str, timeout: Duration) -> RuntimeResult<()> {
        self.get_container(name).await?;
        info!(container = %name, timeout_secs = timeout.as_secs(), "Stopping container");

        let engine = self.engine.clone();
        let owned = name.to_string();
        self.bridge
            .run("stop", move || engine.stop(&owned, timeout))
            .await
            .inspect_err(|e| error!(container = %name, error = %e, "Error stopping container"))
    }

    pub async fn pause_container(&self, name: &str) -> RuntimeResult<()> {
        self.get_container(name).await?;
        info!(container = %name, "Pausing container");

        let engine = self.engine.clone();
        let owned = name.to_string();
        self.bridge
            .run("pause", move || engine.pause(&owned))
            .await
            .inspect_err(|e| error!(container = %name, error = %e, "Error pausing container"))
    }

    pub async fn unpause_container(&self, name: &str) -> RuntimeResult<()> {
        self.get_container(name).await?;
        info!(container = %name, "Unpausing container");

        let engine = self.engine.clone();
        let owned = name.to_string();
        self.bridge
            .run("unpause", move || engine.unpause(&owned))
            .await
            .inspect_err(|e| error!(container = %name, error = %e, "Error unpausing container"))
    }

    /// Stop (unless already exited) and remove.
    ///
    /// With `force` the container is removed immediately after the stop;
    /// otherwise removal waits for the container to exit on its own.
    pub async fn remove_container(
        &self,
        name: &str,
        force: bool,
        timeout: Duration,
    ) -> RuntimeResult<()> {
        self.remove_on(&self.bridge, name, force, timeout).await
    }

    async fn remove_on(
        &self,
        bridge: &ExecutionBridge,
        name: &str,
        force: bool,
        timeout: Duration,
    ) -> RuntimeResult<()> {
        let container = self.inspect_on(bridge, name).await?;
        let engine = self.engine.clone();

        bridge
            .run("remove", move || {
                let name = container.name.as_str();
                if container.status != ContainerStatus::Exited {
                    info!(container = %name, "Stopping container");
                    match engine.stop(name, timeout) {
                        Ok(()) => {}
                        Err(e) if force => {
                            warn!(container = %name, error = %e, "Stop failed, removing anyway")
                        }
                        Err(e) => return Err(e),
                    }
                }

                if force {
                    info!(container = %name, "Forcefully removing container");
                    engine.remove(name, true)
                } else {
                    engine.wait(name)?;
                    info!(container = %name, "Removing container");
                    engine.remove(name, false)
                }
            })
            .await
            .inspect_err(|e| error!(container = %name, error = %e, "Error removing container"))
    }

    async fn await_goals(&self, name: &str) -> RuntimeResult<()> {
        info!(container = %name, timeout_secs = self.config.goal_timeout.as_secs(), "Waiting for goals");

        // the deadline covers the scan only, not the wait for a worker
        let slot = match self.bridge.reserve("follow_logs").await {
            Ok(slot) => slot,
            Err(e) => {
                self.discard(name).await;
                return Err(e);
            }
        };

        let abandoned = Arc::new(AtomicBool::new(false));
        let scan = {
            let engine = self.engine.clone();
            let owned = name.to_string();
            let markers = self.config.goals.clone();
            let tail = self.config.log_tail;
            let abandoned = abandoned.clone();
            slot.run(move || {
                let lines = engine.follow_logs(&owned, tail)?;
                Ok(goal::scan(lines, &markers, &abandoned))
            })
        };

        let failure = match tokio::time::timeout(self.config.goal_timeout, scan).await {
            Ok(Ok(outcome)) if outcome.reached => {
                info!(container = %name, "Container reached its final goal");
                return Ok(());
            }
            Ok(Ok(outcome)) => RuntimeError::ContainerExited {
                name: name.to_string(),
                detail: outcome.detail,
            },
            Ok(Err(e)) => RuntimeError::ContainerExited {
                name: name.to_string(),
                detail: e.to_string(),
            },
            Err(_) => {
                abandoned.store(true, Ordering::Release);
                warn!(container = %name, "Timed out waiting for final goal");
                RuntimeError::GoalTimeout(name.to_string())
            }
        };

        error!(container = %name, error = %failure, "Container failed to start");
        self.discard(name).await;
        Err(failure)
    }

    async fn discard(&self, name: &str) {
        if let Err(e) = self
            .remove_on(&self.cleanup, name, true, DEFAULT_STOP_TIMEOUT)
            .await
        {
            error!(container = %name, error = %e, "Cleanup of failed container did not complete");
        }
    }
}
