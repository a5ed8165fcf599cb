//! Docker implementation of [`ContainerEngine`] on top of bollard.
//!
//! bollard is async; each blocking call drives its future to completion on
//! the captured runtime handle. This is only valid from threads outside the
//! async scheduler, which is what the execution bridge provides.

use crate::config::{ContainerSpec, RestartPolicy};
use crate::engine::{ContainerEngine, ContainerStatus, LogStream, ManagedContainer};
use crate::error::{RuntimeError, RuntimeResult};
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{
    ContainerCreateBody, ContainerStateStatusEnum, DeviceRequest as BollardDeviceRequest,
    HostConfig, RestartPolicy as BollardRestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, InspectContainerOptions, LogsOptionsBuilder,
    RemoveContainerOptionsBuilder, StartContainerOptions, StopContainerOptionsBuilder,
    WaitContainerOptions,
};
use bollard::Docker;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;

pub struct DockerEngine {
    docker: Docker,
    handle: Handle,
}

impl DockerEngine {
    /// Connect using the local defaults (`DOCKER_HOST` or the unix socket).
    pub fn connect_local(handle: Handle) -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::EngineUnavailable(e.to_string()))?;
        Ok(Self { docker, handle })
    }

    fn status_of(&self, name: &str) -> RuntimeResult<ContainerStatus> {
        let response = self
            .handle
            .block_on(
                self.docker
                    .inspect_container(name, None::<InspectContainerOptions>),
            )
            .map_err(|e| map_error("inspect_container", name, e))?;

        Ok(response
            .state
            .and_then(|state| state.status)
            .map(status_from_engine)
            .unwrap_or(ContainerStatus::Unknown))
    }
}

impl ContainerEngine for DockerEngine {
    fn ping(&self) -> RuntimeResult<()> {
        self.handle
            .block_on(self.docker.ping())
            .map(|_| ())
            .map_err(|e| RuntimeError::EngineUnavailable(e.to_string()))
    }

    fn inspect(&self, name: &str) -> RuntimeResult<ManagedContainer> {
        let status = self.status_of(name)?;
        Ok(ManagedContainer {
            name: name.to_string(),
            status,
        })
    }

    fn create(&self, spec: &ContainerSpec) -> RuntimeResult<()> {
        let options = CreateContainerOptionsBuilder::new().name(&spec.name).build();
        self.handle
            .block_on(self.docker.create_container(Some(options), create_body(spec)))
            .map(|_| ())
            .map_err(|e| map_error("create_container", &spec.name, e))
    }

    fn start(&self, name: &str) -> RuntimeResult<()> {
        self.handle
            .block_on(
                self.docker
                    .start_container(name, None::<StartContainerOptions>),
            )
            .map_err(|e| map_error("start_container", name, e))
    }

    fn stop(&self, name: &str, timeout: Duration) -> RuntimeResult<()> {
        let options = StopContainerOptionsBuilder::new()
            .t(timeout.as_secs() as i32)
            .build();
        match self
            .handle
            .block_on(self.docker.stop_container(name, Some(options)))
        {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_error("stop_container", name, e)),
        }
    }

    fn pause(&self, name: &str) -> RuntimeResult<()> {
        self.handle
            .block_on(self.docker.pause_container(name))
            .map_err(|e| map_error("pause_container", name, e))
    }

    fn unpause(&self, name: &str) -> RuntimeResult<()> {
        self.handle
            .block_on(self.docker.unpause_container(name))
            .map_err(|e| map_error("unpause_container", name, e))
    }

    fn wait(&self, name: &str) -> RuntimeResult<()> {
        self.handle.block_on(async {
            let mut stream = self
                .docker
                .wait_container(name, None::<WaitContainerOptions>);
            while let Some(next) = stream.next().await {
                match next {
                    Ok(_) => {}
                    // non-zero exit code is still an exit
                    Err(BollardError::DockerContainerWaitError { .. }) => {}
                    Err(e) => return Err(map_error("wait_container", name, e)),
                }
            }
            Ok(())
        })
    }

    fn remove(&self, name: &str, force: bool) -> RuntimeResult<()> {
        let options = RemoveContainerOptionsBuilder::new().force(force).build();
        self.handle
            .block_on(self.docker.remove_container(name, Some(options)))
            .map_err(|e| map_error("remove_container", name, e))
    }

    fn follow_logs(&self, name: &str, tail: usize) -> RuntimeResult<LogStream> {
        let options = LogsOptionsBuilder::new()
            .follow(true)
            .stdout(true)
            .stderr(true)
            .tail(&tail.to_string())
            .build();
        let stream = self.docker.logs(name, Some(options)).boxed();

        Ok(Box::new(LogLines {
            name: name.to_string(),
            handle: self.handle.clone(),
            stream,
            partial: Vec::new(),
            ready: VecDeque::new(),
            finished: false,
        }))
    }
}

/// Re-chunks engine log frames into whole lines.
struct LogLines {
    name: String,
    handle: Handle,
    stream: BoxStream<'static, Result<LogOutput, BollardError>>,
    partial: Vec<u8>,
    ready: VecDeque<String>,
    finished: bool,
}

impl LogLines {
    /// Buffers raw bytes so a character split across frames decodes intact.
    fn absorb(&mut self, bytes: &[u8]) {
        self.partial.extend_from_slice(bytes);
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            self.ready.push_back(decode_line(&line));
        }
    }
}

impl Iterator for LogLines {
    type Item = RuntimeResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Some(Ok(line));
            }
            if self.finished {
                if self.partial.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut self.partial);
                return Some(Ok(decode_line(&rest)));
            }

            match self.handle.block_on(self.stream.next()) {
                Some(Ok(output)) => self.absorb(&output.into_bytes()),
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(map_error("logs", &self.name, e)));
                }
                None => {
                    debug!(container = %self.name, "Log stream ended");
                    self.finished = true;
                }
            }
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

fn create_body(spec: &ContainerSpec) -> ContainerCreateBody {
    let device_requests = spec
        .device_requests
        .iter()
        .map(|request| BollardDeviceRequest {
            count: Some(request.count),
            capabilities: Some(request.capabilities.clone()),
            ..BollardDeviceRequest::default()
        })
        .collect::<Vec<_>>();

    let restart_policy = match spec.restart_policy {
        RestartPolicy::No => BollardRestartPolicy {
            name: Some(RestartPolicyNameEnum::NO),
            maximum_retry_count: None,
        },
        RestartPolicy::OnFailure { max_retries } => BollardRestartPolicy {
            name: Some(RestartPolicyNameEnum::ON_FAILURE),
            maximum_retry_count: Some(max_retries),
        },
        RestartPolicy::Always => BollardRestartPolicy {
            name: Some(RestartPolicyNameEnum::ALWAYS),
            maximum_retry_count: None,
        },
    };

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        entrypoint: Some(spec.entrypoint.clone()),
        cmd: Some(spec.args.clone()),
        env: Some(spec.environment.clone()),
        host_config: Some(HostConfig {
            restart_policy: Some(restart_policy),
            network_mode: Some(spec.network_mode.clone()),
            ipc_mode: Some(spec.ipc_mode.clone()),
            device_requests: if device_requests.is_empty() {
                None
            } else {
                Some(device_requests)
            },
            ..HostConfig::default()
        }),
        ..ContainerCreateBody::default()
    }
}

fn status_from_engine(status: ContainerStateStatusEnum) -> ContainerStatus {
    match status {
        ContainerStateStatusEnum::CREATED => ContainerStatus::Created,
        ContainerStateStatusEnum::RUNNING => ContainerStatus::Running,
        ContainerStateStatusEnum::PAUSED => ContainerStatus::Paused,
        ContainerStateStatusEnum::RESTARTING => ContainerStatus::Restarting,
        ContainerStateStatusEnum::REMOVING => ContainerStatus::Removing,
        ContainerStateStatusEnum::EXITED => ContainerStatus::Exited,
        ContainerStateStatusEnum::DEAD => ContainerStatus::Dead,
        _ => ContainerStatus::Unknown,
    }
}

fn map_error(operation: &'static str, name: &str, error: BollardError) -> RuntimeError {
    match error {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::ContainerNotFound(name.to_string()),
        BollardError::DockerResponseServerError { message, .. } => {
            RuntimeError::EngineApi { operation, message }
        }
        other => RuntimeError::EngineUnavailable(other.to_string()),
    }
}
