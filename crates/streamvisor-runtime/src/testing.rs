//! In-process engine double for controller tests.

use crate::config::ContainerSpec;
use crate::engine::{ContainerEngine, ContainerStatus, LogStream, ManagedContainer};
use crate::error::{RuntimeError, RuntimeResult};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::Duration;

/// Log output a container produces once followed.
#[derive(Debug, Clone)]
pub struct LogScript {
    lines: Vec<String>,
    hang: bool,
}

impl LogScript {
    /// Emit the lines, then end as if the container exited.
    pub fn lines(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            hang: false,
        }
    }

    /// Emit the lines, then block until the container is stopped or removed.
    pub fn hang(lines: &[&str]) -> Self {
        Self {
            hang: true,
            ..Self::lines(lines)
        }
    }
}

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, ContainerStatus>,
    scripts: HashMap<String, LogScript>,
    followers: HashMap<String, Vec<mpsc::Sender<String>>>,
    calls: Vec<String>,
    last_spec: Option<ContainerSpec>,
    unavailable: bool,
    failing: HashSet<&'static str>,
}

impl FakeState {
    fn record(&mut self, call: String) {
        self.calls.push(call);
    }

    fn check_available(&self) -> RuntimeResult<()> {
        if self.unavailable {
            return Err(RuntimeError::EngineUnavailable(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }

    fn check_operation(&self, operation: &'static str) -> RuntimeResult<()> {
        self.check_available()?;
        if self.failing.contains(operation) {
            return Err(RuntimeError::EngineApi {
                operation,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn set_status(&mut self, name: &str, status: ContainerStatus) -> RuntimeResult<()> {
        self.check_available()?;
        match self.containers.get_mut(name) {
            Some(current) => {
                *current = status;
                Ok(())
            }
            None => Err(RuntimeError::ContainerNotFound(name.to_string())),
        }
    }

    /// Dropping the senders ends every hanging log follower.
    fn end_followers(&mut self, name: &str) {
        self.followers.remove(name);
    }
}

#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn script(&self, name: &str, script: LogScript) {
        self.lock().scripts.insert(name.to_string(), script);
    }

    pub fn insert(&self, name: &str, status: ContainerStatus) {
        self.lock().containers.insert(name.to_string(), status);
    }

    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    /// Make every later call of `operation` fail with an engine API error.
    pub fn fail(&self, operation: &'static str) {
        self.lock().failing.insert(operation);
    }

    pub fn status(&self, name: &str) -> Option<ContainerStatus> {
        self.lock().containers.get(name).copied()
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.lock().last_spec.clone()
    }
}

impl ContainerEngine for FakeEngine {
    fn ping(&self) -> RuntimeResult<()> {
        let mut state = self.lock();
        state.record("ping".to_string());
        state.check_available()
    }

    fn inspect(&self, name: &str) -> RuntimeResult<ManagedContainer> {
        let mut state = self.lock();
        state.record(format!("inspect {name}"));
        state.check_available()?;
        state
            .containers
            .get(name)
            .map(|status| ManagedContainer {
                name: name.to_string(),
                status: *status,
            })
            .ok_or_else(|| RuntimeError::ContainerNotFound(name.to_string()))
    }

    fn create(&self, spec: &ContainerSpec) -> RuntimeResult<()> {
        let mut state = self.lock();
        state.record(format!("create {}", spec.name));
        state.check_operation("create")?;
        if state.containers.contains_key(&spec.name) {
            return Err(RuntimeError::EngineApi {
                operation: "create_container",
                message: format!("name {} already in use", spec.name),
            });
        }
        state
            .containers
            .insert(spec.name.clone(), ContainerStatus::Created);
        state.last_spec = Some(spec.clone());
        Ok(())
    }

    fn start(&self, name: &str) -> RuntimeResult<()> {
        let mut state = self.lock();
        state.record(format!("start {name}"));
        state.check_operation("start")?;
        state.set_status(name, ContainerStatus::Running)
    }

    fn stop(&self, name: &str, timeout: Duration) -> RuntimeResult<()> {
        let mut state = self.lock();
        state.record(format!("stop {name} timeout={}", timeout.as_secs()));
        state.check_operation("stop")?;
        state.set_status(name, ContainerStatus::Exited)?;
        state.end_followers(name);
        Ok(())
    }

    fn pause(&self, name: &str) -> RuntimeResult<()> {
        let mut state = self.lock();
        state.record(format!("pause {name}"));
        state.set_status(name, ContainerStatus::Paused)
    }

    fn unpause(&self, name: &str) -> RuntimeResult<()> {
        let mut state = self.lock();
        state.record(format!("unpause {name}"));
        state.set_status(name, ContainerStatus::Running)
    }

    fn wait(&self, name: &str) -> RuntimeResult<()> {
        let mut state = self.lock();
        state.record(format!("wait {name}"));
        state.set_status(name, ContainerStatus::Exited)
    }

    fn remove(&self, name: &str, force: bool) -> RuntimeResult<()> {
        let mut state = self.lock();
        state.record(format!("remove {name} force={force}"));
        state.check_available()?;
        state
            .containers
            .remove(name)
            .ok_or_else(|| RuntimeError::ContainerNotFound(name.to_string()))?;
        state.end_followers(name);
        Ok(())
    }

    fn follow_logs(&self, name: &str, _tail: usize) -> RuntimeResult<LogStream> {
        let mut state = self.lock();
        state.record(format!("logs {name}"));
        state.check_available()?;
        if !state.containers.contains_key(name) {
            return Err(RuntimeError::ContainerNotFound(name.to_string()));
        }
        let script = state
            .scripts
            .get(name)
            .cloned()
            .unwrap_or_else(|| LogScript::lines(&[]));

        let scripted = script.lines.into_iter().map(Ok);
        if !script.hang {
            return Ok(Box::new(scripted));
        }

        let (tx, rx) = mpsc::channel::<String>();
        state.followers.entry(name.to_string()).or_default().push(tx);
        Ok(Box::new(scripted.chain(std::iter::from_fn(move || {
            rx.recv().ok().map(Ok)
        }))))
    }
}
