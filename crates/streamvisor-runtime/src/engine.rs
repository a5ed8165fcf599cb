use crate::config::ContainerSpec;
use crate::error::RuntimeResult;
use std::fmt;
use std::time::Duration;

/// Lines of a followed container log. Ends when the container exits.
pub type LogStream = Box<dyn Iterator<Item = RuntimeResult<String>> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Removing => "removing",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Dead => "dead",
            ContainerStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine-reported view of a container at the time it was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedContainer {
    pub name: String,
    pub status: ContainerStatus,
}

/// Blocking control surface of the container engine.
///
/// Every call may block the calling thread, so callers go through
/// [`crate::bridge::ExecutionBridge`]. Implementations are shared between
/// bridge workers without extra locking and must tolerate concurrent calls.
pub trait ContainerEngine: Send + Sync + 'static {
    fn ping(&self) -> RuntimeResult<()>;

    fn inspect(&self, name: &str) -> RuntimeResult<ManagedContainer>;

    /// Create a container without starting it.
    fn create(&self, spec: &ContainerSpec) -> RuntimeResult<()>;

    fn start(&self, name: &str) -> RuntimeResult<()>;

    fn stop(&self, name: &str, timeout: Duration) -> RuntimeResult<()>;

    fn pause(&self, name: &str) -> RuntimeResult<()>;

    fn unpause(&self, name: &str) -> RuntimeResult<()>;

    /// Block until the container is no longer running.
    fn wait(&self, name: &str) -> RuntimeResult<()>;

    fn remove(&self, name: &str, force: bool) -> RuntimeResult<()>;

    /// Follow the log output, starting `tail` lines back.
    fn follow_logs(&self, name: &str, tail: usize) -> RuntimeResult<LogStream>;
}
