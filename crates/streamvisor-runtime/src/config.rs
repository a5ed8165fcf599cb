//! Immutable run parameters fixed when the controller is constructed.

use crate::goal::GoalMarkers;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_GOAL_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_LOG_TAIL: usize = 5;
pub const DEFAULT_ENGINE_WORKERS: usize = 5;

pub const DEFAULT_ENTRYPOINT: &[&str] = &[
    "poetry",
    "run",
    "python",
    "transmit.py",
    "--weights",
    "yolov5s.pt",
    "--class",
    "0",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    Cpu,
    Gpu,
}

impl ProcessingMode {
    /// Device requests handed to the engine for every container.
    pub fn device_requests(self) -> Vec<DeviceRequest> {
        match self {
            ProcessingMode::Cpu => Vec::new(),
            ProcessingMode::Gpu => vec![DeviceRequest::all_gpus()],
        }
    }

    /// Worker arguments that select the inference device.
    pub fn device_args(self) -> Vec<String> {
        let device = match self {
            ProcessingMode::Cpu => "cpu",
            ProcessingMode::Gpu => "0",
        };
        vec!["--device".to_string(), device.to_string()]
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingMode::Cpu => f.write_str("CPU"),
            ProcessingMode::Gpu => f.write_str("GPU"),
        }
    }
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "CPU" => Ok(ProcessingMode::Cpu),
            "GPU" => Ok(ProcessingMode::Gpu),
            other => Err(format!("unknown processing mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRequest {
    /// `-1` requests every available device.
    pub count: i64,
    pub capabilities: Vec<Vec<String>>,
}

impl DeviceRequest {
    pub fn all_gpus() -> Self {
        Self {
            count: -1,
            capabilities: vec![vec!["gpu".to_string()]],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    No,
    OnFailure { max_retries: i64 },
    Always,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub image: String,
    pub entrypoint: Vec<String>,
    pub base_args: Vec<String>,
    pub environment: Vec<(String, String)>,
    pub restart_policy: RestartPolicy,
    pub network_mode: String,
    pub ipc_mode: String,
    pub device_requests: Vec<DeviceRequest>,
    pub goals: GoalMarkers,
    pub goal_timeout: Duration,
    pub log_tail: usize,
    pub workers: usize,
}

impl RunConfig {
    pub fn new(image: impl Into<String>, mode: ProcessingMode) -> Self {
        Self {
            image: image.into(),
            entrypoint: DEFAULT_ENTRYPOINT.iter().map(|s| s.to_string()).collect(),
            base_args: mode.device_args(),
            environment: vec![("ENVIRONMENT".to_string(), "worker".to_string())],
            restart_policy: RestartPolicy::OnFailure { max_retries: 1 },
            network_mode: "host".to_string(),
            ipc_mode: "host".to_string(),
            device_requests: mode.device_requests(),
            goals: GoalMarkers::default(),
            goal_timeout: DEFAULT_GOAL_TIMEOUT,
            log_tail: DEFAULT_LOG_TAIL,
            workers: DEFAULT_ENGINE_WORKERS,
        }
    }

    pub fn with_goal_timeout(mut self, timeout: Duration) -> Self {
        self.goal_timeout = timeout;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Full engine request for a container named `name`.
    pub fn container_spec(&self, name: &str, extra_args: &[String]) -> ContainerSpec {
        let mut args = self.base_args.clone();
        args.extend(extra_args.iter().cloned());

        ContainerSpec {
            name: name.to_string(),
            image: self.image.clone(),
            entrypoint: self.entrypoint.clone(),
            args,
            environment: self
                .environment
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect(),
            restart_policy: self.restart_policy,
            network_mode: self.network_mode.clone(),
            ipc_mode: self.ipc_mode.clone(),
            device_requests: self.device_requests.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub entrypoint: Vec<String>,
    pub args: Vec<String>,
    pub environment: Vec<String>,
    pub restart_policy: RestartPolicy,
    pub network_mode: String,
    pub ipc_mode: String,
    pub device_requests: Vec<DeviceRequest>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_mode_has_no_device_requests() {
        let config = RunConfig::new("processor:latest", ProcessingMode::Cpu);
        assert!(config.device_requests.is_empty());
        assert_eq!(config.base_args, vec!["--device", "cpu"]);
    }

    #[test]
    fn test_gpu_mode_requests_all_gpus() {
        let config = RunConfig::new("processor:latest", ProcessingMode::Gpu);
        assert_eq!(config.device_requests, vec![DeviceRequest::all_gpus()]);
        assert_eq!(config.device_requests[0].count, -1);
        assert_eq!(config.base_args, vec!["--device", "0"]);
    }

    #[test]
    fn test_fixed_run_parameters() {
        let config = RunConfig::new("processor:latest", ProcessingMode::Cpu);
        assert_eq!(
            config.restart_policy,
            RestartPolicy::OnFailure { max_retries: 1 }
        );
        assert_eq!(config.network_mode, "host");
        assert_eq!(config.ipc_mode, "host");
        assert_eq!(config.goal_timeout, Duration::from_secs(60));
        assert_eq!(config.workers, 5);
    }

    #[test]
    fn test_container_spec_appends_extra_args() {
        let config = RunConfig::new("processor:latest", ProcessingMode::Cpu);
        let spec = config.container_spec(
            "cam-1",
            &["--source".to_string(), "rtsp://cam/1".to_string()],
        );

        assert_eq!(spec.name, "cam-1");
        assert_eq!(spec.args, vec!["--device", "cpu", "--source", "rtsp://cam/1"]);
        assert_eq!(spec.environment, vec!["ENVIRONMENT=worker"]);
        assert_eq!(spec.entrypoint[0], "poetry");
    }

    #[test]
    fn test_processing_mode_parse() {
        assert_eq!("gpu".parse::<ProcessingMode>(), Ok(ProcessingMode::Gpu));
        assert_eq!("CPU".parse::<ProcessingMode>(), Ok(ProcessingMode::Cpu));
        assert!("TPU".parse::<ProcessingMode>().is_err());
    }

    #[test]
    fn test_with_workers_never_zero() {
        let config = RunConfig::new("img", ProcessingMode::Cpu).with_workers(0);
        assert_eq!(config.workers, 1);
    }
}
