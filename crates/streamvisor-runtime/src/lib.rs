//! Container lifecycle for stream-processing workers.
//!
//! [`ContainerController`] owns the engine handle and the bounded bridge
//! that keeps blocking engine calls off the async scheduler.

pub mod bridge;
pub mod config;
pub mod controller;
pub mod docker;
pub mod engine;
pub mod error;
pub mod goal;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::ExecutionBridge;
pub use config::{
    ContainerSpec, DeviceRequest, ProcessingMode, RestartPolicy, RunConfig,
    DEFAULT_GOAL_TIMEOUT, DEFAULT_STOP_TIMEOUT,
};
pub use controller::ContainerController;
pub use docker::DockerEngine;
pub use engine::{ContainerEngine, ContainerStatus, LogStream, ManagedContainer};
pub use error::{RuntimeError, RuntimeResult};
pub use goal::{GoalMarkers, GoalOutcome};
