use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("Container engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("Container engine rejected {operation}: {message}")]
    EngineApi {
        operation: &'static str,
        message: String,
    },
    #[error("Container not found: {0}")]
    ContainerNotFound(String),
    #[error("Container {name} exited before reaching its final goal: {detail}")]
    ContainerExited { name: String, detail: String },
    #[error("Container {0} did not reach its final goal in time")]
    GoalTimeout(String),
    #[error("Worker pool failure: {0}")]
    WorkerPool(String),
}

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
