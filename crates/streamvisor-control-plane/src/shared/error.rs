use streamvisor_core::{AckCode, CoreError};
use streamvisor_runtime::RuntimeError;
use thiserror::Error;

/// Control plane specific errors
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),
    #[error("Instance already exists: {0}")]
    InstanceAlreadyExists(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("Broker error: {0}")]
    BrokerError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl ControlPlaneError {
    /// Code reported back to the sender when this error ends a message.
    pub fn ack_code(&self) -> AckCode {
        match self {
            ControlPlaneError::Core(
                CoreError::InvalidMessage(_)
                | CoreError::UnknownAction(_)
                | CoreError::MissingField(_),
            ) => AckCode::InvalidMessage,
            _ => AckCode::Failed,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ControlPlaneError::InstanceNotFound(_)
                | ControlPlaneError::Runtime(RuntimeError::ContainerNotFound(_))
        )
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for ControlPlaneError {
    fn from(err: sqlx::Error) -> Self {
        ControlPlaneError::StorageError(err.to_string())
    }
}

impl From<lapin::Error> for ControlPlaneError {
    fn from(err: lapin::Error) -> Self {
        ControlPlaneError::BrokerError(err.to_string())
    }
}

pub type ControlPlaneResult<T> = std::result::Result<T, ControlPlaneError>;
