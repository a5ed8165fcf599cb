//! Process configuration read from the environment.

use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use streamvisor_runtime::{ProcessingMode, RunConfig};

pub const DEFAULT_RABBITMQ_PORT: u16 = 5672;
pub const DEFAULT_PREFETCH: u16 = 10;
pub const DEFAULT_DISPATCH_WORKERS: usize = 5;
pub const DEFAULT_CONNECTION_POOL: usize = 2;
pub const DEFAULT_CHANNEL_POOL: usize = 10;
pub const DEFAULT_ACK_EXCHANGE: &str = "queue_exchange";
pub const DEFAULT_GOAL_TIMEOUT_SECS: u64 = 60;

#[derive(Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub prefetch: u16,
    pub connection_pool: usize,
    pub channel_pool: usize,
}

impl BrokerConfig {
    /// Broker address on the default vhost. Credentials are carried as
    /// structured fields, never spliced into a URL string.
    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.user.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: "/".to_string(),
            ..AMQPUri::default()
        }
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("prefetch", &self.prefetch)
            .field("connection_pool", &self.connection_pool)
            .field("channel_pool", &self.channel_pool)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub control: String,
    pub status_ack: String,
    pub delete_ack: String,
    pub exchange: String,
}

#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub broker: BrokerConfig,
    pub queues: QueueNames,
    pub dispatch_workers: usize,
    pub processor_image: String,
    pub processing_mode: ProcessingMode,
    pub goal_timeout: Duration,
    pub database_url: Option<String>,
}

impl ControlPlaneConfig {
    pub fn from_env() -> ControlPlaneResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> ControlPlaneResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let broker = BrokerConfig {
            host: text("RABBITMQ_HOST", "localhost"),
            port: parsed(&lookup, "RABBITMQ_PORT", DEFAULT_RABBITMQ_PORT)?,
            user: text("RABBITMQ_USER", "guest"),
            password: text("RABBITMQ_PASSWORD", "guest"),
            prefetch: parsed(&lookup, "RABBITMQ_PREFETCH", DEFAULT_PREFETCH)?,
            connection_pool: parsed(&lookup, "RABBITMQ_CONNECTION_POOL", DEFAULT_CONNECTION_POOL)?,
            channel_pool: parsed(&lookup, "RABBITMQ_CHANNEL_POOL", DEFAULT_CHANNEL_POOL)?,
        };

        let queues = QueueNames {
            control: text("CONTROLLER_QUEUE", "controller_queue"),
            status_ack: text("ACK_STATUS_QUEUE", "ack_status_queue"),
            delete_ack: text("ACK_DELETE_QUEUE", "ack_delete_queue"),
            exchange: text("ACK_EXCHANGE", DEFAULT_ACK_EXCHANGE),
        };

        let processing_mode = match lookup("PROCESSING_MODE") {
            Some(value) => value.parse::<ProcessingMode>().map_err(|e| {
                ControlPlaneError::ConfigurationError(format!("PROCESSING_MODE: {e}"))
            })?,
            None => ProcessingMode::Cpu,
        };

        let goal_timeout_secs: u64 =
            parsed(&lookup, "GOAL_TIMEOUT_SECS", DEFAULT_GOAL_TIMEOUT_SECS)?;

        Ok(Self {
            broker,
            queues,
            dispatch_workers: parsed(&lookup, "DISPATCH_WORKERS", DEFAULT_DISPATCH_WORKERS)?,
            processor_image: text("PROCESSOR_IMAGE", "stream-processor:latest"),
            processing_mode,
            goal_timeout: Duration::from_secs(goal_timeout_secs),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
        })
    }

    pub fn validate(&self) -> ControlPlaneResult<()> {
        let required = [
            ("RABBITMQ_HOST", &self.broker.host),
            ("RABBITMQ_USER", &self.broker.user),
            ("CONTROLLER_QUEUE", &self.queues.control),
            ("ACK_STATUS_QUEUE", &self.queues.status_ack),
            ("ACK_DELETE_QUEUE", &self.queues.delete_ack),
            ("ACK_EXCHANGE", &self.queues.exchange),
            ("PROCESSOR_IMAGE", &self.processor_image),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ControlPlaneError::ConfigurationError(format!(
                    "{key} cannot be empty"
                )));
            }
        }

        if self.queues.status_ack == self.queues.delete_ack {
            return Err(ControlPlaneError::ConfigurationError(
                "ACK_STATUS_QUEUE and ACK_DELETE_QUEUE must differ".to_string(),
            ));
        }

        let positive = [
            ("RABBITMQ_PORT", self.broker.port as u64),
            ("RABBITMQ_PREFETCH", self.broker.prefetch as u64),
            ("RABBITMQ_CONNECTION_POOL", self.broker.connection_pool as u64),
            ("RABBITMQ_CHANNEL_POOL", self.broker.channel_pool as u64),
            ("DISPATCH_WORKERS", self.dispatch_workers as u64),
            ("GOAL_TIMEOUT_SECS", self.goal_timeout.as_secs()),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ControlPlaneError::ConfigurationError(format!(
                    "{key} must be greater than zero"
                )));
            }
        }

        Ok(())
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig::new(self.processor_image.clone(), self.processing_mode)
            .with_goal_timeout(self.goal_timeout)
    }
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> ControlPlaneResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(value) => value.trim().parse::<T>().map_err(|e| {
            ControlPlaneError::ConfigurationError(format!("{key}={value}: {e}"))
        }),
        None => Ok(default),
    }
}
