//! Broker-facing contracts for the dispatcher.
//!
//! The dispatch service and controller only see these traits; `amqp`
//! implements them over lapin and `memory` in-process.

use crate::shared::error::ControlPlaneResult;
use async_trait::async_trait;
use streamvisor_core::AckMessage;

pub mod amqp;
pub mod memory;

pub use amqp::{AmqpAckPublisher, AmqpControlSource, BrokerPool, PooledChannel};
pub use memory::{InMemoryAckPublisher, InMemoryControlSource, InMemoryDelivery, Settlement};

/// Publishes acknowledgments to the queue their variant belongs on.
#[async_trait]
pub trait AckPublisher: Send + Sync {
    async fn publish(&self, ack: &AckMessage) -> ControlPlaneResult<()>;
}

/// One inbound message awaiting settlement.
#[async_trait]
pub trait InboundDelivery: Send + Sync {
    fn body(&self) -> &[u8];

    async fn ack(&self) -> ControlPlaneResult<()>;

    /// Drop the message without redelivery.
    async fn reject(&self) -> ControlPlaneResult<()>;

    /// Return the message to the queue for redelivery.
    async fn requeue(&self) -> ControlPlaneResult<()>;
}

/// Stream of inbound control messages. `None` means the source closed.
#[async_trait]
pub trait ControlSource: Send {
    type Delivery: InboundDelivery + 'static;

    async fn next_delivery(&mut self) -> Option<ControlPlaneResult<Self::Delivery>>;
}
