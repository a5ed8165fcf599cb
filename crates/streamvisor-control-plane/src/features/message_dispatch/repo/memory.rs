//! In-process broker doubles.

use super::{AckPublisher, ControlSource, InboundDelivery};
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use streamvisor_core::{AckMessage, AckQueue};
use tokio::sync::mpsc;

#[derive(Clone, Default)]
pub struct InMemoryAckPublisher {
    published: Arc<RwLock<Vec<AckMessage>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryAckPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later publish fail as a broker outage would.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<AckMessage> {
        self.published
            .read()
            .map(|published| published.clone())
            .unwrap_or_default()
    }

    pub fn published_to(&self, queue: AckQueue) -> Vec<AckMessage> {
        self.published()
            .into_iter()
            .filter(|ack| ack.queue() == queue)
            .collect()
    }
}

#[async_trait]
impl AckPublisher for InMemoryAckPublisher {
    async fn publish(&self, ack: &AckMessage) -> ControlPlaneResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ControlPlaneError::BrokerError(
                "publisher unavailable".to_string(),
            ));
        }
        self.published
            .write()
            .map_err(|_| ControlPlaneError::BrokerError("Lock poisoned".to_string()))?
            .push(ack.clone());
        Ok(())
    }
}

/// How a delivery was finally settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Rejected,
    Requeued,
}

#[derive(Clone)]
pub struct InMemoryDelivery {
    body: Vec<u8>,
    settlement: Arc<RwLock<Option<Settlement>>>,
}

impl InMemoryDelivery {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            settlement: Arc::new(RwLock::new(None)),
        }
    }

    pub fn settlement(&self) -> Option<Settlement> {
        self.settlement.read().ok().and_then(|s| *s)
    }

    fn settle(&self, outcome: Settlement) -> ControlPlaneResult<()> {
        let mut settlement = self
            .settlement
            .write()
            .map_err(|_| ControlPlaneError::BrokerError("Lock poisoned".to_string()))?;
        if settlement.is_some() {
            return Err(ControlPlaneError::BrokerError(
                "delivery already settled".to_string(),
            ));
        }
        *settlement = Some(outcome);
        Ok(())
    }
}

#[async_trait]
impl InboundDelivery for InMemoryDelivery {
    fn body(&self) -> &[u8] {
        &self.body
    }

    async fn ack(&self) -> ControlPlaneResult<()> {
        self.settle(Settlement::Acked)
    }

    async fn reject(&self) -> ControlPlaneResult<()> {
        self.settle(Settlement::Rejected)
    }

    async fn requeue(&self) -> ControlPlaneResult<()> {
        self.settle(Settlement::Requeued)
    }
}

/// Control source fed through a channel; closes when every sender is dropped.
pub struct InMemoryControlSource {
    receiver: mpsc::Receiver<ControlPlaneResult<InMemoryDelivery>>,
}

impl InMemoryControlSource {
    pub fn channel(capacity: usize) -> (mpsc::Sender<ControlPlaneResult<InMemoryDelivery>>, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (sender, Self { receiver })
    }
}

#[async_trait]
impl ControlSource for InMemoryControlSource {
    type Delivery = InMemoryDelivery;

    async fn next_delivery(&mut self) -> Option<ControlPlaneResult<InMemoryDelivery>> {
        self.receiver.recv().await
    }
}
