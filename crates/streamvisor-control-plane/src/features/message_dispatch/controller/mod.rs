//! Consumer loop and bounded worker pool.
//!
//! Deliveries are sharded over a fixed set of workers by `device_id`. Each
//! worker handles its queue in order, so messages for one device never
//! overlap while different devices proceed in parallel. Worker queues are
//! bounded; a full queue stalls the consumer loop, which in turn leaves
//! the broker's prefetch window full.

use crate::features::message_dispatch::repo::{ControlSource, InboundDelivery};
use crate::features::message_dispatch::service::{DispatchOutcome, DispatchService};
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use streamvisor_core::MessageEnvelope;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct DispatchController {
    service: Arc<DispatchService>,
    workers: usize,
    queue_depth: usize,
}

impl DispatchController {
    /// `queue_depth` is the total number of deliveries buffered across all
    /// workers, normally the broker prefetch.
    pub fn new(service: Arc<DispatchService>, workers: usize, queue_depth: usize) -> Self {
        Self {
            service,
            workers: workers.max(1),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Consume until the source closes, fails, or `shutdown` resolves.
    ///
    /// Deliveries already handed to a worker are settled before returning.
    pub async fn run<S, F>(&self, mut source: S, shutdown: F) -> ControlPlaneResult<()>
    where
        S: ControlSource,
        F: Future<Output = ()>,
    {
        let (senders, handles) = self.spawn_workers::<S::Delivery>();
        info!(workers = self.workers, queue_depth = self.queue_depth, "Dispatcher started");

        tokio::pin!(shutdown);
        let mut result = Ok(());
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping consumer");
                    break;
                }
                next = source.next_delivery() => match next {
                    Some(Ok(delivery)) => {
                        let worker = shard_for(
                            MessageEnvelope::peek(delivery.body()).device_id.as_deref(),
                            senders.len(),
                        );
                        if senders[worker].send(delivery).await.is_err() {
                            error!(worker, "Dispatch worker is gone");
                            result = Err(ControlPlaneError::BrokerError(format!(
                                "dispatch worker {worker} stopped"
                            )));
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Control queue consumer failed");
                        result = Err(e);
                        break;
                    }
                    None => {
                        warn!("Control queue consumer closed");
                        break;
                    }
                }
            }
        }

        drop(senders);
        for (worker, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!(worker, error = %e, "Dispatch worker panicked");
            }
        }
        info!("Dispatcher stopped");
        result
    }

    fn spawn_workers<D>(&self) -> (Vec<mpsc::Sender<D>>, Vec<JoinHandle<()>>)
    where
        D: InboundDelivery + 'static,
    {
        let capacity = self.queue_depth.div_ceil(self.workers).max(1);
        (0..self.workers)
            .map(|worker| {
                let (sender, mut receiver) = mpsc::channel::<D>(capacity);
                let service = self.service.clone();
                let handle = tokio::spawn(async move {
                    while let Some(delivery) = receiver.recv().await {
                        settle(&service, worker, delivery).await;
                    }
                    debug!(worker, "Dispatch worker drained");
                });
                (sender, handle)
            })
            .unzip()
    }
}

/// Process one delivery and settle it with the broker.
///
/// Handled messages are acked, undecodable ones rejected without requeue.
/// A message whose acknowledgment could not be published is requeued.
async fn settle<D: InboundDelivery>(service: &DispatchService, worker: usize, delivery: D) {
    let settled = match service.process(delivery.body()).await {
        Ok(DispatchOutcome::Handled { .. }) => delivery.ack().await,
        Ok(DispatchOutcome::Rejected { reason, .. }) => {
            debug!(worker, reason = %reason, "Rejecting delivery");
            delivery.reject().await
        }
        Err(e) => {
            error!(worker, error = %e, "Acknowledgment not published, requeueing message");
            delivery.requeue().await
        }
    };

    if let Err(e) = settled {
        error!(worker, error = %e, "Failed to settle delivery");
    }
}

/// Worker index for a device. Bodies without a device id go to worker 0.
pub fn shard_for(device_id: Option<&str>, workers: usize) -> usize {
    let workers = workers.max(1);
    match device_id {
        Some(id) => {
            let mut hasher = DefaultHasher::new();
            id.hash(&mut hasher);
            (hasher.finish() % workers as u64) as usize
        }
        None => 0,
    }
}
