//! Bounded execution bridge for blocking engine calls.
//!
//! At most `workers` closures run at once on tokio's blocking pool; the
//! rest wait for a permit without occupying a scheduler thread. A closure
//! whose caller stopped waiting keeps its permit until it returns.

use crate::error::{RuntimeError, RuntimeResult};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::error;

#[derive(Clone)]
pub struct ExecutionBridge {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl ExecutionBridge {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn run<F, T>(&self, operation: &'static str, task: F) -> RuntimeResult<T>
    where
        F: FnOnce() -> RuntimeResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.reserve(operation).await?.run(task).await
    }

    /// Wait for a free worker without running anything yet.
    ///
    /// Lets a caller start a deadline only once its call can actually run.
    pub async fn reserve(&self, operation: &'static str) -> RuntimeResult<Slot> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RuntimeError::WorkerPool(format!("{operation}: pool closed")))?;
        Ok(Slot { operation, permit })
    }
}

/// A reserved bridge worker. Dropping it unused gives the permit back.
pub struct Slot {
    operation: &'static str,
    permit: OwnedSemaphorePermit,
}

impl Slot {
    pub async fn run<F, T>(self, task: F) -> RuntimeResult<T>
    where
        F: FnOnce() -> RuntimeResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let Slot { operation, permit } = self;
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            task()
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(operation, error = %e, "Blocking engine call did not complete");
                Err(RuntimeError::WorkerPool(format!("{operation}: {e}")))
            }
        }
    }
}
