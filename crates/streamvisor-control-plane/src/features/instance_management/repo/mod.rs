use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use streamvisor_core::Instance;

#[cfg(feature = "postgres")]
pub mod postgres;
pub mod runtime;

pub use runtime::ContainerRuntime;
#[cfg(test)]
pub use runtime::MockContainerRuntime;

/// Repository trait for instance storage.
///
/// `update` and `delete` report affected rows; zero means the id is unknown.
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn get(&self, instance_id: &str) -> ControlPlaneResult<Option<Instance>>;

    /// Store a new instance, returning its id
    async fn create(&self, instance: Instance) -> ControlPlaneResult<String>;

    async fn update(&self, instance: &Instance) -> ControlPlaneResult<u64>;

    async fn delete(&self, instance_id: &str) -> ControlPlaneResult<u64>;
}

/// In-memory implementation of instance repository
#[derive(Clone)]
pub struct InMemoryInstanceRepository {
    storage: Arc<RwLock<HashMap<String, Instance>>>,
}

impl InMemoryInstanceRepository {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.storage.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryInstanceRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> ControlPlaneError {
    ControlPlaneError::StorageError("Lock poisoned".to_string())
}

#[async_trait]
impl InstanceRepository for InMemoryInstanceRepository {
    async fn get(&self, instance_id: &str) -> ControlPlaneResult<Option<Instance>> {
        let storage = self.storage.read().map_err(poisoned)?;
        Ok(storage.get(instance_id).cloned())
    }

    async fn create(&self, instance: Instance) -> ControlPlaneResult<String> {
        instance.validate()?;
        let mut storage = self.storage.write().map_err(poisoned)?;
        if storage.contains_key(instance.id()) {
            return Err(ControlPlaneError::InstanceAlreadyExists(
                instance.id().to_string(),
            ));
        }
        let id = instance.id().to_string();
        storage.insert(id.clone(), instance);
        Ok(id)
    }

    async fn update(&self, instance: &Instance) -> ControlPlaneResult<u64> {
        instance.validate()?;
        let mut storage = self.storage.write().map_err(poisoned)?;
        match storage.get_mut(instance.id()) {
            Some(stored) => {
                *stored = instance.clone();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete(&self, instance_id: &str) -> ControlPlaneResult<u64> {
        let mut storage = self.storage.write().map_err(poisoned)?;
        Ok(storage.remove(instance_id).map_or(0, |_| 1))
    }
}
