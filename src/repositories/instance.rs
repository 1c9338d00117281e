//! In-memory instance store

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{InstanceStore, RepositoryError};
use crate::models::{Instance, InstanceId};

/// Instance store backed by an ordered map.
#[derive(Debug, Default)]
pub struct InMemoryInstanceStore {
    instances: RwLock<BTreeMap<InstanceId, Instance>>,
}

impl InMemoryInstanceStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with the given instances
    ///
    /// # Arguments
    ///
    /// * `instances` - Instances to register, keyed by their id
    pub fn with_instances(instances: impl IntoIterator<Item = Instance>) -> Self {
        let map = instances
            .into_iter()
            .map(|instance| (instance.id.clone(), instance))
            .collect();
        Self {
            instances: RwLock::new(map),
        }
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn load_instance(&self, id: &InstanceId) -> Result<Instance, RepositoryError> {
        self.instances
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("instance", id.as_str()))
    }

    async fn load_instances(&self) -> Result<Vec<Instance>, RepositoryError> {
        Ok(self.instances.read().await.values().cloned().collect())
    }

    async fn store_instance(&self, instance: Instance) -> Result<(), RepositoryError> {
        self.instances
            .write()
            .await
            .insert(instance.id.clone(), instance);
        Ok(())
    }
}
