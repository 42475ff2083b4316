//! The validator registry contract. The backing store may be mutated by
//! other processes; this trait only promises a consistent view per call.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use synod_types::error::StoreError;
use synod_types::validator::{Address, Validator};

#[async_trait]
pub trait ValidatorStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Validator>, StoreError>;
    async fn upsert(&self, validator: Validator) -> Result<(), StoreError>;
    async fn delete(&self, address: &Address) -> Result<(), StoreError>;
}

/// In-process registry used by tests and single-node embeddings.
#[derive(Default)]
pub struct MemoryValidatorStore {
    inner: RwLock<BTreeMap<Address, Validator>>,
}

impl MemoryValidatorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ValidatorStore for MemoryValidatorStore {
    async fn list(&self) -> Result<Vec<Validator>, StoreError> {
        Ok(self.inner.read().await.values().cloned().collect())
    }

    async fn upsert(&self, validator: Validator) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .insert(validator.address.clone(), validator);
        Ok(())
    }

    async fn delete(&self, address: &Address) -> Result<(), StoreError> {
        match self.inner.write().await.remove(address) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(address.to_string())),
        }
    }
}
