use crate::storage_traits::{VaultSnapshot, VaultStore, WriteBatch};
use std::sync::RwLock;
use televault_core::error::StorageError;
use televault_core::id::{Identity, ItemId, Nonce};
use televault_core::objects::{CustodyRecord, VaultConfig};

/// Volatile store keeping the whole state in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<VaultSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing state
    pub fn from_snapshot(snapshot: VaultSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&VaultSnapshot) -> T) -> Result<T, StorageError> {
        let guard = self
            .state
            .read()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire read lock: {}", e)))?;
        Ok(f(&guard))
    }
}

impl VaultStore for MemoryStore {
    fn nonce(&self, holder: &Identity) -> Result<Nonce, StorageError> {
        self.read(|state| state.nonce(holder))
    }

    fn custody(&self, item_id: &ItemId) -> Result<Option<CustodyRecord>, StorageError> {
        self.read(|state| state.custody.get(item_id).copied())
    }

    fn config(&self) -> Result<Option<VaultConfig>, StorageError> {
        self.read(|state| state.config)
    }

    fn commit(&self, batch: &WriteBatch) -> Result<(), StorageError> {
        let mut guard = self
            .state
            .write()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire write lock: {}", e)))?;
        guard.apply(batch);
        Ok(())
    }

    fn snapshot(&self) -> Result<VaultSnapshot, StorageError> {
        self.read(|state| state.clone())
    }
}
