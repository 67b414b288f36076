use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use televault_core::error::StorageError;
use televault_core::id::{Identity, ItemId, Nonce};
use televault_core::objects::{CustodyRecord, VaultConfig};

/// A single change to persisted vault state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateWrite {
    /// Set a holder's nonce. Nonce 0 is the implicit default and is not stored.
    Nonce { holder: Identity, nonce: Nonce },

    /// Set or clear the custody record of an item
    Custody {
        item_id: ItemId,
        record: Option<CustodyRecord>,
    },

    /// Set or clear the configuration
    Config(Option<VaultConfig>),
}

/// Ordered set of writes committed atomically
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    writes: Vec<StateWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_nonce(mut self, holder: Identity, nonce: Nonce) -> Self {
        self.writes.push(StateWrite::Nonce { holder, nonce });
        self
    }

    pub fn set_custody(mut self, record: CustodyRecord) -> Self {
        self.writes.push(StateWrite::Custody {
            item_id: record.item_id,
            record: Some(record),
        });
        self
    }

    pub fn clear_custody(mut self, item_id: ItemId) -> Self {
        self.writes.push(StateWrite::Custody {
            item_id,
            record: None,
        });
        self
    }

    pub fn set_config(mut self, config: VaultConfig) -> Self {
        self.writes.push(StateWrite::Config(Some(config)));
        self
    }

    pub fn push(&mut self, write: StateWrite) {
        self.writes.push(write);
    }

    pub fn writes(&self) -> &[StateWrite] {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }
}

/// Complete persisted state of a vault
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub config: Option<VaultConfig>,

    /// Holders with a non-zero nonce
    pub holders: BTreeMap<Identity, Nonce>,

    pub custody: BTreeMap<ItemId, CustodyRecord>,
}

impl VaultSnapshot {
    pub fn nonce(&self, holder: &Identity) -> Nonce {
        self.holders.get(holder).copied().unwrap_or(0)
    }

    pub fn apply_write(&mut self, write: &StateWrite) {
        match write {
            StateWrite::Nonce { holder, nonce: 0 } => {
                self.holders.remove(holder);
            }
            StateWrite::Nonce { holder, nonce } => {
                self.holders.insert(*holder, *nonce);
            }
            StateWrite::Custody {
                item_id,
                record: Some(record),
            } => {
                self.custody.insert(*item_id, *record);
            }
            StateWrite::Custody {
                item_id,
                record: None,
            } => {
                self.custody.remove(item_id);
            }
            StateWrite::Config(config) => {
                self.config = *config;
            }
        }
    }

    pub fn apply(&mut self, batch: &WriteBatch) {
        for write in batch.writes() {
            self.apply_write(write);
        }
    }

    /// BLAKE3 commitment to the whole state
    pub fn state_root(&self) -> Result<[u8; 32], StorageError> {
        let encoded = bincode::serialize(self)?;
        Ok(*blake3::hash(&encoded).as_bytes())
    }
}

/// Persistence interface for vault state.
///
/// Implementations must make [`VaultStore::commit`] atomic: after it returns,
/// either every write of the batch is visible or none is.
pub trait VaultStore: Send + Sync {
    /// Current nonce of a holder, 0 for holders never seen
    fn nonce(&self, holder: &Identity) -> Result<Nonce, StorageError>;

    /// Custody record of an item, if the item was ever deposited
    fn custody(&self, item_id: &ItemId) -> Result<Option<CustodyRecord>, StorageError>;

    /// Current configuration, `None` before the vault was initialized
    fn config(&self) -> Result<Option<VaultConfig>, StorageError>;

    /// Commit a batch atomically
    fn commit(&self, batch: &WriteBatch) -> Result<(), StorageError>;

    /// Copy of the whole persisted state
    fn snapshot(&self) -> Result<VaultSnapshot, StorageError>;

    /// Batch that undoes `batch` when committed after it, built from the
    /// current before-images
    fn inverse_of(&self, batch: &WriteBatch) -> Result<WriteBatch, StorageError> {
        let mut inverse = WriteBatch::new();
        for write in batch.writes().iter().rev() {
            let before = match write {
                StateWrite::Nonce { holder, .. } => StateWrite::Nonce {
                    holder: *holder,
                    nonce: self.nonce(holder)?,
                },
                StateWrite::Custody { item_id, .. } => StateWrite::Custody {
                    item_id: *item_id,
                    record: self.custody(item_id)?,
                },
                StateWrite::Config(_) => StateWrite::Config(self.config()?),
            };
            inverse.push(before);
        }
        Ok(inverse)
    }

    /// Commit `batch` and return the batch that undoes it
    fn apply(&self, batch: &WriteBatch) -> Result<WriteBatch, StorageError> {
        let inverse = self.inverse_of(batch)?;
        self.commit(batch)?;
        Ok(inverse)
    }

    /// BLAKE3 commitment to the current state
    fn state_root(&self) -> Result<[u8; 32], StorageError> {
        self.snapshot()?.state_root()
    }
}
