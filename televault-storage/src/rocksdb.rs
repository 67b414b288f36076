#![cfg(feature = "rocksdb")]

use crate::storage_traits::{StateWrite, VaultSnapshot, VaultStore, WriteBatch};
use anyhow::Context;
use log::debug;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, DB};
use std::path::{Path, PathBuf};
use televault_core::error::StorageError;
use televault_core::id::{Identity, ItemId, Nonce};
use televault_core::objects::{CustodyRecord, VaultConfig};

// Column family names used to organize different types of data
const CF_HOLDERS: &str = "holders";
const CF_CUSTODY: &str = "custody";
const CF_CONFIG: &str = "config";

const CONFIG_KEY: &[u8] = b"config";

/// RocksDB implementation of [`VaultStore`]. Batches map onto RocksDB write
/// batches, which are applied atomically.
pub struct RocksDbStore {
    db: DB,
    db_path: PathBuf,
}

impl RocksDbStore {
    /// Open or create the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db_path = path.as_ref().to_path_buf();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_HOLDERS, CF_CUSTODY, CF_CONFIG]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, &db_path, families)
            .with_context(|| format!("Failed to open RocksDB database at {:?}", db_path))?;
        debug!("opened RocksDB vault store at {:?}", db_path);

        Ok(Self { db, db_path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::Database(format!("Missing column family {}", name)))
    }
}

impl VaultStore for RocksDbStore {
    fn nonce(&self, holder: &Identity) -> Result<Nonce, StorageError> {
        match self.db.get_cf(self.cf(CF_HOLDERS)?, holder.as_ref())? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(0),
        }
    }

    fn custody(&self, item_id: &ItemId) -> Result<Option<CustodyRecord>, StorageError> {
        match self.db.get_cf(self.cf(CF_CUSTODY)?, item_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn config(&self) -> Result<Option<VaultConfig>, StorageError> {
        match self.db.get_cf(self.cf(CF_CONFIG)?, CONFIG_KEY)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn commit(&self, batch: &WriteBatch) -> Result<(), StorageError> {
        let holders = self.cf(CF_HOLDERS)?;
        let custody = self.cf(CF_CUSTODY)?;
        let config = self.cf(CF_CONFIG)?;

        let mut write_batch = rocksdb::WriteBatch::default();
        for write in batch.writes() {
            match write {
                StateWrite::Nonce { holder, nonce: 0 } => {
                    write_batch.delete_cf(holders, holder.as_ref());
                }
                StateWrite::Nonce { holder, nonce } => {
                    write_batch.put_cf(holders, holder.as_ref(), bincode::serialize(nonce)?);
                }
                StateWrite::Custody {
                    item_id,
                    record: Some(record),
                } => {
                    write_batch.put_cf(custody, item_id.to_be_bytes(), bincode::serialize(record)?);
                }
                StateWrite::Custody {
                    item_id,
                    record: None,
                } => {
                    write_batch.delete_cf(custody, item_id.to_be_bytes());
                }
                StateWrite::Config(Some(value)) => {
                    write_batch.put_cf(config, CONFIG_KEY, bincode::serialize(value)?);
                }
                StateWrite::Config(None) => {
                    write_batch.delete_cf(config, CONFIG_KEY);
                }
            }
        }

        self.db.write(write_batch)?;
        Ok(())
    }

    fn snapshot(&self) -> Result<VaultSnapshot, StorageError> {
        let mut snapshot = VaultSnapshot {
            config: self.config()?,
            ..VaultSnapshot::default()
        };

        for entry in self.db.iterator_cf(self.cf(CF_HOLDERS)?, IteratorMode::Start) {
            let (key, value) = entry?;
            let holder = Identity::from_slice(&key)
                .ok_or_else(|| StorageError::Corrupted("holder key length".to_string()))?;
            snapshot.holders.insert(holder, bincode::deserialize(&value)?);
        }

        for entry in self.db.iterator_cf(self.cf(CF_CUSTODY)?, IteratorMode::Start) {
            let (_, value) = entry?;
            let record: CustodyRecord = bincode::deserialize(&value)?;
            snapshot.custody.insert(record.item_id, record);
        }

        Ok(snapshot)
    }
}
