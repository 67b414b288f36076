use crate::storage_traits::{VaultSnapshot, VaultStore, WriteBatch};
use crate::wal::{FileWriteAheadLog, WALEntry, WALRecord};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use televault_core::error::StorageError;
use televault_core::id::{Identity, ItemId, Nonce};
use televault_core::objects::{CustodyRecord, VaultConfig};

const SNAPSHOT_FILE: &str = "state.snapshot";
const WAL_FILE: &str = "state.wal";

/// Snapshot as written to disk, with the root it must hash to
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    sequence: u64,
    state_root: [u8; 32],
    snapshot: VaultSnapshot,
}

#[derive(Debug, Default)]
struct Inner {
    snapshot: VaultSnapshot,

    /// Sequence number of the last committed batch
    sequence: u64,
}

/// File-backed store: every batch is appended to a write-ahead log before it
/// becomes visible, and [`FileStore::checkpoint`] folds the log into a
/// checksummed snapshot.
pub struct FileStore {
    dir: PathBuf,
    inner: RwLock<Inner>,
    wal: FileWriteAheadLog,
}

impl FileStore {
    /// Open the store in `dir`, creating it if needed, and replay the log
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let (mut snapshot, mut sequence) = match Self::load_snapshot(&dir.join(SNAPSHOT_FILE))? {
            Some(file) => (file.snapshot, file.sequence),
            None => (VaultSnapshot::default(), 0),
        };
        let snapshot_sequence = sequence;
        let snapshot_root = snapshot.state_root()?;

        let wal = FileWriteAheadLog::open(&dir.join(WAL_FILE))?;
        let replay = wal.read_all()?;
        let mut replayed = 0usize;

        for record in replay.records {
            match record {
                WALRecord::Checkpoint {
                    sequence: marker,
                    state_root,
                } => {
                    // Markers older than the snapshot were superseded by a
                    // checkpoint whose log reset did not complete
                    if marker > snapshot_sequence
                        || (marker == snapshot_sequence && state_root != snapshot_root)
                    {
                        return Err(StorageError::Corrupted(format!(
                            "WAL checkpoint {} does not match snapshot {}",
                            marker, snapshot_sequence
                        )));
                    }
                }
                WALRecord::Batch(entry) => {
                    if entry.sequence <= sequence {
                        continue;
                    }
                    if entry.sequence != sequence + 1 {
                        return Err(StorageError::Corrupted(format!(
                            "WAL gap: expected batch {}, found {}",
                            sequence + 1,
                            entry.sequence
                        )));
                    }
                    snapshot.apply(&entry.batch);
                    sequence = entry.sequence;
                    replayed += 1;
                }
            }
        }
        debug!(
            "opened vault store at {:?}: snapshot at {}, replayed {} batches",
            dir, snapshot_sequence, replayed
        );

        let store = Self {
            dir,
            inner: RwLock::new(Inner { snapshot, sequence }),
            wal,
        };

        if replay.torn_tail {
            warn!(
                "discarding partially written WAL record in {:?}",
                store.wal.path()
            );
            store.checkpoint()?;
        }

        Ok(store)
    }

    fn load_snapshot(path: &Path) -> Result<Option<SnapshotFile>, StorageError> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        let file: SnapshotFile = bincode::deserialize(&bytes)?;
        if file.snapshot.state_root()? != file.state_root {
            return Err(StorageError::Corrupted(format!(
                "snapshot {:?} does not match its state root",
                path
            )));
        }
        Ok(Some(file))
    }

    /// Write the current state as a snapshot and truncate the log
    pub fn checkpoint(&self) -> Result<[u8; 32], StorageError> {
        let inner = self.write_inner()?;
        let state_root = inner.snapshot.state_root()?;
        let file = SnapshotFile {
            sequence: inner.sequence,
            state_root,
            snapshot: inner.snapshot.clone(),
        };

        // Write to a temporary file and rename so a crash never leaves a
        // half-written snapshot behind
        let path = self.dir.join(SNAPSHOT_FILE);
        let tmp = self.dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        {
            let mut out = fs::File::create(&tmp)?;
            out.write_all(&bincode::serialize(&file)?)?;
            out.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        self.wal.reset(&WALRecord::Checkpoint {
            sequence: inner.sequence,
            state_root,
        })?;
        debug!("checkpointed vault store at batch {}", inner.sequence);
        Ok(state_root)
    }

    /// Sequence number of the last committed batch
    pub fn sequence(&self) -> Result<u64, StorageError> {
        Ok(self.read_inner()?.sequence)
    }

    fn read_inner(&self) -> Result<RwLockReadGuard<'_, Inner>, StorageError> {
        self.inner
            .read()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire read lock: {}", e)))
    }

    fn write_inner(&self) -> Result<RwLockWriteGuard<'_, Inner>, StorageError> {
        self.inner
            .write()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire write lock: {}", e)))
    }
}

impl VaultStore for FileStore {
    fn nonce(&self, holder: &Identity) -> Result<Nonce, StorageError> {
        Ok(self.read_inner()?.snapshot.nonce(holder))
    }

    fn custody(&self, item_id: &ItemId) -> Result<Option<CustodyRecord>, StorageError> {
        Ok(self.read_inner()?.snapshot.custody.get(item_id).copied())
    }

    fn config(&self) -> Result<Option<VaultConfig>, StorageError> {
        Ok(self.read_inner()?.snapshot.config)
    }

    fn commit(&self, batch: &WriteBatch) -> Result<(), StorageError> {
        let mut inner = self.write_inner()?;
        let sequence = inner.sequence + 1;

        self.wal.append(&WALRecord::Batch(WALEntry {
            sequence,
            timestamp: FileWriteAheadLog::current_timestamp(),
            batch: batch.clone(),
        }))?;

        inner.snapshot.apply(batch);
        inner.sequence = sequence;
        Ok(())
    }

    fn snapshot(&self) -> Result<VaultSnapshot, StorageError> {
        Ok(self.read_inner()?.snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn id(byte: u8) -> Identity {
        Identity::new([byte; 20])
    }

    fn pawn_batch(holder: Identity, nonce: Nonce, item: u64) -> WriteBatch {
        WriteBatch::new()
            .set_nonce(holder, nonce)
            .set_custody(CustodyRecord::held_by_custodian(ItemId(item), holder))
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let root = {
            let store = FileStore::open(dir.path()).unwrap();
            store.commit(&pawn_batch(id(1), 1, 10)).unwrap();
            store.commit(&pawn_batch(id(1), 2, 11)).unwrap();
            store.state_root().unwrap()
        };

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.nonce(&id(1)).unwrap(), 2);
        assert!(store.custody(&ItemId(11)).unwrap().unwrap().held);
        assert_eq!(store.sequence().unwrap(), 2);
        assert_eq!(store.state_root().unwrap(), root);
    }

    #[test]
    fn test_checkpoint_then_more_batches() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.commit(&pawn_batch(id(1), 1, 10)).unwrap();
            store.checkpoint().unwrap();
            store.commit(&pawn_batch(id(2), 1, 12)).unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.nonce(&id(1)).unwrap(), 1);
        assert_eq!(store.nonce(&id(2)).unwrap(), 1);
        assert_eq!(store.sequence().unwrap(), 2);
    }

    #[test]
    fn test_corrupted_snapshot_is_refused() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.commit(&pawn_batch(id(1), 1, 10)).unwrap();
            store.checkpoint().unwrap();
        }

        // Rewrite the snapshot with tampered content but the old root
        let path = dir.path().join(SNAPSHOT_FILE);
        let mut file: SnapshotFile = bincode::deserialize(&fs::read(&path).unwrap()).unwrap();
        file.snapshot.holders.insert(id(1), 99);
        fs::write(&path, bincode::serialize(&file).unwrap()).unwrap();

        assert!(matches!(
            FileStore::open(dir.path()),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn test_torn_tail_recovers_committed_prefix() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.commit(&pawn_batch(id(1), 1, 10)).unwrap();
        }

        let mut wal = fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join(WAL_FILE))
            .unwrap();
        wal.write_all(&64u64.to_le_bytes()).unwrap();
        wal.write_all(&[0xff; 10]).unwrap();
        drop(wal);

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.nonce(&id(1)).unwrap(), 1);

        // The log was rewritten, so new commits are readable after reopening
        store.commit(&pawn_batch(id(1), 2, 11)).unwrap();
        drop(store);
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.nonce(&id(1)).unwrap(), 2);
    }

    #[test]
    fn test_rollback_through_inverse_is_durable() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            let inverse = store.apply(&pawn_batch(id(1), 1, 10)).unwrap();
            store.commit(&inverse).unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.nonce(&id(1)).unwrap(), 0);
        assert_eq!(store.custody(&ItemId(10)).unwrap(), None);
        assert_eq!(store.snapshot().unwrap(), VaultSnapshot::default());
    }
}
