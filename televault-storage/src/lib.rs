pub mod file;
pub mod memory;
pub mod storage_traits;
pub mod wal;

#[cfg(feature = "rocksdb")]
pub mod rocksdb;

#[cfg(feature = "sqlite")]
pub mod sqlite;

// Re-export the main types for convenience
pub use storage_traits::{StateWrite, VaultSnapshot, VaultStore, WriteBatch};
pub use wal::{FileWriteAheadLog, WALEntry, WALRecord};

// Re-export the storage implementations
pub use file::FileStore;
pub use memory::MemoryStore;

#[cfg(feature = "rocksdb")]
pub use crate::rocksdb::RocksDbStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
