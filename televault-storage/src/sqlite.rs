#![cfg(feature = "sqlite")]

use crate::storage_traits::{StateWrite, VaultSnapshot, VaultStore, WriteBatch};
use anyhow::Context;
use log::debug;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use televault_core::error::StorageError;
use televault_core::id::{Identity, ItemId, Nonce};
use televault_core::objects::{CustodyRecord, VaultConfig};
use tokio::runtime::Runtime;

/// A SQLite-based implementation of [`VaultStore`] using sqlx. Each batch is
/// committed inside one SQL transaction.
pub struct SqliteStore {
    pool: SqlitePool,
    rt: Arc<Runtime>,
    db_path: PathBuf,
}

fn nonce_to_sql(nonce: Nonce) -> Result<i64, StorageError> {
    i64::try_from(nonce).map_err(|_| StorageError::Database(format!("nonce {} out of range", nonce)))
}

fn nonce_from_sql(value: i64) -> Result<Nonce, StorageError> {
    Nonce::try_from(value).map_err(|_| StorageError::Corrupted(format!("negative nonce {}", value)))
}

impl SqliteStore {
    /// Open or create the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db_path = path.as_ref().to_path_buf();
        let db_url = format!("sqlite:{}", db_path.to_string_lossy());

        // Create a runtime for async operations
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to create runtime")?;
        let rt = Arc::new(rt);

        let options = SqliteConnectOptions::from_str(&db_url)
            .with_context(|| format!("Invalid database URL: {}", db_url))?
            .create_if_missing(true);

        let pool = rt
            .block_on(async {
                SqlitePoolOptions::new()
                    .max_connections(5)
                    .connect_with(options)
                    .await
            })
            .with_context(|| format!("Failed to connect to database at {:?}", db_path))?;

        rt.block_on(Self::initialize_schema(&pool))?;
        debug!("opened SQLite vault store at {:?}", db_path);

        Ok(Self { pool, rt, db_path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Creates the necessary tables in the database
    async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS holders (
                identity BLOB PRIMARY KEY,
                nonce INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS custody (
                item_id BLOB PRIMARY KEY,
                depositor BLOB NOT NULL,
                held INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS config (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                item_registry BLOB NOT NULL,
                value_token BLOB NOT NULL,
                backend BLOB NOT NULL,
                administrator BLOB NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    fn identity_column(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<Identity, StorageError> {
        let bytes: Vec<u8> = row.try_get(column)?;
        Identity::from_slice(&bytes)
            .ok_or_else(|| StorageError::Corrupted(format!("{} is not an identity", column)))
    }

    fn custody_row(row: &sqlx::sqlite::SqliteRow) -> Result<CustodyRecord, StorageError> {
        let item_bytes: Vec<u8> = row.try_get("item_id")?;
        let item_array: [u8; 8] = item_bytes
            .as_slice()
            .try_into()
            .map_err(|_| StorageError::Corrupted("item id length".to_string()))?;
        let held: i64 = row.try_get("held")?;
        Ok(CustodyRecord {
            item_id: ItemId::from_be_bytes(item_array),
            depositor: Self::identity_column(row, "depositor")?,
            held: held != 0,
        })
    }
}

impl VaultStore for SqliteStore {
    fn nonce(&self, holder: &Identity) -> Result<Nonce, StorageError> {
        let row = self.rt.block_on(
            sqlx::query("SELECT nonce FROM holders WHERE identity = ?")
                .bind(holder.as_ref())
                .fetch_optional(&self.pool),
        )?;
        match row {
            Some(row) => nonce_from_sql(row.try_get("nonce")?),
            None => Ok(0),
        }
    }

    fn custody(&self, item_id: &ItemId) -> Result<Option<CustodyRecord>, StorageError> {
        let row = self.rt.block_on(
            sqlx::query("SELECT item_id, depositor, held FROM custody WHERE item_id = ?")
                .bind(item_id.to_be_bytes().to_vec())
                .fetch_optional(&self.pool),
        )?;
        row.as_ref().map(Self::custody_row).transpose()
    }

    fn config(&self) -> Result<Option<VaultConfig>, StorageError> {
        let row = self.rt.block_on(
            sqlx::query(
                "SELECT item_registry, value_token, backend, administrator FROM config WHERE id = 0",
            )
            .fetch_optional(&self.pool),
        )?;
        match row {
            Some(row) => Ok(Some(VaultConfig {
                item_registry: Self::identity_column(&row, "item_registry")?,
                value_token: Self::identity_column(&row, "value_token")?,
                backend: Self::identity_column(&row, "backend")?,
                administrator: Self::identity_column(&row, "administrator")?,
            })),
            None => Ok(None),
        }
    }

    fn commit(&self, batch: &WriteBatch) -> Result<(), StorageError> {
        // Convert up front so no fallible step runs inside the transaction
        let mut nonces = Vec::with_capacity(batch.len());
        for write in batch.writes() {
            if let StateWrite::Nonce { nonce, .. } = write {
                nonces.push(nonce_to_sql(*nonce)?);
            }
        }

        self.rt.block_on(async {
            let mut tx = self.pool.begin().await?;
            let mut nonces = nonces.into_iter();

            for write in batch.writes() {
                match write {
                    StateWrite::Nonce { holder, nonce } => {
                        let value = nonces.next().unwrap_or_default();
                        if *nonce == 0 {
                            sqlx::query("DELETE FROM holders WHERE identity = ?")
                                .bind(holder.to_vec())
                                .execute(&mut *tx)
                                .await?;
                        } else {
                            sqlx::query(
                                "INSERT INTO holders (identity, nonce) VALUES (?, ?)
                                 ON CONFLICT(identity) DO UPDATE SET nonce = excluded.nonce",
                            )
                            .bind(holder.to_vec())
                            .bind(value)
                            .execute(&mut *tx)
                            .await?;
                        }
                    }
                    StateWrite::Custody {
                        item_id,
                        record: Some(record),
                    } => {
                        sqlx::query(
                            "INSERT INTO custody (item_id, depositor, held) VALUES (?, ?, ?)
                             ON CONFLICT(item_id) DO UPDATE SET
                                depositor = excluded.depositor,
                                held = excluded.held",
                        )
                        .bind(item_id.to_be_bytes().to_vec())
                        .bind(record.depositor.to_vec())
                        .bind(record.held as i64)
                        .execute(&mut *tx)
                        .await?;
                    }
                    StateWrite::Custody {
                        item_id,
                        record: None,
                    } => {
                        sqlx::query("DELETE FROM custody WHERE item_id = ?")
                            .bind(item_id.to_be_bytes().to_vec())
                            .execute(&mut *tx)
                            .await?;
                    }
                    StateWrite::Config(Some(config)) => {
                        sqlx::query(
                            "INSERT INTO config (id, item_registry, value_token, backend, administrator)
                             VALUES (0, ?, ?, ?, ?)
                             ON CONFLICT(id) DO UPDATE SET
                                item_registry = excluded.item_registry,
                                value_token = excluded.value_token,
                                backend = excluded.backend,
                                administrator = excluded.administrator",
                        )
                        .bind(config.item_registry.to_vec())
                        .bind(config.value_token.to_vec())
                        .bind(config.backend.to_vec())
                        .bind(config.administrator.to_vec())
                        .execute(&mut *tx)
                        .await?;
                    }
                    StateWrite::Config(None) => {
                        sqlx::query("DELETE FROM config WHERE id = 0")
                            .execute(&mut *tx)
                            .await?;
                    }
                }
            }

            tx.commit().await
        })?;

        Ok(())
    }

    fn snapshot(&self) -> Result<VaultSnapshot, StorageError> {
        let mut snapshot = VaultSnapshot {
            config: self.config()?,
            ..VaultSnapshot::default()
        };

        let holders = self.rt.block_on(
            sqlx::query("SELECT identity, nonce FROM holders").fetch_all(&self.pool),
        )?;
        for row in &holders {
            let holder = Self::identity_column(row, "identity")?;
            snapshot.holders.insert(holder, nonce_from_sql(row.try_get("nonce")?)?);
        }

        let custody = self.rt.block_on(
            sqlx::query("SELECT item_id, depositor, held FROM custody").fetch_all(&self.pool),
        )?;
        for row in &custody {
            let record = Self::custody_row(row)?;
            snapshot.custody.insert(record.item_id, record);
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn id(byte: u8) -> Identity {
        Identity::new([byte; 20])
    }

    #[test]
    fn test_commit_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.db");
        let root = {
            let store = SqliteStore::open(&path).unwrap();
            store
                .commit(
                    &WriteBatch::new()
                        .set_nonce(id(1), 2)
                        .set_custody(CustodyRecord::held_by_custodian(ItemId(8), id(1)))
                        .set_config(VaultConfig {
                            item_registry: id(2),
                            value_token: id(3),
                            backend: id(4),
                            administrator: id(5),
                        }),
                )
                .unwrap();
            store.state_root().unwrap()
        };

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.nonce(&id(1)).unwrap(), 2);
        assert_eq!(
            store.custody(&ItemId(8)).unwrap(),
            Some(CustodyRecord::held_by_custodian(ItemId(8), id(1)))
        );
        assert_eq!(store.config().unwrap().unwrap().backend, id(4));
        assert_eq!(store.state_root().unwrap(), root);
    }

    #[test]
    fn test_inverse_restores_state() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("vault.db")).unwrap();
        let before = store.snapshot().unwrap();

        let inverse = store
            .apply(
                &WriteBatch::new()
                    .set_nonce(id(1), 1)
                    .set_custody(CustodyRecord::held_by_custodian(ItemId(5), id(1))),
            )
            .unwrap();
        store.commit(&inverse).unwrap();

        assert_eq!(store.snapshot().unwrap(), before);
    }
}
