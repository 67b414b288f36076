use crate::id::{Amount, Identity, ItemId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Which of the two parties of a dual authorization a failure refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignerRole {
    /// The holder depositing or reclaiming the item
    Holder,
    /// The trusted backend co-signer
    Backend,
}

impl fmt::Display for SignerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignerRole::Holder => write!(f, "holder"),
            SignerRole::Backend => write!(f, "backend"),
        }
    }
}

/// Malformed request input, rejected before any cryptographic work
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputError {
    #[error("Invalid item id: item ids start at 1")]
    InvalidItemId,

    #[error("Invalid value amount: must be greater than zero")]
    InvalidValueAmount,

    #[error("Invalid destination: the zero identity cannot receive items")]
    InvalidDestination,
}

/// Failures of the authorization validator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error(transparent)]
    InvalidInput(#[from] InputError),

    /// A claimed digest differs from the recomputed canonical digest
    #[error("Invalid {signer} message hash")]
    DigestMismatch { signer: SignerRole },

    #[error("Invalid holder signature")]
    InvalidHolderSignature,

    #[error("Invalid backend signature")]
    InvalidBackendSignature,

    #[error("Authorization expired at {deadline}, current time is {now}")]
    Expired { deadline: u64, now: u64 },

    #[error("Authorization carries no deadline but the vault requires one")]
    MissingDeadline,
}

/// Failures reported by the external item registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Item {0} does not exist")]
    UnknownItem(ItemId),

    #[error("Item {item} is owned by {actual}, not {expected}")]
    NotOwner {
        item: ItemId,
        expected: Identity,
        actual: Identity,
    },

    #[error("Operator {operator} is not approved to move item {item}")]
    NotApproved { operator: Identity, item: ItemId },

    #[error("Transfer to the zero identity")]
    ZeroRecipient,

    #[error("Transfer rejected: {0}")]
    Rejected(String),
}

/// Failures reported by the external value-token ledger
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IssueError {
    #[error("Insufficient balance: {available} available, {requested} requested")]
    InsufficientBalance { available: Amount, requested: Amount },

    #[error("Issuing {0} would overflow the recipient balance")]
    Overflow(Amount),

    #[error("Issuance rejected: {0}")]
    Rejected(String),
}

/// Represents all possible errors that can occur when persisting vault state
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO errors that occur when reading/writing files
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Database errors that occur with the underlying storage backend
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Persisted state failed its integrity check
    #[error("Corrupted state: {0}")]
    Corrupted(String),

    /// Errors that occur during write-ahead log operations
    #[error("Write-ahead log error: {0}")]
    WAL(String),

    /// A lock protecting in-process state was poisoned
    #[error("Lock error: {0}")]
    Lock(String),

    /// Anyhow error wrapper for error context
    #[error(transparent)]
    Context(#[from] anyhow::Error),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}
