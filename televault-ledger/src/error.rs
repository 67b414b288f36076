use televault_core::error::{AuthError, InputError, IssueError, StorageError, TransferError};
use televault_core::id::{Identity, ItemId};
use thiserror::Error;

/// Failures of vault operations. Every failure leaves persisted state as it
/// was before the call, except [`VaultError::RollbackFailed`].
#[derive(Error, Debug)]
pub enum VaultError {
    /// The vault was entered while another call was in flight
    #[error("Re-entrant call refused: another vault operation is in progress")]
    ReentrantCall,

    #[error(transparent)]
    InvalidInput(#[from] InputError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Item registry refused the transfer: {0}")]
    Transfer(#[from] TransferError),

    #[error("Value token refused the issuance: {0}")]
    Issue(#[from] IssueError),

    #[error("Item {0} is not in custody")]
    NotInCustody(ItemId),

    #[error("{caller} is not allowed to {action}")]
    Unauthorized {
        caller: Identity,
        action: &'static str,
    },

    #[error("Vault is not configured: {0} is unset")]
    NotConfigured(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("No collaborator is registered at {0}")]
    UnknownCollaborator(Identity),

    /// The release policy requires a dual authorization and none was given
    #[error("Release of item {0} requires a dual authorization")]
    AuthorizationRequired(ItemId),

    /// A compensating step failed after `cause`; state may be inconsistent
    #[error("Rollback after \"{cause}\" failed: {detail}")]
    RollbackFailed {
        cause: Box<VaultError>,
        detail: String,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}
