pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod id;
pub mod message;
pub mod objects;
pub mod request;
pub mod signature;
pub mod validator;

// Re-export the main types for convenience
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, VaultSettings};
pub use error::{AuthError, InputError, IssueError, SignerRole, StorageError, TransferError};
pub use guard::{EntryGuard, ReentrancyGuard};
pub use id::{Amount, Identity, ItemId, Nonce};
pub use message::CanonicalMessage;
pub use objects::{CustodyRecord, HolderAccount, ReleasePolicy, VaultConfig, VaultPolicy};
pub use request::{
    DualAuthorization, PawnReceipt, PawnRequest, RecoveryReceipt, ReleaseReceipt,
    ReleaseRequest, VaultEvent,
};
pub use signature::{recover, sign_digest, Digest32, LocalSigner, Signature, SignatureError};
pub use validator::{validate, AuthorizationValidator};
