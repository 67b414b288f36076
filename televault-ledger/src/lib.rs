pub mod collaborators;
pub mod error;
pub mod events;
pub mod mock;
pub mod vault;

// Re-export the main types for convenience
pub use collaborators::{CollaboratorDirectory, ItemRegistry, StaticDirectory, ValueTokenLedger};
pub use error::VaultError;
pub use events::{EventSink, RecordingSink};
pub use mock::{InMemoryItemRegistry, InMemoryValueToken, IssueMode};
pub use vault::{CustodyDivergence, Vault};
