//! External systems the vault moves items and value through.
//!
//! The vault configuration names collaborators by address only. A
//! [`CollaboratorDirectory`] turns those addresses into implementations at
//! call time, so re-pointing the configuration re-points the vault.

use std::collections::HashMap;
use std::sync::Arc;
use televault_core::error::{IssueError, TransferError};
use televault_core::id::{Amount, Identity, ItemId};

/// Registry of unique items the vault takes custody of
pub trait ItemRegistry: Send + Sync {
    /// Current owner of `item_id`, `None` if it does not exist
    fn owner_of(&self, item_id: ItemId) -> Option<Identity>;

    /// Move `item_id` from `from` to `to` on behalf of `operator`.
    ///
    /// `operator` must be `from` or have been approved by `from` beforehand.
    fn transfer_from(
        &self,
        operator: &Identity,
        from: &Identity,
        to: &Identity,
        item_id: ItemId,
    ) -> Result<(), TransferError>;
}

/// Fungible ledger the vault issues value from
pub trait ValueTokenLedger: Send + Sync {
    fn balance_of(&self, holder: &Identity) -> Amount;

    /// Credit `amount` to `to`, by minting or by transferring from `issuer`
    fn issue(&self, issuer: &Identity, to: &Identity, amount: Amount) -> Result<(), IssueError>;
}

/// Resolves collaborator addresses to implementations
pub trait CollaboratorDirectory: Send + Sync {
    fn item_registry(&self, address: &Identity) -> Option<Arc<dyn ItemRegistry>>;

    fn value_token(&self, address: &Identity) -> Option<Arc<dyn ValueTokenLedger>>;
}

/// Directory with a fixed set of collaborators registered up front
#[derive(Clone, Default)]
pub struct StaticDirectory {
    registries: HashMap<Identity, Arc<dyn ItemRegistry>>,
    tokens: HashMap<Identity, Arc<dyn ValueTokenLedger>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item_registry(mut self, address: Identity, registry: Arc<dyn ItemRegistry>) -> Self {
        self.registries.insert(address, registry);
        self
    }

    pub fn with_value_token(mut self, address: Identity, token: Arc<dyn ValueTokenLedger>) -> Self {
        self.tokens.insert(address, token);
        self
    }
}

impl CollaboratorDirectory for StaticDirectory {
    fn item_registry(&self, address: &Identity) -> Option<Arc<dyn ItemRegistry>> {
        self.registries.get(address).cloned()
    }

    fn value_token(&self, address: &Identity) -> Option<Arc<dyn ValueTokenLedger>> {
        self.tokens.get(address).cloned()
    }
}

impl std::fmt::Debug for StaticDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticDirectory")
            .field("registries", &self.registries.keys().collect::<Vec<_>>())
            .field("tokens", &self.tokens.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{InMemoryItemRegistry, InMemoryValueToken};

    #[test]
    fn test_static_directory_resolves_registered_addresses() {
        let registry = Arc::new(InMemoryItemRegistry::new());
        registry.mint(&Identity::new([7; 20]), ItemId(1)).unwrap();

        let directory = StaticDirectory::new()
            .with_item_registry(Identity::new([1; 20]), registry)
            .with_value_token(Identity::new([2; 20]), Arc::new(InMemoryValueToken::minting()));

        let resolved = directory.item_registry(&Identity::new([1; 20])).unwrap();
        assert_eq!(resolved.owner_of(ItemId(1)), Some(Identity::new([7; 20])));
        assert!(directory.value_token(&Identity::new([2; 20])).is_some());

        assert!(directory.item_registry(&Identity::new([2; 20])).is_none());
        assert!(directory.value_token(&Identity::new([1; 20])).is_none());
    }
}
