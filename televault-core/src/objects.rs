use crate::id::{Identity, ItemId, Nonce};
use serde::{Deserialize, Serialize};

/// Replay state of a holder. Accounts exist implicitly with nonce 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HolderAccount {
    pub identity: Identity,
    pub nonce: Nonce,
}

/// Custody state of a single item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyRecord {
    pub item_id: ItemId,

    /// The holder that deposited the item and receives it back on release
    pub depositor: Identity,

    /// Whether the custodian currently holds the item
    pub held: bool,
}

impl CustodyRecord {
    pub fn held_by_custodian(item_id: ItemId, depositor: Identity) -> Self {
        Self {
            item_id,
            depositor,
            held: true,
        }
    }

    /// The same record after the item left custody
    pub fn released(self) -> Self {
        Self {
            held: false,
            ..self
        }
    }
}

/// Addresses every vault operation reads. Mutable only by the administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    pub item_registry: Identity,
    pub value_token: Identity,
    pub backend: Identity,
    pub administrator: Identity,
}

impl VaultConfig {
    /// Whether every address is set. Pawns are refused until it is.
    pub fn is_complete(&self) -> bool {
        !self.item_registry.is_zero()
            && !self.value_token.is_zero()
            && !self.backend.is_zero()
            && !self.administrator.is_zero()
    }

    /// Name of the first unset address, if any
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.item_registry.is_zero() {
            Some("item_registry")
        } else if self.value_token.is_zero() {
            Some("value_token")
        } else if self.backend.is_zero() {
            Some("backend")
        } else if self.administrator.is_zero() {
            Some("administrator")
        } else {
            None
        }
    }
}

/// Who may release an item from custody
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePolicy {
    /// Any caller may return an item to its depositor. Legacy compatibility only.
    Unrestricted,

    /// Only the depositor or the administrator may release
    #[default]
    DepositorOrAdministrator,

    /// Depositor or administrator, plus a dual authorization from the depositor
    /// and the backend over the release message
    DualSignature,
}

/// Hardening switches of a vault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultPolicy {
    pub release: ReleasePolicy,

    /// Reject authorizations that carry no deadline
    pub require_deadline: bool,
}

impl VaultPolicy {
    /// Behaviour of the original deployment: unrestricted release, no deadlines
    pub fn legacy() -> Self {
        Self {
            release: ReleasePolicy::Unrestricted,
            require_deadline: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> Identity {
        Identity::new([byte; 20])
    }

    #[test]
    fn test_config_completeness() {
        let mut config = VaultConfig::default();
        assert!(!config.is_complete());
        assert_eq!(config.missing_field(), Some("item_registry"));

        config.item_registry = id(1);
        config.value_token = id(2);
        config.backend = id(3);
        assert_eq!(config.missing_field(), Some("administrator"));

        config.administrator = id(4);
        assert!(config.is_complete());
        assert_eq!(config.missing_field(), None);
    }

    #[test]
    fn test_release_clears_held_only() {
        let record = CustodyRecord::held_by_custodian(ItemId(3), id(9));
        let released = record.released();
        assert!(!released.held);
        assert_eq!(released.depositor, id(9));
        assert_eq!(released.item_id, ItemId(3));
    }

    #[test]
    fn test_default_policy_is_hardened() {
        let policy = VaultPolicy::default();
        assert_eq!(policy.release, ReleasePolicy::DepositorOrAdministrator);
        assert!(!policy.require_deadline);
        assert_eq!(VaultPolicy::legacy().release, ReleasePolicy::Unrestricted);
    }
}
