use crate::error::InputError;
use crate::id::{Amount, Identity, ItemId, Nonce};
use crate::message::CanonicalMessage;
use crate::signature::{Digest32, LocalSigner, Signature, SignatureError};
use serde::{Deserialize, Serialize};

/// Claimed digests and signatures of both parties over one canonical message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DualAuthorization {
    pub holder_digest: Digest32,
    pub backend_digest: Digest32,
    pub holder_signature: Signature,
    pub backend_signature: Signature,

    /// End of the validity window in unix seconds, part of the signed message
    pub deadline: Option<u64>,
}

impl DualAuthorization {
    /// Have both parties sign `message`
    pub fn sign(
        message: &CanonicalMessage,
        holder: &LocalSigner,
        backend: &LocalSigner,
    ) -> Result<Self, SignatureError> {
        let digest = message.digest();
        Ok(Self {
            holder_digest: digest,
            backend_digest: digest,
            holder_signature: holder.sign(&digest)?,
            backend_signature: backend.sign(&digest)?,
            deadline: message.deadline(),
        })
    }
}

/// A request to move an item into custody in exchange for value tokens.
/// Constructed by the submitter, validated, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PawnRequest {
    pub item_id: ItemId,
    pub value_amount: Amount,
    pub authorization: DualAuthorization,
}

impl PawnRequest {
    pub fn new(item_id: ItemId, value_amount: Amount, authorization: DualAuthorization) -> Self {
        Self {
            item_id,
            value_amount,
            authorization,
        }
    }

    /// Cheap structural checks, run before any signature work
    pub fn check_input(&self) -> Result<(), InputError> {
        if !self.item_id.is_valid() {
            return Err(InputError::InvalidItemId);
        }
        if self.value_amount == 0 {
            return Err(InputError::InvalidValueAmount);
        }
        Ok(())
    }

    /// The message this request claims to authorize for `holder` at `nonce`
    pub fn message(&self, holder: Identity, nonce: Nonce) -> CanonicalMessage {
        let message = CanonicalMessage::pawn(self.item_id, self.value_amount, holder, nonce);
        match self.authorization.deadline {
            Some(deadline) => message.with_deadline(deadline),
            None => message,
        }
    }
}

/// A request to return an item from custody to its depositor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub item_id: ItemId,

    /// Required only under the dual-signature release policy
    pub authorization: Option<DualAuthorization>,
}

impl ReleaseRequest {
    pub fn unsigned(item_id: ItemId) -> Self {
        Self {
            item_id,
            authorization: None,
        }
    }

    pub fn signed(item_id: ItemId, authorization: DualAuthorization) -> Self {
        Self {
            item_id,
            authorization: Some(authorization),
        }
    }
}

/// Receipt of a successful pawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PawnReceipt {
    pub item_id: ItemId,
    pub holder: Identity,
    pub value_amount: Amount,

    /// The holder's nonce after the pawn
    pub nonce: Nonce,
}

/// Receipt of a successful release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReceipt {
    pub item_id: ItemId,
    pub depositor: Identity,
    pub caller: Identity,
}

/// Receipt of an emergency recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReceipt {
    pub item_id: ItemId,
    pub destination: Identity,

    /// Depositor of record, if the item had been pawned
    pub depositor: Option<Identity>,
}

/// Observable effects of vault operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultEvent {
    Pawned(PawnReceipt),
    Released(ReleaseReceipt),
    EmergencyRecovered(RecoveryReceipt),
    ConfigurationUpdated {
        item_registry: Identity,
        value_token: Identity,
        backend: Identity,
    },
    AdministrationTransferred {
        previous: Identity,
        administrator: Identity,
    },
}
