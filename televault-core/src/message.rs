//! Canonical messages that both signers of a dual authorization commit to.
//!
//! Fields are tightly packed in a fixed order: integers as 32-byte big-endian
//! words, identities as their raw 20 bytes. The digest is the Keccak-256 of
//! that encoding.

use crate::id::{Amount, Identity, ItemId, Nonce};
use crate::signature::{keccak256, Digest32};

/// What a dual authorization allows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalMessage {
    /// Move `item_id` into custody and issue `value_amount` to `holder`
    Pawn {
        item_id: ItemId,
        value_amount: Amount,
        holder: Identity,
        nonce: Nonce,
        deadline: Option<u64>,
    },
    /// Return `item_id` from custody to `depositor`
    Release {
        item_id: ItemId,
        depositor: Identity,
        nonce: Nonce,
        deadline: Option<u64>,
    },
}

/// Tag word that keeps release digests disjoint from pawn digests
pub fn release_tag() -> Digest32 {
    keccak256(b"televault.release")
}

fn push_word(buf: &mut Vec<u8>, value: u128) {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    buf.extend_from_slice(&word);
}

impl CanonicalMessage {
    pub fn pawn(item_id: ItemId, value_amount: Amount, holder: Identity, nonce: Nonce) -> Self {
        CanonicalMessage::Pawn {
            item_id,
            value_amount,
            holder,
            nonce,
            deadline: None,
        }
    }

    pub fn release(item_id: ItemId, depositor: Identity, nonce: Nonce) -> Self {
        CanonicalMessage::Release {
            item_id,
            depositor,
            nonce,
            deadline: None,
        }
    }

    /// Bind the message to a validity window ending at `deadline` (unix seconds)
    pub fn with_deadline(mut self, until: u64) -> Self {
        match &mut self {
            CanonicalMessage::Pawn { deadline, .. } | CanonicalMessage::Release { deadline, .. } => {
                *deadline = Some(until)
            }
        }
        self
    }

    pub fn deadline(&self) -> Option<u64> {
        match self {
            CanonicalMessage::Pawn { deadline, .. } | CanonicalMessage::Release { deadline, .. } => {
                *deadline
            }
        }
    }

    /// Packed encoding hashed into the digest
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 * 5 + 20);
        match self {
            CanonicalMessage::Pawn {
                item_id,
                value_amount,
                holder,
                nonce,
                deadline,
            } => {
                push_word(&mut buf, item_id.0 as u128);
                push_word(&mut buf, *value_amount);
                buf.extend_from_slice(holder.as_ref());
                push_word(&mut buf, *nonce as u128);
                if let Some(deadline) = deadline {
                    push_word(&mut buf, *deadline as u128);
                }
            }
            CanonicalMessage::Release {
                item_id,
                depositor,
                nonce,
                deadline,
            } => {
                buf.extend_from_slice(&release_tag());
                push_word(&mut buf, item_id.0 as u128);
                buf.extend_from_slice(depositor.as_ref());
                push_word(&mut buf, *nonce as u128);
                if let Some(deadline) = deadline {
                    push_word(&mut buf, *deadline as u128);
                }
            }
        }
        buf
    }

    pub fn digest(&self) -> Digest32 {
        keccak256(&self.encode())
    }
}
