//! Recoverable secp256k1 signatures over 32-byte digests.
//!
//! Parties sign digests as personal messages: the signed payload is
//! `keccak256("\x19Ethereum Signed Message:\n32" || digest)`. Recovery yields
//! the signer's [`Identity`], which callers compare by exact equality against
//! the identity they expect.

use crate::id::{Identity, IDENTITY_LEN};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// A 32-byte hash
pub type Digest32 = [u8; 32];

/// Prefix applied to every digest before it is signed
pub const PERSONAL_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// Errors raised while producing or recovering a signature
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Invalid recovery byte {0}, expected 27 or 28")]
    InvalidRecoveryByte(u8),

    #[error("Malformed signature scalars")]
    Malformed,

    #[error("Public key recovery failed")]
    Recovery,

    #[error("Invalid signing key")]
    InvalidKey,

    #[error("Signing failed")]
    Signing,
}

/// Signature in `(v, r, s)` form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub v: u8,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl Signature {
    pub fn new(v: u8, r: [u8; 32], s: [u8; 32]) -> Self {
        Self { v, r, s }
    }

    /// Serialize as the 65-byte `r || s || v` layout
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut bytes = [0u8; 65];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        bytes[64] = self.v;
        bytes
    }

    /// Parse the 65-byte `r || s || v` layout
    pub fn from_bytes(bytes: &[u8; 65]) -> Self {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Self { v: bytes[64], r, s }
    }
}

/// Keccak-256 of arbitrary bytes
pub fn keccak256(data: &[u8]) -> Digest32 {
    Keccak256::digest(data).into()
}

/// Hash actually signed for a digest
pub fn personal_message_hash(digest: &Digest32) -> Digest32 {
    let mut hasher = Keccak256::new();
    hasher.update(PERSONAL_MESSAGE_PREFIX);
    hasher.update(digest);
    hasher.finalize().into()
}

/// Address of a public key: the last 20 bytes of the Keccak-256 of its
/// uncompressed encoding, without the leading tag byte
pub fn identity_of(key: &VerifyingKey) -> Identity {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut bytes = [0u8; IDENTITY_LEN];
    bytes.copy_from_slice(&hash[32 - IDENTITY_LEN..]);
    Identity::new(bytes)
}

/// Recover the identity that signed `digest`
pub fn recover(digest: &Digest32, signature: &Signature) -> Result<Identity, SignatureError> {
    let recovery_id = match signature.v {
        27 | 28 => RecoveryId::from_byte(signature.v - 27)
            .ok_or(SignatureError::InvalidRecoveryByte(signature.v))?,
        v => return Err(SignatureError::InvalidRecoveryByte(v)),
    };

    let mut scalars = [0u8; 64];
    scalars[..32].copy_from_slice(&signature.r);
    scalars[32..].copy_from_slice(&signature.s);
    let ecdsa = EcdsaSignature::from_slice(&scalars).map_err(|_| SignatureError::Malformed)?;

    // Recovery re-verifies the signature, which also rejects high-s values
    let prehash = personal_message_hash(digest);
    let key = VerifyingKey::recover_from_prehash(&prehash, &ecdsa, recovery_id)
        .map_err(|_| SignatureError::Recovery)?;

    Ok(identity_of(&key))
}

/// Sign `digest` as a personal message
pub fn sign_digest(key: &SigningKey, digest: &Digest32) -> Result<Signature, SignatureError> {
    let prehash = personal_message_hash(digest);
    let (ecdsa, recovery_id) = key
        .sign_prehash_recoverable(&prehash)
        .map_err(|_| SignatureError::Signing)?;

    let bytes = ecdsa.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..64]);

    Ok(Signature {
        v: 27 + recovery_id.to_byte(),
        r,
        s,
    })
}

/// A party holding its own secp256k1 key, used by the backend co-signer and
/// by off-protocol tooling to produce authorizations
#[derive(Clone)]
pub struct LocalSigner {
    key: SigningKey,
    identity: Identity,
}

impl LocalSigner {
    pub fn new(key: SigningKey) -> Self {
        let identity = identity_of(key.verifying_key());
        Self { key, identity }
    }

    /// Build a signer from a 32-byte secret scalar
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self, SignatureError> {
        let key = SigningKey::from_slice(secret).map_err(|_| SignatureError::InvalidKey)?;
        Ok(Self::new(key))
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn sign(&self, digest: &Digest32) -> Result<Signature, SignatureError> {
        sign_digest(&self.key, digest)
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(byte: u8) -> LocalSigner {
        LocalSigner::from_secret_bytes(&[byte; 32]).unwrap()
    }

    #[test]
    fn test_keccak_known_vector() {
        // keccak256("") as published for Ethereum
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_identity_of_known_key() {
        // Secret key 1 maps to the well known address 0x7e5f...bdf
        let mut secret = [0u8; 32];
        secret[31] = 1;
        let signer = LocalSigner::from_secret_bytes(&secret).unwrap();
        assert_eq!(
            signer.identity().to_string(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn test_sign_and_recover() {
        let alice = signer(7);
        let digest = keccak256(b"pawn item 1");

        let signature = alice.sign(&digest).unwrap();
        assert!(signature.v == 27 || signature.v == 28);
        assert_eq!(recover(&digest, &signature).unwrap(), alice.identity());
    }

    #[test]
    fn test_recover_other_digest_yields_other_identity() {
        let alice = signer(7);
        let signature = alice.sign(&keccak256(b"one")).unwrap();

        match recover(&keccak256(b"two"), &signature) {
            Ok(identity) => assert_ne!(identity, alice.identity()),
            Err(_) => {}
        }
    }

    #[test]
    fn test_recover_rejects_bad_v() {
        let alice = signer(7);
        let digest = keccak256(b"pawn");
        let mut signature = alice.sign(&digest).unwrap();

        signature.v = 29;
        assert_eq!(
            recover(&digest, &signature),
            Err(SignatureError::InvalidRecoveryByte(29))
        );

        signature.v = 0;
        assert_eq!(
            recover(&digest, &signature),
            Err(SignatureError::InvalidRecoveryByte(0))
        );
    }

    #[test]
    fn test_recover_rejects_zero_scalars() {
        let digest = keccak256(b"pawn");
        let signature = Signature::new(27, [0u8; 32], [0u8; 32]);
        assert_eq!(recover(&digest, &signature), Err(SignatureError::Malformed));
    }

    #[test]
    fn test_signature_bytes_layout() {
        let alice = signer(9);
        let signature = alice.sign(&keccak256(b"layout")).unwrap();
        let bytes = signature.to_bytes();
        assert_eq!(bytes[64], signature.v);
        assert_eq!(Signature::from_bytes(&bytes), signature);
    }

    #[test]
    fn test_invalid_secret_rejected() {
        assert!(matches!(
            LocalSigner::from_secret_bytes(&[0u8; 32]),
            Err(SignatureError::InvalidKey)
        ));
        assert!(matches!(
            LocalSigner::from_secret_bytes(&[1u8; 5]),
            Err(SignatureError::InvalidKey)
        ));
    }
}
