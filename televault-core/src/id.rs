use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

/// Amount of value token, as an unsigned 256-bit-compatible quantity
pub type Amount = u128;

/// Per-holder replay counter
pub type Nonce = u64;

/// Length of an identity in bytes
pub const IDENTITY_LEN: usize = 20;

// Identity is the public-key-derived address of a party: a holder, the trusted
// backend, the administrator, the custodian or a collaborator contract.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Identity([u8; IDENTITY_LEN]);

impl Deref for Identity {
    type Target = [u8; IDENTITY_LEN];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for Identity {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Identity {
    /// The zero identity, used as "unset"
    pub const ZERO: Identity = Identity([0u8; IDENTITY_LEN]);

    pub const fn new(bytes: [u8; IDENTITY_LEN]) -> Self {
        Identity(bytes)
    }

    /// Build an identity from a byte slice, which must be exactly 20 bytes long
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; IDENTITY_LEN] = bytes.try_into().ok()?;
        Some(Identity(array))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; IDENTITY_LEN]
    }

    /// Derive an identity that no key controls from a list of seeds.
    ///
    /// The custodian identity of a vault is derived this way, so the same
    /// seed always resolves to the same custodian.
    pub fn derive(seeds: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();

        // Domain separator
        hasher.update(b"TELEVAULT_Custodian");

        for seed in seeds {
            hasher.update((seed.len() as u64).to_be_bytes());
            hasher.update(seed);
        }

        let digest: [u8; 32] = hasher.finalize().into();
        let mut bytes = [0u8; IDENTITY_LEN];
        bytes.copy_from_slice(&digest[32 - IDENTITY_LEN..]);
        Identity(bytes)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self)
    }
}

/// Errors produced when parsing an identity from text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityParseError {
    #[error("invalid hex: {0}")]
    Hex(String),

    #[error("expected 20 bytes, got {0}")]
    Length(usize),
}

impl FromStr for Identity {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(trimmed).map_err(|e| IdentityParseError::Hex(e.to_string()))?;
        let len = bytes.len();
        Identity::from_slice(&bytes).ok_or(IdentityParseError::Length(len))
    }
}

// Text formats carry identities as 0x-prefixed hex, binary formats as raw bytes.
impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let text = String::deserialize(deserializer)?;
            text.parse().map_err(serde::de::Error::custom)
        } else {
            <[u8; IDENTITY_LEN]>::deserialize(deserializer).map(Identity)
        }
    }
}

// ItemId identifies a unique item in the external item registry.
// Zero is never a valid item id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl ItemId {
    pub fn new(id: u64) -> Self {
        ItemId(id)
    }

    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }

    /// Big-endian key bytes, used by storage backends so keys sort numerically
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        ItemId(u64::from_be_bytes(bytes))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for ItemId {
    fn from(id: u64) -> Self {
        ItemId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_identity_is_zero() {
        let id = Identity::default();
        assert!(id.is_zero());
        assert_eq!(id, Identity::ZERO);
    }

    #[test]
    fn test_display_and_parse() {
        let id = Identity::new([0xab; IDENTITY_LEN]);
        let text = id.to_string();
        assert_eq!(text, format!("0x{}", "ab".repeat(IDENTITY_LEN)));

        let parsed: Identity = text.parse().unwrap();
        assert_eq!(parsed, id);

        // Prefix is optional
        let parsed: Identity = "ab".repeat(IDENTITY_LEN).parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            "0x1234".parse::<Identity>(),
            Err(IdentityParseError::Length(2))
        );
        assert!(matches!(
            "0xzz".parse::<Identity>(),
            Err(IdentityParseError::Hex(_))
        ));
    }

    #[test]
    fn test_serde_formats() {
        let id = Identity::new([0x01; IDENTITY_LEN]);

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "01".repeat(IDENTITY_LEN)));
        assert_eq!(serde_json::from_str::<Identity>(&json).unwrap(), id);

        let binary = bincode::serialize(&id).unwrap();
        assert_eq!(binary.len(), IDENTITY_LEN);
        assert_eq!(bincode::deserialize::<Identity>(&binary).unwrap(), id);
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = Identity::derive(&[b"vault".as_slice(), b"main".as_slice()]);
        let b = Identity::derive(&[b"vault".as_slice(), b"main".as_slice()]);
        assert_eq!(a, b);
        assert!(!a.is_zero());

        // Seed boundaries matter
        let c = Identity::derive(&[b"vaultmain".as_slice()]);
        assert_ne!(a, c);

        let d = Identity::derive(&[b"main".as_slice(), b"vault".as_slice()]);
        assert_ne!(a, d);
    }

    #[test]
    fn test_item_id_validity() {
        assert!(!ItemId(0).is_valid());
        assert!(ItemId(1).is_valid());
        assert_eq!(ItemId::from_be_bytes(ItemId(42).to_be_bytes()), ItemId(42));
        assert!(ItemId(2).to_be_bytes() > ItemId(1).to_be_bytes());
    }
}
