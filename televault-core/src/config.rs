//! Deployment settings of a vault, loaded from JSON.
//!
//! ```json
//! {
//!   "custodian_seed": "televault-main",
//!   "config": {
//!     "item_registry": "0x...",
//!     "value_token": "0x...",
//!     "backend": "0x...",
//!     "administrator": "0x..."
//!   },
//!   "policy": { "release": "depositor_or_administrator", "require_deadline": true }
//! }
//! ```

use crate::id::Identity;
use crate::objects::{VaultConfig, VaultPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSettings {
    /// Seed the custodian identity is derived from
    pub custodian_seed: String,

    /// Initial configuration, applied when the store holds none yet
    pub config: VaultConfig,

    #[serde(default)]
    pub policy: VaultPolicy,
}

impl VaultSettings {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let settings: VaultSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.custodian_seed.is_empty() {
            return Err(ConfigError::Invalid("custodian_seed is empty".to_string()));
        }
        if self.config.administrator.is_zero() {
            return Err(ConfigError::Invalid(
                "administrator must be set at deployment".to_string(),
            ));
        }
        Ok(())
    }

    pub fn custodian(&self) -> Identity {
        Identity::derive(&[self.custodian_seed.as_bytes()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::ReleasePolicy;
    use std::io::Write;

    const SETTINGS: &str = r#"{
        "custodian_seed": "televault-main",
        "config": {
            "item_registry": "0x1111111111111111111111111111111111111111",
            "value_token": "0x2222222222222222222222222222222222222222",
            "backend": "0x3333333333333333333333333333333333333333",
            "administrator": "0x4444444444444444444444444444444444444444"
        },
        "policy": { "release": "dual_signature" }
    }"#;

    #[test]
    fn test_parse_settings() {
        let settings = VaultSettings::from_json_str(SETTINGS).unwrap();
        assert_eq!(settings.config.backend, Identity::new([0x33; 20]));
        assert_eq!(settings.policy.release, ReleasePolicy::DualSignature);
        assert!(!settings.policy.require_deadline);
        assert_eq!(
            settings.custodian(),
            Identity::derive(&[b"televault-main".as_slice()])
        );
    }

    #[test]
    fn test_policy_defaults_when_omitted() {
        let json = SETTINGS.replace(r#""policy": { "release": "dual_signature" }"#, r#""policy": {}"#);
        let settings = VaultSettings::from_json_str(&json).unwrap();
        assert_eq!(settings.policy, VaultPolicy::default());
    }

    #[test]
    fn test_rejects_missing_administrator() {
        let json = SETTINGS.replace(
            "0x4444444444444444444444444444444444444444",
            "0x0000000000000000000000000000000000000000",
        );
        assert!(matches!(
            VaultSettings::from_json_str(&json),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_identity() {
        let json = SETTINGS.replace("0x1111111111111111111111111111111111111111", "0x11");
        assert!(matches!(
            VaultSettings::from_json_str(&json),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SETTINGS.as_bytes()).unwrap();

        let settings = VaultSettings::load(&path).unwrap();
        assert_eq!(settings.custodian_seed, "televault-main");

        assert!(matches!(
            VaultSettings::load(dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
