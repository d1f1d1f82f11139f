//! Signer configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{gate::FeatureFlags, types::NetworkId};

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for the session manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Addresses derived when the caller gives no count.
    pub default_address_count: usize,
    /// Largest count a single derivation may request.
    pub max_address_count: usize,
    /// Preferred network when nothing usable is persisted.
    pub default_network: NetworkId,
    /// Initial feature flags.
    pub features: FeatureFlags,
    /// Preference file location.
    pub preferences_path: Option<PathBuf>,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            default_address_count: 5,
            max_address_count: 100,
            default_network: NetworkId::Eth,
            features: FeatureFlags::default(),
            preferences_path: None,
        }
    }
}

impl SignerConfig {
    /// Parse and validate a JSON document.
    ///
    /// # Errors
    /// Returns error if the document is malformed or fails validation.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is invalid.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&raw)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_address_count == 0 {
            return Err(ConfigError::Invalid(
                "max_address_count must be positive".to_string(),
            ));
        }
        if self.default_address_count == 0 || self.default_address_count > self.max_address_count
        {
            return Err(ConfigError::Invalid(format!(
                "default_address_count must be between 1 and {}",
                self.max_address_count
            )));
        }
        Ok(())
    }

    /// Resolved preference file location.
    #[must_use]
    pub fn preferences_path(&self) -> PathBuf {
        self.preferences_path.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .map(|d| d.join("hw-signer"))
                .unwrap_or_else(|| PathBuf::from(".hw-signer"))
                .join("preferences.json")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SignerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SignerConfig::default());
        assert_eq!(config.default_address_count, 5);
        assert_eq!(config.default_network, NetworkId::Eth);
        assert!(config.features.ledger && config.features.trezor);
    }

    #[test]
    fn test_partial_override() {
        let config = SignerConfig::from_json_str(
            r#"{"default_network":"solana","features":{"trezor":false}}"#,
        )
        .unwrap();
        assert_eq!(config.default_network, NetworkId::Solana);
        assert!(config.features.ledger);
        assert!(!config.features.trezor);
    }

    #[test]
    fn test_rejects_count_above_max() {
        let err = SignerConfig::from_json_str(
            r#"{"default_address_count":10,"max_address_count":3}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_explicit_preferences_path() {
        let config = SignerConfig {
            preferences_path: Some(PathBuf::from("/tmp/prefs.json")),
            ..SignerConfig::default()
        };
        assert_eq!(config.preferences_path(), PathBuf::from("/tmp/prefs.json"));
        assert!(
            SignerConfig::default()
                .preferences_path()
                .ends_with("preferences.json")
        );
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signer.json");
        tokio::fs::write(&path, r#"{"max_address_count":20}"#)
            .await
            .unwrap();

        let config = SignerConfig::load(&path).await.unwrap();
        assert_eq!(config.max_address_count, 20);
    }
}
