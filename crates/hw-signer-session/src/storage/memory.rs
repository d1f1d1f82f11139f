//! In-memory preference storage.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use hw_signer_core::{PreferenceKey, PreferenceStore, StorageError};

/// In-memory preference store.
///
/// Clones share the same map, so a second manager built from a clone sees
/// what the first one wrote. Data is lost on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryPreferences {
    values: Arc<RwLock<HashMap<PreferenceKey, String>>>,
}

impl MemoryPreferences {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferences {
    async fn get(&self, key: PreferenceKey) -> Result<Option<String>, StorageError> {
        Ok(self
            .values
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(&key)
            .cloned())
    }

    async fn set(&self, key: PreferenceKey, value: &str) -> Result<(), StorageError> {
        self.values
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .insert(key, value.to_string());
        Ok(())
    }

    async fn remove(&self, key: PreferenceKey) -> Result<(), StorageError> {
        self.values
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryPreferences::new();
        assert_eq!(store.get(PreferenceKey::PreferredNetwork).await.unwrap(), None);

        store.set(PreferenceKey::PreferredNetwork, "btc").await.unwrap();
        assert_eq!(
            store.get(PreferenceKey::PreferredNetwork).await.unwrap().as_deref(),
            Some("btc")
        );

        store.remove(PreferenceKey::PreferredNetwork).await.unwrap();
        store.remove(PreferenceKey::PreferredNetwork).await.unwrap();
        assert_eq!(store.get(PreferenceKey::PreferredNetwork).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clones_share_values() {
        let store = MemoryPreferences::new();
        let other = store.clone();
        store.set(PreferenceKey::LastConnectedType, "trezor").await.unwrap();
        assert_eq!(
            other.get(PreferenceKey::LastConnectedType).await.unwrap().as_deref(),
            Some("trezor")
        );
    }
}
