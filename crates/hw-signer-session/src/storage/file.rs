//! JSON file preference storage.

use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use hw_signer_core::{PreferenceKey, PreferenceStore, StorageError};
use tokio::sync::Mutex;

type Values = BTreeMap<String, String>;

/// Preference store backed by a small JSON object on disk.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so readers never observe a partially written document.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FilePreferences {
    /// Use `path`; the file and its parent directory are created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Values, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Values::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Values::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, values: &Values) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(values)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn update(&self, apply: impl FnOnce(&mut Values) + Send) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut values = match self.read_all().await {
            Ok(values) => values,
            // A corrupt document is replaced rather than blocking every write.
            Err(StorageError::Serialization(e)) => {
                tracing::warn!(path = %self.path.display(), "Discarding unreadable preferences: {e}");
                Values::new()
            }
            Err(e) => return Err(e),
        };
        apply(&mut values);
        self.write_all(&values).await?;
        tracing::debug!(path = %self.path.display(), "Preferences written");
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for FilePreferences {
    async fn get(&self, key: PreferenceKey) -> Result<Option<String>, StorageError> {
        Ok(self.read_all().await?.remove(key.as_str()))
    }

    async fn set(&self, key: PreferenceKey, value: &str) -> Result<(), StorageError> {
        let value = value.to_string();
        self.update(move |values| {
            values.insert(key.as_str().to_string(), value);
        })
        .await
    }

    async fn remove(&self, key: PreferenceKey) -> Result<(), StorageError> {
        self.update(|values| {
            values.remove(key.as_str());
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePreferences::new(dir.path().join("prefs.json"));
        assert_eq!(store.get(PreferenceKey::LastConnectedType).await.unwrap(), None);
        store.remove(PreferenceKey::LastConnectedType).await.unwrap();
    }

    #[tokio::test]
    async fn test_values_survive_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");

        let store = FilePreferences::new(&path);
        store.set(PreferenceKey::PreferredNetwork, "solana").await.unwrap();
        store.set(PreferenceKey::LastConnectedType, "ledger").await.unwrap();
        store.remove(PreferenceKey::LastConnectedType).await.unwrap();

        let reopened = FilePreferences::new(&path);
        assert_eq!(
            reopened.get(PreferenceKey::PreferredNetwork).await.unwrap().as_deref(),
            Some("solana")
        );
        assert_eq!(reopened.get(PreferenceKey::LastConnectedType).await.unwrap(), None);

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(raw.contains("\"preferredNetwork\": \"solana\""));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let store = FilePreferences::new(&path);
        let err = store.get(PreferenceKey::PreferredNetwork).await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_write_recovers_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        tokio::fs::write(&path, b"{\"preferredNetwork\": ").await.unwrap();

        let store = FilePreferences::new(&path);
        store.set(PreferenceKey::PreferredNetwork, "btc").await.unwrap();
        store.remove(PreferenceKey::LastConnectedType).await.unwrap();

        assert_eq!(
            store.get(PreferenceKey::PreferredNetwork).await.unwrap().as_deref(),
            Some("btc")
        );
    }
}
