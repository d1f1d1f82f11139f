//! Core traits for device transports, feature gates and preference storage.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::{
    FeatureFlags,
    types::{Address, DeviceHandle, DeviceType, NetworkId, SignatureBlob, SigningRequest},
};

/// Errors surfaced by a device transport.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TransportError {
    #[error("Cancelled by user")]
    UserCancelled,
    #[error("Rejected on device: {0}")]
    UserRejected(String),
    #[error("Device is locked")]
    DeviceLocked,
    #[error("Device timed out")]
    Timeout,
    #[error("Device error: {0}")]
    Device(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl TransportError {
    /// Rejection with a default reason when the device gives none.
    pub fn rejected(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if reason.is_empty() {
            Self::UserRejected("rejected by user".to_string())
        } else {
            Self::UserRejected(reason)
        }
    }
}

/// Link to one family of hardware signing devices.
///
/// Framing, USB/HID/bridge protocols and the signing algorithms live behind
/// this trait. Every call may require physical user consent, so callers
/// must not retry on their own.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Open a connection to a device of the given family.
    async fn connect(&self, device_type: DeviceType) -> Result<DeviceHandle, TransportError>;

    /// Derive `count` addresses for `network`, in index order.
    async fn derive_addresses(
        &self,
        handle: &DeviceHandle,
        network: NetworkId,
        count: usize,
    ) -> Result<Vec<Address>, TransportError>;

    /// Sign an opaque transaction payload.
    async fn sign_transaction(
        &self,
        handle: &DeviceHandle,
        request: &SigningRequest,
    ) -> Result<SignatureBlob, TransportError>;

    /// Sign an opaque message payload.
    async fn sign_message(
        &self,
        handle: &DeviceHandle,
        request: &SigningRequest,
    ) -> Result<SignatureBlob, TransportError>;

    /// Best-effort teardown.
    async fn disconnect(&self, handle: &DeviceHandle) -> Result<(), TransportError>;
}

/// Runtime switches deciding which families may be connected.
pub trait FeatureGate: Send + Sync {
    /// Consulted before every connect attempt.
    fn is_enabled(&self, device_type: DeviceType) -> bool;

    /// Change notifications, if the gate supports runtime updates.
    fn subscribe(&self) -> Option<watch::Receiver<FeatureFlags>> {
        None
    }
}

impl<G: FeatureGate + ?Sized> FeatureGate for Arc<G> {
    fn is_enabled(&self, device_type: DeviceType) -> bool {
        (**self).is_enabled(device_type)
    }

    fn subscribe(&self) -> Option<watch::Receiver<FeatureFlags>> {
        (**self).subscribe()
    }
}

/// Keys written to the preference store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PreferenceKey {
    #[serde(rename = "lastConnectedType")]
    LastConnectedType,
    #[serde(rename = "preferredNetwork")]
    PreferredNetwork,
}

impl PreferenceKey {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LastConnectedType => "lastConnectedType",
            Self::PreferredNetwork => "preferredNetwork",
        }
    }
}

impl fmt::Display for PreferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Preference storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Durable key/value store for preferences.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: PreferenceKey) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: PreferenceKey, value: &str) -> Result<(), StorageError>;

    /// Delete a value. Deleting a missing key is not an error.
    async fn remove(&self, key: PreferenceKey) -> Result<(), StorageError>;
}

#[async_trait]
impl<P: PreferenceStore + ?Sized> PreferenceStore for Arc<P> {
    async fn get(&self, key: PreferenceKey) -> Result<Option<String>, StorageError> {
        (**self).get(key).await
    }

    async fn set(&self, key: PreferenceKey, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: PreferenceKey) -> Result<(), StorageError> {
        (**self).remove(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_default_reason() {
        assert_eq!(
            TransportError::rejected(""),
            TransportError::UserRejected("rejected by user".to_string())
        );
        assert_eq!(
            TransportError::rejected("blind signing disabled").to_string(),
            "Rejected on device: blind signing disabled"
        );
    }

    #[test]
    fn test_preference_key_names() {
        assert_eq!(PreferenceKey::LastConnectedType.as_str(), "lastConnectedType");
        assert_eq!(PreferenceKey::PreferredNetwork.as_str(), "preferredNetwork");
        let json = serde_json::to_string(&PreferenceKey::PreferredNetwork).unwrap();
        assert_eq!(json, "\"preferredNetwork\"");
    }

    #[test]
    fn test_transport_error_serialization() {
        let json = serde_json::to_string(&TransportError::Timeout).unwrap();
        assert_eq!(json, r#"{"kind":"timeout"}"#);
        let parsed: TransportError =
            serde_json::from_str(r#"{"kind":"device","detail":"usb stall"}"#).unwrap();
        assert_eq!(parsed, TransportError::Device("usb stall".to_string()));
    }
}
