//! Core abstractions for hardware signer session management.
//!
//! This crate provides the fundamental building blocks:
//! - Data model: `DeviceType`, `NetworkId`, `Address`, `Session`, `SigningRequest`
//! - `EventLog` - Broadcast + history of session lifecycle events
//! - `SignerConfig` - Tunables and feature flags
//! - Transport, feature gate and preference store traits

pub mod config;
pub mod events;
pub mod gate;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::{ConfigError, SignerConfig};
pub use events::{EventLog, SignerEvent};
pub use gate::{FeatureFlags, StaticFeatureGate, WatchFeatureGate};
pub use traits::{
    DeviceTransport, FeatureGate, PreferenceKey, PreferenceStore, StorageError, TransportError,
};
pub use types::{
    Address, DeviceHandle, DeviceType, NetworkId, ParseError, PersistedPreference, Session,
    SessionId, SignatureBlob, SigningRequest, SlotState,
};

#[cfg(any(test, feature = "mock"))]
pub use mock::MockTransport;
