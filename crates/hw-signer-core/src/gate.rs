//! Feature gate implementations.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{traits::FeatureGate, types::DeviceType};

/// Per-family enablement flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub ledger: bool,
    pub trezor: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            ledger: true,
            trezor: true,
        }
    }
}

impl FeatureFlags {
    #[must_use]
    pub const fn is_enabled(&self, device_type: DeviceType) -> bool {
        match device_type {
            DeviceType::Ledger => self.ledger,
            DeviceType::Trezor => self.trezor,
        }
    }

    pub const fn set(&mut self, device_type: DeviceType, enabled: bool) {
        match device_type {
            DeviceType::Ledger => self.ledger = enabled,
            DeviceType::Trezor => self.trezor = enabled,
        }
    }
}

/// Gate with flags fixed at construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticFeatureGate {
    flags: FeatureFlags,
}

impl StaticFeatureGate {
    #[must_use]
    pub const fn new(flags: FeatureFlags) -> Self {
        Self { flags }
    }
}

impl FeatureGate for StaticFeatureGate {
    fn is_enabled(&self, device_type: DeviceType) -> bool {
        self.flags.is_enabled(device_type)
    }
}

/// Gate whose flags can change at runtime.
///
/// Changes only affect future connect attempts; sessions that are already
/// active stay up.
#[derive(Debug)]
pub struct WatchFeatureGate {
    sender: watch::Sender<FeatureFlags>,
}

impl WatchFeatureGate {
    #[must_use]
    pub fn new(flags: FeatureFlags) -> Self {
        let (sender, _) = watch::channel(flags);
        Self { sender }
    }

    /// Flip one family's flag and notify subscribers.
    pub fn set_enabled(&self, device_type: DeviceType, enabled: bool) {
        self.sender.send_if_modified(|flags| {
            let changed = flags.is_enabled(device_type) != enabled;
            flags.set(device_type, enabled);
            changed
        });
        tracing::debug!(device = %device_type, enabled, "Feature flag updated");
    }

    /// Current flags.
    #[must_use]
    pub fn flags(&self) -> FeatureFlags {
        *self.sender.borrow()
    }
}

impl Default for WatchFeatureGate {
    fn default() -> Self {
        Self::new(FeatureFlags::default())
    }
}

impl FeatureGate for WatchFeatureGate {
    fn is_enabled(&self, device_type: DeviceType) -> bool {
        self.sender.borrow().is_enabled(device_type)
    }

    fn subscribe(&self) -> Option<watch::Receiver<FeatureFlags>> {
        Some(self.sender.subscribe())
    }
}
