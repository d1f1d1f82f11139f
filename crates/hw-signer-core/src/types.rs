//! Data model shared by the session manager and its collaborators.

use std::{
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Session identifier assigned by the manager on every successful connect.
pub type SessionId = Uuid;

/// Error parsing a persisted or wire-level enum value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown {kind}: {value}")]
pub struct ParseError {
    kind: &'static str,
    value: String,
}

/// Hardware signer family. Each family owns one session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Ledger devices.
    Ledger,
    /// Trezor devices.
    Trezor,
}

impl DeviceType {
    /// All families in resolution order.
    pub const ALL: [Self; 2] = [Self::Ledger, Self::Trezor];

    /// Persisted and wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ledger => "ledger",
            Self::Trezor => "trezor",
        }
    }

    /// Position of this family's slot.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Ledger => 0,
            Self::Trezor => 1,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ledger" => Ok(Self::Ledger),
            "trezor" => Ok(Self::Trezor),
            other => Err(ParseError {
                kind: "device type",
                value: other.to_string(),
            }),
        }
    }
}

/// Network an address is derived for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkId {
    #[default]
    Eth,
    Solana,
    Polygon,
    Bsc,
    Btc,
}

impl NetworkId {
    pub const ALL: [Self; 5] = [
        Self::Eth,
        Self::Solana,
        Self::Polygon,
        Self::Bsc,
        Self::Btc,
    ];

    /// Persisted and wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eth => "eth",
            Self::Solana => "solana",
            Self::Polygon => "polygon",
            Self::Bsc => "bsc",
            Self::Btc => "btc",
        }
    }

    /// Prefix every address on this network starts with.
    #[must_use]
    pub const fn address_prefix(self) -> &'static str {
        match self {
            Self::Btc => "bc1p",
            Self::Eth | Self::Polygon | Self::Bsc => "0x",
            Self::Solana => "",
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|network| network.as_str() == s)
            .ok_or_else(|| ParseError {
                kind: "network",
                value: s.to_string(),
            })
    }
}

/// Public address derived by a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Wrap an address produced by a transport.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Format an address as `<network prefix><opaque id>_<index>`.
    ///
    /// Existing callers match on the prefix, so the layout must not change.
    #[must_use]
    pub fn derived(network: NetworkId, opaque_id: &str, index: usize) -> Self {
        Self(format!("{}{opaque_id}_{index}", network.address_prefix()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport-level handle to a connected device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Family the device belongs to.
    pub device_type: DeviceType,
    /// Transport-assigned identifier, also the opaque id used in addresses.
    pub device_id: String,
    /// Human readable model name.
    pub model: String,
}

impl DeviceHandle {
    #[must_use]
    pub fn new(
        device_type: DeviceType,
        device_id: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            device_type,
            device_id: device_id.into(),
            model: model.into(),
        }
    }
}

/// A live session with one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Manager-assigned identity, fresh for every connect.
    pub id: SessionId,
    /// Transport handle.
    pub handle: DeviceHandle,
    /// Always true while the session is held by the store.
    pub connected: bool,
    /// Addresses from the most recent derivation.
    pub accounts: Vec<Address>,
    /// Network the cached accounts were derived for.
    pub accounts_network: Option<NetworkId>,
    /// Connect timestamp (Unix epoch seconds).
    pub connected_at: i64,
}

impl Session {
    /// Create a connected session with a fresh identity.
    #[must_use]
    pub fn new(handle: DeviceHandle) -> Self {
        Self {
            id: Uuid::new_v4(),
            handle,
            connected: true,
            accounts: Vec::new(),
            accounts_network: None,
            connected_at: now(),
        }
    }

    #[must_use]
    pub const fn device_type(&self) -> DeviceType {
        self.handle.device_type
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.connected
    }
}

/// Payload submitted to a device for signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRequest {
    pub network: NetworkId,
    /// Opaque bytes, never interpreted by the manager.
    pub payload: Vec<u8>,
    pub derivation_path: Option<String>,
    /// Restrict signing to this family.
    pub device_type: Option<DeviceType>,
}

impl SigningRequest {
    #[must_use]
    pub fn new(network: NetworkId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            network,
            payload: payload.into(),
            derivation_path: None,
            device_type: None,
        }
    }

    #[must_use]
    pub fn with_derivation_path(mut self, path: impl Into<String>) -> Self {
        self.derivation_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn for_device(mut self, device_type: DeviceType) -> Self {
        self.device_type = Some(device_type);
        self
    }
}

/// Signature bytes returned by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureBlob(Vec<u8>);

impl SignatureBlob {
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

/// Preference that survives process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedPreference {
    pub last_connected_type: Option<DeviceType>,
    pub preferred_network: NetworkId,
}

/// Observable state of one family's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Idle,
    Connecting,
    Connected,
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_prefixes() {
        assert_eq!(Address::derived(NetworkId::Btc, "abc", 0).as_str(), "bc1pabc_0");
        assert_eq!(Address::derived(NetworkId::Eth, "abc", 1).as_str(), "0xabc_1");
        assert_eq!(Address::derived(NetworkId::Polygon, "abc", 2).as_str(), "0xabc_2");
        assert_eq!(Address::derived(NetworkId::Bsc, "abc", 3).as_str(), "0xabc_3");
        assert_eq!(Address::derived(NetworkId::Solana, "abc", 4).as_str(), "abc_4");
    }

    #[test]
    fn test_device_type_parse() {
        for device in DeviceType::ALL {
            assert_eq!(device.as_str().parse::<DeviceType>().unwrap(), device);
        }
        assert!("keepkey".parse::<DeviceType>().is_err());
    }

    #[test]
    fn test_network_parse() {
        for network in NetworkId::ALL {
            assert_eq!(network.as_str().parse::<NetworkId>().unwrap(), network);
        }
        let err = "dogecoin".parse::<NetworkId>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown network: dogecoin");
    }

    #[test]
    fn test_resolution_order_prefers_ledger() {
        assert_eq!(DeviceType::ALL[0], DeviceType::Ledger);
        assert!(DeviceType::Ledger < DeviceType::Trezor);
    }

    #[test]
    fn test_new_sessions_have_distinct_ids() {
        let handle = DeviceHandle::new(DeviceType::Ledger, "dev", "Nano X");
        let a = Session::new(handle.clone());
        let b = Session::new(handle);
        assert_ne!(a.id, b.id);
        assert!(a.is_active());
        assert!(a.accounts.is_empty());
        assert!(a.connected_at > 0);
    }

    #[test]
    fn test_serde_names_match_persisted_values() {
        let json = serde_json::to_string(&NetworkId::Solana).unwrap();
        assert_eq!(json, "\"solana\"");
        let json = serde_json::to_string(&DeviceType::Trezor).unwrap();
        assert_eq!(json, "\"trezor\"");
    }
}
