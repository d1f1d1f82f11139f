//! Wire protocol for client-server communication.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hw_signer_core::{
    Address, DeviceType, NetworkId, Session, SignatureBlob, SignerEvent, SigningRequest,
    SlotState,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol decoding error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Signing request as sent over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSigningRequest {
    pub network: NetworkId,
    /// Base64 encoded payload.
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
}

impl WireSigningRequest {
    /// Encode a signing request.
    #[must_use]
    pub fn encode(request: &SigningRequest) -> Self {
        Self {
            network: request.network,
            payload: BASE64.encode(&request.payload),
            derivation_path: request.derivation_path.clone(),
            device_type: request.device_type,
        }
    }

    /// Decode into a signing request.
    ///
    /// # Errors
    /// Returns error if the payload is not valid base64.
    pub fn decode(&self) -> Result<SigningRequest, ProtocolError> {
        Ok(SigningRequest {
            network: self.network,
            payload: BASE64.decode(&self.payload)?,
            derivation_path: self.derivation_path.clone(),
            device_type: self.device_type,
        })
    }
}

/// Message from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Connect {
        device: DeviceType,
    },
    Disconnect {
        device: DeviceType,
    },
    ListAddresses {
        #[serde(default)]
        count: Option<usize>,
        #[serde(default)]
        network: Option<NetworkId>,
    },
    SignTransaction(WireSigningRequest),
    SignMessage(WireSigningRequest),
    SetPreferredNetwork {
        network: NetworkId,
    },
    /// Snapshot of every family's state.
    Status,
    /// Ping for keepalive.
    Ping,
}

/// Per-family state in a status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device: DeviceType,
    pub state: SlotState,
    pub session: Option<Session>,
    pub last_error: Option<String>,
}

/// Message from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        session: Session,
    },
    Disconnected {
        device: DeviceType,
    },
    Addresses {
        network: NetworkId,
        addresses: Vec<Address>,
    },
    /// Signature bytes (base64 encoded).
    Signature {
        signature: String,
    },
    PreferredNetwork {
        network: NetworkId,
    },
    Status {
        preferred_network: NetworkId,
        devices: Vec<DeviceStatus>,
    },
    Event {
        event: SignerEvent,
    },
    Error {
        code: String,
        message: String,
    },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    /// Create a signature message from raw bytes.
    #[must_use]
    pub fn signature(signature: &SignatureBlob) -> Self {
        Self::Signature {
            signature: BASE64.encode(signature.as_bytes()),
        }
    }

    /// Decode signature bytes from base64.
    #[must_use]
    pub fn decode_signature(&self) -> Option<Vec<u8>> {
        if let Self::Signature { signature } = self {
            BASE64.decode(signature).ok()
        } else {
            None
        }
    }

    #[must_use]
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}
