//! Maps client messages onto session manager operations.

use hw_signer_core::{DeviceType, FeatureGate, PreferenceStore};
use hw_signer_session::{ManagerError, SessionManager};

use crate::protocol::{ClientMessage, DeviceStatus, ServerMessage, WireSigningRequest};

impl From<ManagerError> for ServerMessage {
    fn from(err: ManagerError) -> Self {
        Self::error(err.code(), err.to_string())
    }
}

/// Run one client request and build its reply.
///
/// Failures are turned into `ServerMessage::Error`; nothing is retried.
pub async fn dispatch<P, G>(manager: &SessionManager<P, G>, message: ClientMessage) -> ServerMessage
where
    P: PreferenceStore,
    G: FeatureGate,
{
    match message {
        ClientMessage::Connect { device } => match manager.connect(device).await {
            Ok(session) => ServerMessage::Connected { session },
            Err(e) => e.into(),
        },
        ClientMessage::Disconnect { device } => {
            manager.disconnect(device).await;
            ServerMessage::Disconnected { device }
        }
        ClientMessage::ListAddresses { count, network } => {
            let network = network.unwrap_or_else(|| manager.preferred_network());
            match manager.list_addresses(count, Some(network)).await {
                Ok(addresses) => ServerMessage::Addresses { network, addresses },
                Err(e) => e.into(),
            }
        }
        ClientMessage::SignTransaction(wire) => sign(manager, &wire, false).await,
        ClientMessage::SignMessage(wire) => sign(manager, &wire, true).await,
        ClientMessage::SetPreferredNetwork { network } => {
            match manager.set_preferred_network(network).await {
                Ok(()) => ServerMessage::PreferredNetwork { network },
                Err(e) => e.into(),
            }
        }
        ClientMessage::Status => status(manager),
        ClientMessage::Ping => ServerMessage::Pong,
    }
}

async fn sign<P, G>(
    manager: &SessionManager<P, G>,
    wire: &WireSigningRequest,
    message: bool,
) -> ServerMessage
where
    P: PreferenceStore,
    G: FeatureGate,
{
    let request = match wire.decode() {
        Ok(request) => request,
        Err(e) => return ServerMessage::error("invalid_argument", e.to_string()),
    };
    let signed = if message {
        manager.sign_message(&request).await
    } else {
        manager.sign_transaction(&request).await
    };
    match signed {
        Ok(signature) => ServerMessage::signature(&signature),
        Err(e) => e.into(),
    }
}

fn status<P, G>(manager: &SessionManager<P, G>) -> ServerMessage
where
    P: PreferenceStore,
    G: FeatureGate,
{
    let devices = DeviceType::ALL
        .into_iter()
        .map(|device| DeviceStatus {
            device,
            state: manager.state(device),
            session: manager.session(device),
            last_error: manager.last_error(device),
        })
        .collect();
    ServerMessage::Status {
        preferred_network: manager.preferred_network(),
        devices,
    }
}
