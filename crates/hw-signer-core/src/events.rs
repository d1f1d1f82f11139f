//! Broadcast + history log of session lifecycle events.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::types::{DeviceType, NetworkId, SessionId};

/// Default number of events kept for late subscribers.
const HISTORY_EVENTS: usize = 256;

/// Something observable happened to a device family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SignerEvent {
    Connected {
        device: DeviceType,
        session_id: SessionId,
        model: String,
    },
    ConnectFailed {
        device: DeviceType,
        reason: String,
    },
    Disconnected {
        device: DeviceType,
        session_id: Option<SessionId>,
    },
    /// Transport teardown failed; local state was cleared anyway.
    DisconnectWarning {
        device: DeviceType,
        reason: String,
    },
    AddressesUpdated {
        device: DeviceType,
        network: NetworkId,
        count: usize,
    },
    AutoReconnect {
        device: DeviceType,
    },
    PreferredNetworkChanged {
        network: NetworkId,
    },
}

/// Event log with broadcast and bounded history.
///
/// New observers replay the history and then follow live events.
pub struct EventLog {
    history: RwLock<VecDeque<SignerEvent>>,
    limit: usize,
    sender: broadcast::Sender<SignerEvent>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Create a log with the default history size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(HISTORY_EVENTS)
    }

    /// Create a log keeping at most `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        let (sender, _) = broadcast::channel(limit.max(1));
        Self {
            history: RwLock::new(VecDeque::with_capacity(limit.min(32))),
            limit,
            sender,
        }
    }

    /// Publish an event to live listeners and history.
    pub fn push(&self, event: SignerEvent) {
        let _ = self.sender.send(event.clone()); // live listeners

        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        while history.len() >= self.limit.max(1) {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Get a receiver for live events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SignerEvent> {
        self.sender.subscribe()
    }

    /// Snapshot of the retained history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<SignerEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live events.
    ///
    /// Lagged receivers skip the events they missed.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, SignerEvent> {
        let (history, rx) = (self.history(), self.subscribe());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disconnected(device: DeviceType) -> SignerEvent {
        SignerEvent::Disconnected {
            device,
            session_id: None,
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let log = EventLog::with_limit(2);
        log.push(disconnected(DeviceType::Ledger));
        log.push(disconnected(DeviceType::Trezor));
        log.push(SignerEvent::AutoReconnect {
            device: DeviceType::Ledger,
        });

        let history = log.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], disconnected(DeviceType::Trezor));
    }

    #[tokio::test]
    async fn test_history_then_live() {
        let log = EventLog::new();
        log.push(disconnected(DeviceType::Ledger));

        let mut stream = log.history_plus_stream();
        log.push(disconnected(DeviceType::Trezor));

        assert_eq!(stream.next().await, Some(disconnected(DeviceType::Ledger)));
        assert_eq!(stream.next().await, Some(disconnected(DeviceType::Trezor)));
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&SignerEvent::PreferredNetworkChanged {
            network: NetworkId::Btc,
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"preferred_network_changed","network":"btc"}"#);
    }
}
