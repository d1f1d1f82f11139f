//! Session manager for hardware signing devices.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use hw_signer_core::{
    Address, DeviceTransport, DeviceType, EventLog, FeatureGate, NetworkId, PersistedPreference,
    PreferenceKey, PreferenceStore, Session, SignatureBlob, SignerConfig, SignerEvent,
    SigningRequest, SlotState, StorageError, TransportError,
};

use crate::store::{ConnectTicket, SessionStore};

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Device family disabled: {0}")]
    FeatureDisabled(DeviceType),
    #[error("Connect already in progress for {0}")]
    Busy(DeviceType),
    #[error("Connect to {device} failed: {reason}")]
    ConnectFailed {
        device: DeviceType,
        reason: TransportError,
    },
    #[error("No active hardware signer session")]
    NoSession,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Address derivation on {device} failed: {reason}")]
    ListFailed {
        device: DeviceType,
        reason: TransportError,
    },
    #[error("Signing on {device} failed: {reason}")]
    SignFailed {
        device: DeviceType,
        reason: TransportError,
    },
    #[error("Preference store error: {0}")]
    Preference(#[from] StorageError),
}

impl ManagerError {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::FeatureDisabled(_) => "feature_disabled",
            Self::Busy(_) => "busy",
            Self::ConnectFailed { .. } => "connect_failed",
            Self::NoSession => "no_session",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::ListFailed { .. } => "list_failed",
            Self::SignFailed { .. } => "sign_failed",
            Self::Preference(_) => "preference",
        }
    }
}

/// Transport teardown failed after local state was already cleared.
///
/// Logged and published as an event; never returned as an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Disconnect from {device} not acknowledged: {reason}")]
pub struct DisconnectWarning {
    pub device: DeviceType,
    pub reason: TransportError,
}

#[derive(Debug, Clone, Copy)]
enum SignKind {
    Transaction,
    Message,
}

impl SignKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::Message => "message",
        }
    }
}

/// Session manager for hardware signing devices.
///
/// The only entry point the rest of the application uses: it gates,
/// connects, resolves and signs, and keeps the per-family session table.
pub struct SessionManager<P, G>
where
    P: PreferenceStore,
    G: FeatureGate,
{
    preferences: P,
    gate: G,
    config: SignerConfig,
    transports: HashMap<DeviceType, Arc<dyn DeviceTransport>>,
    store: SessionStore,
    preferred_network: RwLock<NetworkId>,
    events: Arc<EventLog>,
}

impl<P, G> SessionManager<P, G>
where
    P: PreferenceStore,
    G: FeatureGate,
{
    /// Create a manager with no transports registered.
    ///
    /// Persisted preferences are not read here. Register transports, then
    /// call [`restore`](Self::restore) once before serving requests;
    /// until then the preferred network is `config.default_network`.
    #[must_use]
    pub fn new(preferences: P, gate: G, config: SignerConfig) -> Self {
        let preferred_network = RwLock::new(config.default_network);
        Self {
            preferences,
            gate,
            config,
            transports: HashMap::new(),
            store: SessionStore::new(),
            preferred_network,
            events: Arc::new(EventLog::new()),
        }
    }

    /// Register the transport for one device family.
    #[must_use]
    pub fn with_transport(
        mut self,
        device: DeviceType,
        transport: Arc<dyn DeviceTransport>,
    ) -> Self {
        self.transports.insert(device, transport);
        self
    }

    /// Load persisted preferences. Never connects on its own.
    ///
    /// Unreadable or unknown values fall back to the configured defaults.
    pub async fn restore(&self) -> PersistedPreference {
        let preferred_network = match self.preferences.get(PreferenceKey::PreferredNetwork).await {
            Ok(Some(raw)) => raw.parse::<NetworkId>().unwrap_or_else(|e| {
                tracing::warn!("Ignoring persisted preferred network: {e}");
                self.config.default_network
            }),
            Ok(None) => self.config.default_network,
            Err(e) => {
                tracing::warn!("Failed to read preferred network: {e}");
                self.config.default_network
            }
        };
        *self
            .preferred_network
            .write()
            .unwrap_or_else(PoisonError::into_inner) = preferred_network;

        let preference = PersistedPreference {
            last_connected_type: self.last_connected_type().await,
            preferred_network,
        };
        tracing::debug!(?preference, "Restored signer preferences");
        preference
    }

    /// Connect a device family, replacing any session it already has.
    ///
    /// # Errors
    /// `FeatureDisabled` if the gate is off (the transport is not called),
    /// `Busy` if a connect for this family is already in flight, and
    /// `ConnectFailed` if the transport fails, or with `UserCancelled` if
    /// the family is disconnected before the new session is installed. A
    /// cancelled connect leaves no session and no persisted preference.
    pub async fn connect(&self, device: DeviceType) -> Result<Session, ManagerError> {
        if !self.gate.is_enabled(device) {
            tracing::debug!(device = %device, "Connect rejected by feature gate");
            return Err(ManagerError::FeatureDisabled(device));
        }

        let ticket = self
            .store
            .begin_connect(device)
            .ok_or(ManagerError::Busy(device))?;

        let transport = match self.transport(device) {
            Ok(transport) => transport,
            Err(reason) => return Err(self.connect_failed(ticket, device, reason)),
        };
        let handle = match transport.connect(device).await {
            Ok(handle) => handle,
            Err(reason) => return Err(self.connect_failed(ticket, device, reason)),
        };

        if let Some(previous) = ticket.take_previous() {
            tracing::info!(device = %device, session_id = %previous.id, "Replacing existing session");
            self.release(transport.as_ref(), &previous).await;
        }

        // Persisted before install: once the session is visible a disconnect
        // may clear the preference, and nothing here may write it back.
        if let Err(e) = self
            .preferences
            .set(PreferenceKey::LastConnectedType, device.as_str())
            .await
        {
            tracing::warn!(device = %device, "Failed to persist last connected device: {e}");
        }

        let session = Session::new(handle);
        if let Err(stale) = ticket.install(session.clone()) {
            tracing::warn!(
                device = %device,
                session_id = %stale.id,
                "Disconnected while connecting; discarding new session"
            );
            self.forget_last_connected(device).await;
            self.release(transport.as_ref(), &stale).await;
            return Err(self.connect_failed(ticket, device, TransportError::UserCancelled));
        }
        drop(ticket);

        tracing::info!(
            device = %device,
            session_id = %session.id,
            model = %session.handle.model,
            "Hardware signer connected"
        );
        self.events.push(SignerEvent::Connected {
            device,
            session_id: session.id,
            model: session.handle.model.clone(),
        });

        Ok(session)
    }

    /// Disconnect a device family.
    ///
    /// Local state is cleared first and unconditionally; a failing transport
    /// teardown only produces a [`DisconnectWarning`]. Calling it on an idle
    /// family is a no-op apart from clearing the persisted preference.
    pub async fn disconnect(&self, device: DeviceType) {
        let removed = self.store.remove(device);
        self.forget_last_connected(device).await;

        let session_id = removed.as_ref().map(|s| s.id);
        if let Some(session) = removed {
            match self.transport(device) {
                Ok(transport) => self.release(transport.as_ref(), &session).await,
                Err(reason) => self.warn_disconnect(DisconnectWarning { device, reason }),
            }
            tracing::info!(device = %device, session_id = %session.id, "Hardware signer disconnected");
        }

        self.events.push(SignerEvent::Disconnected { device, session_id });
    }

    /// Find a session to work with.
    ///
    /// Tries the explicit family, then any active family (Ledger before
    /// Trezor), then a single auto-reconnect to the persisted last
    /// connected family.
    pub async fn resolve_active_session(&self, explicit: Option<DeviceType>) -> Option<Session> {
        if let Some(session) = explicit.and_then(|device| self.store.session(device)) {
            return Some(session);
        }
        if let Some(session) = self.store.active_sessions().into_iter().next() {
            return Some(session);
        }
        self.auto_reconnect(None).await
    }

    /// Derive addresses on the resolved session, replacing its cached list.
    ///
    /// `count` defaults to the configured count and `network` to the
    /// preferred network.
    ///
    /// # Errors
    /// `InvalidArgument` for a zero or oversized count, `NoSession` if no
    /// session can be resolved, `ListFailed` if the transport fails or the
    /// session ends before the result is committed.
    pub async fn list_addresses(
        &self,
        count: Option<usize>,
        network: Option<NetworkId>,
    ) -> Result<Vec<Address>, ManagerError> {
        let count = count.unwrap_or(self.config.default_address_count);
        if count == 0 {
            return Err(ManagerError::InvalidArgument(
                "count must be a positive integer".to_string(),
            ));
        }
        if count > self.config.max_address_count {
            return Err(ManagerError::InvalidArgument(format!(
                "count must not exceed {}",
                self.config.max_address_count
            )));
        }
        let network = network.unwrap_or_else(|| self.preferred_network());

        let session = self
            .resolve_active_session(None)
            .await
            .ok_or(ManagerError::NoSession)?;
        let device = session.device_type();

        let transport = self
            .transport(device)
            .map_err(|reason| self.list_failed(device, network, reason))?;
        let accounts = transport
            .derive_addresses(&session.handle, network, count)
            .await
            .map_err(|reason| self.list_failed(device, network, reason))?;

        if !self
            .store
            .commit_accounts(device, session.id, network, accounts.clone())
        {
            tracing::warn!(
                device = %device,
                session_id = %session.id,
                "Session ended while deriving addresses; discarding result"
            );
            return Err(ManagerError::ListFailed {
                device,
                reason: TransportError::Device("session ended before addresses were stored".into()),
            });
        }

        self.events.push(SignerEvent::AddressesUpdated {
            device,
            network,
            count: accounts.len(),
        });
        Ok(accounts)
    }

    /// Sign a transaction on the resolved session. Never retried.
    ///
    /// # Errors
    /// `NoSession` if no session can be resolved, `SignFailed` otherwise.
    pub async fn sign_transaction(
        &self,
        request: &SigningRequest,
    ) -> Result<SignatureBlob, ManagerError> {
        self.sign(SignKind::Transaction, request).await
    }

    /// Sign a message on the resolved session. Never retried.
    ///
    /// # Errors
    /// `NoSession` if no session can be resolved, `SignFailed` otherwise.
    pub async fn sign_message(
        &self,
        request: &SigningRequest,
    ) -> Result<SignatureBlob, ManagerError> {
        self.sign(SignKind::Message, request).await
    }

    /// Persist and apply a new preferred network.
    ///
    /// Cached addresses keep their network until the next derivation.
    ///
    /// # Errors
    /// Returns error if the preference cannot be written; the previous
    /// network then stays in effect.
    pub async fn set_preferred_network(&self, network: NetworkId) -> Result<(), ManagerError> {
        self.preferences
            .set(PreferenceKey::PreferredNetwork, network.as_str())
            .await?;
        *self
            .preferred_network
            .write()
            .unwrap_or_else(PoisonError::into_inner) = network;
        tracing::info!(network = %network, "Preferred network updated");
        self.events
            .push(SignerEvent::PreferredNetworkChanged { network });
        Ok(())
    }

    #[must_use]
    pub fn preferred_network(&self) -> NetworkId {
        *self
            .preferred_network
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Active sessions, Ledger first.
    #[must_use]
    pub fn active_sessions(&self) -> Vec<Session> {
        self.store.active_sessions()
    }

    #[must_use]
    pub fn session(&self, device: DeviceType) -> Option<Session> {
        self.store.session(device)
    }

    #[must_use]
    pub fn cached_addresses(&self, device: DeviceType) -> Vec<Address> {
        self.store.accounts(device)
    }

    #[must_use]
    pub fn last_error(&self, device: DeviceType) -> Option<String> {
        self.store.last_error(device)
    }

    #[must_use]
    pub fn state(&self, device: DeviceType) -> SlotState {
        self.store.state(device)
    }

    /// Lifecycle event log.
    #[must_use]
    pub fn events(&self) -> Arc<EventLog> {
        Arc::clone(&self.events)
    }

    async fn sign(
        &self,
        kind: SignKind,
        request: &SigningRequest,
    ) -> Result<SignatureBlob, ManagerError> {
        let session = match request.device_type {
            Some(device) => self.resolve_strict(device).await,
            None => self.resolve_active_session(None).await,
        }
        .ok_or(ManagerError::NoSession)?;
        let device = session.device_type();

        let transport = self
            .transport(device)
            .map_err(|reason| self.sign_failed(device, kind, reason))?;
        let signed = match kind {
            SignKind::Transaction => transport.sign_transaction(&session.handle, request).await,
            SignKind::Message => transport.sign_message(&session.handle, request).await,
        };
        let signature = signed.map_err(|reason| self.sign_failed(device, kind, reason))?;

        tracing::info!(
            device = %device,
            session_id = %session.id,
            network = %request.network,
            kind = kind.as_str(),
            "Payload signed"
        );
        Ok(signature)
    }

    /// Resolve only within one family; never substitutes another.
    async fn resolve_strict(&self, device: DeviceType) -> Option<Session> {
        if let Some(session) = self.store.session(device) {
            return Some(session);
        }
        self.auto_reconnect(Some(device)).await
    }

    /// One connect attempt to the persisted last connected family.
    async fn auto_reconnect(&self, only: Option<DeviceType>) -> Option<Session> {
        let device = self.last_connected_type().await?;
        if only.is_some_and(|wanted| wanted != device) {
            return None;
        }

        tracing::info!(device = %device, "Attempting auto-reconnect");
        self.events.push(SignerEvent::AutoReconnect { device });
        match self.connect(device).await {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(device = %device, "Auto-reconnect failed: {e}");
                None
            }
        }
    }

    async fn last_connected_type(&self) -> Option<DeviceType> {
        match self.preferences.get(PreferenceKey::LastConnectedType).await {
            Ok(Some(raw)) => raw
                .parse::<DeviceType>()
                .inspect_err(|e| tracing::warn!("Ignoring persisted device type: {e}"))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Failed to read last connected device: {e}");
                None
            }
        }
    }

    /// Clear the persisted last connected family if it is `device`.
    async fn forget_last_connected(&self, device: DeviceType) {
        if self.last_connected_type().await != Some(device) {
            return;
        }
        if let Err(e) = self.preferences.remove(PreferenceKey::LastConnectedType).await {
            tracing::warn!(device = %device, "Failed to clear last connected device: {e}");
        }
    }

    fn connect_failed(
        &self,
        ticket: ConnectTicket<'_>,
        device: DeviceType,
        reason: TransportError,
    ) -> ManagerError {
        tracing::warn!(device = %device, "Connect failed: {reason}");
        ticket.fail(reason.to_string());
        self.events.push(SignerEvent::ConnectFailed {
            device,
            reason: reason.to_string(),
        });
        ManagerError::ConnectFailed { device, reason }
    }

    fn list_failed(
        &self,
        device: DeviceType,
        network: NetworkId,
        reason: TransportError,
    ) -> ManagerError {
        tracing::warn!(device = %device, network = %network, "Address derivation failed: {reason}");
        self.store.record_error(device, reason.to_string());
        ManagerError::ListFailed { device, reason }
    }

    fn sign_failed(&self, device: DeviceType, kind: SignKind, reason: TransportError) -> ManagerError {
        tracing::warn!(device = %device, kind = kind.as_str(), "Signing failed: {reason}");
        self.store.record_error(device, reason.to_string());
        ManagerError::SignFailed { device, reason }
    }

    fn transport(&self, device: DeviceType) -> Result<Arc<dyn DeviceTransport>, TransportError> {
        self.transports
            .get(&device)
            .cloned()
            .ok_or_else(|| TransportError::Unsupported(format!("no transport registered for {device}")))
    }

    async fn release(&self, transport: &dyn DeviceTransport, session: &Session) {
        if let Err(reason) = transport.disconnect(&session.handle).await {
            self.warn_disconnect(DisconnectWarning {
                device: session.device_type(),
                reason,
            });
        }
    }

    fn warn_disconnect(&self, warning: DisconnectWarning) {
        tracing::warn!(device = %warning.device, "{warning}");
        self.events.push(SignerEvent::DisconnectWarning {
            device: warning.device,
            reason: warning.reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use hw_signer_core::{MockTransport, StaticFeatureGate};

    use super::*;
    use crate::storage::MemoryPreferences;

    fn manager() -> (SessionManager<MemoryPreferences, StaticFeatureGate>, MockTransport) {
        let mock = MockTransport::new(DeviceType::Ledger);
        let manager = SessionManager::new(
            MemoryPreferences::new(),
            StaticFeatureGate::default(),
            SignerConfig::default(),
        )
        .with_transport(DeviceType::Ledger, Arc::new(mock.clone()));
        (manager, mock)
    }

    #[tokio::test]
    async fn test_connect_without_transport_fails() {
        let (manager, _) = manager();
        let err = manager.connect(DeviceType::Trezor).await.unwrap_err();
        assert!(matches!(
            err,
            ManagerError::ConnectFailed {
                device: DeviceType::Trezor,
                reason: TransportError::Unsupported(_),
            }
        ));
        assert_eq!(manager.state(DeviceType::Trezor), SlotState::Idle);
        assert!(manager.last_error(DeviceType::Trezor).is_some());
    }

    #[tokio::test]
    async fn test_preferred_network_applies_after_restore() {
        let prefs = MemoryPreferences::new();
        prefs.set(PreferenceKey::PreferredNetwork, "solana").await.unwrap();
        let manager =
            SessionManager::new(prefs, StaticFeatureGate::default(), SignerConfig::default());

        assert_eq!(manager.preferred_network(), NetworkId::Eth);
        let restored = manager.restore().await;
        assert_eq!(restored.preferred_network, NetworkId::Solana);
        assert_eq!(manager.preferred_network(), NetworkId::Solana);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_session() {
        let (manager, mock) = manager();
        let first = manager.connect(DeviceType::Ledger).await.unwrap();
        manager.list_addresses(Some(2), None).await.unwrap();

        let second = manager.connect(DeviceType::Ledger).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(mock.disconnect_calls(), 1);
        assert_eq!(manager.active_sessions(), vec![second]);
        assert!(manager.cached_addresses(DeviceType::Ledger).is_empty());
    }

    #[tokio::test]
    async fn test_list_overwrites_cached_addresses() {
        let (manager, _) = manager();
        manager.connect(DeviceType::Ledger).await.unwrap();

        manager.list_addresses(Some(5), Some(NetworkId::Eth)).await.unwrap();
        let addresses = manager
            .list_addresses(Some(2), Some(NetworkId::Solana))
            .await
            .unwrap();

        assert_eq!(addresses.len(), 2);
        assert_eq!(manager.cached_addresses(DeviceType::Ledger), addresses);
        let session = manager.session(DeviceType::Ledger).unwrap();
        assert_eq!(session.accounts_network, Some(NetworkId::Solana));
    }

    #[tokio::test]
    async fn test_invalid_count_is_rejected_before_resolution() {
        let (manager, mock) = manager();
        let err = manager.list_addresses(Some(0), None).await.unwrap_err();
        assert_eq!(err.code(), "invalid_argument");

        let err = manager.list_addresses(Some(101), None).await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidArgument(_)));
        assert_eq!(mock.connect_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_derivation_records_error() {
        let (manager, mock) = manager();
        manager.connect(DeviceType::Ledger).await.unwrap();
        mock.fail_next_derive(TransportError::Timeout);

        let err = manager.list_addresses(None, None).await.unwrap_err();
        assert!(matches!(
            err,
            ManagerError::ListFailed {
                reason: TransportError::Timeout,
                ..
            }
        ));
        assert_eq!(
            manager.last_error(DeviceType::Ledger).as_deref(),
            Some("Device timed out")
        );
        assert_eq!(manager.state(DeviceType::Ledger), SlotState::Connected);
    }

    #[tokio::test]
    async fn test_sign_failure_is_not_retried() {
        let (manager, mock) = manager();
        manager.connect(DeviceType::Ledger).await.unwrap();
        mock.fail_next_sign(TransportError::rejected(""));

        let request = SigningRequest::new(NetworkId::Eth, b"payload".to_vec());
        let err = manager.sign_transaction(&request).await.unwrap_err();
        assert!(matches!(err, ManagerError::SignFailed { .. }));
        assert_eq!(mock.sign_calls(), 1);
    }

    #[tokio::test]
    async fn test_events_follow_lifecycle() {
        let (manager, _) = manager();
        manager.connect(DeviceType::Ledger).await.unwrap();
        manager.disconnect(DeviceType::Ledger).await;

        let history = manager.events().history();
        assert!(matches!(history[0], SignerEvent::Connected { .. }));
        assert!(matches!(
            history[1],
            SignerEvent::Disconnected {
                device: DeviceType::Ledger,
                session_id: Some(_),
            }
        ));
    }
}
