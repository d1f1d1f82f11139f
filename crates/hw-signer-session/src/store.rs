//! In-memory session table with one slot per device family.

use std::sync::{Mutex, MutexGuard, PoisonError};

use hw_signer_core::{Address, DeviceType, NetworkId, Session, SessionId, SlotState};

#[derive(Debug, Default)]
struct Slot {
    session: Option<Session>,
    connecting: bool,
    /// Bumped by every removal so an in-flight connect can tell it was cancelled.
    epoch: u64,
    last_error: Option<String>,
}

/// Session table holding at most one live session per family.
///
/// Slots are locked independently and never across an await point, so
/// operations on different families do not contend.
#[derive(Debug, Default)]
pub struct SessionStore {
    slots: [Mutex<Slot>; 2],
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, device: DeviceType) -> MutexGuard<'_, Slot> {
        self.slots[device.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a connect as in flight.
    ///
    /// Returns `None` if one is already running for this family.
    #[must_use]
    pub fn begin_connect(&self, device: DeviceType) -> Option<ConnectTicket<'_>> {
        let mut slot = self.slot(device);
        if slot.connecting {
            return None;
        }
        slot.connecting = true;
        Some(ConnectTicket {
            store: self,
            device,
            epoch: slot.epoch,
        })
    }

    /// Active session for a family.
    #[must_use]
    pub fn session(&self, device: DeviceType) -> Option<Session> {
        self.slot(device).session.clone()
    }

    /// All active sessions, in family resolution order.
    #[must_use]
    pub fn active_sessions(&self) -> Vec<Session> {
        DeviceType::ALL
            .into_iter()
            .filter_map(|device| self.session(device))
            .collect()
    }

    /// Cached addresses of a family's session, empty when idle.
    #[must_use]
    pub fn accounts(&self, device: DeviceType) -> Vec<Address> {
        self.slot(device)
            .session
            .as_ref()
            .map(|s| s.accounts.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn state(&self, device: DeviceType) -> SlotState {
        let slot = self.slot(device);
        if slot.connecting {
            SlotState::Connecting
        } else if slot.session.is_some() {
            SlotState::Connected
        } else {
            SlotState::Idle
        }
    }

    #[must_use]
    pub fn last_error(&self, device: DeviceType) -> Option<String> {
        self.slot(device).last_error.clone()
    }

    pub fn record_error(&self, device: DeviceType, error: impl Into<String>) {
        self.slot(device).last_error = Some(error.into());
    }

    /// Drop a family's session together with its cached addresses.
    ///
    /// Also cancels any connect that is still in flight.
    pub fn remove(&self, device: DeviceType) -> Option<Session> {
        let mut slot = self.slot(device);
        slot.epoch = slot.epoch.wrapping_add(1);
        slot.session.take()
    }

    /// Overwrite the cached addresses if `session_id` is still current.
    ///
    /// Returns `false` when the session ended while the addresses were
    /// being derived; the result is then dropped.
    pub fn commit_accounts(
        &self,
        device: DeviceType,
        session_id: SessionId,
        network: NetworkId,
        accounts: Vec<Address>,
    ) -> bool {
        let mut slot = self.slot(device);
        match slot.session.as_mut() {
            Some(session) if session.id == session_id => {
                session.accounts = accounts;
                session.accounts_network = Some(network);
                true
            }
            _ => false,
        }
    }
}

/// Exclusive right to replace one family's session.
///
/// Dropping the ticket clears the in-flight marker, including when the
/// connecting future is dropped mid-way.
#[derive(Debug)]
pub struct ConnectTicket<'a> {
    store: &'a SessionStore,
    device: DeviceType,
    epoch: u64,
}

impl ConnectTicket<'_> {
    /// Take the session being superseded, if any.
    #[must_use]
    pub fn take_previous(&self) -> Option<Session> {
        self.store.slot(self.device).session.take()
    }

    /// Install the new session and clear the family's last error.
    ///
    /// # Errors
    /// Hands the session back if the family was disconnected while the
    /// connect was in flight; the ticket then stays usable for
    /// [`fail`](Self::fail).
    pub fn install(&self, session: Session) -> Result<(), Session> {
        let mut slot = self.store.slot(self.device);
        if slot.epoch != self.epoch {
            return Err(session);
        }
        slot.session = Some(session);
        slot.last_error = None;
        Ok(())
    }

    /// Record a failed attempt. The previous session, if any, stays.
    pub fn fail(self, error: impl Into<String>) {
        self.store.record_error(self.device, error);
    }
}

impl Drop for ConnectTicket<'_> {
    fn drop(&mut self) {
        self.store.slot(self.device).connecting = false;
    }
}

#[cfg(test)]
mod tests {
    use hw_signer_core::DeviceHandle;

    use super::*;

    fn session(device: DeviceType) -> Session {
        Session::new(DeviceHandle::new(device, "dev", "model"))
    }

    #[test]
    fn test_second_connect_is_rejected_while_first_in_flight() {
        let store = SessionStore::new();
        let ticket = store.begin_connect(DeviceType::Ledger).unwrap();
        assert!(store.begin_connect(DeviceType::Ledger).is_none());
        assert!(store.begin_connect(DeviceType::Trezor).is_some());
        assert_eq!(store.state(DeviceType::Ledger), SlotState::Connecting);

        drop(ticket);
        assert_eq!(store.state(DeviceType::Ledger), SlotState::Idle);
        assert!(store.begin_connect(DeviceType::Ledger).is_some());
    }

    #[test]
    fn test_install_clears_error() {
        let store = SessionStore::new();
        store.record_error(DeviceType::Trezor, "locked");

        let ticket = store.begin_connect(DeviceType::Trezor).unwrap();
        ticket.install(session(DeviceType::Trezor)).unwrap();

        assert_eq!(store.state(DeviceType::Trezor), SlotState::Connected);
        assert!(store.last_error(DeviceType::Trezor).is_none());
    }

    #[test]
    fn test_failed_connect_keeps_previous_session() {
        let store = SessionStore::new();
        let first = session(DeviceType::Ledger);
        store
            .begin_connect(DeviceType::Ledger)
            .unwrap()
            .install(first.clone())
            .unwrap();

        store.begin_connect(DeviceType::Ledger).unwrap().fail("timeout");

        assert_eq!(store.session(DeviceType::Ledger), Some(first));
        assert_eq!(store.last_error(DeviceType::Ledger).as_deref(), Some("timeout"));
    }

    #[test]
    fn test_remove_during_connect_rejects_install() {
        let store = SessionStore::new();
        let ticket = store.begin_connect(DeviceType::Ledger).unwrap();
        assert!(store.remove(DeviceType::Ledger).is_none());

        assert!(ticket.install(session(DeviceType::Ledger)).is_err());
        assert!(store.session(DeviceType::Ledger).is_none());
    }

    #[test]
    fn test_commit_requires_current_session() {
        let store = SessionStore::new();
        let old = session(DeviceType::Ledger);
        let current = session(DeviceType::Ledger);
        store
            .begin_connect(DeviceType::Ledger)
            .unwrap()
            .install(current.clone())
            .unwrap();

        let accounts = vec![Address::new("0xa_0")];
        assert!(!store.commit_accounts(DeviceType::Ledger, old.id, NetworkId::Eth, accounts.clone()));
        assert!(store.accounts(DeviceType::Ledger).is_empty());

        assert!(store.commit_accounts(DeviceType::Ledger, current.id, NetworkId::Eth, accounts.clone()));
        assert_eq!(store.accounts(DeviceType::Ledger), accounts);
    }

    #[test]
    fn test_active_sessions_are_ordered() {
        let store = SessionStore::new();
        for device in [DeviceType::Trezor, DeviceType::Ledger] {
            store
                .begin_connect(device)
                .unwrap()
                .install(session(device))
                .unwrap();
        }
        let order: Vec<_> = store
            .active_sessions()
            .iter()
            .map(Session::device_type)
            .collect();
        assert_eq!(order, vec![DeviceType::Ledger, DeviceType::Trezor]);
    }
}
