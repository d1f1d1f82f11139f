//! Deterministic in-memory device transport.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    traits::{DeviceTransport, TransportError},
    types::{Address, DeviceHandle, DeviceType, NetworkId, SignatureBlob, SigningRequest},
};

type Script = Arc<Mutex<VecDeque<TransportError>>>;

#[derive(Default)]
struct Calls {
    connect: AtomicUsize,
    derive: AtomicUsize,
    sign: AtomicUsize,
    disconnect: AtomicUsize,
}

/// Transport double that never touches hardware.
///
/// Every call succeeds with deterministic output unless a failure has been
/// queued for it. Clones share scripts and call counters.
#[derive(Clone)]
pub struct MockTransport {
    device_id: String,
    model: String,
    connect_latency: Duration,
    derive_latency: Duration,
    connect_failures: Script,
    derive_failures: Script,
    sign_failures: Script,
    disconnect_failures: Script,
    calls: Arc<Calls>,
    last_sign_request: Arc<Mutex<Option<SigningRequest>>>,
}

impl MockTransport {
    /// Create a mock for one device family.
    #[must_use]
    pub fn new(device_type: DeviceType) -> Self {
        let model = match device_type {
            DeviceType::Ledger => "Nano X (mock)",
            DeviceType::Trezor => "Model T (mock)",
        };
        Self {
            device_id: format!("mock{device_type}"),
            model: model.to_string(),
            connect_latency: Duration::ZERO,
            derive_latency: Duration::ZERO,
            connect_failures: Script::default(),
            derive_failures: Script::default(),
            sign_failures: Script::default(),
            disconnect_failures: Script::default(),
            calls: Arc::default(),
            last_sign_request: Arc::default(),
        }
    }

    /// Override the opaque id used in derived addresses.
    #[must_use]
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    /// Delay every connect, keeping it in flight.
    #[must_use]
    pub fn with_connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = latency;
        self
    }

    /// Delay every derivation, keeping it in flight.
    #[must_use]
    pub fn with_derive_latency(mut self, latency: Duration) -> Self {
        self.derive_latency = latency;
        self
    }

    /// Fail the next connect.
    pub fn fail_next_connect(&self, error: TransportError) {
        push(&self.connect_failures, error);
    }

    /// Fail the next derivation.
    pub fn fail_next_derive(&self, error: TransportError) {
        push(&self.derive_failures, error);
    }

    /// Fail the next signing call, transaction or message.
    pub fn fail_next_sign(&self, error: TransportError) {
        push(&self.sign_failures, error);
    }

    /// Fail the next disconnect.
    pub fn fail_next_disconnect(&self, error: TransportError) {
        push(&self.disconnect_failures, error);
    }

    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.calls.connect.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn derive_calls(&self) -> usize {
        self.calls.derive.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn sign_calls(&self) -> usize {
        self.calls.sign.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn disconnect_calls(&self) -> usize {
        self.calls.disconnect.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn last_sign_request(&self) -> Option<SigningRequest> {
        self.last_sign_request
            .lock()
            .ok()
            .and_then(|value| value.clone())
    }

    fn sign(
        &self,
        kind: &[u8],
        handle: &DeviceHandle,
        request: &SigningRequest,
    ) -> Result<SignatureBlob, TransportError> {
        self.calls.sign.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.last_sign_request.lock() {
            *slot = Some(request.clone());
        }
        if let Some(error) = pop(&self.sign_failures) {
            return Err(error);
        }
        let parts: [&[u8]; 5] = [
            kind,
            b":",
            handle.device_id.as_bytes(),
            b":",
            &request.payload,
        ];
        Ok(SignatureBlob::new(parts.concat()))
    }
}

fn push(script: &Script, error: TransportError) {
    if let Ok(mut queue) = script.lock() {
        queue.push_back(error);
    }
}

fn pop(script: &Script) -> Option<TransportError> {
    script.lock().ok().and_then(|mut queue| queue.pop_front())
}

async fn pause(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

#[async_trait]
impl DeviceTransport for MockTransport {
    async fn connect(&self, device_type: DeviceType) -> Result<DeviceHandle, TransportError> {
        self.calls.connect.fetch_add(1, Ordering::SeqCst);
        pause(self.connect_latency).await;
        if let Some(error) = pop(&self.connect_failures) {
            return Err(error);
        }
        Ok(DeviceHandle::new(
            device_type,
            self.device_id.clone(),
            self.model.clone(),
        ))
    }

    async fn derive_addresses(
        &self,
        handle: &DeviceHandle,
        network: NetworkId,
        count: usize,
    ) -> Result<Vec<Address>, TransportError> {
        self.calls.derive.fetch_add(1, Ordering::SeqCst);
        pause(self.derive_latency).await;
        if let Some(error) = pop(&self.derive_failures) {
            return Err(error);
        }
        Ok((0..count)
            .map(|index| Address::derived(network, &handle.device_id, index))
            .collect())
    }

    async fn sign_transaction(
        &self,
        handle: &DeviceHandle,
        request: &SigningRequest,
    ) -> Result<SignatureBlob, TransportError> {
        self.sign(b"tx", handle, request)
    }

    async fn sign_message(
        &self,
        handle: &DeviceHandle,
        request: &SigningRequest,
    ) -> Result<SignatureBlob, TransportError> {
        self.sign(b"msg", handle, request)
    }

    async fn disconnect(&self, _handle: &DeviceHandle) -> Result<(), TransportError> {
        self.calls.disconnect.fetch_add(1, Ordering::SeqCst);
        pop(&self.disconnect_failures).map_or(Ok(()), Err)
    }
}
