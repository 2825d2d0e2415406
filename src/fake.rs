//! In-memory `Transport` with scripted behaviour.
//!
//! Records every chunk written and how many writes were ever in flight
//! at once, and lets a test pull the plug with `simulate_disconnect`.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{TransportError, TransportResult};
use crate::transport::{
    DeviceFilter, DisconnectCallback, DiscoveredDevice, Endpoint, PRINTER_SERVICES, Transport,
};

/// Characteristic every fake session exposes
pub const FAKE_CHARACTERISTIC: Uuid = Uuid::from_u128(0x00002af1_0000_1000_8000_00805f9b34fb);

#[derive(Default)]
struct FakeState {
    device: Option<DiscoveredDevice>,
    supported: bool,
    session_open: bool,
    fail_session: bool,
    no_endpoints: bool,
    fail_writes: bool,
    /// Writes left before every further write fails
    writes_before_failure: Option<usize>,
    /// Writes left before the link drops on the next one
    writes_before_link_loss: Option<usize>,
    /// Drop the link as soon as a disconnect watcher is registered
    disconnect_on_watch: bool,
    write_delay: Duration,
    chunks: Vec<Vec<u8>>,
    disconnect_callback: Option<DisconnectCallback>,
    sessions_opened: usize,
}

pub struct FakeTransport {
    state: Mutex<FakeState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeTransport {
    /// Supported radio with one advertising printer
    pub fn new() -> Self {
        Self::with_device(DiscoveredDevice {
            id: "AA:BB:CC:DD:EE:01".into(),
            name: Some("MTP-II".into()),
        })
    }

    pub fn with_device(device: DiscoveredDevice) -> Self {
        Self {
            state: Mutex::new(FakeState {
                device: Some(device),
                supported: true,
                ..Default::default()
            }),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Radio present, nothing advertising
    pub fn empty() -> Self {
        let fake = Self::new();
        fake.state().device = None;
        fake
    }

    /// No radio at all
    pub fn unsupported() -> Self {
        let fake = Self::empty();
        fake.state().supported = false;
        fake
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_fail_session(&self, fail: bool) {
        self.state().fail_session = fail;
    }

    pub fn set_no_endpoints(&self, none: bool) {
        self.state().no_endpoints = none;
    }

    /// Makes every write fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Lets `n` more writes through, then fails the rest
    pub fn fail_after_writes(&self, n: usize) {
        self.state().writes_before_failure = Some(n);
    }

    /// Lets `n` more writes through, then loses the link on the next one
    pub fn drop_link_after_writes(&self, n: usize) {
        self.state().writes_before_link_loss = Some(n);
    }

    /// Makes the printer vanish right as its session comes up
    pub fn set_disconnect_on_watch(&self, on: bool) {
        self.state().disconnect_on_watch = on;
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.state().write_delay = delay;
    }

    /// Every chunk written so far, in order
    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.state().chunks.clone()
    }

    /// All chunks joined back together
    pub fn written(&self) -> Vec<u8> {
        self.state().chunks.concat()
    }

    pub fn clear_written(&self) {
        self.state().chunks.clear();
    }

    pub fn sessions_opened(&self) -> usize {
        self.state().sessions_opened
    }

    pub fn is_session_open(&self) -> bool {
        self.state().session_open
    }

    /// Highest number of writes ever observed in flight together
    pub fn max_concurrent_writes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Drops the link as if the printer went out of range
    pub fn simulate_disconnect(&self) {
        let callback = {
            let mut state = self.state();
            state.session_open = false;
            state.disconnect_callback.take()
        };
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn is_supported(&self) -> bool {
        self.state().supported
    }

    async fn discover(&self, filter: &DeviceFilter) -> TransportResult<DiscoveredDevice> {
        let state = self.state();
        if !state.supported {
            return Err(TransportError::Unsupported);
        }
        match &state.device {
            Some(device) if filter.matches(device.name.as_deref(), &[]) => Ok(device.clone()),
            _ => Err(TransportError::NoDevice),
        }
    }

    async fn retrieve(&self, device_id: &str) -> TransportResult<DiscoveredDevice> {
        match &self.state().device {
            Some(device) if device.id == device_id => Ok(device.clone()),
            _ => Err(TransportError::UnknownDevice(device_id.to_string())),
        }
    }

    async fn open_session(&self, _device: &DiscoveredDevice) -> TransportResult<()> {
        let mut state = self.state();
        if state.fail_session {
            return Err(TransportError::Session("GATT connect refused".into()));
        }
        state.session_open = true;
        state.sessions_opened += 1;
        Ok(())
    }

    async fn list_writable_endpoints(&self) -> TransportResult<Vec<Endpoint>> {
        let state = self.state();
        if !state.session_open {
            return Err(TransportError::NotConnected);
        }
        if state.no_endpoints {
            return Ok(Vec::new());
        }
        Ok(vec![Endpoint {
            uuid: FAKE_CHARACTERISTIC,
            service: PRINTER_SERVICES[0],
            without_response: true,
        }])
    }

    async fn write(&self, _endpoint: &Endpoint, data: &[u8]) -> TransportResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.state().write_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let (result, lost) = {
            let mut state = self.state();
            let link_lost = match state.writes_before_link_loss {
                Some(0) => true,
                Some(n) => {
                    state.writes_before_link_loss = Some(n - 1);
                    false
                }
                None => false,
            };
            if link_lost {
                state.writes_before_link_loss = None;
                state.session_open = false;
            }
            let exhausted = match state.writes_before_failure.as_mut() {
                Some(0) => true,
                Some(n) => {
                    *n -= 1;
                    false
                }
                None => false,
            };
            let result = if !state.session_open {
                Err(TransportError::Write("link lost".into()))
            } else if state.fail_writes || exhausted {
                Err(TransportError::Write("characteristic write rejected".into()))
            } else {
                state.chunks.push(data.to_vec());
                Ok(())
            };
            let lost = if link_lost {
                state.disconnect_callback.take()
            } else {
                None
            };
            (result, lost)
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(callback) = lost {
            callback();
        }
        result
    }

    fn on_disconnect(&self, _device: &DiscoveredDevice, callback: DisconnectCallback) {
        let mut state = self.state();
        if state.disconnect_on_watch {
            state.session_open = false;
            drop(state);
            callback();
            return;
        }
        state.disconnect_callback = Some(callback);
    }

    async fn close_session(&self) -> TransportResult<()> {
        let mut state = self.state();
        state.session_open = false;
        state.disconnect_callback = None;
        Ok(())
    }
}
