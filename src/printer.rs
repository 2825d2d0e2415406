//! Connection manager: owns the one live printer session.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};

use crate::config::PrinterConfig;
use crate::encoder::ReceiptEncoder;
use crate::error::{TransportError, TransportResult};
use crate::events::{EventBus, PrinterEvent, PrinterEventKind};
use crate::protocol::chunk_data;
use crate::receipt::ReceiptData;
use crate::store::{self, LAST_DEVICE_KEY, Store};
use crate::transport::{DiscoveredDevice, Endpoint, PrinterDevice, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Persisted record of the last printer we connected to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastDevice {
    pub id: String,
    pub name: String,
    pub connected_at: DateTime<Utc>,
}

struct Session {
    device: DiscoveredDevice,
    endpoint: Endpoint,
}

/// State shared with the transport's disconnect callback
struct Shared {
    state: Mutex<ConnectionState>,
    session: Mutex<Option<Session>>,
    events: EventBus,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state() = state;
    }
}

/// Connects to one printer and streams encoded receipts to it.
///
/// - `transport`: the radio (BLE or fake)
/// - `store`: where the last known device is remembered
///
/// Failures never escape as errors from the printing surface: they come
/// back as `false` plus a `PrinterEvent::Error`.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    store: Arc<dyn Store>,
    config: PrinterConfig,
    shared: Arc<Shared>,
    /// Held for a whole payload so chunks of two prints never interleave
    write_gate: tokio::sync::Mutex<()>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn Store>, config: PrinterConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            transport,
            store,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::Disconnected),
                session: Mutex::new(None),
                events,
            }),
            write_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &PrinterConfig {
        &self.config
    }

    /// Capability probe; hide printer UI entirely when false
    pub async fn is_supported(&self) -> bool {
        self.transport.is_supported().await
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The printer in use, if a session is open
    pub fn device(&self) -> Option<PrinterDevice> {
        let connected = self.is_connected();
        self.shared.session().as_ref().map(|s| PrinterDevice {
            id: s.device.id.clone(),
            name: s.device.display_name(),
            connected,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.shared.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Last printer persisted by a successful connect
    pub fn last_device(&self) -> Option<LastDevice> {
        match store::load_json(self.store.as_ref(), LAST_DEVICE_KEY) {
            Ok(device) => device,
            Err(e) => {
                warn!(error = %e, "Cannot read last printer");
                None
            }
        }
    }

    pub fn forget_device(&self) {
        if let Err(e) = self.store.remove(LAST_DEVICE_KEY) {
            warn!(error = %e, "Cannot forget last printer");
        }
    }

    /// Discovers a compatible printer and opens a session to it.
    ///
    /// Returns true once a writable endpoint is selected and the device is
    /// remembered; false (state `Error`) on any failure.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> bool {
        self.release_session().await;
        self.shared.set_state(ConnectionState::Connecting);
        let result: TransportResult<PrinterDevice> = async {
            let device = self.transport.discover(&self.config.filter).await?;
            self.establish(device).await
        }
        .await;
        self.finish_connect(result)
    }

    /// Reopens the last remembered printer without scanning
    #[instrument(skip(self))]
    pub async fn reconnect(&self) -> bool {
        let Some(last) = self.last_device() else {
            return false;
        };
        self.release_session().await;
        self.shared.set_state(ConnectionState::Connecting);
        let result: TransportResult<PrinterDevice> = async {
            let device = self.transport.retrieve(&last.id).await?;
            self.establish(device).await
        }
        .await;
        self.finish_connect(result)
    }

    /// Closes a previous session quietly before a new connect replaces it
    async fn release_session(&self) {
        let session = self.shared.session().take();
        if session.is_some() {
            if let Err(e) = self.transport.close_session().await {
                warn!(error = %e, "Closing previous printer session failed");
            }
        }
    }

    fn finish_connect(&self, result: TransportResult<PrinterDevice>) -> bool {
        // the link may already have dropped while the session was set up
        let result = result.and_then(|device| {
            let session = self.shared.session();
            if session.is_none() {
                return Err(TransportError::NotConnected);
            }
            self.shared.set_state(ConnectionState::Connected);
            Ok(device)
        });
        match result {
            Ok(device) => {
                info!(device_id = %device.id, name = %device.name, "Printer connected");
                self.shared
                    .events
                    .emit(PrinterEventKind::Connected { device });
                true
            }
            Err(e) => {
                error!(error = %e, "Printer connection failed");
                self.shared.set_state(ConnectionState::Error);
                self.shared.events.emit(PrinterEventKind::Error {
                    message: e.to_string(),
                });
                false
            }
        }
    }

    async fn establish(&self, device: DiscoveredDevice) -> TransportResult<PrinterDevice> {
        self.transport.open_session(&device).await?;

        let endpoint = match self.transport.list_writable_endpoints().await {
            Ok(endpoints) => endpoints.into_iter().next(),
            Err(e) => {
                let _ = self.transport.close_session().await;
                return Err(e);
            }
        };
        let Some(endpoint) = endpoint else {
            let _ = self.transport.close_session().await;
            return Err(TransportError::NoWritableEndpoint);
        };

        let printer = PrinterDevice {
            id: device.id.clone(),
            name: device.display_name(),
            connected: true,
        };
        let record = LastDevice {
            id: printer.id.clone(),
            name: printer.name.clone(),
            connected_at: Utc::now(),
        };
        if let Err(e) = store::save_json(self.store.as_ref(), LAST_DEVICE_KEY, &record) {
            warn!(error = %e, "Cannot remember printer");
        }

        *self.shared.session() = Some(Session {
            device: device.clone(),
            endpoint,
        });
        self.watch_disconnect(&device);
        Ok(printer)
    }

    /// Reflects an involuntary disconnect without waiting for a write to fail
    fn watch_disconnect(&self, device: &DiscoveredDevice) {
        let shared = Arc::downgrade(&self.shared);
        let device_id = device.id.clone();
        self.transport.on_disconnect(
            device,
            Box::new(move || {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                {
                    let mut session = shared.session();
                    // a callback from an older session must not tear down a newer one
                    if session.as_ref().map(|s| s.device.id.as_str()) != Some(device_id.as_str()) {
                        return;
                    }
                    *session = None;
                }
                warn!(device_id = %device_id, "Printer disconnected");
                shared.set_state(ConnectionState::Disconnected);
                shared.events.emit(PrinterEventKind::Disconnected {
                    device_id: Some(device_id.clone()),
                });
            }),
        );
    }

    /// Closes the session if any; safe to call repeatedly
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        let session = self.shared.session().take();
        if session.is_some() {
            if let Err(e) = self.transport.close_session().await {
                warn!(error = %e, "Closing printer session failed");
            }
        }
        let was = std::mem::replace(&mut *self.shared.state(), ConnectionState::Disconnected);
        if was != ConnectionState::Disconnected {
            self.shared.events.emit(PrinterEventKind::Disconnected {
                device_id: session.map(|s| s.device.id),
            });
        }
    }

    /// Encodes and prints one receipt; false on any failure
    pub async fn print_receipt(&self, receipt: &ReceiptData) -> bool {
        self.try_print_receipt(receipt).await.is_ok()
    }

    /// Like `print_receipt` but keeps the reason for a failure
    pub async fn try_print_receipt(&self, receipt: &ReceiptData) -> TransportResult<()> {
        let bytes = ReceiptEncoder::new(self.config.line_width)
            .with_qr_size(self.config.qr_size)
            .build_receipt(receipt);
        self.try_print_bytes(&bytes).await
    }

    /// Prints a short diagnostic page
    pub async fn print_test(&self) -> bool {
        let name = self
            .device()
            .map(|d| d.name)
            .unwrap_or_else(|| "Printer".to_string());
        let bytes = ReceiptEncoder::new(self.config.line_width).build_test_page(&name);
        self.print_bytes(&bytes).await
    }

    /// Sends an already encoded payload
    pub async fn print_bytes(&self, data: &[u8]) -> bool {
        self.try_print_bytes(data).await.is_ok()
    }

    async fn try_print_bytes(&self, data: &[u8]) -> TransportResult<()> {
        let result = self.write_chunked(data).await;
        if let Err(e) = &result {
            error!(error = %e, "Print failed");
            self.shared.events.emit(PrinterEventKind::Error {
                message: e.to_string(),
            });
        }
        result
    }

    /// Writes `data` chunk by chunk, strictly in order, pausing between
    /// chunks so the printer's buffer keeps up.
    #[instrument(skip(self, data), fields(len = data.len()))]
    async fn write_chunked(&self, data: &[u8]) -> TransportResult<()> {
        let _gate = self.write_gate.lock().await;

        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let endpoint = match self.shared.session().as_ref() {
            Some(session) => session.endpoint.clone(),
            None => return Err(TransportError::NotConnected),
        };

        let chunks = chunk_data(data, self.config.chunk_size);
        let delay = self.config.chunk_delay();
        self.shared.events.emit(PrinterEventKind::Printing {
            bytes: data.len(),
            chunks: chunks.len(),
        });

        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.transport.write(&endpoint, chunk).await?;
        }

        info!(chunks = chunks.len(), "Print job sent");
        self.shared
            .events
            .emit(PrinterEventKind::Printed { bytes: data.len() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeTransport;
    use crate::receipt::PaymentMethod;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn manager_with(fake: Arc<FakeTransport>, chunk_size: usize) -> (ConnectionManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = PrinterConfig::default().with_chunking(chunk_size, Duration::ZERO);
        (ConnectionManager::new(fake, store.clone(), config), store)
    }

    fn drain(rx: &mut broadcast::Receiver<PrinterEvent>) -> Vec<PrinterEventKind> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event.kind);
        }
        out
    }

    #[tokio::test]
    async fn test_connect_persists_device() {
        let fake = Arc::new(FakeTransport::new());
        let (manager, _store) = manager_with(fake.clone(), 20);
        let mut rx = manager.subscribe();

        assert!(manager.is_supported().await);
        assert!(manager.connect().await);
        assert_eq!(manager.state(), ConnectionState::Connected);

        let last = manager.last_device().unwrap();
        assert_eq!(last.id, "AA:BB:CC:DD:EE:01");
        assert_eq!(last.name, "MTP-II");
        assert!(manager.device().unwrap().connected);

        let events = drain(&mut rx);
        assert!(matches!(events.as_slice(), [PrinterEventKind::Connected { .. }]));
    }

    #[tokio::test]
    async fn test_connect_without_device() {
        let (manager, _) = manager_with(Arc::new(FakeTransport::empty()), 20);
        let mut rx = manager.subscribe();

        assert!(!manager.connect().await);
        assert_eq!(manager.state(), ConnectionState::Error);
        assert!(manager.last_device().is_none());
        assert!(matches!(drain(&mut rx).as_slice(), [PrinterEventKind::Error { .. }]));
    }

    #[tokio::test]
    async fn test_connect_session_failure() {
        let fake = Arc::new(FakeTransport::new());
        fake.set_fail_session(true);
        let (manager, _) = manager_with(fake, 20);
        assert!(!manager.connect().await);
        assert_eq!(manager.state(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn test_connect_without_writable_endpoint() {
        let fake = Arc::new(FakeTransport::new());
        fake.set_no_endpoints(true);
        let (manager, _) = manager_with(fake.clone(), 20);

        assert!(!manager.connect().await);
        assert_eq!(manager.state(), ConnectionState::Error);
        assert!(!fake.is_session_open());
    }

    #[tokio::test]
    async fn test_unsupported() {
        let (manager, _) = manager_with(Arc::new(FakeTransport::unsupported()), 20);
        assert!(!manager.is_supported().await);
        assert!(!manager.connect().await);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let fake = Arc::new(FakeTransport::new());
        let (manager, _) = manager_with(fake.clone(), 20);
        manager.connect().await;
        let mut rx = manager.subscribe();

        manager.disconnect().await;
        manager.disconnect().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.device().is_none());
        assert!(!fake.is_session_open());
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], PrinterEventKind::Disconnected { .. }));
    }

    #[tokio::test]
    async fn test_involuntary_disconnect() {
        let fake = Arc::new(FakeTransport::new());
        let (manager, _) = manager_with(fake.clone(), 20);
        manager.connect().await;
        let mut rx = manager.subscribe();

        fake.simulate_disconnect();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.device().is_none());
        assert_eq!(
            drain(&mut rx),
            vec![PrinterEventKind::Disconnected {
                device_id: Some("AA:BB:CC:DD:EE:01".into())
            }]
        );
    }

    #[tokio::test]
    async fn test_reconnect_uses_last_device() {
        let fake = Arc::new(FakeTransport::new());
        let (manager, _) = manager_with(fake.clone(), 20);
        assert!(!manager.reconnect().await);

        manager.connect().await;
        manager.disconnect().await;
        assert!(manager.reconnect().await);
        assert!(manager.is_connected());
        assert_eq!(fake.sessions_opened(), 2);

        manager.forget_device();
        assert!(manager.last_device().is_none());
    }

    #[tokio::test]
    async fn test_print_requires_connection() {
        let (manager, _) = manager_with(Arc::new(FakeTransport::new()), 20);
        let mut rx = manager.subscribe();
        assert!(!manager.print_receipt(&ReceiptData::new(100, PaymentMethod::Cash)).await);
        assert!(matches!(drain(&mut rx).as_slice(), [PrinterEventKind::Error { .. }]));
    }

    #[tokio::test]
    async fn test_print_chunks_in_order() {
        let fake = Arc::new(FakeTransport::new());
        let (manager, _) = manager_with(fake.clone(), 7);
        manager.connect().await;

        let data: Vec<u8> = (0..100u8).collect();
        assert!(manager.print_bytes(&data).await);

        let chunks = fake.chunks();
        assert_eq!(chunks.len(), 15);
        assert!(chunks[..14].iter().all(|c| c.len() == 7));
        assert_eq!(chunks[14].len(), 2);
        assert_eq!(fake.written(), data);
    }

    #[tokio::test]
    async fn test_print_events_order() {
        let fake = Arc::new(FakeTransport::new());
        let (manager, _) = manager_with(fake.clone(), 20);
        manager.connect().await;
        let mut rx = manager.subscribe();

        assert!(manager.print_test().await);
        let events = drain(&mut rx);
        assert!(matches!(
            events.as_slice(),
            [PrinterEventKind::Printing { .. }, PrinterEventKind::Printed { .. }]
        ));
    }

    #[tokio::test]
    async fn test_write_failure_keeps_connection() {
        let fake = Arc::new(FakeTransport::new());
        let (manager, _) = manager_with(fake.clone(), 20);
        manager.connect().await;
        fake.fail_after_writes(2);
        let mut rx = manager.subscribe();

        let result = manager
            .try_print_receipt(&ReceiptData::new(2500, PaymentMethod::Cash))
            .await;
        assert!(matches!(result, Err(TransportError::Write(_))));
        assert_eq!(fake.chunks().len(), 2);
        assert_eq!(manager.state(), ConnectionState::Connected);

        let events = drain(&mut rx);
        assert!(matches!(
            events.as_slice(),
            [PrinterEventKind::Printing { .. }, PrinterEventKind::Error { .. }]
        ));
    }

    #[tokio::test]
    async fn test_concurrent_prints_never_overlap() {
        let fake = Arc::new(FakeTransport::new());
        fake.set_write_delay(Duration::from_millis(1));
        let (manager, _) = manager_with(fake.clone(), 16);
        manager.connect().await;

        let a = vec![b'a'; 64];
        let b = vec![b'b'; 64];
        let (ra, rb) = tokio::join!(manager.print_bytes(&a), manager.print_bytes(&b));
        assert!(ra && rb);
        assert_eq!(fake.max_concurrent_writes(), 1);

        // each payload arrives contiguous
        let written = fake.written();
        let first = written[0];
        assert!(written[..64].iter().all(|&c| c == first));
        assert!(written[64..].iter().all(|&c| c != first));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_are_paced() {
        let fake = Arc::new(FakeTransport::new());
        let store = Arc::new(MemoryStore::new());
        let delay = Duration::from_millis(20);
        let config = PrinterConfig::default().with_chunking(10, delay);
        let manager = ConnectionManager::new(fake.clone(), store, config);
        manager.connect().await;

        let start = tokio::time::Instant::now();
        assert!(manager.print_bytes(&[0u8; 50]).await);
        let elapsed = start.elapsed();
        assert_eq!(fake.chunks().len(), 5);
        assert!(elapsed >= delay * 4, "{elapsed:?}");
        assert!(elapsed < delay * 5, "{elapsed:?}");

        // a single chunk goes out without waiting
        let start = tokio::time::Instant::now();
        assert!(manager.print_bytes(&[1u8; 10]).await);
        assert!(start.elapsed() < delay);
    }

    #[tokio::test]
    async fn test_link_lost_while_session_comes_up() {
        let fake = Arc::new(FakeTransport::new());
        fake.set_disconnect_on_watch(true);
        let (manager, _) = manager_with(fake, 20);

        assert!(!manager.connect().await);
        assert_eq!(manager.state(), ConnectionState::Error);
        assert!(manager.device().is_none());
    }

    #[tokio::test]
    async fn test_failed_reconnect_drops_previous_session() {
        let fake = Arc::new(FakeTransport::new());
        let (manager, _) = manager_with(fake.clone(), 20);
        assert!(manager.connect().await);

        fake.set_fail_session(true);
        assert!(!manager.connect().await);

        assert_eq!(manager.state(), ConnectionState::Error);
        assert!(manager.device().is_none());
        assert!(!fake.is_session_open());
    }
}
