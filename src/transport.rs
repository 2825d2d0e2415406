//! Wireless link abstraction.
//!
//! `Transport` is the seam between the connection manager and the radio.
//! `ble::BleTransport` drives real hardware through btleplug and
//! `fake::FakeTransport` is a deterministic stand-in for tests.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransportResult;

/// Services advertised by common ESC/POS BLE printers
pub const PRINTER_SERVICES: [Uuid; 5] = [
    // 0x18F0, most generic 58mm/80mm printers
    Uuid::from_u128(0x000018f0_0000_1000_8000_00805f9b34fb),
    Uuid::from_u128(0xe7810a71_73ae_499d_8c15_faa9aef0c3f2),
    // ISSC transparent UART
    Uuid::from_u128(0x49535343_fe7d_4ae5_8fa9_9fafd205e455),
    Uuid::from_u128(0x0000ff00_0000_1000_8000_00805f9b34fb),
    Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb),
];

/// Advertised-name prefixes of known compatible printers
pub const PRINTER_NAME_PREFIXES: [&str; 8] = [
    "Printer",
    "BlueTooth Printer",
    "MTP",
    "PT-",
    "RPP",
    "InnerPrinter",
    "POS",
    "MPT",
];

static DEFAULT_FILTER: Lazy<DeviceFilter> = Lazy::new(|| DeviceFilter {
    services: PRINTER_SERVICES.to_vec(),
    name_prefixes: PRINTER_NAME_PREFIXES.iter().map(|p| p.to_string()).collect(),
});

/// Allow-list deciding which advertising devices may be offered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFilter {
    pub services: Vec<Uuid>,
    pub name_prefixes: Vec<String>,
}

impl DeviceFilter {
    /// A device matches on any listed service or any name prefix
    pub fn matches(&self, name: Option<&str>, services: &[Uuid]) -> bool {
        if services.iter().any(|s| self.services.contains(s)) {
            return true;
        }
        match name {
            Some(name) => self.name_prefixes.iter().any(|p| name.starts_with(p.as_str())),
            None => false,
        }
    }
}

impl Default for DeviceFilter {
    fn default() -> Self {
        DEFAULT_FILTER.clone()
    }
}

/// A device found by discovery, before any session exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub id: String,
    pub name: Option<String>,
}

impl DiscoveredDevice {
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.clone())
    }
}

/// Printer as seen by callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterDevice {
    pub id: String,
    pub name: String,
    pub connected: bool,
}

/// A writable characteristic on the open session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub uuid: Uuid,
    pub service: Uuid,
    /// Prefer write-without-response when the characteristic allows it
    pub without_response: bool,
}

/// Invoked once when the radio reports the device gone
pub type DisconnectCallback = Box<dyn Fn() + Send + Sync>;

/// Low-level link to a GATT printer.
///
/// At most one session is open at a time. Callers serialize `write`s;
/// implementations never need to handle concurrent writes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the host has a usable radio
    async fn is_supported(&self) -> bool;

    /// Finds a printer matching `filter`
    async fn discover(&self, filter: &DeviceFilter) -> TransportResult<DiscoveredDevice>;

    /// Resolves a previously seen device id without a full discovery
    async fn retrieve(&self, device_id: &str) -> TransportResult<DiscoveredDevice>;

    /// Connects and enumerates services
    async fn open_session(&self, device: &DiscoveredDevice) -> TransportResult<()>;

    /// Writable characteristics of the open session, in discovery order
    async fn list_writable_endpoints(&self) -> TransportResult<Vec<Endpoint>>;

    /// Writes one chunk and waits for the radio to accept it
    async fn write(&self, endpoint: &Endpoint, data: &[u8]) -> TransportResult<()>;

    /// Registers `callback` for an involuntary disconnect of `device`
    fn on_disconnect(&self, device: &DiscoveredDevice, callback: DisconnectCallback);

    /// Tears the session down; a no-op when none is open
    async fn close_session(&self) -> TransportResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_by_service() {
        let filter = DeviceFilter::default();
        assert!(filter.matches(None, &[PRINTER_SERVICES[2]]));
        assert!(!filter.matches(None, &[Uuid::nil()]));
    }

    #[test]
    fn test_filter_by_name_prefix() {
        let filter = DeviceFilter::default();
        assert!(filter.matches(Some("MTP-II"), &[]));
        assert!(filter.matches(Some("BlueTooth Printer"), &[]));
        assert!(!filter.matches(Some("Headphones"), &[]));
    }

    #[test]
    fn test_filter_json() {
        let filter: DeviceFilter = serde_json::from_str(
            r#"{"services":["000018f0-0000-1000-8000-00805f9b34fb"],"namePrefixes":["XP-"]}"#,
        )
        .unwrap();
        assert!(filter.matches(Some("XP-58"), &[]));
        assert!(filter.matches(None, &[PRINTER_SERVICES[0]]));
    }
}
