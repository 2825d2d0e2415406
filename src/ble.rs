//! BLE transport backed by btleplug.
//!
//! Scans for advertising printers, opens a GATT session and writes to a
//! characteristic that accepts writes. Disconnects are picked up from the
//! adapter's event stream.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{TransportError, TransportResult};
use crate::transport::{DeviceFilter, DisconnectCallback, DiscoveredDevice, Endpoint, Transport};

pub struct BleTransport {
    adapter: Option<Adapter>,
    scan_timeout: Duration,
    peripheral: tokio::sync::Mutex<Option<Peripheral>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl BleTransport {
    /// Grabs the first Bluetooth adapter.
    ///
    /// Never fails: without an adapter `is_supported` reports false and
    /// every other call returns `TransportError::Unsupported`.
    pub async fn new(scan_timeout: Duration) -> Self {
        let adapter = match first_adapter().await {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(error = %e, "Bluetooth unavailable");
                None
            }
        };
        Self {
            adapter,
            scan_timeout,
            peripheral: tokio::sync::Mutex::new(None),
            watcher: Mutex::new(None),
        }
    }

    fn adapter(&self) -> TransportResult<&Adapter> {
        self.adapter.as_ref().ok_or(TransportError::Unsupported)
    }

    fn stop_watcher(&self) {
        let handle = self.watcher.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    async fn characteristic(&self, endpoint: &Endpoint) -> TransportResult<(Peripheral, Characteristic)> {
        let guard = self.peripheral.lock().await;
        let peripheral = guard.as_ref().ok_or(TransportError::NotConnected)?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == endpoint.uuid && c.service_uuid == endpoint.service)
            .ok_or(TransportError::NoWritableEndpoint)?;
        Ok((peripheral.clone(), characteristic))
    }
}

async fn first_adapter() -> Result<Option<Adapter>, btleplug::Error> {
    let manager = Manager::new().await?;
    Ok(manager.adapters().await?.into_iter().next())
}

/// Id and name of `peripheral` when it passes `filter`
async fn matching(peripheral: &Peripheral, filter: &DeviceFilter) -> Option<DiscoveredDevice> {
    let props = peripheral.properties().await.ok().flatten()?;
    if !filter.matches(props.local_name.as_deref(), &props.services) {
        return None;
    }
    Some(DiscoveredDevice {
        id: peripheral.id().to_string(),
        name: props.local_name,
    })
}

async fn find_by_id(adapter: &Adapter, device_id: &str) -> TransportResult<Option<Peripheral>> {
    Ok(adapter
        .peripherals()
        .await?
        .into_iter()
        .find(|p| p.id().to_string() == device_id))
}

#[async_trait]
impl Transport for BleTransport {
    async fn is_supported(&self) -> bool {
        self.adapter.is_some()
    }

    #[instrument(skip(self, filter))]
    async fn discover(&self, filter: &DeviceFilter) -> TransportResult<DiscoveredDevice> {
        let adapter = self.adapter()?;

        // devices the adapter already knows about need no scan
        for peripheral in adapter.peripherals().await? {
            if let Some(device) = matching(&peripheral, filter).await {
                return Ok(device);
            }
        }

        let mut events = adapter.events().await?;
        adapter.start_scan(ScanFilter::default()).await?;
        let found = tokio::time::timeout(self.scan_timeout, async {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                if let Ok(peripheral) = adapter.peripheral(&id).await {
                    if let Some(device) = matching(&peripheral, filter).await {
                        return Some(device);
                    }
                }
            }
            None
        })
        .await
        .ok()
        .flatten();
        if let Err(e) = adapter.stop_scan().await {
            debug!(error = %e, "stop_scan failed");
        }

        match found {
            Some(device) => {
                info!(id = %device.id, name = ?device.name, "Printer found");
                Ok(device)
            }
            None => Err(TransportError::NoDevice),
        }
    }

    async fn retrieve(&self, device_id: &str) -> TransportResult<DiscoveredDevice> {
        let adapter = self.adapter()?;
        let mut peripheral = find_by_id(adapter, device_id).await?;

        if peripheral.is_none() {
            adapter.start_scan(ScanFilter::default()).await?;
            tokio::time::sleep(self.scan_timeout).await;
            let _ = adapter.stop_scan().await;
            peripheral = find_by_id(adapter, device_id).await?;
        }

        let peripheral =
            peripheral.ok_or_else(|| TransportError::UnknownDevice(device_id.to_string()))?;
        let name = peripheral
            .properties()
            .await?
            .and_then(|p| p.local_name);
        Ok(DiscoveredDevice {
            id: device_id.to_string(),
            name,
        })
    }

    #[instrument(skip(self), fields(id = %device.id))]
    async fn open_session(&self, device: &DiscoveredDevice) -> TransportResult<()> {
        let adapter = self.adapter()?;
        let peripheral = find_by_id(adapter, &device.id)
            .await?
            .ok_or_else(|| TransportError::UnknownDevice(device.id.clone()))?;

        if !peripheral.is_connected().await? {
            peripheral
                .connect()
                .await
                .map_err(|e| TransportError::Session(e.to_string()))?;
        }
        peripheral
            .discover_services()
            .await
            .map_err(|e| TransportError::Session(e.to_string()))?;

        *self.peripheral.lock().await = Some(peripheral);
        Ok(())
    }

    async fn list_writable_endpoints(&self) -> TransportResult<Vec<Endpoint>> {
        let guard = self.peripheral.lock().await;
        let peripheral = guard.as_ref().ok_or(TransportError::NotConnected)?;
        let writable = CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE;
        Ok(peripheral
            .characteristics()
            .into_iter()
            .filter(|c| c.properties.intersects(writable))
            .map(|c| Endpoint {
                uuid: c.uuid,
                service: c.service_uuid,
                without_response: c.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
            })
            .collect())
    }

    async fn write(&self, endpoint: &Endpoint, data: &[u8]) -> TransportResult<()> {
        let (peripheral, characteristic) = self.characteristic(endpoint).await?;
        let write_type = if endpoint.without_response {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };
        peripheral
            .write(&characteristic, data, write_type)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    fn on_disconnect(&self, device: &DiscoveredDevice, callback: DisconnectCallback) {
        let Some(adapter) = self.adapter.clone() else {
            return;
        };
        self.stop_watcher();
        let device_id = device.id.clone();
        let handle = tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    warn!(error = %e, "Cannot watch printer disconnects");
                    return;
                }
            };
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id.to_string() == device_id {
                        callback();
                        break;
                    }
                }
            }
        });
        *self.watcher.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    async fn close_session(&self) -> TransportResult<()> {
        self.stop_watcher();
        let peripheral = self.peripheral.lock().await.take();
        if let Some(peripheral) = peripheral {
            peripheral.disconnect().await?;
        }
        Ok(())
    }
}
