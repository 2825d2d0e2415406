//! receipt-printer: print receipts to BLE thermal printers, and never lose one.
//!
//! Main modules:
//! - encoder: receipt layout to ESC/POS bytes
//! - printer: connection manager, chunked writes, lifecycle events
//! - queue: durable queue replayed when a printer connects
//! - service: print now or queue for later
//! - transport: link trait, with `ble` (btleplug) and `fake` backends
//!
//! ## Example
//!
//! ```ignore
//! use receipt_printer::{BleTransport, FileStore, PrintService, PrinterConfig};
//!
//! let config = PrinterConfig::default();
//! let transport = Arc::new(BleTransport::new(config.scan_timeout()).await);
//! let store = Arc::new(FileStore::open("state")?);
//! let service = PrintService::new(transport, store, config);
//! let _auto = service.setup_auto_process();
//!
//! service.manager().connect().await;
//! service.print(receipt).await?;
//! ```

pub mod adapter;
#[cfg(feature = "ble")]
pub mod ble;
pub mod config;
pub mod encoder;
pub mod error;
pub mod events;
pub mod fake;
pub mod printer;
pub mod protocol;
pub mod queue;
pub mod receipt;
pub mod service;
pub mod store;
pub mod transport;

/// BLE API: real radio backend
#[cfg(feature = "ble")]
pub use ble::BleTransport;
pub use config::PrinterConfig;
pub use encoder::{ReceiptEncoder, format_amount};
pub use error::{ConfigError, QueueError, StoreError, TransportError};
pub use events::{EventBus, PrinterEvent, PrinterEventKind};
pub use printer::{ConnectionManager, ConnectionState, LastDevice};
pub use protocol::Alignment;
pub use queue::{AutoProcess, DrainReport, JobUpdate, PrintJob, PrintQueue};
pub use receipt::{LineItem, PaymentMethod, ReceiptData};
pub use service::{PrintOutcome, PrintService};
pub use store::{FileStore, MemoryStore, Store};
pub use transport::{DeviceFilter, DiscoveredDevice, Endpoint, PrinterDevice, Transport};
