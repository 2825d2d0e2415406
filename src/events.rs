//! Printer lifecycle events.
//!
//! A single broadcast channel carries every connection, print and queue
//! change. Subscribers get their own receiver; dropping it unsubscribes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::transport::PrinterDevice;

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PrinterEventKind {
    Connected { device: PrinterDevice },
    Disconnected { device_id: Option<String> },
    Printing { bytes: usize, chunks: usize },
    Printed { bytes: usize },
    Error { message: String },
    QueueUpdated { pending: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrinterEvent {
    #[serde(flatten)]
    pub kind: PrinterEventKind,
    pub at: DateTime<Utc>,
}

impl PrinterEvent {
    pub fn new(kind: PrinterEventKind) -> Self {
        Self {
            kind,
            at: Utc::now(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.kind, PrinterEventKind::Connected { .. })
    }
}

/// One producer side, many consumers.
///
/// Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PrinterEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.tx.subscribe()
    }

    /// Sends to every live subscriber; having none is fine.
    pub fn emit(&self, kind: PrinterEventKind) {
        tracing::debug!(event = ?kind, "printer event");
        let _ = self.tx.send(PrinterEvent::new(kind));
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
