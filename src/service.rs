//! Print orchestration: print now, or queue for later.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::PrinterConfig;
use crate::error::QueueResult;
use crate::printer::ConnectionManager;
use crate::queue::{AutoProcess, PrintQueue};
use crate::receipt::ReceiptData;
use crate::store::Store;
use crate::transport::Transport;

/// Where a submitted receipt ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PrintOutcome {
    Printed,
    Queued { job_id: String },
}

/// Entry point for the rest of the application.
///
/// Wires one `ConnectionManager` and one `PrintQueue` over the same
/// transport, store and event bus.
pub struct PrintService {
    manager: Arc<ConnectionManager>,
    queue: Arc<PrintQueue>,
}

impl PrintService {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn Store>, config: PrinterConfig) -> Self {
        let manager = Arc::new(ConnectionManager::new(transport, store.clone(), config));
        let queue = Arc::new(PrintQueue::new(manager.clone(), store));
        Self { manager, queue }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn queue(&self) -> &Arc<PrintQueue> {
        &self.queue
    }

    /// Starts draining the queue whenever a printer connects
    pub fn setup_auto_process(&self) -> AutoProcess {
        self.queue.setup_auto_process()
    }

    /// Prints `receipt` if a printer is connected, otherwise (or if the
    /// attempt fails) persists it in the queue.
    ///
    /// Only a failure of the durable store itself is returned as an error.
    #[instrument(skip(self, receipt), fields(total = receipt.total))]
    pub async fn print(&self, receipt: ReceiptData) -> QueueResult<PrintOutcome> {
        if self.manager.is_connected() {
            match self.manager.try_print_receipt(&receipt).await {
                Ok(()) => return Ok(PrintOutcome::Printed),
                Err(e) => warn!(error = %e, "Direct print failed, queueing receipt"),
            }
        }
        let job_id = self.queue.enqueue(receipt)?;
        info!(job_id = %job_id, "Receipt will print when a printer is available");
        Ok(PrintOutcome::Queued { job_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeTransport;
    use crate::receipt::PaymentMethod;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn service(fake: Arc<FakeTransport>) -> PrintService {
        let config = PrinterConfig::default()
            .with_chunking(32, Duration::ZERO)
            .with_job_delay(Duration::ZERO);
        PrintService::new(fake, Arc::new(MemoryStore::new()), config)
    }

    #[tokio::test]
    async fn test_failed_direct_print_is_queued() {
        let fake = Arc::new(FakeTransport::new());
        let service = service(fake.clone());
        assert!(service.manager().connect().await);
        fake.set_fail_writes(true);

        let outcome = service.print(ReceiptData::new(700, PaymentMethod::Card)).await.unwrap();
        assert!(matches!(outcome, PrintOutcome::Queued { .. }));
        let jobs = service.queue().jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].retries, 0);
    }

    #[tokio::test]
    async fn test_disconnect_mid_print_is_queued() {
        let fake = Arc::new(FakeTransport::new());
        fake.set_write_delay(Duration::from_millis(2));
        let service = service(fake.clone());
        service.manager().connect().await;

        let unplug = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            fake.simulate_disconnect();
        };
        let (outcome, ()) = tokio::join!(
            service.print(ReceiptData::new(700, PaymentMethod::Cash)),
            unplug
        );
        assert!(matches!(outcome.unwrap(), PrintOutcome::Queued { .. }));
        assert!(!service.manager().is_connected());
        assert_eq!(service.queue().count().unwrap(), 1);
    }

    #[test]
    fn test_outcome_json() {
        let json = serde_json::to_value(PrintOutcome::Queued { job_id: "j1".into() }).unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["job_id"], "j1");
    }
}
