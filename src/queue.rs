//! Durable print queue.
//!
//! Receipts that could not be printed are persisted here and replayed
//! when a printer connects. Every mutation is a read-modify-write of the
//! stored list, so a restart never loses a pending job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};
use crate::events::{PrinterEvent, PrinterEventKind};
use crate::printer::ConnectionManager;
use crate::receipt::ReceiptData;
use crate::store::{self, QUEUE_KEY, Store};

/// A receipt waiting for a printer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintJob {
    pub id: String,
    pub receipt: ReceiptData,
    pub created_at: DateTime<Utc>,
    pub retries: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Fields `update_job` may change
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub retries: Option<u32>,
    pub last_error: Option<String>,
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub success: usize,
    pub failed: usize,
}

impl DrainReport {
    pub fn total(&self) -> usize {
        self.success + self.failed
    }
}

/// Clears the draining flag however the drain ends
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PrintQueue {
    manager: Arc<ConnectionManager>,
    store: Arc<dyn Store>,
    /// Serializes read-modify-write of the stored list
    io_lock: Mutex<()>,
    draining: AtomicBool,
}

impl PrintQueue {
    pub fn new(manager: Arc<ConnectionManager>, store: Arc<dyn Store>) -> Self {
        Self {
            manager,
            store,
            io_lock: Mutex::new(()),
            draining: AtomicBool::new(false),
        }
    }

    fn load(&self) -> QueueResult<Vec<PrintJob>> {
        Ok(store::load_json(self.store.as_ref(), QUEUE_KEY)?.unwrap_or_default())
    }

    /// Applies `f` to the stored list, persists it, and announces the new count
    fn mutate<T>(&self, f: impl FnOnce(&mut Vec<PrintJob>) -> QueueResult<T>) -> QueueResult<T> {
        let (value, pending) = {
            let _io = self.io_lock.lock().unwrap_or_else(|e| e.into_inner());
            let mut jobs = self.load()?;
            let value = f(&mut jobs)?;
            store::save_json(self.store.as_ref(), QUEUE_KEY, &jobs)?;
            (value, jobs.len())
        };
        self.manager
            .events()
            .emit(PrinterEventKind::QueueUpdated { pending });
        Ok(value)
    }

    /// Persists a new job and returns its id
    #[instrument(skip(self, receipt), fields(total = receipt.total))]
    pub fn enqueue(&self, receipt: ReceiptData) -> QueueResult<String> {
        let job = PrintJob {
            id: Uuid::new_v4().to_string(),
            receipt,
            created_at: Utc::now(),
            retries: 0,
            last_error: None,
        };
        let id = job.id.clone();
        self.mutate(|jobs| {
            jobs.push(job);
            Ok(())
        })?;
        info!(job_id = %id, "Receipt queued");
        Ok(id)
    }

    /// Removes a job; returns whether it was present
    pub fn dequeue(&self, job_id: &str) -> QueueResult<bool> {
        self.mutate(|jobs| {
            let before = jobs.len();
            jobs.retain(|j| j.id != job_id);
            Ok(jobs.len() != before)
        })
    }

    pub fn update_job(&self, job_id: &str, update: JobUpdate) -> QueueResult<()> {
        self.mutate(|jobs| {
            let job = jobs
                .iter_mut()
                .find(|j| j.id == job_id)
                .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
            if let Some(retries) = update.retries {
                job.retries = retries;
            }
            if update.last_error.is_some() {
                job.last_error = update.last_error;
            }
            Ok(())
        })
    }

    pub fn count(&self) -> QueueResult<usize> {
        Ok(self.load()?.len())
    }

    /// Pending jobs, oldest first
    pub fn jobs(&self) -> QueueResult<Vec<PrintJob>> {
        self.load()
    }

    pub fn clear(&self) -> QueueResult<()> {
        self.mutate(|jobs| {
            jobs.clear();
            Ok(())
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.manager.subscribe()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Tries to print every pending job, oldest first.
    ///
    /// Returns `{0, 0}` right away when another drain is running or no
    /// printer is connected. A job that fails its last allowed attempt is
    /// dropped and counted as failed. Losing the link stops the pass; the
    /// job in flight keeps its retry count.
    #[instrument(skip(self))]
    pub async fn process_queue(&self) -> DrainReport {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Drain already running");
            return DrainReport::default();
        }
        let _guard = DrainGuard(&self.draining);

        if !self.manager.is_connected() {
            debug!("No printer connected, drain deferred");
            return DrainReport::default();
        }

        let jobs = match self.load() {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Cannot read print queue");
                return DrainReport::default();
            }
        };

        let max_retries = self.manager.config().max_retries;
        let delay = self.manager.config().job_delay();
        let mut report = DrainReport::default();
        let mut attempted = false;

        for job in jobs {
            if job.retries >= max_retries {
                self.drop_job(&job.id, job.last_error.as_deref());
                report.failed += 1;
                continue;
            }

            // the rest waits for the next connect rather than burning retries
            if !self.manager.is_connected() {
                debug!("Printer gone, drain deferred");
                break;
            }

            if attempted && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempted = true;

            match self.manager.try_print_receipt(&job.receipt).await {
                Ok(()) => {
                    self.forget(&job.id);
                    report.success += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    if !self.manager.is_connected() {
                        debug!(job_id = %job.id, "Link lost mid-print, attempt not counted");
                        break;
                    }
                    let retries = job.retries + 1;
                    if retries >= max_retries {
                        self.drop_job(&job.id, Some(&e.to_string()));
                        continue;
                    }
                    let update = JobUpdate {
                        retries: Some(retries),
                        last_error: Some(e.to_string()),
                    };
                    if let Err(e) = self.update_job(&job.id, update) {
                        error!(job_id = %job.id, error = %e, "Cannot record failed attempt");
                    }
                }
            }
        }

        info!(success = report.success, failed = report.failed, "Queue drained");
        report
    }

    /// Gives up on a job, keeping its last error visible to the operator
    fn drop_job(&self, job_id: &str, last_error: Option<&str>) {
        let last_error = last_error.unwrap_or("unknown error");
        warn!(job_id = %job_id, last_error, "Dropping job after max retries");
        self.forget(job_id);
        self.manager.events().emit(PrinterEventKind::Error {
            message: format!("Receipt {job_id} dropped after retries: {last_error}"),
        });
    }

    fn forget(&self, job_id: &str) {
        if let Err(e) = self.dequeue(job_id) {
            error!(job_id = %job_id, error = %e, "Cannot remove job from queue");
        }
    }

    /// Drains the queue every time a printer connects.
    ///
    /// Stops when the returned handle is stopped or dropped.
    pub fn setup_auto_process(self: &Arc<Self>) -> AutoProcess {
        let mut rx = self.manager.subscribe();
        let queue = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.is_connected() => {
                        let Some(queue) = queue.upgrade() else {
                            break;
                        };
                        let report = queue.process_queue().await;
                        debug!(?report, "Auto drain finished");
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // a connect may be among the lost events
                        warn!(skipped, "Auto drain missed printer events");
                        let Some(queue) = queue.upgrade() else {
                            break;
                        };
                        let report = queue.process_queue().await;
                        debug!(?report, "Catch-up drain finished");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        AutoProcess { task }
    }
}

/// Subscription created by `setup_auto_process`
pub struct AutoProcess {
    task: JoinHandle<()>,
}

impl AutoProcess {
    /// Unsubscribes; same as dropping the handle
    pub fn stop(self) {}

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for AutoProcess {
    fn drop(&mut self) {
        self.task.abort();
    }
}
