//! Printer subsystem configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::transport::DeviceFilter;

/// Tunables for encoding, pacing, retries and discovery.
///
/// Every field has a default, so a config file only lists what it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PrinterConfig {
    /// Max bytes per write; 20 fits the default BLE MTU
    pub chunk_size: usize,
    /// Pause between chunks so the printer buffer drains
    pub chunk_delay_ms: u64,
    /// Characters per receipt line
    pub line_width: usize,
    /// QR module size in dots
    pub qr_size: u8,
    /// Pause between jobs within one queue drain
    pub job_delay_ms: u64,
    /// Attempts before a queued job is dropped
    pub max_retries: u32,
    pub scan_timeout_ms: u64,
    pub event_capacity: usize,
    pub filter: DeviceFilter,
}

impl PrinterConfig {
    /// Loads a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn with_chunking(mut self, chunk_size: usize, delay: Duration) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_job_delay(mut self, delay: Duration) -> Self {
        self.job_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn job_delay(&self) -> Duration {
        Duration::from_millis(self.job_delay_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 20,
            chunk_delay_ms: 20,
            line_width: 32,
            qr_size: 6,
            job_delay_ms: 1000,
            max_retries: 3,
            scan_timeout_ms: 5000,
            event_capacity: 64,
            filter: DeviceFilter::default(),
        }
    }
}
