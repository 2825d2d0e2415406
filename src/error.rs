//! Error types for the printing subsystem

use thiserror::Error;

/// Errors raised by the wireless link and the connection manager.
///
/// These never cross the public printing surface: `ConnectionManager`
/// turns them into a `false` return plus a `PrinterEvent::Error`.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No usable wireless adapter on this host
    #[error("Bluetooth is not supported on this host")]
    Unsupported,

    /// Discovery finished without a compatible printer
    #[error("No compatible printer found")]
    NoDevice,

    /// A previously known device could not be found again
    #[error("Printer {0} is no longer reachable")]
    UnknownDevice(String),

    /// Opening the session (GATT connect / service discovery) failed
    #[error("Session failed: {0}")]
    Session(String),

    /// The device exposes no characteristic we can write to
    #[error("Printer exposes no writable characteristic")]
    NoWritableEndpoint,

    /// An operation needed a live connection
    #[error("Printer is not connected")]
    NotConnected,

    /// A chunk write was rejected or the link dropped mid-stream
    #[error("Write failed: {0}")]
    Write(String),

    #[cfg(feature = "ble")]
    #[error("Bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),
}

/// Errors from the durable key-value store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the durable print queue
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Print job not found: {0}")]
    JobNotFound(String),
}

/// Errors loading a `PrinterConfig`
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type QueueResult<T> = Result<T, QueueError>;
