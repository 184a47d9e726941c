//! Error taxonomy for the BLE session controller.

use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::types::DeviceId;

/// Errors surfaced by the controller and the platform backends.
///
/// The type is `Clone` because a single connection failure is replayed to
/// every consumer attached to the shared connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BleError {
    /// The underlying scan stream could not be started or errored.
    #[error("scan failed: {0}")]
    ScanFailure(String),

    /// Establishing the platform connection failed.
    #[error("connection to {device} failed: {reason}")]
    ConnectionFailure { device: DeviceId, reason: String },

    /// An established link dropped underneath its consumers.
    #[error("connection to {0} was lost")]
    ConnectionLost(DeviceId),

    /// Service discovery failed on an established connection.
    #[error("service discovery failed: {0}")]
    DiscoveryFailure(String),

    #[error("reading characteristic {uuid} failed: {reason}")]
    ReadFailure { uuid: Uuid, reason: String },

    #[error("enabling notifications on {uuid} failed: {reason}")]
    NotificationSetupFailure { uuid: Uuid, reason: String },

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    /// The device was never observed by the scanner.
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("bluetooth adapter unavailable")]
    AdapterUnavailable,

    /// The shared connection was released before a value was produced.
    #[error("connection released")]
    Released,
}

/// Failure of a manufacturer record decoder. Never surfaced past the
/// scan record renderer, which falls back to hex instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("unsupported record format {0:#04x}")]
    UnsupportedFormat(u8),
}
