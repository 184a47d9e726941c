//! Bluetooth functionality for the explorer
//! This module handles all bluetooth operations including scanning, the
//! device registry, shared connections and notifications.

pub mod bluest_backend;
pub mod connection;
pub mod constants;
pub mod device;
pub mod error;
pub mod manager;
pub mod notification;
pub mod platform;
pub mod scanner;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

// Re-export types that should be publicly accessible
pub use bluest_backend::{BluestConnection, BluestPlatform};
pub use connection::{ConnectionLease, LinkState, SharedConnection};
pub use error::{BleError, DecodeError};
pub use manager::{BluetoothController, ControllerOptions};
pub use notification::{NotificationHandler, NotificationSubscription};
pub use platform::{BleConnection, BlePlatform};
pub use scanner::BluetoothScanner;
pub use types::*;
