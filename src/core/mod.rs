//! Core functionality for the explorer
//! This module contains the BLE controller, advertisement decoding and the
//! description helpers.

pub mod bluetooth;
pub mod describe;
pub mod scan_record;

// Re-export commonly used types
pub use bluetooth::{BleError, BluetoothController, ControllerOptions};
pub use scan_record::ManufacturerParserRegistry;
