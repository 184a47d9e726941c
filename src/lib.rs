//! BLE explorer library
//! Scanning, shared connections and GATT exploration of Bluetooth Low Energy
//! peripherals.

// Module declarations
pub mod cli;
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
