//! Constants used throughout the explorer
//! UUIDs, assigned numbers and default tuning values.

use uuid::Uuid;

/// The Bluetooth base UUID; 16- and 32-bit UUIDs are aliases onto it.
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(0x00000000_0000_1000_8000_00805f9b34fb);

/// Assigned company identifiers with a registered decoder
pub const COMPANY_ID_APPLE: u16 = 0x004C;
pub const COMPANY_ID_RUUVI: u16 = 0x0499;

/// Advertisement data types
pub const AD_TYPE_FLAGS: u8 = 0x01;
pub const AD_TYPE_UUID16_INCOMPLETE: u8 = 0x02;
pub const AD_TYPE_UUID16_COMPLETE: u8 = 0x03;
pub const AD_TYPE_UUID32_INCOMPLETE: u8 = 0x04;
pub const AD_TYPE_UUID32_COMPLETE: u8 = 0x05;
pub const AD_TYPE_UUID128_INCOMPLETE: u8 = 0x06;
pub const AD_TYPE_UUID128_COMPLETE: u8 = 0x07;
pub const AD_TYPE_SHORT_NAME: u8 = 0x08;
pub const AD_TYPE_COMPLETE_NAME: u8 = 0x09;
pub const AD_TYPE_TX_POWER: u8 = 0x0A;
pub const AD_TYPE_SERVICE_DATA_UUID16: u8 = 0x16;
pub const AD_TYPE_SERVICE_DATA_UUID32: u8 = 0x20;
pub const AD_TYPE_SERVICE_DATA_UUID128: u8 = 0x21;
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// Interval between link liveness checks, in milliseconds
pub const DEFAULT_LINK_POLL_INTERVAL_MS: u64 = 2000;

/// Timeout for user-facing Bluetooth operations in seconds
pub const BLUETOOTH_OPERATION_TIMEOUT_SECS: u64 = 10;

/// Scan duration used by the CLI when none is given, in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 10;

/// Buffer between backend forwarding tasks and their streams
pub const FORWARD_CHANNEL_CAPACITY: usize = 64;
