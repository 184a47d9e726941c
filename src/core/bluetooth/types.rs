//! Defines shared data structures for the Bluetooth module.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, stable handle for a physical peripheral.
///
/// On most platforms this is the MAC address; on macOS it is a
/// platform-assigned identifier. Equality is by handle only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl FromStr for DeviceId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

/// Bonding state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BondState {
    #[default]
    None,
    Bonding,
    Bonded,
    Unknown,
}

/// Transport family of a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceType {
    Classic,
    Dual,
    Le,
    #[default]
    Unknown,
}

/// A single advertisement observation. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub device_id: DeviceId,
    /// Advertised or cached device name, if any
    pub name: Option<String>,
    /// Signal strength in dBm
    pub rssi: i16,
    /// Raw advertisement payload (sequence of AD structures)
    pub payload: Vec<u8>,
    pub bond_state: BondState,
    pub device_type: DeviceType,
    pub last_seen: DateTime<Utc>,
}

impl ScanResult {
    /// Creates a scan result stamped with the current time.
    pub fn new(device_id: DeviceId, name: Option<String>, rssi: i16, payload: Vec<u8>) -> Self {
        Self {
            device_id,
            name,
            rssi,
            payload,
            bond_state: BondState::None,
            device_type: DeviceType::Le,
            last_seen: Utc::now(),
        }
    }
}

/// Process-wide adapter state that gates scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterState {
    Ready,
    NotEnabled,
    NotAvailable,
    PermissionMissing,
    ServiceDisabled,
}

impl AdapterState {
    /// Scanning is only meaningful when the adapter is fully ready.
    pub fn should_scan(self) -> bool {
        matches!(self, AdapterState::Ready)
    }
}

/// Link state of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// How notifications are enabled on the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NotificationSetupMode {
    /// Write the client characteristic configuration descriptor
    #[default]
    Default,
    /// Only enable local notification delivery, for peripherals without a CCCD
    Compat,
    /// Enable delivery before writing the descriptor
    QuickSetup,
}

/// Radio duty cycle used while scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    LowPower,
    #[default]
    Balanced,
    LowLatency,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSettings {
    pub mode: ScanMode,
    /// Restrict results to peripherals advertising one of these services
    pub service_filter: Vec<Uuid>,
}

/// Characteristic property bits from the Bluetooth Core attribute table.
pub mod property {
    pub const BROADCAST: u8 = 0x01;
    pub const READ: u8 = 0x02;
    pub const WRITE_NO_RESPONSE: u8 = 0x04;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
    pub const INDICATE: u8 = 0x20;
    pub const SIGNED_WRITE: u8 = 0x40;
    pub const EXTENDED_PROPS: u8 = 0x80;
}

/// Attribute permission bits.
pub mod permission {
    pub const READ: u16 = 0x01;
    pub const READ_ENCRYPTED: u16 = 0x02;
    pub const READ_ENCRYPTED_MITM: u16 = 0x04;
    pub const WRITE: u16 = 0x10;
    pub const WRITE_ENCRYPTED: u16 = 0x20;
    pub const WRITE_ENCRYPTED_MITM: u16 = 0x40;
    pub const WRITE_SIGNED: u16 = 0x80;
    pub const WRITE_SIGNED_MITM: u16 = 0x100;
}

/// Read-only description of a characteristic, valid for one discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub properties: u8,
    pub permissions: u16,
    pub descriptor_count: usize,
}

impl GattCharacteristic {
    pub fn can_read(&self) -> bool {
        self.properties & property::READ != 0
    }

    pub fn can_notify(&self) -> bool {
        self.properties & (property::NOTIFY | property::INDICATE) != 0
    }
}

/// Read-only description of a service, valid for one discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub is_primary: bool,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// View of a registry entry handed to list consumers.
pub type DeviceSnapshot = ScanResult;
