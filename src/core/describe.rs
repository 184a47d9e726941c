//! Human-readable descriptions of devices, GATT attributes and values.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::core::bluetooth::types::{
    BondState, ConnectionState, DeviceType, GattCharacteristic, ScanResult, permission, property,
};
use crate::core::scan_record::record::short_uuid;
use crate::core::scan_record::render::to_unsigned_hex;

pub fn describe_bond_state(state: BondState) -> &'static str {
    match state {
        BondState::None => "not bonded",
        BondState::Bonding => "bonding",
        BondState::Bonded => "bonded",
        BondState::Unknown => "unknown bondstate",
    }
}

pub fn describe_type(device_type: DeviceType) -> &'static str {
    match device_type {
        DeviceType::Classic => "classic",
        DeviceType::Dual => "dual",
        DeviceType::Le => "LE",
        DeviceType::Unknown => "unknown device type",
    }
}

pub fn describe_service_type(is_primary: bool) -> &'static str {
    if is_primary { "primary" } else { "secondary" }
}

pub fn describe_connection_state(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
        ConnectionState::Disconnecting => "disconnecting",
    }
}

/// Extracts a MAC address from a platform device id, if it contains one.
/// Windows ids look like `BluetoothLE#BluetoothLEaa:bb:..-11:22:33:44:55:66`.
pub fn extract_mac_address(device_id: &str) -> Option<String> {
    static MAC: OnceLock<Regex> = OnceLock::new();
    let re = MAC.get_or_init(|| {
        Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").expect("valid MAC pattern")
    });
    re.find_iter(device_id)
        .last()
        .map(|m| m.as_str().to_uppercase())
}

/// Advertised name, or the device address when the name is missing or empty.
pub fn name_or_address(result: &ScanResult) -> String {
    match result.name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => extract_mac_address(result.device_id.as_str())
            .unwrap_or_else(|| result.device_id.to_string()),
    }
}

/// Whole seconds between the last observation and `now`.
pub fn seconds_since_seen(result: &ScanResult, now: DateTime<Utc>) -> i64 {
    (now - result.last_seen).num_seconds().max(0)
}

const PROPERTY_NAMES: &[(u8, &str)] = &[
    (property::BROADCAST, "broadcast"),
    (property::EXTENDED_PROPS, "extended"),
    (property::INDICATE, "indicate"),
    (property::NOTIFY, "notify"),
    (property::READ, "read"),
    (property::SIGNED_WRITE, "signed write"),
    (property::WRITE, "write"),
    (property::WRITE_NO_RESPONSE, "write no response"),
];

/// Comma separated property names, or `no property`.
pub fn describe_properties(properties: u8) -> String {
    let names: Vec<&str> = PROPERTY_NAMES
        .iter()
        .filter(|(bit, _)| properties & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if names.is_empty() {
        "no property".to_string()
    } else {
        names.join(",")
    }
}

pub fn describe_permissions(permissions: u16) -> String {
    let known = match permissions {
        permission::READ => "read",
        permission::READ_ENCRYPTED => "read encrypted",
        permission::READ_ENCRYPTED_MITM => "read encrypted mitm",
        permission::WRITE => "write",
        permission::WRITE_ENCRYPTED => "write encrypted",
        permission::WRITE_ENCRYPTED_MITM => "write encrypted mitm",
        permission::WRITE_SIGNED => "write signed",
        permission::WRITE_SIGNED_MITM => "write signed mitm",
        other => return format!("unknown permission {other}"),
    };
    known.to_string()
}

const SERVICE_NAMES: &[(u32, &str)] = &[
    (0x1800, "Generic Access"),
    (0x1801, "Generic Attribute"),
    (0x1802, "Immediate Alert"),
    (0x1803, "Link Loss"),
    (0x1804, "Tx Power"),
    (0x1805, "Current Time Service"),
    (0x1809, "Health Thermometer"),
    (0x180a, "Device Information"),
    (0x180d, "Heart Rate"),
    (0x180f, "Battery Service"),
    (0x1810, "Blood Pressure"),
    (0x1812, "Human Interface Device"),
    (0x1814, "Running Speed and Cadence"),
    (0x1816, "Cycling Speed and Cadence"),
    (0x1818, "Cycling Power"),
    (0x181a, "Environmental Sensing"),
    (0x181c, "User Data"),
    (0x181d, "Weight Scale"),
    (0xfe9f, "Google"),
    (0xfeaa, "Eddystone"),
];

const CHARACTERISTIC_NAMES: &[(u32, &str)] = &[
    (0x2a00, "Device Name"),
    (0x2a01, "Appearance"),
    (0x2a04, "Peripheral Preferred Connection Parameters"),
    (0x2a05, "Service Changed"),
    (0x2a06, "Alert Level"),
    (0x2a07, "Tx Power Level"),
    (0x2a19, "Battery Level"),
    (0x2a1c, "Temperature Measurement"),
    (0x2a23, "System ID"),
    (0x2a24, "Model Number String"),
    (0x2a25, "Serial Number String"),
    (0x2a26, "Firmware Revision String"),
    (0x2a27, "Hardware Revision String"),
    (0x2a28, "Software Revision String"),
    (0x2a29, "Manufacturer Name String"),
    (0x2a2b, "Current Time"),
    (0x2a37, "Heart Rate Measurement"),
    (0x2a38, "Body Sensor Location"),
    (0x2a39, "Heart Rate Control Point"),
    (0x2a4d, "Report"),
    (0x2a50, "PnP ID"),
    (0x2a6e, "Temperature"),
    (0x2a6f, "Humidity"),
];

fn lookup(table: &[(u32, &'static str)], uuid: &Uuid) -> Option<&'static str> {
    let short = short_uuid(uuid)?;
    table
        .iter()
        .find(|(assigned, _)| *assigned == short)
        .map(|(_, name)| *name)
}

/// Assigned name of a standard service.
pub fn service_name(uuid: &Uuid) -> Option<&'static str> {
    lookup(SERVICE_NAMES, uuid)
}

/// Assigned name of a standard characteristic.
pub fn characteristic_name(uuid: &Uuid) -> Option<&'static str> {
    lookup(CHARACTERISTIC_NAMES, uuid)
}

/// `hex = uint16 = text` view of a characteristic value. The integer is
/// little-endian from offset 0 and shown as `-` when fewer than two bytes.
pub fn format_value(value: &[u8]) -> String {
    let uint16 = match value {
        [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]).to_string(),
        _ => "-".to_string(),
    };
    format!(
        "{} = {} = {}",
        to_unsigned_hex(value),
        uint16,
        String::from_utf8_lossy(value)
    )
}

/// One-line summary of a characteristic for listings.
pub fn describe_characteristic(characteristic: &GattCharacteristic) -> String {
    format!(
        "{} [{}] ({}, {} descriptors)",
        characteristic_name(&characteristic.uuid)
            .map(str::to_string)
            .unwrap_or_else(|| characteristic.uuid.to_string()),
        describe_properties(characteristic.properties),
        describe_permissions(characteristic.permissions),
        characteristic.descriptor_count
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::types::DeviceId;
    use crate::core::scan_record::record::uuid_from_short;

    #[test]
    fn properties_render_in_fixed_order() {
        assert_eq!(
            describe_properties(property::READ | property::NOTIFY),
            "notify,read"
        );
        assert_eq!(describe_properties(0), "no property");
    }

    #[test]
    fn permissions_match_exact_values_only() {
        assert_eq!(describe_permissions(permission::READ), "read");
        assert_eq!(
            describe_permissions(permission::READ | permission::WRITE),
            "unknown permission 17"
        );
    }

    #[test]
    fn name_falls_back_to_address() {
        let mut result = ScanResult::new(
            DeviceId::from("BluetoothLE#BluetoothLE00:1a:7d:da:71:13-c8:2b:96:a1:00:0f"),
            Some(String::new()),
            -60,
            Vec::new(),
        );
        assert_eq!(name_or_address(&result), "C8:2B:96:A1:00:0F");

        result.name = Some("Polar H10".to_string());
        assert_eq!(name_or_address(&result), "Polar H10");

        let plain = ScanResult::new(DeviceId::from("opaque-id"), None, -60, Vec::new());
        assert_eq!(name_or_address(&plain), "opaque-id");
    }

    #[test]
    fn standard_names_resolve_for_base_uuids() {
        assert_eq!(service_name(&uuid_from_short(0x180f)), Some("Battery Service"));
        assert_eq!(
            characteristic_name(&uuid_from_short(0x2a19)),
            Some("Battery Level")
        );
        assert_eq!(service_name(&Uuid::nil()), None);
    }

    #[test]
    fn value_shows_hex_integer_and_text() {
        assert_eq!(format_value(b"Hi"), "4869 = 26952 = Hi");
        assert_eq!(format_value(&[0x07]), "7 = - = \u{7}");
    }

    #[test]
    fn enum_descriptions() {
        assert_eq!(describe_bond_state(BondState::Bonded), "bonded");
        assert_eq!(describe_type(DeviceType::Le), "LE");
        assert_eq!(describe_service_type(false), "secondary");
        assert_eq!(
            describe_connection_state(ConnectionState::Disconnecting),
            "disconnecting"
        );
    }
}
