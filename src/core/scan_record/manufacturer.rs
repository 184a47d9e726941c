//! Manufacturer-specific record decoders
//! A registry keyed by assigned company id; records without a decoder are
//! rendered as raw hex by the caller.

use std::collections::HashMap;
use std::fmt;

use log::debug;
use uuid::Uuid;

use crate::core::bluetooth::constants::{COMPANY_ID_APPLE, COMPANY_ID_RUUVI};
use crate::core::bluetooth::error::DecodeError;
use crate::core::scan_record::render::to_unsigned_hex;

/// Structured description of one manufacturer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManufacturerRecord {
    /// Label shown in front of the body, e.g. `iBeacon`
    pub key_descriptor: String,
    pub fields: Vec<(String, String)>,
}

impl ManufacturerRecord {
    pub fn new(key_descriptor: impl Into<String>) -> Self {
        Self {
            key_descriptor: key_descriptor.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str, value: impl ToString) -> Self {
        self.fields.push((name.to_string(), value.to_string()));
        self
    }
}

/// Multi-line body, one `name: value` per line.
impl fmt::Display for ManufacturerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            writeln!(f, "  {name}: {value}")?;
        }
        Ok(())
    }
}

/// Decoder for the records of one company id.
pub trait ManufacturerRecordParser: Send + Sync {
    fn company_id(&self) -> u16;

    /// Decodes the record payload, company id already stripped.
    fn parse(&self, data: &[u8]) -> Result<ManufacturerRecord, DecodeError>;
}

pub struct ManufacturerParserRegistry {
    parsers: HashMap<u16, Box<dyn ManufacturerRecordParser>>,
}

impl ManufacturerParserRegistry {
    /// A registry without any decoder.
    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    pub fn register(&mut self, parser: Box<dyn ManufacturerRecordParser>) {
        self.parsers.insert(parser.company_id(), parser);
    }

    /// Decodes a record. `None` both when no decoder is registered and when
    /// the decoder rejects the payload.
    pub fn parse(&self, company_id: u16, data: &[u8]) -> Option<ManufacturerRecord> {
        let parser = self.parsers.get(&company_id)?;
        match parser.parse(data) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Manufacturer record {:#06x} not decoded: {}", company_id, e);
                None
            }
        }
    }
}

impl Default for ManufacturerParserRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(AppleParser));
        registry.register(Box::new(RuuviParser));
        registry
    }
}

fn require(data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::TooShort {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn be_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn be_i16(data: &[u8], at: usize) -> i16 {
    i16::from_be_bytes([data[at], data[at + 1]])
}

const APPLE_IBEACON_TYPE: u8 = 0x02;
const APPLE_IBEACON_LENGTH: u8 = 0x15;

const APPLE_CONTINUITY_TYPES: &[(u8, &str)] = &[
    (0x05, "AirDrop"),
    (0x07, "AirPods"),
    (0x09, "AirPlay"),
    (0x0A, "HomeKit"),
    (0x0C, "Handoff"),
    (0x0F, "Nearby Info"),
    (0x10, "Nearby Action"),
    (0x12, "FindMy"),
    (0x16, "Nearby Interaction"),
];

/// Apple records: iBeacon frames in full, other continuity messages by type.
pub struct AppleParser;

impl ManufacturerRecordParser for AppleParser {
    fn company_id(&self) -> u16 {
        COMPANY_ID_APPLE
    }

    fn parse(&self, data: &[u8]) -> Result<ManufacturerRecord, DecodeError> {
        require(data, 2)?;
        let message_type = data[0];

        if message_type == APPLE_IBEACON_TYPE && data[1] == APPLE_IBEACON_LENGTH {
            require(data, 23)?;
            let mut uuid = [0u8; 16];
            uuid.copy_from_slice(&data[2..18]);
            return Ok(ManufacturerRecord::new("iBeacon")
                .field("uuid", Uuid::from_bytes(uuid))
                .field("major", be_u16(data, 18))
                .field("minor", be_u16(data, 20))
                .field("tx power", format!("{} dBm", data[22] as i8)));
        }

        let name = APPLE_CONTINUITY_TYPES
            .iter()
            .find(|(t, _)| *t == message_type)
            .map(|(_, name)| *name)
            .unwrap_or("Unknown");
        Ok(ManufacturerRecord::new("Apple")
            .field("type", format!("{name} ({message_type:#04x})"))
            .field("payload", to_unsigned_hex(&data[1..])))
    }
}

const RUUVI_FORMAT_RAWV2: u8 = 0x05;

/// Ruuvi Innovations sensor tags, data format 5 (RAWv2).
pub struct RuuviParser;

impl ManufacturerRecordParser for RuuviParser {
    fn company_id(&self) -> u16 {
        COMPANY_ID_RUUVI
    }

    fn parse(&self, data: &[u8]) -> Result<ManufacturerRecord, DecodeError> {
        require(data, 1)?;
        if data[0] != RUUVI_FORMAT_RAWV2 {
            return Err(DecodeError::UnsupportedFormat(data[0]));
        }
        require(data, 24)?;

        let temperature = be_i16(data, 1) as f64 * 0.005;
        let humidity = be_u16(data, 3) as f64 * 0.0025;
        let pressure = be_u16(data, 5) as u32 + 50_000;
        let power = be_u16(data, 13);
        let battery_mv = (power >> 5) as u32 + 1600;
        let tx_power = (power & 0x1f) as i32 * 2 - 40;
        let mac = data[18..24]
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":");

        Ok(ManufacturerRecord::new("Ruuvi RAWv2")
            .field("temperature", format!("{temperature:.2} °C"))
            .field("humidity", format!("{humidity:.2} %"))
            .field("pressure", format!("{pressure} Pa"))
            .field(
                "acceleration",
                format!(
                    "{} / {} / {} mG",
                    be_i16(data, 7),
                    be_i16(data, 9),
                    be_i16(data, 11)
                ),
            )
            .field("battery", format!("{battery_mv} mV"))
            .field("tx power", format!("{tx_power} dBm"))
            .field("movements", data[15])
            .field("sequence", be_u16(data, 16))
            .field("mac", mac))
    }
}
