//! Advertisement payload decoding
//! A payload is a run of `[length][type][data...]` AD structures; a zero
//! length ends the significant part.

use std::collections::BTreeMap;

use log::debug;
use uuid::Uuid;

use crate::core::bluetooth::constants::*;

/// Structured view of one advertisement payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRecord {
    pub flags: Option<u8>,
    pub service_uuids: Vec<Uuid>,
    /// Company id → payload; a repeated company id keeps the last record
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    pub service_data: BTreeMap<Uuid, Vec<u8>>,
    pub local_name: Option<String>,
    pub tx_power_level: Option<i8>,
}

/// Expands a 16- or 32-bit UUID onto the Bluetooth base UUID.
pub fn uuid_from_short(short: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID.as_u128() | ((short as u128) << 96))
}

/// Returns the short form of `uuid` if it lies on the base UUID.
pub fn short_uuid(uuid: &Uuid) -> Option<u32> {
    let value = uuid.as_u128();
    let mask = (1u128 << 96) - 1;
    if value & mask == BLUETOOTH_BASE_UUID.as_u128() & mask {
        Some((value >> 96) as u32)
    } else {
        None
    }
}

fn uuid_from_le(bytes: &[u8]) -> Option<Uuid> {
    match bytes.len() {
        2 => Some(uuid_from_short(u16::from_le_bytes([bytes[0], bytes[1]]) as u32)),
        4 => Some(uuid_from_short(u32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ]))),
        16 => {
            let mut be = [0u8; 16];
            for (i, b) in bytes.iter().rev().enumerate() {
                be[i] = *b;
            }
            Some(Uuid::from_bytes(be))
        }
        _ => None,
    }
}

impl ScanRecord {
    /// Parses a raw payload. Malformed trailing structures end parsing and
    /// whatever was decoded before them is kept.
    pub fn parse(bytes: &[u8]) -> Self {
        let mut record = Self::default();
        let mut pos = 0;

        while pos < bytes.len() {
            let len = bytes[pos] as usize;
            if len == 0 {
                break;
            }
            if pos + 1 + len > bytes.len() {
                debug!("Truncated AD structure at offset {}", pos);
                break;
            }
            let ad_type = bytes[pos + 1];
            let data = &bytes[pos + 2..pos + 1 + len];
            record.apply(ad_type, data);
            pos += 1 + len;
        }

        record
    }

    fn apply(&mut self, ad_type: u8, data: &[u8]) {
        match ad_type {
            AD_TYPE_FLAGS => self.flags = data.first().copied(),
            AD_TYPE_UUID16_INCOMPLETE | AD_TYPE_UUID16_COMPLETE => self.push_uuids(data, 2),
            AD_TYPE_UUID32_INCOMPLETE | AD_TYPE_UUID32_COMPLETE => self.push_uuids(data, 4),
            AD_TYPE_UUID128_INCOMPLETE | AD_TYPE_UUID128_COMPLETE => self.push_uuids(data, 16),
            AD_TYPE_SHORT_NAME | AD_TYPE_COMPLETE_NAME => {
                // Prefer the complete name when both are present.
                if ad_type == AD_TYPE_COMPLETE_NAME || self.local_name.is_none() {
                    self.local_name = Some(String::from_utf8_lossy(data).into_owned());
                }
            }
            AD_TYPE_TX_POWER => self.tx_power_level = data.first().map(|b| *b as i8),
            AD_TYPE_SERVICE_DATA_UUID16 => self.push_service_data(data, 2),
            AD_TYPE_SERVICE_DATA_UUID32 => self.push_service_data(data, 4),
            AD_TYPE_SERVICE_DATA_UUID128 => self.push_service_data(data, 16),
            AD_TYPE_MANUFACTURER_DATA if data.len() >= 2 => {
                let company_id = u16::from_le_bytes([data[0], data[1]]);
                self.manufacturer_data.insert(company_id, data[2..].to_vec());
            }
            _ => {}
        }
    }

    fn push_uuids(&mut self, data: &[u8], width: usize) {
        self.service_uuids
            .extend(data.chunks_exact(width).filter_map(uuid_from_le));
    }

    fn push_service_data(&mut self, data: &[u8], width: usize) {
        if data.len() < width {
            return;
        }
        if let Some(uuid) = uuid_from_le(&data[..width]) {
            self.service_data.insert(uuid, data[width..].to_vec());
        }
    }

    /// Encodes the record back into AD structures. Used by backends whose
    /// platform hands out pre-parsed advertisement data.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();

        if let Some(flags) = self.flags {
            push_structure(&mut out, AD_TYPE_FLAGS, &[flags]);
        }

        let mut short16 = Vec::new();
        let mut short32 = Vec::new();
        let mut long = Vec::new();
        for uuid in &self.service_uuids {
            match short_uuid(uuid) {
                Some(short) if short <= u16::MAX as u32 => {
                    short16.extend_from_slice(&(short as u16).to_le_bytes())
                }
                Some(short) => short32.extend_from_slice(&short.to_le_bytes()),
                None => long.extend(uuid.as_bytes().iter().rev()),
            }
        }
        push_structure(&mut out, AD_TYPE_UUID16_COMPLETE, &short16);
        push_structure(&mut out, AD_TYPE_UUID32_COMPLETE, &short32);
        push_structure(&mut out, AD_TYPE_UUID128_COMPLETE, &long);

        if let Some(name) = &self.local_name {
            push_structure(&mut out, AD_TYPE_COMPLETE_NAME, name.as_bytes());
        }
        if let Some(tx_power) = self.tx_power_level {
            push_structure(&mut out, AD_TYPE_TX_POWER, &[tx_power as u8]);
        }

        for (uuid, data) in &self.service_data {
            let mut body = Vec::with_capacity(16 + data.len());
            let ad_type = match short_uuid(uuid) {
                Some(short) if short <= u16::MAX as u32 => {
                    body.extend_from_slice(&(short as u16).to_le_bytes());
                    AD_TYPE_SERVICE_DATA_UUID16
                }
                Some(short) => {
                    body.extend_from_slice(&short.to_le_bytes());
                    AD_TYPE_SERVICE_DATA_UUID32
                }
                None => {
                    body.extend(uuid.as_bytes().iter().rev());
                    AD_TYPE_SERVICE_DATA_UUID128
                }
            };
            body.extend_from_slice(data);
            push_structure(&mut out, ad_type, &body);
        }

        for (company_id, data) in &self.manufacturer_data {
            let mut body = company_id.to_le_bytes().to_vec();
            body.extend_from_slice(data);
            push_structure(&mut out, AD_TYPE_MANUFACTURER_DATA, &body);
        }

        out
    }
}

/// Appends one AD structure; empty or oversized bodies are skipped.
fn push_structure(out: &mut Vec<u8>, ad_type: u8, data: &[u8]) {
    if data.is_empty() || data.len() > 254 {
        return;
    }
    out.push(data.len() as u8 + 1);
    out.push(ad_type);
    out.extend_from_slice(data);
}
