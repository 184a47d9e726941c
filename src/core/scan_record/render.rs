//! Text rendering of scan records for list consumers.

use crate::core::scan_record::manufacturer::ManufacturerParserRegistry;
use crate::core::scan_record::record::ScanRecord;

/// Renders bytes as one big-endian unsigned number in lowercase hex without
/// leading zeros; empty or all-zero input renders as `0`.
pub fn to_unsigned_hex(bytes: &[u8]) -> String {
    let significant = match bytes.iter().position(|b| *b != 0) {
        Some(first) => &bytes[first..],
        None => return "0".to_string(),
    };
    let tail: String = significant[1..].iter().map(|b| format!("{b:02x}")).collect();
    format!("{:x}{}", significant[0], tail)
}

/// Renders a raw advertisement payload. Service UUIDs come one per line,
/// then manufacturer records (decoded where a decoder exists, hex otherwise),
/// then service data as `uuid=hex`.
pub fn render_scan_record(payload: &[u8], parsers: &ManufacturerParserRegistry) -> String {
    render_record(&ScanRecord::parse(payload), parsers)
}

pub fn render_record(record: &ScanRecord, parsers: &ManufacturerParserRegistry) -> String {
    let mut out = String::new();

    for uuid in &record.service_uuids {
        out.push_str(&format!("{uuid}\n"));
    }

    for (company_id, data) in &record.manufacturer_data {
        let line = match parsers.parse(*company_id, data) {
            Some(decoded) => format!("{} = {{\n{}}}\n", decoded.key_descriptor, decoded),
            None => format!("{}={}\n", company_id, to_unsigned_hex(data)),
        };
        out.push_str(&line);
    }

    for (uuid, data) in &record.service_data {
        out.push_str(&format!("{}={}\n", uuid, to_unsigned_hex(data)));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scan_record::record::uuid_from_short;

    #[test]
    fn unsigned_hex_strips_leading_zeros() {
        assert_eq!(to_unsigned_hex(&[0x01, 0x02]), "102");
        assert_eq!(to_unsigned_hex(&[0xab, 0xcd]), "abcd");
        assert_eq!(to_unsigned_hex(&[0x00, 0x00, 0x0f, 0x00]), "f00");
        assert_eq!(to_unsigned_hex(&[]), "0");
        assert_eq!(to_unsigned_hex(&[0x00]), "0");
    }

    #[test]
    fn uuids_each_on_own_line_and_service_data_as_hex() {
        let u1 = uuid_from_short(0x180d);
        let u2 = uuid_from_short(0x180a);
        let u3 = uuid_from_short(0x180f);
        let payload = [
            0x05, 0x03, 0x0d, 0x18, 0x0a, 0x18, // U1, U2
            0x05, 0x16, 0x0f, 0x18, 0xab, 0xcd, // U3 = abcd
        ];

        let text = render_scan_record(&payload, &ManufacturerParserRegistry::default());
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.contains(&u1.to_string().as_str()));
        assert!(lines.contains(&u2.to_string().as_str()));
        assert!(lines.contains(&format!("{u3}=abcd").as_str()));
    }

    #[test]
    fn unregistered_company_falls_back_to_hex() {
        let payload = [0x05, 0xff, 0x34, 0x12, 0x01, 0x02];
        let text = render_scan_record(&payload, &ManufacturerParserRegistry::default());
        assert_eq!(text, "4660=102\n");
    }

    #[test]
    fn decoder_failure_falls_back_to_hex() {
        // Apple company id with a truncated iBeacon frame
        let payload = [0x06, 0xff, 0x4c, 0x00, 0x02, 0x15, 0x01];
        let text = render_scan_record(&payload, &ManufacturerParserRegistry::default());
        assert_eq!(text, "76=21501\n");
    }

    #[test]
    fn decoded_record_renders_key_and_body() {
        let payload = [0x05, 0xff, 0x4c, 0x00, 0x10, 0x05];
        let text = render_scan_record(&payload, &ManufacturerParserRegistry::default());
        assert!(text.starts_with("Apple = {\n"));
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn empty_sections_render_nothing() {
        assert_eq!(render_scan_record(&[], &ManufacturerParserRegistry::default()), "");
        assert_eq!(
            render_scan_record(&[0x02, 0x01, 0x06], &ManufacturerParserRegistry::empty()),
            ""
        );
    }
}
