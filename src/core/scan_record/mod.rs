//! Advertisement payload decoding and rendering.

pub mod manufacturer;
pub mod record;
pub mod render;

pub use manufacturer::{
    AppleParser, ManufacturerParserRegistry, ManufacturerRecord, ManufacturerRecordParser,
    RuuviParser,
};
pub use record::ScanRecord;
pub use render::{render_record, render_scan_record, to_unsigned_hex};
