//! Payload format detection

use kiln_bytecode::module::MAGIC;

/// Kind of payload found in a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Kiln module binary
    Kiln,
    /// Zip archive (e.g. a full-runtime package)
    Zip,
    /// Anything else
    Unknown,
}

impl Format {
    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Format::Kiln => "kiln module",
            Format::Zip => "zip archive",
            Format::Unknown => "unknown data",
        }
    }
}

/// Identify a payload by its leading bytes
pub fn detect_format(bytes: &[u8]) -> Format {
    if bytes.starts_with(&MAGIC) {
        Format::Kiln
    } else if bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"PK\x05\x06") {
        Format::Zip
    } else {
        Format::Unknown
    }
}
