//! Parent locator entries: 24-byte records in the dynamic header that point
//! at an out-of-band parent-path string. Only the `"W2ru"` (relative,
//! UTF-16LE) variant is ever decoded into a usable name; the others are
//! tracked only for physical-size accounting.

use super::byte_reader::ByteReader;
use vhd_core::Error;

pub const ENTRY_SIZE: usize = 24;

/// Platform code for the relative Windows ANSI/UTF-16LE path locator.
pub const CODE_W2RU: u32 = 0x5732_7275;

#[derive(Debug, Clone, Copy)]
pub struct ParentLocatorEntry {
    pub code: u32,
    pub data_space: u32,
    pub data_len: u32,
    pub data_offset: u64,
}

impl ParentLocatorEntry {
    pub fn parse(buf: &[u8], strict_reserved: bool) -> Result<Self, Error> {
        if buf.len() < ENTRY_SIZE {
            return Err(Error::invalid("parent locator entry too small"));
        }
        let r = ByteReader::new(buf);
        let reserved = r.u32(0x0C);
        if strict_reserved && reserved != 0 {
            return Err(Error::invalid("parent locator reserved field is not zero"));
        }
        Ok(Self {
            code: r.u32(0x00),
            data_space: r.u32(0x04),
            data_len: r.u32(0x08),
            data_offset: r.u64(0x10),
        })
    }

    pub fn is_w2ru(&self) -> bool {
        self.code == CODE_W2RU
    }

    pub fn is_empty(&self) -> bool {
        self.data_len == 0
    }
}

/// Decode a "W2ru" locator's raw bytes (little-endian UTF-16) into a name,
/// stripping a leading `.\` relative-path prefix if present.
pub fn decode_w2ru_name(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let name = String::from_utf16_lossy(&units);
    name.strip_prefix(".\\").map(str::to_owned).unwrap_or(name)
}
