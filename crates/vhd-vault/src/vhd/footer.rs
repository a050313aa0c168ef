//! The 512-byte VHD footer: disk type, logical size, identity, geometry,
//! timestamps, creator metadata.

use super::byte_reader::{checksum_ok, zero_tail_ok, ByteReader};
use vhd_core::{Error, Result};

pub const FOOTER_SIZE: usize = 512;
pub const FOOTER_SIGNATURE: &[u8; 10] = b"conectix\0\0";
const CHECKSUM_OFFSET: usize = 0x40;
const ZERO_TAIL_START: usize = 0x55;

/// The three supported VHD disk types. Any other on-disk value is a parse
/// failure rather than a fourth variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskType {
    Fixed,
    Dynamic,
    Differencing,
}

impl DiskType {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            2 => Some(DiskType::Fixed),
            3 => Some(DiskType::Dynamic),
            4 => Some(DiskType::Differencing),
            _ => None,
        }
    }

    /// Does this disk type carry a dynamic header (BAT, sparse blocks)?
    pub fn is_sparse(self) -> bool {
        matches!(self, DiskType::Dynamic | DiskType::Differencing)
    }

    pub fn name(self) -> &'static str {
        match self {
            DiskType::Fixed => "Fixed",
            DiskType::Dynamic => "Dynamic",
            DiskType::Differencing => "Differencing",
        }
    }
}

/// Packed CHS geometry. Informational only — this decoder never derives
/// addressing from it.
#[derive(Debug, Clone, Copy)]
pub struct DiskGeometry {
    pub cylinders: u16,
    pub heads: u8,
    pub sectors_per_track: u8,
}

impl DiskGeometry {
    fn from_u32(raw: u32) -> Self {
        Self {
            cylinders: (raw >> 16) as u16,
            heads: ((raw >> 8) & 0xFF) as u8,
            sectors_per_track: (raw & 0xFF) as u8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Footer {
    pub data_offset: u64,
    pub creation_time: u32,
    pub creator_app: [u8; 4],
    pub creator_version: u32,
    pub creator_host_os: [u8; 4],
    pub current_size: u64,
    pub geometry: DiskGeometry,
    pub disk_type: DiskType,
    pub checksum: u32,
    pub uid: [u8; 16],
    pub saved_state: u8,
    /// The raw 512 bytes this footer was parsed from, kept so the opener
    /// can byte-compare the head and tail footer blocks without a re-read.
    raw: [u8; FOOTER_SIZE],
}

impl Footer {
    /// Parse a candidate footer out of a 512-byte window.
    ///
    /// `strict_reserved` controls whether the trailing reserved bytes
    /// (0x55..0x200) must be all zero; the checksum is always checked.
    pub fn parse(buf: &[u8], strict_reserved: bool) -> Result<Self> {
        if buf.len() < FOOTER_SIZE {
            return Err(Error::NotMine);
        }
        let buf = &buf[..FOOTER_SIZE];
        if &buf[0..10] != FOOTER_SIGNATURE.as_slice() {
            return Err(Error::NotMine);
        }

        let r = ByteReader::new(buf);
        let disk_type_raw = r.u32(0x3C);
        let disk_type = DiskType::from_u32(disk_type_raw)
            .ok_or_else(|| Error::invalid(format!("unsupported VHD disk type {disk_type_raw}")))?;

        if !checksum_ok(buf, FOOTER_SIZE, CHECKSUM_OFFSET) {
            return Err(Error::invalid("VHD footer checksum mismatch"));
        }
        if strict_reserved && !zero_tail_ok(buf, FOOTER_SIZE, ZERO_TAIL_START) {
            return Err(Error::invalid("VHD footer reserved tail is not zero"));
        }

        let mut creator_app = [0u8; 4];
        creator_app.copy_from_slice(r.bytes(0x1C, 4));
        let mut creator_host_os = [0u8; 4];
        creator_host_os.copy_from_slice(r.bytes(0x24, 4));
        let mut uid = [0u8; 16];
        uid.copy_from_slice(r.bytes(0x44, 16));
        let mut raw = [0u8; FOOTER_SIZE];
        raw.copy_from_slice(buf);

        Ok(Self {
            data_offset: r.u64(0x10),
            creation_time: r.u32(0x18),
            creator_app,
            creator_version: r.u32(0x20),
            creator_host_os,
            current_size: r.u64(0x30),
            geometry: DiskGeometry::from_u32(r.u32(0x38)),
            disk_type,
            checksum: r.u32(CHECKSUM_OFFSET),
            uid,
            saved_state: buf[0x54],
            raw,
        })
    }

    pub fn raw(&self) -> &[u8; FOOTER_SIZE] {
        &self.raw
    }

    /// `major.minor` halves of the packed creator_version field.
    pub fn creator_version_parts(&self) -> (u16, u16) {
        ((self.creator_version >> 16) as u16, (self.creator_version & 0xFFFF) as u16)
    }
}
