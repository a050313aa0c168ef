//! Establishes the physical layout of a VHD stream: which footer governs it,
//! where the dynamic header and BAT sit, and how far into the stream the
//! decoder may read before running into a different archive or end-of-file.
//!
//! Mirrors the footer-at-head / footer-at-tail / backup-footer-verification
//! state machine a VHD reader needs to tolerate the handful of ways real
//! writers (and a handful of corrupt images) lay a VHD out on disk.

use std::io::{Read, Seek, SeekFrom};

use vhd_core::{limits, Error, ReadSeek, Result};

use super::bat::{Bat, SECTOR_SIZE};
use super::dynamic_header::{DynamicHeader, DYN_HEADER_SIZE};
use super::footer::{Footer, FOOTER_SIZE};
use super::parent_locator::decode_w2ru_name;

/// The two tolerance knobs left open by the format: whether the reserved
/// tail bytes of a header must be zero, and (reserved for future growth)
/// how deep a differencing chain may run before it's rejected.
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    pub strict_reserved: bool,
    pub max_parent_depth: u32,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self { strict_reserved: true, max_parent_depth: limits::MAX_PARENT_DEPTH }
    }
}

/// Everything the opener determines about a single VHD layer, before any
/// parent chain has been resolved.
pub struct Opened {
    pub footer: Footer,
    pub dynamic_header: Option<DynamicHeader>,
    pub bat: Option<Bat>,
    pub start_offset: u64,
    pub phy_size: u64,
    pub relative_parent_name: Option<String>,
    pub annotations: Vec<String>,
}

/// Avoids a redundant seek when the next read picks up exactly where the
/// last one left off, the way a streaming archive reader would.
struct PosCache {
    pos: Option<u64>,
}

impl PosCache {
    fn new() -> Self {
        Self { pos: None }
    }

    fn read_phy(
        &mut self,
        stream: &mut dyn ReadSeek,
        start_offset: u64,
        limit: u64,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<()> {
        if offset + buf.len() as u64 > limit {
            return Err(Error::invalid("VHD read beyond the archive's physical extent"));
        }
        if self.pos != Some(offset) {
            stream.seek(SeekFrom::Start(start_offset + offset))?;
        }
        stream.read_exact(buf)?;
        self.pos = Some(offset + buf.len() as u64);
        Ok(())
    }
}

pub fn open(stream: &mut dyn ReadSeek, options: &OpenOptions) -> Result<Opened> {
    let start_pos = stream.stream_position()?;

    let mut head = [0u8; FOOTER_SIZE];
    stream.read_exact(&mut head)?;
    let head_footer = Footer::parse(&head, options.strict_reserved);

    // Step A: a Fixed-layout image has its only footer at the head.
    if let Ok(footer) = &head_footer {
        if !footer.disk_type.is_sparse() {
            if start_pos < footer.current_size {
                return Err(Error::invalid("fixed VHD footer's size exceeds its own stream offset"));
            }
            return Ok(Opened {
                start_offset: start_pos - footer.current_size,
                phy_size: footer.current_size + FOOTER_SIZE as u64,
                dynamic_header: None,
                bat: None,
                relative_parent_name: None,
                annotations: Vec::new(),
                footer: footer.clone(),
            });
        }
    }

    // Step B: locate the trailing footer copy.
    let file_size = stream.seek(SeekFrom::End(0))?;
    if file_size < FOOTER_SIZE as u64 {
        return Err(Error::NotMine);
    }
    let mut tail = [0u8; FOOTER_SIZE];
    stream.seek(SeekFrom::Start(file_size - FOOTER_SIZE as u64))?;
    stream.read_exact(&mut tail)?;

    let head_footer = match head_footer {
        Ok(f) => f,
        Err(_) => {
            let tail_footer = Footer::parse(&tail, options.strict_reserved)?;
            if tail_footer.disk_type.is_sparse() {
                return Err(Error::invalid("cannot open a dynamic VHD image from its backup footer alone"));
            }
            let start_offset = file_size - FOOTER_SIZE as u64 - tail_footer.current_size;
            return Ok(Opened {
                start_offset,
                phy_size: tail_footer.current_size + FOOTER_SIZE as u64,
                dynamic_header: None,
                bat: None,
                relative_parent_name: None,
                annotations: Vec::new(),
                footer: tail_footer,
            });
        }
    };

    // Step C: Dynamic/Differencing image, footer already validated at head.
    let pos_in_arc = file_size - start_pos;
    let read_limit = pos_in_arc - FOOTER_SIZE as u64;
    let head_and_tail_equal = head == tail;

    let mut cache = PosCache::new();
    let mut dyn_buf = [0u8; DYN_HEADER_SIZE];
    cache.read_phy(stream, start_pos, read_limit, head_footer.data_offset, &mut dyn_buf)?;
    let dynamic_header = DynamicHeader::parse(&dyn_buf, options.strict_reserved)?;

    let mut phy_size = (head_footer.data_offset + DYN_HEADER_SIZE as u64).max(FOOTER_SIZE as u64);

    let mut relative_parent_name = None;
    for locator in &dynamic_header.parent_locators {
        let within_limit = locator.data_offset < read_limit
            && locator.data_offset + locator.data_len as u64 <= read_limit;
        if locator.data_len < limits::MAX_LOCATOR_DATA_LEN && within_limit {
            if locator.is_w2ru() && locator.data_len % 2 == 0 && locator.data_len > 0 {
                let mut name_buf = vec![0u8; locator.data_len as usize];
                cache.read_phy(stream, start_pos, read_limit, locator.data_offset, &mut name_buf)?;
                relative_parent_name = Some(decode_w2ru_name(&name_buf));
            }
        }
        if !locator.is_empty() {
            phy_size = phy_size.max(locator.data_offset + locator.data_len as u64);
        }
    }

    // Step D: cross-check the BAT's entry count against the logical size,
    // then load it, extending phy_size to cover every allocated block.
    let num_blocks = dynamic_header.num_blocks;
    if num_blocks >= limits::MAX_BAT_ENTRIES {
        return Err(Error::invalid("VHD BAT entry count is implausibly large"));
    }
    let expected_blocks = if head_footer.current_size == 0 {
        0
    } else {
        ((head_footer.current_size - 1) >> dynamic_header.block_size_log) + 1
    };
    if expected_blocks != num_blocks as u64 {
        return Err(Error::invalid("VHD BAT block count disagrees with the footer's logical size"));
    }

    let bat = if num_blocks == 0 {
        Bat::from_entries(Vec::new())
    } else {
        let bat_bytes = num_blocks as u64 * 4;
        limits::validate_allocation_size(bat_bytes, limits::MAX_ALLOCATION_SIZE, "VHD block allocation table")?;
        let bat_sectors = (bat_bytes + SECTOR_SIZE - 1) / SECTOR_SIZE;
        let bat_bytes_on_disk = bat_sectors * SECTOR_SIZE;

        let mut raw = vec![0u8; bat_bytes_on_disk as usize];
        cache.read_phy(stream, start_pos, read_limit, dynamic_header.table_offset, &mut raw)?;
        phy_size = phy_size.max(dynamic_header.table_offset + bat_bytes_on_disk);

        let bitmap_size = dynamic_header.bitmap_size() as u64;
        let block_size = dynamic_header.block_size() as u64;
        let bat = Bat::decode(&raw, num_blocks as usize);
        for i in 0..bat.len() {
            if let Some(frame_offset) = bat.frame_offset(i) {
                phy_size = phy_size.max(frame_offset + bitmap_size + block_size);
            }
        }
        bat
    };

    // Step E: verify the claimed physical extent ends at a real backup
    // footer, tolerating the one known quirk of an extra zero sector.
    let mut annotations = Vec::new();
    let final_phy_size;

    if head_and_tail_equal {
        final_phy_size = file_size - start_pos;
    } else if start_pos + phy_size + FOOTER_SIZE as u64 > file_size {
        annotations.push(Error::Truncated { logical_limit: phy_size }.to_string());
        final_phy_size = phy_size + FOOTER_SIZE as u64;
    } else {
        let mut candidate = [0u8; FOOTER_SIZE];
        cache.read_phy(stream, start_pos, read_limit, phy_size, &mut candidate)?;
        if candidate == head {
            final_phy_size = phy_size + FOOTER_SIZE as u64;
        } else if phy_size == 0x800 && candidate.iter().all(|&b| b == 0) {
            let mut candidate2 = [0u8; FOOTER_SIZE];
            cache.read_phy(stream, start_pos, read_limit, phy_size + SECTOR_SIZE, &mut candidate2)?;
            if candidate2 == head {
                final_phy_size = phy_size + SECTOR_SIZE + FOOTER_SIZE as u64;
            } else {
                annotations.push("Can't find footer".to_string());
                final_phy_size = phy_size + FOOTER_SIZE as u64;
            }
        } else {
            annotations.push("Can't find footer".to_string());
            final_phy_size = phy_size + FOOTER_SIZE as u64;
        }
    }

    Ok(Opened {
        footer: head_footer,
        dynamic_header: Some(dynamic_header),
        bat: Some(bat),
        start_offset: start_pos,
        phy_size: final_phy_size,
        relative_parent_name,
        annotations,
    })
}
