//! The six end-to-end scenarios, each built as a raw byte stream and opened
//! through `VhdImage::open` exactly as a host application would: a Fixed
//! pass-through, a fully-allocated Dynamic block, a Dynamic sparse hole, a
//! Differencing overlay against a resolved parent, a Differencing image
//! whose parent can't be found, and the extra-zero-sector backup-footer
//! quirk. A handful of supporting checksum/strictness tests round out the
//! per-scenario coverage with the invariants the parsers enforce.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use vhd_core::{ParentResolver, ReadSeek, Result as VhdResult, Vault};
use vhd_vault::{OpenOptions, VhdImage};

const FOOTER_SIZE: usize = 512;
const DYN_HEADER_SIZE: usize = 1024;
const SECTOR_SIZE: usize = 512;
const UNUSED_BLOCK: u32 = 0xFFFF_FFFF;

fn checksum_of(buf: &[u8], checksum_offset: usize) -> u32 {
    let mut sum: u32 = 0;
    for (i, &b) in buf.iter().enumerate() {
        if i < checksum_offset || i >= checksum_offset + 4 {
            sum = sum.wrapping_add(b as u32);
        }
    }
    !sum
}

struct FooterSpec {
    disk_type: u32,
    current_size: u64,
    data_offset: u64,
    uid: [u8; 16],
}

fn build_footer(spec: &FooterSpec) -> [u8; FOOTER_SIZE] {
    let mut buf = [0u8; FOOTER_SIZE];
    buf[0..10].copy_from_slice(b"conectix\0\0");
    buf[0x10..0x18].copy_from_slice(&spec.data_offset.to_be_bytes());
    buf[0x1C..0x20].copy_from_slice(b"vpc ");
    buf[0x20..0x24].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    buf[0x24..0x28].copy_from_slice(b"Wi2k");
    buf[0x30..0x38].copy_from_slice(&spec.current_size.to_be_bytes());
    buf[0x3C..0x40].copy_from_slice(&spec.disk_type.to_be_bytes());
    buf[0x44..0x54].copy_from_slice(&spec.uid);
    let checksum = checksum_of(&buf, 0x40);
    buf[0x40..0x44].copy_from_slice(&checksum.to_be_bytes());
    buf
}

struct DynHeaderSpec {
    table_offset: u64,
    num_blocks: u32,
    block_size: u32,
    parent_uid: [u8; 16],
    parent_name: &'static str,
}

fn build_dyn_header(spec: &DynHeaderSpec) -> Vec<u8> {
    let mut buf = vec![0u8; DYN_HEADER_SIZE];
    buf[0..8].copy_from_slice(b"cxsparse");
    buf[0x08..0x10].copy_from_slice(&u64::MAX.to_be_bytes());
    buf[0x10..0x18].copy_from_slice(&spec.table_offset.to_be_bytes());
    buf[0x1C..0x20].copy_from_slice(&spec.num_blocks.to_be_bytes());
    buf[0x20..0x24].copy_from_slice(&spec.block_size.to_be_bytes());
    buf[0x28..0x38].copy_from_slice(&spec.parent_uid);
    for (i, unit) in spec.parent_name.encode_utf16().take(255).enumerate() {
        buf[0x40 + i * 2..0x40 + i * 2 + 2].copy_from_slice(&unit.to_be_bytes());
    }
    let checksum = checksum_of(&buf, 0x24);
    buf[0x24..0x28].copy_from_slice(&checksum.to_be_bytes());
    buf
}

fn build_bat(num_blocks: u32, entries: &[u32]) -> Vec<u8> {
    let bytes = num_blocks as usize * 4;
    let sectors = (bytes + SECTOR_SIZE - 1) / SECTOR_SIZE;
    let mut buf = vec![0u8; sectors * SECTOR_SIZE];
    for (i, entry) in entries.iter().enumerate() {
        buf[i * 4..i * 4 + 4].copy_from_slice(&entry.to_be_bytes());
    }
    buf
}

/// A block's on-disk frame: the sector bitmap followed by its data, built
/// for a block whose every sector is allocated and filled with `fill`.
fn fully_allocated_frame(block_size: usize, fill: u8) -> Vec<u8> {
    let bitmap_size = bitmap_size_for(block_size);
    let mut buf = vec![0xFFu8; bitmap_size];
    buf.extend(vec![fill; block_size]);
    buf
}

fn bitmap_size_for(block_size: usize) -> usize {
    let sectors_per_block = block_size / SECTOR_SIZE;
    let bitmap_sectors = (sectors_per_block + 8 * 512 - 1) / (8 * 512);
    bitmap_sectors * 512
}

/// Lays out a one-level Dynamic/Differencing image: head footer, dynamic
/// header, BAT, each present block's frame placed contiguously, then a
/// byte-identical backup footer at the true tail (so `head_and_tail_equal`
/// holds and the opener takes its simplest, non-quirk Step E branch).
fn build_dynamic_image(
    disk_type: u32,
    current_size: u64,
    block_size: u32,
    blocks: &[Option<Vec<u8>>], // one entry per block; Some(frame) or None (unallocated)
    parent_uid: [u8; 16],
    parent_name: &'static str,
    uid: [u8; 16],
) -> Vec<u8> {
    let data_offset = 512u64;
    let table_offset = data_offset + DYN_HEADER_SIZE as u64;
    let num_blocks = blocks.len() as u32;
    let bat_bytes_on_disk = (((num_blocks as usize * 4) + SECTOR_SIZE - 1) / SECTOR_SIZE) * SECTOR_SIZE;

    let mut entries = Vec::with_capacity(blocks.len());
    let mut frames = Vec::new();
    let mut next_sector = (table_offset as usize + bat_bytes_on_disk) / SECTOR_SIZE;
    for block in blocks {
        match block {
            Some(frame) => {
                entries.push(next_sector as u32);
                next_sector += frame.len() / SECTOR_SIZE;
                frames.push(frame.clone());
            }
            None => entries.push(UNUSED_BLOCK),
        }
    }

    let footer = build_footer(&FooterSpec { disk_type, current_size, data_offset, uid });
    let dyn_header = build_dyn_header(&DynHeaderSpec { table_offset, num_blocks, block_size, parent_uid, parent_name });
    let bat = build_bat(num_blocks, &entries);

    let mut file = Vec::new();
    file.extend_from_slice(&footer);
    file.extend_from_slice(&dyn_header);
    file.extend_from_slice(&bat);
    for frame in &frames {
        file.extend_from_slice(frame);
    }
    file.extend_from_slice(&footer); // byte-identical backup footer at the tail
    file
}

struct NoParent;
impl ParentResolver for NoParent {
    fn open(&self, _name: &str) -> VhdResult<Option<Box<dyn ReadSeek>>> {
        Ok(None)
    }
}

struct MapResolver(HashMap<&'static str, Vec<u8>>);
impl ParentResolver for MapResolver {
    fn open(&self, name: &str) -> VhdResult<Option<Box<dyn ReadSeek>>> {
        Ok(self.0.get(name).map(|bytes| Box::new(Cursor::new(bytes.clone())) as Box<dyn ReadSeek>))
    }
}

fn read_all(image: &mut VhdImage) -> Vec<u8> {
    let mut out = Vec::new();
    image.content().read_to_end(&mut out).unwrap();
    out
}

/// E1 Fixed-disk pass-through.
#[test]
fn e1_fixed_disk_pass_through() {
    let current_size = 1_048_576u64;
    let mut data = vec![0u8; current_size as usize];
    for (i, b) in data.iter_mut().enumerate() {
        *b = (i % 256) as u8;
    }
    let footer = build_footer(&FooterSpec { disk_type: 2, current_size, data_offset: u64::MAX, uid: [0x11; 16] });

    let mut file = data.clone();
    file.extend_from_slice(&footer);

    let stream: Box<dyn ReadSeek> = Box::new(Cursor::new(file));
    let mut image = VhdImage::open(stream, &NoParent, &OpenOptions::default()).unwrap();

    assert_eq!(image.length(), current_size);
    assert_eq!(image.properties().pack_size, current_size);
    assert_eq!(image.properties().phy_size, 1_049_088);
    assert_eq!(read_all(&mut image), data);
}

/// E2 Dynamic single-block, fully allocated.
#[test]
fn e2_dynamic_single_block_fully_allocated() {
    let block_size = 2 * 1024 * 1024u32;
    let current_size = block_size as u64;
    let frame = fully_allocated_frame(block_size as usize, 0xAA);

    let file = build_dynamic_image(3, current_size, block_size, &[Some(frame)], [0; 16], "", [0x22; 16]);

    let stream: Box<dyn ReadSeek> = Box::new(Cursor::new(file));
    let mut image = VhdImage::open(stream, &NoParent, &OpenOptions::default()).unwrap();

    assert_eq!(image.properties().error_message, None);
    assert_eq!(image.properties().pack_size, 2 * 1024 * 1024);

    let content = read_all(&mut image);
    assert_eq!(content.len(), 2 * 1024 * 1024);
    assert!(content.iter().all(|&b| b == 0xAA));
}

/// E3 Dynamic sparse hole.
#[test]
fn e3_dynamic_sparse_hole() {
    let block_size = 2 * 1024 * 1024u32;
    let current_size = 2 * block_size as u64;
    let frame0 = fully_allocated_frame(block_size as usize, 0x11);

    let file = build_dynamic_image(3, current_size, block_size, &[Some(frame0), None], [0; 16], "", [0x33; 16]);

    let stream: Box<dyn ReadSeek> = Box::new(Cursor::new(file));
    let mut image = VhdImage::open(stream, &NoParent, &OpenOptions::default()).unwrap();

    let content = read_all(&mut image);
    assert_eq!(content.len(), 4 * 1024 * 1024);
    assert!(content[..2 * 1024 * 1024].iter().all(|&b| b == 0x11));
    assert!(content[2 * 1024 * 1024..].iter().all(|&b| b == 0));
}

/// E4 Differencing overlay: the parent is E2 (a single 0xAA-filled block),
/// the child allocates one block whose bitmap sets only the even sectors,
/// filled with 0x55 (the odd sectors fall through to the parent's 0xAA).
#[test]
fn e4_differencing_overlay() {
    let block_size = 2 * 1024 * 1024u32;
    let current_size = block_size as u64;
    let parent_uid = [0x44; 16];

    let parent_frame = fully_allocated_frame(block_size as usize, 0xAA);
    let parent_file = build_dynamic_image(3, current_size, block_size, &[Some(parent_frame)], [0; 16], "", parent_uid);

    // 0xAA's bit pattern (1010_1010) sets, MSB-first, every even sector
    // index within each byte of 8 sectors: exactly "even sectors set".
    let bitmap_size = bitmap_size_for(block_size as usize);
    let mut child_frame = vec![0xAAu8; bitmap_size];
    child_frame.extend(vec![0x55u8; block_size as usize]);

    let child_file = build_dynamic_image(
        4,
        current_size,
        block_size,
        &[Some(child_frame)],
        parent_uid,
        "parent.vhd",
        [0x45; 16],
    );

    let mut resolver_map = HashMap::new();
    resolver_map.insert("parent.vhd", parent_file);
    let resolver = MapResolver(resolver_map);

    let stream: Box<dyn ReadSeek> = Box::new(Cursor::new(child_file));
    let mut image = VhdImage::open(stream, &resolver, &OpenOptions::default()).unwrap();
    assert_eq!(image.properties().error_message, None);

    let content = read_all(&mut image);
    assert_eq!(content.len(), 2 * 1024 * 1024);
    for sector in 0..4096usize {
        let expected = if sector % 2 == 0 { 0x55 } else { 0xAA };
        let sector_bytes = &content[sector * 512..sector * 512 + 512];
        assert!(
            sector_bytes.iter().all(|&b| b == expected),
            "sector {sector} expected all {expected:#x}"
        );
    }
}

/// E5 Missing parent: Open still succeeds and records the annotation, but
/// the logical read stream itself must fail once the chain is incomplete.
#[test]
fn e5_missing_parent_fails_the_read_stream() {
    let block_size = 512u32;
    let current_size = block_size as u64;
    let file = build_dynamic_image(4, current_size, block_size, &[None], [0x66; 16], "missing.vhd", [0x55; 16]);

    let resolver = MapResolver(HashMap::new());
    let stream: Box<dyn ReadSeek> = Box::new(Cursor::new(file));
    let mut image = VhdImage::open(stream, &resolver, &OpenOptions::default()).unwrap();

    assert_eq!(
        image.properties().error_message.as_deref(),
        Some("Can't open parent VHD file:\nmissing.vhd")
    );

    let mut buf = [0u8; 1];
    assert!(image.content().read(&mut buf).is_err());
}

/// E6 Extra-zero-sector before backup footer: the opener's claimed physical
/// extent (`phy_size`) lands on a zero sector instead of the backup footer;
/// tolerating that quirk means looking one sector further for the footer.
#[test]
fn e6_extra_zero_sector_before_backup_footer() {
    let data_offset = 512u64;
    let table_offset = data_offset + DYN_HEADER_SIZE as u64; // 1536
    let current_size = 512u64; // one 512-byte block, block_size_log = 9
    let block_size = 512u32;

    let footer = build_footer(&FooterSpec { disk_type: 3, current_size, data_offset, uid: [0x77; 16] });
    let dyn_header = build_dyn_header(&DynHeaderSpec {
        table_offset,
        num_blocks: 1,
        block_size,
        parent_uid: [0; 16],
        parent_name: "",
    });
    let bat = build_bat(1, &[UNUSED_BLOCK]); // unallocated: no block frame needed

    // footer(512) + dyn_header(1024) + bat(512) = 2048 = 0x800, matching the
    // opener's claimed phy_size before backup-footer verification.
    let mut file = Vec::new();
    file.extend_from_slice(&footer);
    file.extend_from_slice(&dyn_header);
    file.extend_from_slice(&bat);
    assert_eq!(file.len(), 0x800);

    file.extend_from_slice(&[0u8; SECTOR_SIZE]); // the extra zero sector
    file.extend_from_slice(&footer); // byte-identical backup footer
    file.extend_from_slice(&[0xCCu8; SECTOR_SIZE]); // trailing junk past the archive

    let stream: Box<dyn ReadSeek> = Box::new(Cursor::new(file));
    let image = VhdImage::open(stream, &NoParent, &OpenOptions::default()).unwrap();

    assert_eq!(image.properties().error_message, None);
    assert_eq!(image.properties().phy_size, 0x800 + SECTOR_SIZE as u64 + FOOTER_SIZE as u64);
}

#[test]
fn rejects_corrupted_footer_checksum() {
    let footer = build_footer(&FooterSpec { disk_type: 2, current_size: 512, data_offset: u64::MAX, uid: [0x99; 16] });
    let mut file = vec![0u8; 512];
    file.extend_from_slice(&footer);
    // Flip a byte inside the checksummed size field (well past the 10-byte
    // signature), leaving the signature intact but the checksum stale.
    file[512 + 0x30] ^= 1;

    let stream: Box<dyn ReadSeek> = Box::new(Cursor::new(file));
    assert!(VhdImage::open(stream, &NoParent, &OpenOptions::default()).is_err());
}

#[test]
fn reserved_tail_strictness_is_configurable() {
    let mut footer = build_footer(&FooterSpec { disk_type: 2, current_size: 512, data_offset: u64::MAX, uid: [0xAA; 16] });
    footer[0x100] = 1; // dirty a reserved byte
    let checksum = checksum_of(&footer, 0x40);
    footer[0x40..0x44].copy_from_slice(&checksum.to_be_bytes());

    let mut file = vec![0u8; 512];
    file.extend_from_slice(&footer);

    let strict: Box<dyn ReadSeek> = Box::new(Cursor::new(file.clone()));
    let strict_opts = OpenOptions { strict_reserved: true, ..OpenOptions::default() };
    assert!(VhdImage::open(strict, &NoParent, &strict_opts).is_err());

    let tolerant: Box<dyn ReadSeek> = Box::new(Cursor::new(file));
    let tolerant_opts = OpenOptions { strict_reserved: false, ..OpenOptions::default() };
    assert!(VhdImage::open(tolerant, &NoParent, &tolerant_opts).is_ok());
}
