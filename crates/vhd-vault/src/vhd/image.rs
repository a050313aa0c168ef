//! `VhdImage`: the `Vault` facade over a VHD container. Resolves the
//! physical layout (`opener`), the parent chain for differencing disks
//! (`parent`), and exposes the decoded archive-level properties.

use std::io::{self, ErrorKind};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use vhd_core::{ParentResolver, ReadSeek, Result, Vault};

use super::fixed::FixedWindow;
use super::footer::DiskType;
use super::opener::{self, Opened};
use super::parent;
use super::sparse::SparseReader;
use super::timestamp;

pub use super::opener::OpenOptions;

/// Stands in for the content reader of a Differencing image whose parent
/// chain could not be resolved. The spec requires that *opening* such an
/// image still succeeds (the annotation on `VhdProperties::error_message`
/// is enough for a caller to learn why), but every attempt to actually read
/// from it must fail rather than silently return zeroed parent data.
struct BrokenChainReader;

impl io::Read for BrokenChainReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(ErrorKind::NotFound, "VHD parent chain is incomplete"))
    }
}

impl io::Seek for BrokenChainReader {
    fn seek(&mut self, _pos: io::SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(ErrorKind::NotFound, "VHD parent chain is incomplete"))
    }
}

/// Decoded archive-level properties of an opened VHD, mirroring the
/// property set a surrounding archive framework would ask for by ID.
#[derive(Debug, Clone)]
pub struct VhdProperties {
    pub disk_type: &'static str,
    /// The bare type name of the root ancestor of a Differencing chain
    /// ("?" if the chain is broken); equal to `disk_type` for Fixed/Dynamic.
    pub root_type: &'static str,
    /// `disk_type`, with " -> <root ancestor type>" appended for a
    /// Differencing image (root is "?" if the chain is broken).
    pub method: String,
    pub current_size: u64,
    /// Physical bytes actually backing the logical content: `current_size`
    /// for Fixed, `num_used_blocks * block_size` for Dynamic/Differencing.
    pub pack_size: u64,
    /// Block size, for Dynamic/Differencing images only.
    pub cluster_size: Option<u32>,
    /// Computed physical span of the archive within its source stream,
    /// including the trailing footer (and any tolerated extra sector).
    pub phy_size: u64,
    /// Start offset of the archive within its source stream.
    pub offset: u64,
    pub creation_time: DateTime<Utc>,
    pub creation_time_raw_utc: DateTime<Utc>,
    /// Trimmed creator-app tag plus its `major.minor` version.
    pub creator_app: String,
    pub creator_version: (u16, u16),
    pub creator_host_os: String,
    pub id: String,
    pub saved_state: bool,
    pub geometry: (u16, u8, u8),
    pub parent_id: Option<String>,
    /// " -> "-joined chain of ancestor parent names, for Differencing only.
    pub parent_chain: Option<String>,
    pub error_message: Option<String>,
}

pub struct VhdImage {
    properties: VhdProperties,
    content: Box<dyn ReadSeek>,
}

impl VhdImage {
    pub fn open(
        mut stream: Box<dyn ReadSeek>,
        resolver: &dyn ParentResolver,
        options: &OpenOptions,
    ) -> Result<Self> {
        let opened = opener::open(stream.as_mut(), options)?;
        Self::assemble(stream, opened, resolver, options, 0)
    }

    fn assemble(
        stream: Box<dyn ReadSeek>,
        opened: Opened,
        resolver: &dyn ParentResolver,
        options: &OpenOptions,
        depth: u32,
    ) -> Result<Self> {
        let mut annotations = opened.annotations;
        for note in &annotations {
            warn!(target: "vhd_vault::open", %note, "VHD open annotation");
        }

        let mut pack_size = opened.footer.current_size;
        let mut cluster_size = None;
        let mut root_type: &'static str = opened.footer.disk_type.name();
        let mut parent_chain = None;

        let content: Box<dyn ReadSeek> = match opened.footer.disk_type {
            DiskType::Fixed => {
                debug!(target: "vhd_vault::open", size = opened.footer.current_size, "opened fixed VHD");
                Box::new(FixedWindow::new(stream, opened.start_offset, opened.footer.current_size)?)
            }
            DiskType::Dynamic | DiskType::Differencing => {
                let header = opened
                    .dynamic_header
                    .as_ref()
                    .expect("sparse disk type always carries a dynamic header");
                let bat = opened.bat.expect("sparse disk type always carries a BAT");

                cluster_size = Some(header.block_size());
                pack_size = bat.num_used_blocks() as u64 * header.block_size() as u64;

                let mut chain_broken = false;

                let parent_stream: Option<Box<dyn ReadSeek>> = if opened.footer.disk_type == DiskType::Differencing {
                    if depth + 1 >= options.max_parent_depth {
                        return Err(vhd_core::Error::DepthExceeded);
                    } else {
                        let (resolved, mut errs) = parent::resolve(
                            resolver,
                            opened.relative_parent_name.as_deref(),
                            &header.parent_name,
                            header.parent_uid,
                            options,
                        );
                        match resolved {
                            Some(r) => {
                                debug!(
                                    target: "vhd_vault::open",
                                    via_relative_name = r.used_relative_name,
                                    "resolved VHD parent"
                                );
                                let parent_image =
                                    Self::assemble(r.stream, r.opened, resolver, options, depth + 1)?;
                                root_type = parent_image.properties.root_type;
                                let own_name = preferred_name(
                                    opened.relative_parent_name.as_deref(),
                                    &header.parent_name,
                                );
                                parent_chain = Some(match &parent_image.properties.parent_chain {
                                    Some(rest) => format!("{own_name} -> {rest}"),
                                    None => own_name,
                                });
                                Some(parent_image.content)
                            }
                            None => {
                                warn!(target: "vhd_vault::open", "failed to resolve VHD parent");
                                annotations.append(&mut errs);
                                root_type = "?";
                                parent_chain = Some(preferred_name(
                                    opened.relative_parent_name.as_deref(),
                                    &header.parent_name,
                                ));
                                chain_broken = true;
                                None
                            }
                        }
                    }
                } else {
                    None
                };

                if chain_broken {
                    Box::new(BrokenChainReader)
                } else {
                    Box::new(SparseReader::new(
                        stream,
                        opened.start_offset,
                        opened.footer.current_size,
                        header,
                        bat,
                        parent_stream,
                    ))
                }
            }
        };

        let header = opened.dynamic_header.as_ref();
        let method = if opened.footer.disk_type == DiskType::Differencing {
            format!("{} -> {}", opened.footer.disk_type.name(), root_type)
        } else {
            opened.footer.disk_type.name().to_string()
        };
        let (version_major, version_minor) = opened.footer.creator_version_parts();
        let properties = VhdProperties {
            disk_type: opened.footer.disk_type.name(),
            root_type,
            method,
            current_size: opened.footer.current_size,
            pack_size,
            cluster_size,
            phy_size: opened.phy_size,
            offset: opened.start_offset,
            creation_time: timestamp::ctime(opened.footer.creation_time),
            creation_time_raw_utc: timestamp::ctime_raw_utc(opened.footer.creation_time),
            creator_app: format!("{} {}.{}", ascii_truncate(&opened.footer.creator_app), version_major, version_minor),
            creator_version: (version_major, version_minor),
            creator_host_os: host_os_name(opened.footer.creator_host_os),
            id: hex::encode_upper(opened.footer.uid),
            saved_state: opened.footer.saved_state != 0,
            geometry: (
                opened.footer.geometry.cylinders,
                opened.footer.geometry.heads,
                opened.footer.geometry.sectors_per_track,
            ),
            parent_id: header.map(|h| hex::encode_upper(h.parent_uid)),
            parent_chain,
            error_message: if annotations.is_empty() { None } else { Some(annotations.join("\n")) },
        };

        Ok(Self { properties, content })
    }

    pub fn properties(&self) -> &VhdProperties {
        &self.properties
    }
}

impl Vault for VhdImage {
    fn identify(&self) -> &str {
        "VHD"
    }

    fn length(&self) -> u64 {
        self.properties.current_size
    }

    fn content(&mut self) -> &mut dyn ReadSeek {
        self.content.as_mut()
    }
}

/// The "main (alternate)" naming a differencing level contributes to its
/// chain: the relative locator name when present, else the header's
/// absolute name, with the other one parenthesized if it differs.
fn preferred_name(relative: Option<&str>, absolute: &str) -> String {
    match relative {
        Some(rel) if rel != absolute => format!("{rel} ({absolute})"),
        Some(rel) => rel.to_string(),
        None => absolute.to_string(),
    }
}

fn ascii_truncate(bytes: &[u8]) -> String {
    bytes.iter().take_while(|&&b| (0x20..=0x7E).contains(&b)).map(|&b| b as char).collect()
}

fn host_os_name(raw: [u8; 4]) -> String {
    if raw == *b"Wi2k" {
        "Windows".to_string()
    } else {
        ascii_truncate(&raw)
    }
}
