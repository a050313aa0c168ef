//! Core traits the decoder is parametric over.

use crate::error::Result;
use std::io::{Read, Seek};

/// Combined trait for Read + Seek, the one capability set both the source
/// stream and the produced logical stream need to satisfy.
pub trait ReadSeek: Read + Seek + Send {}

/// Blanket implementation for any type that implements Read + Seek + Send.
impl<T: Read + Seek + Send> ReadSeek for T {}

/// A thin facade binding an opened container to the properties a
/// surrounding archive framework asks for. The framework itself — property
/// routing, extraction progress, test/extract commands — is out of scope
/// here; this trait is only the contract it relies on.
pub trait Vault: Send {
    /// Human-readable identifier for this vault's format.
    fn identify(&self) -> &str;

    /// Total logical size of the vault's content in bytes.
    fn length(&self) -> u64;

    /// A readable, seekable stream over the vault's logical content.
    fn content(&mut self) -> &mut dyn ReadSeek;
}

/// Host-supplied volume callback used to resolve a differencing image's
/// parent by name. The decoder performs no filesystem I/O itself; every
/// attempt to open a named ancestor goes through this collaborator.
pub trait ParentResolver {
    /// Open a stream for the named ancestor, or return `Ok(None)` if no
    /// such volume exists. An `Err` aborts the whole open.
    fn open(&self, name: &str) -> Result<Option<Box<dyn ReadSeek>>>;
}
