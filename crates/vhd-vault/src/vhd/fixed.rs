//! Window reader for Fixed-layout VHD images: the logical content is just
//! the first `current_size` bytes of the underlying stream, with the
//! trailing 512-byte footer sliced off.

use std::io::{self, Read, Seek, SeekFrom};

use vhd_core::ReadSeek;

/// Clamps an inner stream to `[start, start + length)`, translating every
/// seek/read so the caller sees a zero-based view of just that window.
pub struct FixedWindow<S> {
    inner: S,
    start: u64,
    length: u64,
    pos: u64,
}

impl<S: ReadSeek> FixedWindow<S> {
    pub fn new(mut inner: S, start: u64, length: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self { inner, start, length, pos: 0 })
    }
}

impl<S: ReadSeek> Read for FixedWindow<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.length.saturating_sub(self.pos);
        if remaining == 0 {
            return Ok(0);
        }
        let cap = remaining.min(buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..cap])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<S: ReadSeek> Seek for FixedWindow<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => self.length as i64 + delta,
        };
        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start of fixed VHD window"));
        }
        let new_pos = new_pos as u64;
        self.inner.seek(SeekFrom::Start(self.start + new_pos))?;
        self.pos = new_pos;
        Ok(new_pos)
    }
}
