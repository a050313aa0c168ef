//! Sparse block reader for Dynamic and Differencing VHD images: resolves a
//! logical byte offset through the BAT and the per-block sector bitmap,
//! falling back to a parent image or a zero fill.

use std::io::{self, Read, Seek, SeekFrom};

use vhd_core::{Error, ReadSeek};

use super::bat::Bat;
use super::dynamic_header::DynamicHeader;

const SECTOR_SIZE: u64 = 512;

pub struct SparseReader<S> {
    inner: S,
    start_offset: u64,
    current_size: u64,
    block_size_log: u32,
    bitmap_size: u64,
    bat: Bat,
    parent: Option<Box<dyn ReadSeek>>,
    virt_pos: u64,
    cached_block: Option<u32>,
    bitmap: Vec<u8>,
}

impl<S: ReadSeek> SparseReader<S> {
    pub fn new(
        inner: S,
        start_offset: u64,
        current_size: u64,
        header: &DynamicHeader,
        bat: Bat,
        parent: Option<Box<dyn ReadSeek>>,
    ) -> Self {
        Self {
            inner,
            start_offset,
            current_size,
            block_size_log: header.block_size_log,
            bitmap_size: header.bitmap_size() as u64,
            bat,
            parent,
            virt_pos: 0,
            cached_block: None,
            bitmap: Vec::new(),
        }
    }

    fn block_size(&self) -> u64 {
        1u64 << self.block_size_log
    }

    fn sector_allocated(&mut self, block_index: u32, sector_in_block: u64) -> io::Result<bool> {
        if self.cached_block != Some(block_index) {
            let frame_offset = self
                .bat
                .frame_offset(block_index as usize)
                .expect("sector_allocated called on an unallocated block");
            let mut bitmap = vec![0u8; self.bitmap_size as usize];
            self.inner.seek(SeekFrom::Start(self.start_offset + frame_offset))?;
            self.inner.read_exact(&mut bitmap)?;
            self.bitmap = bitmap;
            self.cached_block = Some(block_index);
        }
        let bmi = sector_in_block as usize;
        let byte = self.bitmap[bmi >> 3];
        Ok((byte >> (7 - (bmi & 7))) & 1 == 1)
    }

    fn read_from_parent(&mut self, virt_pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.parent {
            Some(parent) => {
                parent.seek(SeekFrom::Start(virt_pos))?;
                parent.read(buf)
            }
            None => {
                buf.fill(0);
                Ok(buf.len())
            }
        }
    }

    fn read_clipped(&mut self, virt_pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        let block_size = self.block_size();
        let block_index = (virt_pos >> self.block_size_log) as u32;
        let offset_in_block = virt_pos % block_size;
        let sector_in_block = offset_in_block / SECTOR_SIZE;
        let offset_in_sector = offset_in_block % SECTOR_SIZE;

        let cap = buf.len() as u64;
        let to_sector_end = SECTOR_SIZE - offset_in_sector;
        let n = cap.min(to_sector_end) as usize;
        let buf = &mut buf[..n];

        match self.bat.frame_offset(block_index as usize) {
            None => self.read_from_parent(virt_pos, buf),
            Some(frame_offset) => {
                let allocated = self.sector_allocated(block_index, sector_in_block)?;
                if allocated {
                    let data_offset = self.start_offset
                        + frame_offset
                        + self.bitmap_size
                        + sector_in_block * SECTOR_SIZE
                        + offset_in_sector;
                    self.inner.seek(SeekFrom::Start(data_offset))?;
                    self.inner.read(buf)
                } else if self.parent.is_some() {
                    self.read_from_parent(virt_pos, buf)
                } else {
                    let data_offset = self.start_offset
                        + frame_offset
                        + self.bitmap_size
                        + sector_in_block * SECTOR_SIZE
                        + offset_in_sector;
                    self.inner.seek(SeekFrom::Start(data_offset))?;
                    self.inner.read_exact(buf)?;
                    if !buf.iter().all(|&b| b == 0) {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            Error::invalid("VHD sector marked absent from its block but is not zero"),
                        ));
                    }
                    Ok(buf.len())
                }
            }
        }
    }
}

impl<S: ReadSeek> Read for SparseReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.virt_pos > self.current_size {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "read position past end of VHD image"));
        }
        let remaining = self.current_size - self.virt_pos;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let cap = remaining.min(buf.len() as u64) as usize;
        let n = self.read_clipped(self.virt_pos, &mut buf[..cap])?;
        self.virt_pos += n as u64;
        Ok(n)
    }
}

impl<S: ReadSeek> Seek for SparseReader<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(delta) => self.virt_pos as i64 + delta,
            SeekFrom::End(delta) => self.current_size as i64 + delta,
        };
        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start of VHD image"));
        }
        self.virt_pos = new_pos as u64;
        Ok(self.virt_pos)
    }
}
