//! Decoder for the VHD (Virtual Hard Disk) container format: footer and
//! dynamic-header parsing, block-allocation-table-driven sparse reads, and
//! differencing-disk parent resolution.

pub mod vhd;

pub use vhd::{OpenOptions, VhdImage, VhdProperties};
