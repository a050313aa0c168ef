//! VHD container format: footer, dynamic header, BAT, and the readers and
//! opener built on top of them.

mod bat;
mod byte_reader;
mod dynamic_header;
mod fixed;
mod footer;
mod image;
mod opener;
mod parent;
mod parent_locator;
mod sparse;
mod timestamp;

pub use image::{OpenOptions, VhdImage, VhdProperties};
