//! Preservation tooling for optical and magnetic disc images.
//!
//! The core of the crate is the CD subchannel repair engine found in
//! [`subchannel`]: given raw, possibly corrupted P/Q/R-W subchannel data
//! it decodes the Q timing, index, ISRC and MCN information, repairs
//! damaged Q blocks using the redundancy between neighbouring sectors,
//! keeps the track layout up to date as pregaps and indexes are
//! discovered and synthesizes subchannel for sectors that have none.
//!
//! The [`formats`] module provides random sector access to DiskCopy 4.2,
//! UDIF (DMG) and VMware (VMDK/COWD) disk images.

#![warn(missing_docs)]

#[macro_use]
extern crate arrayref;

pub use bcd::Bcd;
pub use msf::Msf;
pub use output::{SectorTag, WritableOpticalImage};
pub use track::{Track, TrackLayout, TrackType};

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub mod bcd;
pub mod cache;
pub mod crc;
pub mod formats;
pub mod internal;
pub mod msf;
pub mod output;
pub mod subchannel;
pub mod track;

#[cfg(test)]
mod tests;

/// Error type for image and disc operations.
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Generic I/O error")]
    IoError(#[from] io::Error),
    #[error("Malformed binary structure: {0}")]
    BinRw(#[from] binrw::Error),
    #[error("Not a valid {format} image: {desc}")]
    BadImage { format: &'static str, desc: String },
    #[error("Unsupported feature: {0}")]
    Unsupported(String),
    #[error("Sector {address} is out of range (image has {sectors} sectors)")]
    SectorOutOfRange { address: u64, sectors: u64 },
    #[error("Extent file `{0}` could not be found")]
    MissingExtent(PathBuf),
    #[error("Parent image `{0}` could not be found")]
    MissingParent(PathBuf),
    #[error("Corrupted resource fork or property list: {0}")]
    CorruptResourceFork(String),
    #[error("Decompression failed: {0}")]
    Decompression(String),
    #[error("Attempted to parse invalid BCD data")]
    BadBcd,
    #[error("Invalid MSF timestamp")]
    InvalidMsf,
    #[error("Attempted to access an invalid track number")]
    BadTrack,
    #[error("Empty table of contents")]
    EmptyToc,
    #[error("Sector tag is not available in this image")]
    NoSuchTag,
    #[error("Invalid sector data length {got}, expected {expected}")]
    BadDataLength { got: usize, expected: usize },
    #[error("Image has already been closed")]
    NotWritable,
}

impl ImageError {
    /// Shorthand to build a `BadImage` error
    pub fn bad_image<S: Into<String>>(format: &'static str, desc: S) -> ImageError {
        ImageError::BadImage {
            format,
            desc: desc.into(),
        }
    }

    /// Shorthand to build an `Unsupported` error
    pub fn unsupported<S: Into<String>>(desc: S) -> ImageError {
        ImageError::Unsupported(desc.into())
    }
}

/// Convenience type alias for a `Result<R, ImageError>`
pub type ImageResult<R> = std::result::Result<R, ImageError>;

#[test]
fn image_error_display() {
    // Make sure that ImageError implements Display. This should be true if we set an
    // `#[error("...")]` for every variant
    println!("{}", ImageError::BadTrack);
    println!("{}", ImageError::bad_image("UDIF", "bad magic"));
}
