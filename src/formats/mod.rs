//! The actual generic interface to access the underlying image
//! format. This interface is exposed publicaly to make it possible
//! for the users to add their own custom formats and extensions if
//! they desire.

use std::io::{Read, Seek};

use crate::output::SectorTag;
use crate::{ImageError, ImageResult};

pub mod diskcopy42;
pub mod udif;
pub mod vmware;

/// Anything we can read images from
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Physical media an image was made from
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MediaType {
    /// Apple 400K single sided 3.5" floppy
    AppleSonySS,
    /// Apple 800K double sided 3.5" floppy
    AppleSonyDS,
    /// 720K double sided double density 3.5" floppy, 9 sectors per track
    Dos35DsDd9,
    /// 1440K high density 3.5" floppy
    Dos35Hd,
    /// Microsoft Distribution Media Format, 1680K
    Dmf,
    /// Apple "Twiggy" FileWare 5.25" floppy
    AppleFileWare,
    /// Apple ProFile hard disk
    AppleProfile,
    /// Apple Widget hard disk
    AppleWidget,
    /// Apple HD20 hard disk
    AppleHd20,
    /// Priam DataTower hard disk
    PriamDataTower,
    /// Generic hard disk
    GenericHdd,
    /// Unknown media
    Unknown,
}

impl MediaType {
    /// Nominal geometry as (cylinders, heads, sectors per track)
    pub fn geometry(self) -> Option<(u32, u32, u32)> {
        let g = match self {
            MediaType::AppleSonySS => (80, 1, 10),
            MediaType::AppleSonyDS => (80, 2, 10),
            MediaType::Dos35DsDd9 => (80, 2, 9),
            MediaType::Dos35Hd => (80, 2, 18),
            MediaType::Dmf => (80, 2, 21),
            MediaType::AppleFileWare => (46, 2, 22),
            MediaType::AppleWidget => (608, 2, 32),
            MediaType::AppleHd20 => (610, 2, 32),
            _ => return None,
        };

        Some(g)
    }
}

/// Description of an opened image
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ImageInfo {
    /// Number of sectors
    pub sectors: u64,
    /// Size of a sector in bytes
    pub sector_size: u32,
    /// Size of the user data in bytes
    pub image_size: u64,
    /// Media the image was made from
    pub media_type: MediaType,
    /// Number of cylinders
    pub cylinders: u32,
    /// Number of heads
    pub heads: u32,
    /// Sectors per track
    pub sectors_per_track: u32,
    /// Application that created the image, if known
    pub application: Option<String>,
    /// Free form comments (disk name, descriptor comments...)
    pub comments: Option<String>,
    /// Sector tags that can be read
    pub readable_tags: Vec<SectorTag>,
}

impl ImageInfo {
    /// Describe an image of `sectors` sectors of `sector_size` bytes with geometry derived from
    /// `media_type`, or from a 16 heads 63 sectors per track translation if unknown
    pub fn new(sectors: u64, sector_size: u32, media_type: MediaType) -> ImageInfo {
        let (cylinders, heads, sectors_per_track) = media_type
            .geometry()
            .unwrap_or_else(|| ((sectors / 16 / 63) as u32, 16, 63));

        ImageInfo {
            sectors,
            sector_size,
            image_size: sectors * u64::from(sector_size),
            media_type,
            cylinders,
            heads,
            sectors_per_track,
            application: None,
            comments: None,
            readable_tags: Vec::new(),
        }
    }
}

/// Abstract interface to an image format
pub trait MediaImage {
    /// Return a string identifying the image format in a
    /// human-readable way. If the backend is daisy-chained it should
    /// mention the underlying image format as well.
    fn format_name(&self) -> String;

    /// Return the description of the image
    fn info(&self) -> &ImageInfo;

    /// Read the user data of sector `address`
    fn read_sector(&mut self, address: u64) -> ImageResult<Vec<u8>>;

    /// Read `count` consecutive sectors starting at `address`
    fn read_sectors(&mut self, address: u64, count: u32) -> ImageResult<Vec<u8>> {
        check_range(self.info(), address, count)?;

        let mut data = Vec::with_capacity(count as usize * self.info().sector_size as usize);

        for s in address..address + u64::from(count) {
            data.extend_from_slice(&self.read_sector(s)?);
        }

        Ok(data)
    }

    /// Read the tag of sector `address`
    fn read_sector_tag(&mut self, _address: u64, _tag: SectorTag) -> ImageResult<Vec<u8>> {
        Err(ImageError::NoSuchTag)
    }
}

/// Make sure `count` sectors starting at `address` exist in the image
pub fn check_range(info: &ImageInfo, address: u64, count: u32) -> ImageResult<()> {
    match address.checked_add(u64::from(count)) {
        Some(end) if end <= info.sectors && (count > 0 || address < info.sectors) => Ok(()),
        _ => Err(ImageError::SectorOutOfRange {
            address,
            sectors: info.sectors,
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn range() {
        let info = ImageInfo::new(100, 512, MediaType::GenericHdd);

        assert!(check_range(&info, 0, 100).is_ok());
        assert!(check_range(&info, 99, 1).is_ok());
        assert!(check_range(&info, 99, 2).is_err());
        assert!(check_range(&info, 100, 0).is_err());
        assert!(check_range(&info, u64::MAX, 2).is_err());
    }

    #[test]
    fn geometry() {
        let info = ImageInfo::new(1600, 512, MediaType::AppleSonyDS);

        assert_eq!((info.cylinders, info.heads, info.sectors_per_track), (80, 2, 10));
        assert_eq!(info.image_size, 819200);
    }
}
