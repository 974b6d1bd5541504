//! Apple DiskCopy 4.2 image format implementation
//!
//! The image starts with a 84 byte big-endian header, followed by the
//! sector data and then the sector tags (12, 20 or 24 bytes per
//! sector, used by the Lisa and some Macintosh filesystems). There's
//! no indirection: sector `n` lives at `0x54 + n * 512`.
//!
//! Both the data and the tags are protected by a checksum computed
//! by adding each big-endian 16-bit word to the sum and rotating it
//! right by one bit.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use binrw::{binrw, BinReaderExt, BinWriterExt};
use log::{debug, error, info, warn};

use super::{check_range, ImageInfo, MediaImage, MediaType};
use crate::output::SectorTag;
use crate::{ImageError, ImageResult};

/// Size of the header, and offset of the sector data
pub const HEADER_SIZE: u64 = 0x54;

const SECTOR_SIZE: usize = 512;

const FORMAT_400K: u8 = 0x00;
const FORMAT_800K: u8 = 0x01;
const FORMAT_720K: u8 = 0x02;
const FORMAT_1440K: u8 = 0x03;
const FORMAT_1680K: u8 = 0x04;
const FORMAT_TWIGGY: u8 = 0x54;
const FORMAT_NOT_STANDARD: u8 = 0x5d;

const FMT_BYTE_MAC_OS_X: u8 = 0x00;
const FMT_BYTE_TWIGGY: u8 = 0x01;
const FMT_BYTE_400K: u8 = 0x02;
const FMT_BYTE_800K_INCORRECT: u8 = 0x12;
const FMT_BYTE_800K: u8 = 0x22;
const FMT_BYTE_PRODOS: u8 = 0x24;
const FMT_BYTE_NOT_STANDARD: u8 = 0x93;
/// Written by some broken tools, the image can't be trusted
const FMT_BYTE_INVALID: u8 = 0x96;

/// Tag bytes not covered by the tag checksum
const TAG_CHECKSUM_SKIP: usize = 12;

/// Sectors per side of a Twiggy disk
const TWIGGY_SIDE_SECTORS: u64 = 851;

/// Sectors per track on a Twiggy disk, from the outer zone inwards, as
/// (tracks, sectors per track)
const TWIGGY_ZONES: [(usize, usize); 8] = [
    (4, 22),
    (7, 21),
    (6, 20),
    (6, 19),
    (6, 18),
    (6, 17),
    (7, 16),
    (4, 15),
];

/// MFS master directory block signature
const MFS_SIGNATURE: [u8; 2] = [0xd2, 0xd7];

#[binrw]
#[derive(Clone, Debug)]
struct Header {
    /// Disk name as a Pascal string
    name: [u8; 64],
    data_size: u32,
    tag_size: u32,
    data_checksum: u32,
    tag_checksum: u32,
    format: u8,
    fmt_byte: u8,
    valid: u8,
    reserved: u8,
}

impl Header {
    fn name(&self) -> String {
        let len = (self.name[0] as usize).min(63);

        String::from_utf8_lossy(&self.name[1..1 + len]).into_owned()
    }

    fn sizes_match(&self, len: u64) -> bool {
        u64::from(self.data_size) + u64::from(self.tag_size) + HEADER_SIZE == len
    }
}

/// Compute the DiskCopy checksum of `data`
pub fn checksum(data: &[u8]) -> u32 {
    data.chunks_exact(2).fold(0u32, |sum, w| {
        sum.wrapping_add(u32::from(u16::from_be_bytes([w[0], w[1]])))
            .rotate_right(1)
    })
}

/// Checksum of the tags, the tags of the first sector are not included
pub fn tag_checksum(tags: &[u8]) -> u32 {
    checksum(tags.get(TAG_CHECKSUM_SKIP..).unwrap_or(&[]))
}

fn read_header<R: Read + Seek>(stream: &mut R) -> ImageResult<Option<Header>> {
    let len = stream.seek(SeekFrom::End(0))?;

    if len < HEADER_SIZE {
        return Ok(None);
    }

    let mut buf = [0u8; HEADER_SIZE as usize];
    stream.seek(SeekFrom::Start(0))?;
    stream.read_exact(&mut buf)?;

    let mut header: Header = Cursor::new(&buf[..]).read_be()?;

    if header.valid != 1 || header.reserved != 0 {
        return Ok(None);
    }

    if !header.sizes_match(len) && header.format != FORMAT_TWIGGY {
        let le: Header = Cursor::new(&buf[..]).read_le()?;

        if !le.sizes_match(len) {
            return Ok(None);
        }

        warn!("DiskCopy 4.2 header uses little-endian fields");
        header = le;
    }

    let format_ok = matches!(
        header.format,
        FORMAT_400K
            | FORMAT_800K
            | FORMAT_720K
            | FORMAT_1440K
            | FORMAT_1680K
            | FORMAT_TWIGGY
            | FORMAT_NOT_STANDARD
    );

    let fmt_byte_ok = matches!(
        header.fmt_byte,
        FMT_BYTE_MAC_OS_X
            | FMT_BYTE_TWIGGY
            | FMT_BYTE_400K
            | FMT_BYTE_800K_INCORRECT
            | FMT_BYTE_800K
            | FMT_BYTE_PRODOS
            | FMT_BYTE_NOT_STANDARD
    );

    if !format_ok || !fmt_byte_ok {
        return Ok(None);
    }

    if header.data_size == 0 || header.data_size as usize % SECTOR_SIZE != 0 {
        return Ok(None);
    }

    Ok(Some(header))
}

/// Reorder the data (or tags, with `unit` their size) of a Twiggy
/// image in logical order.
///
/// Macintosh Twiggy disks only have their two sides swapped. Lisa ones
/// store the second side track by track in reverse order.
fn twiggy_logical(raw: &[u8], unit: usize, swap_sides: bool) -> Vec<u8> {
    let half = raw.len() / 2;
    let mut out = vec![0u8; raw.len()];

    if raw.len() < 2 * TWIGGY_SIDE_SECTORS as usize * unit {
        out.copy_from_slice(raw);
        return out;
    }

    if swap_sides {
        out[..half].copy_from_slice(&raw[half..]);
        out[half..].copy_from_slice(&raw[..half]);
        return out;
    }

    out[..half].copy_from_slice(&raw[..half]);

    let mut copied = 0;

    for &(tracks, sectors) in TWIGGY_ZONES.iter() {
        for _ in 0..tracks {
            let len = sectors * unit;
            let src = half + copied * unit;
            let dst = out.len() - copied * unit - len;

            out[dst..dst + len].copy_from_slice(&raw[src..src + len]);
            copied += sectors;
        }
    }

    out
}

/// Inverse of [`twiggy_logical`] for Lisa disks
fn twiggy_physical(logical: &[u8], unit: usize) -> Vec<u8> {
    let half = logical.len() / 2;
    let mut out = vec![0u8; logical.len()];

    if logical.len() < 2 * TWIGGY_SIDE_SECTORS as usize * unit {
        out.copy_from_slice(logical);
        return out;
    }

    out[..half].copy_from_slice(&logical[..half]);

    let mut copied = 0;

    for &(tracks, sectors) in TWIGGY_ZONES.iter() {
        for _ in 0..tracks {
            let len = sectors * unit;
            let dst = half + copied * unit;
            let src = logical.len() - copied * unit - len;

            out[dst..dst + len].copy_from_slice(&logical[src..src + len]);
            copied += sectors;
        }
    }

    out
}

fn has_mfs_signature(data: &[u8], sector: usize) -> bool {
    data.get(sector * SECTOR_SIZE..sector * SECTOR_SIZE + 2) == Some(&MFS_SIGNATURE[..])
}

/// DiskCopy 4.2 image
pub struct DiskCopy42<R> {
    stream: R,
    header: Header,
    info: ImageInfo,
    /// Tag bytes per sector, 0 if the image has no tags
    bptag: usize,
    /// Twiggy images are reordered in memory as (data, tags)
    twiggy: Option<(Vec<u8>, Vec<u8>)>,
}

impl<R: Read + Seek> DiskCopy42<R> {
    /// Returns true if `stream` looks like a DiskCopy 4.2 image
    pub fn identify(stream: &mut R) -> ImageResult<bool> {
        Ok(read_header(stream)?.is_some())
    }

    /// Open a DiskCopy 4.2 image
    pub fn open(mut stream: R) -> ImageResult<DiskCopy42<R>> {
        let header = match read_header(&mut stream)? {
            Some(h) => h,
            None => return Err(ImageError::bad_image("DiskCopy 4.2", "invalid header")),
        };

        let sectors = u64::from(header.data_size) / SECTOR_SIZE as u64;

        let bptag = if header.tag_size == 0 {
            0
        } else {
            match u64::from(header.tag_size) / sectors {
                b @ (12 | 20 | 24) => b as usize,
                b => {
                    error!("Unknown DiskCopy 4.2 tag size {}", b);
                    return Err(ImageError::unsupported(format!("{} bytes sector tags", b)));
                }
            }
        };

        let media_type = match header.format {
            FORMAT_400K if sectors == 1600 => MediaType::AppleSonyDS,
            FORMAT_400K => MediaType::AppleSonySS,
            FORMAT_800K => MediaType::AppleSonyDS,
            FORMAT_720K => MediaType::Dos35DsDd9,
            FORMAT_1440K => MediaType::Dos35Hd,
            FORMAT_1680K => MediaType::Dmf,
            FORMAT_TWIGGY => MediaType::AppleFileWare,
            _ => match sectors {
                9728 | 19456 => MediaType::AppleProfile,
                38912 => MediaType::AppleWidget,
                39040 => MediaType::AppleHd20,
                48800 => MediaType::PriamDataTower,
                _ => MediaType::Unknown,
            },
        };

        let mut info = ImageInfo::new(sectors, SECTOR_SIZE as u32, media_type);
        info.application = Some("DiskCopy".to_string());
        info.comments = Some(header.name());

        if bptag > 0 {
            info.readable_tags.push(SectorTag::AppleSectorTag);
        }

        let mut image = DiskCopy42 {
            stream,
            header,
            info,
            bptag,
            twiggy: None,
        };

        if media_type == MediaType::AppleFileWare {
            image.load_twiggy()?;
        }

        info!(
            "DiskCopy 4.2 image \"{}\": {} sectors, {:?}, {} tag bytes per sector",
            image.info.comments.as_deref().unwrap_or(""),
            sectors,
            media_type,
            bptag
        );

        Ok(image)
    }

    fn read_region(&mut self, offset: u64, len: usize) -> ImageResult<Vec<u8>> {
        let mut buf = vec![0u8; len];

        self.stream.seek(SeekFrom::Start(offset))?;
        self.stream.read_exact(&mut buf)?;

        Ok(buf)
    }

    fn load_twiggy(&mut self) -> ImageResult<()> {
        if self.info.sectors != 2 * TWIGGY_SIDE_SECTORS {
            warn!(
                "Twiggy image with {} sectors, not reordering it",
                self.info.sectors
            );
            return Ok(());
        }

        let data = self.read_region(HEADER_SIZE, self.header.data_size as usize)?;
        let tags = self.read_region(
            HEADER_SIZE + u64::from(self.header.data_size),
            self.header.tag_size as usize,
        )?;

        let half = TWIGGY_SIDE_SECTORS as usize;
        let swap = has_mfs_signature(&data, half + 2) && !has_mfs_signature(&data, 2);

        debug!(
            "Twiggy image, {}",
            if swap {
                "Macintosh layout"
            } else {
                "Lisa layout"
            }
        );

        let data = twiggy_logical(&data, SECTOR_SIZE, swap);
        let tags = twiggy_logical(&tags, self.bptag.max(1), swap);

        self.twiggy = Some((data, tags));

        Ok(())
    }

    /// Recompute the data and tag checksums and compare them with
    /// the header
    pub fn verify_media_image(&mut self) -> ImageResult<bool> {
        let data = self.read_region(HEADER_SIZE, self.header.data_size as usize)?;
        let sum = checksum(&data);

        if sum != self.header.data_checksum {
            debug!(
                "Data checksum mismatch: computed {:08x}, header {:08x}",
                sum, self.header.data_checksum
            );
            return Ok(false);
        }

        if self.header.tag_size == 0 {
            return Ok(true);
        }

        let tags = self.read_region(
            HEADER_SIZE + u64::from(self.header.data_size),
            self.header.tag_size as usize,
        )?;

        let sum = tag_checksum(&tags);

        if sum != self.header.tag_checksum {
            debug!(
                "Tag checksum mismatch: computed {:08x}, header {:08x}",
                sum, self.header.tag_checksum
            );
            return Ok(false);
        }

        Ok(true)
    }

    /// Tag bytes per sector
    pub fn tag_bytes_per_sector(&self) -> usize {
        self.bptag
    }
}

impl<R: Read + Seek> MediaImage for DiskCopy42<R> {
    fn format_name(&self) -> String {
        "DiskCopy 4.2".to_string()
    }

    fn info(&self) -> &ImageInfo {
        &self.info
    }

    fn read_sector(&mut self, address: u64) -> ImageResult<Vec<u8>> {
        check_range(&self.info, address, 1)?;

        let offset = address as usize * SECTOR_SIZE;

        if let Some((data, _)) = &self.twiggy {
            return Ok(data[offset..offset + SECTOR_SIZE].to_vec());
        }

        self.read_region(HEADER_SIZE + offset as u64, SECTOR_SIZE)
    }

    fn read_sector_tag(&mut self, address: u64, tag: SectorTag) -> ImageResult<Vec<u8>> {
        if tag != SectorTag::AppleSectorTag || self.bptag == 0 {
            return Err(ImageError::NoSuchTag);
        }

        check_range(&self.info, address, 1)?;

        let offset = address as usize * self.bptag;

        if let Some((_, tags)) = &self.twiggy {
            return Ok(tags[offset..offset + self.bptag].to_vec());
        }

        let base = HEADER_SIZE + u64::from(self.header.data_size);

        self.read_region(base + offset as u64, self.bptag)
    }
}

/// Parameters DiskCopy uses to describe a medium: format, format byte
/// and tag bytes per sector
fn writer_params(media_type: MediaType, sectors: u64) -> Option<(u8, u8, usize)> {
    let p = match (media_type, sectors) {
        (MediaType::AppleSonySS, 800) => (FORMAT_400K, FMT_BYTE_400K, 12),
        (MediaType::AppleSonyDS, 1600) => (FORMAT_800K, FMT_BYTE_800K, 12),
        (MediaType::Dos35DsDd9, 1440) => (FORMAT_720K, FMT_BYTE_800K, 0),
        (MediaType::Dos35Hd, 2880) => (FORMAT_1440K, FMT_BYTE_800K, 0),
        (MediaType::Dmf, 3360) => (FORMAT_1680K, FMT_BYTE_800K, 0),
        (MediaType::AppleFileWare, 1702) => (FORMAT_TWIGGY, FMT_BYTE_TWIGGY, 12),
        (MediaType::AppleProfile, 9728 | 19456)
        | (MediaType::AppleWidget, 38912)
        | (MediaType::AppleHd20, 39040)
        | (MediaType::PriamDataTower, 48800) => (FORMAT_NOT_STANDARD, FMT_BYTE_NOT_STANDARD, 20),
        _ => return None,
    };

    Some(p)
}

/// DiskCopy 4.2 image writer. The image is kept in memory until
/// [`Dc42Writer::close`] is called.
pub struct Dc42Writer<W> {
    stream: W,
    media_type: MediaType,
    sectors: u64,
    format: u8,
    fmt_byte: u8,
    bptag: usize,
    data: Vec<u8>,
    tags: Vec<u8>,
    has_tags: bool,
    closed: bool,
}

impl<W: Write + Seek> Dc42Writer<W> {
    /// Start a new image of `sectors` sectors for `media_type`
    pub fn create(stream: W, media_type: MediaType, sectors: u64) -> ImageResult<Dc42Writer<W>> {
        let (format, fmt_byte, bptag) = match writer_params(media_type, sectors) {
            Some(p) => p,
            None => {
                return Err(ImageError::unsupported(format!(
                    "DiskCopy 4.2 can't store {:?} with {} sectors",
                    media_type, sectors
                )))
            }
        };

        Ok(Dc42Writer {
            stream,
            media_type,
            sectors,
            format,
            fmt_byte,
            bptag,
            data: vec![0; sectors as usize * SECTOR_SIZE],
            tags: vec![0; sectors as usize * bptag],
            has_tags: false,
            closed: false,
        })
    }

    fn check(&self, address: u64, count: u64) -> ImageResult<()> {
        if self.closed {
            return Err(ImageError::NotWritable);
        }

        match address.checked_add(count) {
            Some(end) if end <= self.sectors => Ok(()),
            _ => Err(ImageError::SectorOutOfRange {
                address,
                sectors: self.sectors,
            }),
        }
    }

    /// Write the user data of a sector
    pub fn write_sector(&mut self, data: &[u8], address: u64) -> ImageResult<()> {
        self.write_sectors(data, address, 1)
    }

    /// Write the user data of `count` sectors
    pub fn write_sectors(&mut self, data: &[u8], address: u64, count: u32) -> ImageResult<()> {
        self.check(address, u64::from(count))?;

        let len = count as usize * SECTOR_SIZE;

        if data.len() != len {
            return Err(ImageError::BadDataLength {
                got: data.len(),
                expected: len,
            });
        }

        let offset = address as usize * SECTOR_SIZE;
        self.data[offset..offset + len].copy_from_slice(data);

        Ok(())
    }

    /// Write the tag of a sector
    pub fn write_sector_tag(&mut self, data: &[u8], address: u64, tag: SectorTag) -> ImageResult<()> {
        if tag != SectorTag::AppleSectorTag || self.bptag == 0 {
            return Err(ImageError::NoSuchTag);
        }

        self.check(address, 1)?;

        if data.len() != self.bptag {
            return Err(ImageError::BadDataLength {
                got: data.len(),
                expected: self.bptag,
            });
        }

        let offset = address as usize * self.bptag;
        self.tags[offset..offset + self.bptag].copy_from_slice(data);
        self.has_tags = true;

        Ok(())
    }

    /// Write the header, data and tags to the stream. `name` is
    /// truncated to 63 bytes.
    pub fn close(&mut self, name: &str) -> ImageResult<()> {
        if self.closed {
            return Err(ImageError::NotWritable);
        }

        let tags: &[u8] = if self.has_tags { &self.tags } else { &[] };

        let (data, tags) = if self.media_type == MediaType::AppleFileWare {
            (
                twiggy_physical(&self.data, SECTOR_SIZE),
                twiggy_physical(tags, self.bptag),
            )
        } else {
            (self.data.clone(), tags.to_vec())
        };

        let mut pascal = [0u8; 64];
        let bytes = name.as_bytes();
        let len = bytes.len().min(63);
        pascal[0] = len as u8;
        pascal[1..1 + len].copy_from_slice(&bytes[..len]);

        let header = Header {
            name: pascal,
            data_size: data.len() as u32,
            tag_size: tags.len() as u32,
            data_checksum: checksum(&data),
            tag_checksum: if tags.is_empty() { 0 } else { tag_checksum(&tags) },
            format: self.format,
            fmt_byte: self.fmt_byte,
            valid: 1,
            reserved: 0,
        };

        self.stream.seek(SeekFrom::Start(0))?;
        self.stream.write_be(&header)?;
        self.stream.write_all(&data)?;
        self.stream.write_all(&tags)?;
        self.stream.flush()?;

        self.closed = true;

        debug!("Wrote DiskCopy 4.2 image \"{}\", {} sectors", name, self.sectors);

        Ok(())
    }

    /// Return the underlying stream
    pub fn into_inner(self) -> W {
        self.stream
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn header_bytes(data_size: u32, tag_size: u32, format: u8, fmt_byte: u8) -> Vec<u8> {
        let mut h = vec![0u8; HEADER_SIZE as usize];
        h[0] = 4;
        h[1..5].copy_from_slice(b"Test");
        h[0x40..0x44].copy_from_slice(&data_size.to_be_bytes());
        h[0x44..0x48].copy_from_slice(&tag_size.to_be_bytes());
        h[0x50] = format;
        h[0x51] = fmt_byte;
        h[0x52] = 1;
        h[0x53] = 0;
        h
    }

    #[test]
    fn open_800k() {
        let mut img = header_bytes(800 * 512, 800 * 12, FORMAT_800K, FMT_BYTE_800K);
        img.resize(HEADER_SIZE as usize + 800 * 512 + 800 * 12, 0);

        assert!(DiskCopy42::identify(&mut Cursor::new(&img)).unwrap());

        let dc = DiskCopy42::open(Cursor::new(img)).unwrap();

        assert_eq!(dc.tag_bytes_per_sector(), 12);
        assert_eq!(dc.info().sectors, 800);
        assert_eq!(dc.info().media_type, MediaType::AppleSonyDS);
        assert_eq!(dc.info().comments.as_deref(), Some("Test"));
        assert_eq!(dc.info().readable_tags, vec![SectorTag::AppleSectorTag]);
    }

    #[test]
    fn rejects_bad_headers() {
        let mut img = header_bytes(800 * 512, 0, FORMAT_800K, FMT_BYTE_INVALID);
        img.resize(HEADER_SIZE as usize + 800 * 512, 0);
        assert!(!DiskCopy42::identify(&mut Cursor::new(&img)).unwrap());

        let mut img = header_bytes(800 * 512, 0, 0x42, FMT_BYTE_800K);
        img.resize(HEADER_SIZE as usize + 800 * 512, 0);
        assert!(!DiskCopy42::identify(&mut Cursor::new(&img)).unwrap());

        // Size doesn't match the file length
        let mut img = header_bytes(800 * 512, 0, FORMAT_800K, FMT_BYTE_800K);
        img.resize(HEADER_SIZE as usize + 100, 0);
        assert!(DiskCopy42::open(Cursor::new(img)).is_err());
    }

    #[test]
    fn little_endian_header() {
        let mut img = header_bytes(0, 0, FORMAT_1440K, FMT_BYTE_PRODOS);
        img[0x40..0x44].copy_from_slice(&(2880u32 * 512).to_le_bytes());
        img.resize(HEADER_SIZE as usize + 2880 * 512, 0);

        let dc = DiskCopy42::open(Cursor::new(img)).unwrap();

        assert_eq!(dc.info().sectors, 2880);
        assert_eq!(dc.info().media_type, MediaType::Dos35Hd);
    }

    #[test]
    fn checksum_rotates() {
        assert_eq!(checksum(&[0, 1]), 0x8000_0000);
        assert_eq!(checksum(&[0, 1, 0, 1]), 0x4000_0000 + 0x8000_0000);
        assert_eq!(tag_checksum(&[0xff; 12]), 0);
    }

    #[test]
    fn write_then_read() {
        let mut w = Dc42Writer::create(Cursor::new(Vec::new()), MediaType::AppleSonyDS, 1600).unwrap();

        w.write_sector(&[0xaa; 512], 3).unwrap();
        w.write_sectors(&[0x55; 1024], 10, 2).unwrap();
        w.write_sector_tag(&[7; 12], 3, SectorTag::AppleSectorTag).unwrap();
        assert!(w.write_sector(&[0; 512], 1600).is_err());
        assert!(w.write_sector(&[0; 100], 0).is_err());

        w.close("Backup").unwrap();
        assert!(matches!(w.write_sector(&[0; 512], 0), Err(ImageError::NotWritable)));

        let buf = w.into_inner().into_inner();
        let mut dc = DiskCopy42::open(Cursor::new(buf)).unwrap();

        assert!(dc.verify_media_image().unwrap());
        assert_eq!(dc.info().comments.as_deref(), Some("Backup"));
        assert_eq!(dc.read_sector(3).unwrap(), vec![0xaa; 512]);
        assert_eq!(dc.read_sectors(10, 2).unwrap(), vec![0x55; 1024]);
        assert_eq!(dc.read_sector(0).unwrap(), vec![0; 512]);
        assert_eq!(dc.read_sector_tag(3, SectorTag::AppleSectorTag).unwrap(), vec![7; 12]);
        assert!(dc.read_sector(1600).is_err());
    }

    #[test]
    fn corrupted_data_fails_verification() {
        let mut w = Dc42Writer::create(Cursor::new(Vec::new()), MediaType::AppleSonySS, 800).unwrap();
        w.write_sector(&[1; 512], 0).unwrap();
        w.close("x").unwrap();

        let mut buf = w.into_inner().into_inner();
        buf[HEADER_SIZE as usize + 5] ^= 0x10;

        let mut dc = DiskCopy42::open(Cursor::new(buf)).unwrap();
        assert!(!dc.verify_media_image().unwrap());
    }

    #[test]
    fn lisa_twiggy_round_trip() {
        let mut w = Dc42Writer::create(Cursor::new(Vec::new()), MediaType::AppleFileWare, 1702).unwrap();

        for s in 0..1702u64 {
            let mut sector = [0u8; 512];
            sector[..8].copy_from_slice(&s.to_be_bytes());
            w.write_sector(&sector, s).unwrap();
        }

        w.close("Lisa").unwrap();
        let buf = w.into_inner().into_inner();

        // The last logical sector is stored right after the first side
        let stored = &buf[HEADER_SIZE as usize + 851 * 512..][..8];
        assert_eq!(stored, &(1702u64 - 22).to_be_bytes());

        let mut dc = DiskCopy42::open(Cursor::new(buf)).unwrap();
        assert_eq!(dc.info().media_type, MediaType::AppleFileWare);

        for s in [0u64, 850, 851, 1000, 1679, 1680, 1701] {
            assert_eq!(&dc.read_sector(s).unwrap()[..8], &s.to_be_bytes());
        }
    }

    #[test]
    fn macintosh_twiggy_swaps_sides() {
        let mut img = header_bytes(1702 * 512, 0, FORMAT_TWIGGY, FMT_BYTE_TWIGGY);
        img.resize(HEADER_SIZE as usize + 1702 * 512, 0);

        let mdb = HEADER_SIZE as usize + (851 + 2) * 512;
        img[mdb..mdb + 2].copy_from_slice(&MFS_SIGNATURE);

        let mut dc = DiskCopy42::open(Cursor::new(img)).unwrap();

        assert_eq!(&dc.read_sector(2).unwrap()[..2], &MFS_SIGNATURE);
    }
}
