//! Binary headers of the VMware sparse extents and grain table loading

use std::io::{Cursor, Read, Seek, SeekFrom};

use binrw::{binrw, BinReaderExt};

use crate::{ImageError, ImageResult};

/// Sparse extent header magic, "KDMV" little-endian
pub const VMDK_MAGIC: u32 = 0x564d_444b;
/// Legacy sparse extent header magic, "COWD" little-endian
pub const COWD_MAGIC: u32 = 0x4457_4f43;

/// Grain table entries per table in COWD extents
pub const COWD_GTES_PER_GT: u32 = 4096;

/// Largest grain table accepted
const MAX_GTES_PER_GT: u32 = COWD_GTES_PER_GT;

/// A valid newline detection sequence follows the header
pub const FLAG_VALID_NEWLINE: u32 = 1 << 0;
/// Redundant grain table is used
pub const FLAG_REDUNDANT_TABLE: u32 = 1 << 1;
/// A GTE of 1 means the grain reads as zeroes
pub const FLAG_ZEROED_GTE: u32 = 1 << 2;
/// Grains are compressed
pub const FLAG_COMPRESSED: u32 = 1 << 16;
/// Stream-optimized markers are present
pub const FLAG_MARKERS: u32 = 1 << 17;

/// Hosted sparse extent header
#[allow(missing_docs)]
#[binrw]
#[brw(little, magic = b"KDMV")]
#[derive(Clone, Debug)]
pub struct SparseHeader {
    pub version: u32,
    pub flags: u32,
    /// Sectors in the extent
    pub capacity: u64,
    /// Sectors per grain
    pub grain_size: u64,
    pub descriptor_offset: u64,
    pub descriptor_size: u64,
    pub gtes_per_gt: u32,
    pub rgd_offset: u64,
    pub gd_offset: u64,
    pub overhead: u64,
    pub unclean_shutdown: u8,
    pub newline_check: [u8; 4],
    pub compression: u16,
    pub pad: [u8; 433],
}

/// Legacy ("COWD") sparse extent header
#[allow(missing_docs)]
#[binrw]
#[brw(little, magic = b"COWD")]
#[derive(Clone, Debug)]
pub struct CowdHeader {
    pub version: u32,
    pub flags: u32,
    /// Sectors in the extent
    pub sectors: u32,
    /// Sectors per grain
    pub grain_size: u32,
    pub gd_offset: u32,
    pub gd_entries: u32,
    pub free_sector: u32,
    pub cylinders: u32,
    pub heads: u32,
    pub spt: u32,
}

/// Layout of the grain tables of a sparse extent
#[derive(Clone, Copy, Debug)]
pub struct GrainLayout {
    /// Sector of the grain directory
    pub gd_offset: u64,
    /// Grain directory entries
    pub gd_entries: u64,
    /// Entries per grain table
    pub gtes_per_gt: u32,
}

/// Identify the magic at the start of `stream`
pub fn magic<R: Read + Seek>(stream: &mut R) -> ImageResult<Option<u32>> {
    let mut m = [0u8; 4];

    stream.seek(SeekFrom::Start(0))?;

    match stream.read_exact(&mut m) {
        Ok(()) => Ok(Some(u32::from_le_bytes(m))),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Read a KDMV header
pub fn read_sparse_header<R: Read + Seek>(stream: &mut R) -> ImageResult<SparseHeader> {
    let mut buf = [0u8; 512];

    stream.seek(SeekFrom::Start(0))?;
    stream.read_exact(&mut buf)?;

    Ok(Cursor::new(&buf[..]).read_le()?)
}

/// Read a COWD header
pub fn read_cowd_header<R: Read + Seek>(stream: &mut R) -> ImageResult<CowdHeader> {
    let mut buf = [0u8; 44];

    stream.seek(SeekFrom::Start(0))?;
    stream.read_exact(&mut buf)?;

    Ok(Cursor::new(&buf[..]).read_le()?)
}

impl SparseHeader {
    /// Grain table layout of the extent
    pub fn grain_layout(&self) -> ImageResult<GrainLayout> {
        if self.grain_size == 0 || self.gtes_per_gt == 0 {
            return Err(ImageError::bad_image("VMware", "null grain size"));
        }

        let grains = div_round_up(self.capacity, self.grain_size);
        let per_gt = u64::from(self.gtes_per_gt);

        let gd_offset = if self.flags & FLAG_REDUNDANT_TABLE != 0 && self.gd_offset == 0 {
            self.rgd_offset
        } else {
            self.gd_offset
        };

        Ok(GrainLayout {
            gd_offset,
            gd_entries: div_round_up(grains, per_gt),
            gtes_per_gt: self.gtes_per_gt,
        })
    }
}

impl CowdHeader {
    /// Grain table layout of the extent
    pub fn grain_layout(&self) -> ImageResult<GrainLayout> {
        if self.grain_size == 0 {
            return Err(ImageError::bad_image("VMware", "null grain size"));
        }

        Ok(GrainLayout {
            gd_offset: u64::from(self.gd_offset),
            gd_entries: u64::from(self.gd_entries),
            gtes_per_gt: COWD_GTES_PER_GT,
        })
    }
}

fn div_round_up(n: u64, d: u64) -> u64 {
    n / d + u64::from(n % d != 0)
}

fn read_u32s<R: Read + Seek>(stream: &mut R, sector: u64, count: u64) -> ImageResult<Vec<u32>> {
    let size = stream.seek(SeekFrom::End(0))?;

    let range = sector
        .checked_mul(512)
        .and_then(|start| Some((start, count.checked_mul(4)?)))
        .filter(|&(start, len)| start.checked_add(len).map_or(false, |end| end <= size));

    let (start, len) = match range {
        Some(r) => r,
        None => {
            return Err(ImageError::bad_image(
                "VMware",
                format!("grain table at sector {} runs past the end of the extent", sector),
            ))
        }
    };

    let mut buf = vec![0u8; len as usize];

    stream.seek(SeekFrom::Start(start))?;
    stream.read_exact(&mut buf)?;

    Ok(buf
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Load every grain table entry of an extent, indexed by grain
/// number. Unallocated grain tables yield entries of 0.
pub fn load_grain_tables<R: Read + Seek>(
    stream: &mut R,
    layout: &GrainLayout,
) -> ImageResult<Vec<u32>> {
    if layout.gtes_per_gt > MAX_GTES_PER_GT {
        return Err(ImageError::bad_image(
            "VMware",
            format!("{} entries per grain table", layout.gtes_per_gt),
        ));
    }

    let directory = read_u32s(stream, layout.gd_offset, layout.gd_entries)?;
    let per_gt = layout.gtes_per_gt as usize;

    let mut gtes = Vec::with_capacity(directory.len() * per_gt);

    for &table in &directory {
        if table == 0 {
            gtes.resize(gtes.len() + per_gt, 0);
        } else {
            gtes.extend(read_u32s(stream, u64::from(table), per_gt as u64)?);
        }
    }

    Ok(gtes)
}

/// Header of an extent without embedded descriptor
#[cfg(test)]
pub(crate) fn sparse_header(capacity: u64, grain_size: u64, gd_offset: u64) -> SparseHeader {
    SparseHeader {
        version: 1,
        flags: FLAG_VALID_NEWLINE | FLAG_ZEROED_GTE,
        capacity,
        grain_size,
        descriptor_offset: 0,
        descriptor_size: 0,
        gtes_per_gt: 512,
        rgd_offset: 0,
        gd_offset,
        overhead: 0,
        unclean_shutdown: 0,
        newline_check: [b'\n', b' ', b'\r', b'\n'],
        compression: 0,
        pad: [0; 433],
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use binrw::BinWriterExt;

    #[test]
    fn header_is_one_sector() {
        let mut c = Cursor::new(Vec::new());
        c.write_le(&sparse_header(100, 8, 1)).unwrap();
        let buf = c.into_inner();

        assert_eq!(buf.len(), 512);
        assert_eq!(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]), VMDK_MAGIC);

        let mut c = Cursor::new(buf);
        assert_eq!(magic(&mut c).unwrap(), Some(VMDK_MAGIC));
        assert_eq!(read_sparse_header(&mut c).unwrap().capacity, 100);
    }

    #[test]
    fn grain_tables() {
        // 2 grain tables of 512 entries, the second one unallocated
        let h = sparse_header(8 * 600, 8, 1);
        let layout = h.grain_layout().unwrap();
        assert_eq!(layout.gd_entries, 2);

        let mut img = vec![0u8; 512 * 8];
        img[512..516].copy_from_slice(&2u32.to_le_bytes());
        img[1024 + 4 * 3..1024 + 4 * 4].copy_from_slice(&42u32.to_le_bytes());

        let gtes = load_grain_tables(&mut Cursor::new(img), &layout).unwrap();

        assert_eq!(gtes.len(), 1024);
        assert_eq!(gtes[3], 42);
        assert!(gtes[512..].iter().all(|&g| g == 0));
    }

    #[test]
    fn grain_directory_past_end_of_file() {
        let mut h = sparse_header(u64::MAX, 8, 1);
        let layout = h.grain_layout().unwrap();
        let img = vec![0u8; 512 * 4];

        assert!(matches!(
            load_grain_tables(&mut Cursor::new(&img), &layout),
            Err(ImageError::BadImage { .. })
        ));

        h.capacity = 8;
        h.gd_offset = u64::MAX;
        let layout = h.grain_layout().unwrap();

        assert!(matches!(
            load_grain_tables(&mut Cursor::new(&img), &layout),
            Err(ImageError::BadImage { .. })
        ));

        h.gd_offset = 1;
        h.gtes_per_gt = u32::MAX;
        let layout = h.grain_layout().unwrap();

        assert!(matches!(
            load_grain_tables(&mut Cursor::new(&img), &layout),
            Err(ImageError::BadImage { .. })
        ));
    }

    #[test]
    fn grain_table_past_end_of_file() {
        let layout = sparse_header(8, 8, 1).grain_layout().unwrap();

        let mut img = vec![0u8; 512 * 2];
        img[512..516].copy_from_slice(&1000u32.to_le_bytes());

        assert!(matches!(
            load_grain_tables(&mut Cursor::new(img), &layout),
            Err(ImageError::BadImage { .. })
        ));
    }

    #[test]
    fn cowd_magic() {
        assert_eq!(&COWD_MAGIC.to_le_bytes(), b"COWD");
        assert_eq!(&VMDK_MAGIC.to_le_bytes(), b"KDMV");
    }
}
