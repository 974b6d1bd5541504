//! Sinks receiving the repaired and synthesized subchannel data.

use std::collections::BTreeMap;
use std::io::{Seek, SeekFrom, Write};

use crate::subchannel::SUBCHANNEL_SIZE;
use crate::{ImageError, ImageResult};

/// Kind of per-sector metadata stored alongside the user data
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum SectorTag {
    /// 96 bytes of interleaved CD subchannel
    CdSectorSubchannel,
    /// Apple 12, 20 or 24 bytes sector tag
    AppleSectorTag,
}

/// Writable image receiving sector tags. The subchannel engine only writes, it never reads back.
pub trait WritableOpticalImage {
    /// Write the tag for a single sector
    fn write_sector_tag(&mut self, data: &[u8], address: u64, tag: SectorTag) -> ImageResult<()>;

    /// Write the tags of `count` consecutive sectors starting at `address`
    fn write_sectors_tag(
        &mut self,
        data: &[u8],
        address: u64,
        count: u32,
        tag: SectorTag,
    ) -> ImageResult<()> {
        if count == 0 {
            return Ok(());
        }

        let len = data.len() / count as usize;

        if len == 0 || len * count as usize != data.len() {
            return Err(ImageError::BadDataLength {
                got: data.len(),
                expected: count as usize * SUBCHANNEL_SIZE,
            });
        }

        for (i, chunk) in data.chunks_exact(len).enumerate() {
            self.write_sector_tag(chunk, address + i as u64, tag)?;
        }

        Ok(())
    }
}

fn check_subchannel(data: &[u8], tag: SectorTag) -> ImageResult<()> {
    if tag != SectorTag::CdSectorSubchannel {
        return Err(ImageError::NoSuchTag);
    }

    if data.len() != SUBCHANNEL_SIZE {
        return Err(ImageError::BadDataLength {
            got: data.len(),
            expected: SUBCHANNEL_SIZE,
        });
    }

    Ok(())
}

/// In-memory subchannel store, indexed by sector address
#[derive(Default, Clone)]
pub struct SubchannelStore {
    sectors: BTreeMap<u64, [u8; SUBCHANNEL_SIZE]>,
    writes: usize,
}

impl SubchannelStore {
    /// Create an empty store
    pub fn new() -> SubchannelStore {
        SubchannelStore::default()
    }

    /// Return the subchannel written for `address`, if any
    pub fn get(&self, address: u64) -> Option<&[u8; SUBCHANNEL_SIZE]> {
        self.sectors.get(&address)
    }

    /// Number of distinct sectors written
    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    /// Returns true if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// Total number of sector writes received, including overwrites
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Iterate over the stored sectors in address order
    pub fn iter(&self) -> impl Iterator<Item = (u64, &[u8; SUBCHANNEL_SIZE])> {
        self.sectors.iter().map(|(&a, s)| (a, s))
    }
}

impl WritableOpticalImage for SubchannelStore {
    fn write_sector_tag(&mut self, data: &[u8], address: u64, tag: SectorTag) -> ImageResult<()> {
        check_subchannel(data, tag)?;

        self.sectors.insert(address, *array_ref![data, 0, SUBCHANNEL_SIZE]);
        self.writes += 1;

        Ok(())
    }
}

/// Raw `.sub` file: 96 bytes of interleaved subchannel per sector, stored at `address * 96`
pub struct RawSubchannelFile<W> {
    inner: W,
}

impl<W: Write + Seek> RawSubchannelFile<W> {
    /// Wrap a writable stream
    pub fn new(inner: W) -> RawSubchannelFile<W> {
        RawSubchannelFile { inner }
    }

    /// Flush and return the underlying stream
    pub fn into_inner(mut self) -> ImageResult<W> {
        self.inner.flush()?;

        Ok(self.inner)
    }
}

impl<W: Write + Seek> WritableOpticalImage for RawSubchannelFile<W> {
    fn write_sector_tag(&mut self, data: &[u8], address: u64, tag: SectorTag) -> ImageResult<()> {
        check_subchannel(data, tag)?;

        self.inner
            .seek(SeekFrom::Start(address * SUBCHANNEL_SIZE as u64))?;
        self.inner.write_all(data)?;

        Ok(())
    }

    fn write_sectors_tag(
        &mut self,
        data: &[u8],
        address: u64,
        count: u32,
        tag: SectorTag,
    ) -> ImageResult<()> {
        if tag != SectorTag::CdSectorSubchannel {
            return Err(ImageError::NoSuchTag);
        }

        if data.len() != count as usize * SUBCHANNEL_SIZE {
            return Err(ImageError::BadDataLength {
                got: data.len(),
                expected: count as usize * SUBCHANNEL_SIZE,
            });
        }

        self.inner
            .seek(SeekFrom::Start(address * SUBCHANNEL_SIZE as u64))?;
        self.inner.write_all(data)?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn store_splits_multi_sector_writes() {
        let mut store = SubchannelStore::new();
        let mut data = vec![0u8; SUBCHANNEL_SIZE * 3];
        data[SUBCHANNEL_SIZE] = 0xaa;

        store
            .write_sectors_tag(&data, 10, 3, SectorTag::CdSectorSubchannel)
            .unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.get(11).unwrap()[0], 0xaa);
        assert!(store
            .write_sector_tag(&[0; 12], 0, SectorTag::CdSectorSubchannel)
            .is_err());
    }

    #[test]
    fn raw_file_positions() {
        let mut f = RawSubchannelFile::new(Cursor::new(Vec::new()));

        f.write_sector_tag(&[0x55; SUBCHANNEL_SIZE], 2, SectorTag::CdSectorSubchannel)
            .unwrap();

        let buf = f.into_inner().unwrap().into_inner();

        assert_eq!(buf.len(), 3 * SUBCHANNEL_SIZE);
        assert_eq!(buf[2 * SUBCHANNEL_SIZE], 0x55);
        assert_eq!(buf[0], 0);
    }
}
