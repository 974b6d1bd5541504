//! Apple Universal Disk Image Format (UDIF, `.dmg`) reader.
//!
//! An UDIF image is a data fork made of chunks, described by block
//! tables ("mish") stored either in an XML property list or, for older
//! images, in a classic resource fork. A 512 byte "koly" footer at the
//! end of the file (or at the start for some obsolete images) locates
//! everything.
//!
//! Chunks can be stored verbatim, be implicit zeroes or be compressed.
//! Compressed chunks are decompressed whole and kept in a bounded
//! cache.

use std::io::{Cursor, Read, Seek, SeekFrom};

use binrw::{binrw, BinReaderExt};
use log::{debug, error, info, warn};

use super::{check_range, ImageInfo, MediaImage, MediaType};
use crate::cache::{BoundedCache, CacheLimits};
use crate::crc::Crc32Digest;
use crate::internal::ExtentMap;
use crate::{ImageError, ImageResult};

use compression::Codec;

pub mod compression;
pub mod plist;
pub mod rsrc;

const SECTOR_SIZE: usize = 512;

/// Size of the "koly" footer
pub const FOOTER_SIZE: u64 = 512;

const CHUNK_ZERO: u32 = 0x0000_0000;
const CHUNK_COPY: u32 = 0x0000_0001;
const CHUNK_NOCOPY: u32 = 0x0000_0002;
const CHUNK_KENCODE: u32 = 0x8000_0001;
const CHUNK_RLE: u32 = 0x8000_0002;
const CHUNK_LZH: u32 = 0x8000_0003;
const CHUNK_ADC: u32 = 0x8000_0004;
const CHUNK_ZLIB: u32 = 0x8000_0005;
const CHUNK_BZIP: u32 = 0x8000_0006;
const CHUNK_LZFSE: u32 = 0x8000_0007;
const CHUNK_LZMA: u32 = 0x8000_0008;
const CHUNK_COMMENT: u32 = 0x7fff_fffe;
const CHUNK_END: u32 = 0xffff_ffff;

/// Data fork checksum type for CRC-32
const CHECKSUM_CRC32: u32 = 2;

/// Image trailer
#[allow(missing_docs)]
#[binrw]
#[brw(big, magic = b"koly")]
#[derive(Clone, Debug)]
pub struct Footer {
    pub version: u32,
    pub header_size: u32,
    pub flags: u32,
    pub running_data_fork_offset: u64,
    pub data_fork_offset: u64,
    pub data_fork_length: u64,
    pub rsrc_fork_offset: u64,
    pub rsrc_fork_length: u64,
    pub segment_number: u32,
    pub segment_count: u32,
    pub segment_id: [u8; 16],
    pub data_checksum_type: u32,
    pub data_checksum_len: u32,
    pub data_checksum: [u8; 128],
    pub plist_offset: u64,
    pub plist_length: u64,
    pub reserved1: [u8; 120],
    pub master_checksum_type: u32,
    pub master_checksum_len: u32,
    pub master_checksum: [u8; 128],
    pub image_variant: u32,
    pub sector_count: u64,
    pub reserved2: [u8; 12],
}

/// Block table describing a run of chunks
#[allow(missing_docs)]
#[binrw]
#[brw(big, magic = b"mish")]
#[derive(Clone, Debug)]
pub struct BlockTable {
    pub version: u32,
    pub sector_start: u64,
    pub sector_count: u64,
    pub data_offset: u64,
    pub buffers: u32,
    pub descriptor: u32,
    pub reserved: [u8; 24],
    pub checksum_type: u32,
    pub checksum_len: u32,
    pub checksum: [u8; 128],
    #[bw(calc = chunks.len() as u32)]
    #[br(temp)]
    chunk_count: u32,
    #[br(count = chunk_count)]
    pub chunks: Vec<ChunkEntry>,
}

/// Raw block table entry
#[allow(missing_docs)]
#[binrw]
#[brw(big)]
#[derive(Clone, Copy, Debug)]
pub struct ChunkEntry {
    pub kind: u32,
    pub comment: u32,
    pub sector: u64,
    pub sectors: u64,
    pub offset: u64,
    pub length: u64,
}

/// How the sectors of a chunk are stored
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Storage {
    /// Implicit zeroes
    Zero,
    /// Stored verbatim
    Copy,
    /// Stored compressed
    Compressed(Codec),
}

#[derive(Clone, Copy, Debug)]
struct Chunk {
    storage: Storage,
    sectors: u64,
    /// Absolute offset in the file
    offset: u64,
    length: u64,
}

fn storage(kind: u32) -> ImageResult<Option<Storage>> {
    let s = match kind {
        CHUNK_ZERO | CHUNK_NOCOPY => Storage::Zero,
        CHUNK_COPY => Storage::Copy,
        CHUNK_ADC => Storage::Compressed(Codec::Adc),
        CHUNK_ZLIB => Storage::Compressed(Codec::Zlib),
        CHUNK_BZIP => Storage::Compressed(Codec::Bzip2),
        CHUNK_RLE => Storage::Compressed(Codec::AppleRle),
        CHUNK_COMMENT | CHUNK_END => return Ok(None),
        CHUNK_KENCODE => return Err(ImageError::unsupported("KenCode compressed UDIF chunks")),
        CHUNK_LZH => return Err(ImageError::unsupported("LZH compressed UDIF chunks")),
        CHUNK_LZFSE => return Err(ImageError::unsupported("LZFSE compressed UDIF chunks")),
        CHUNK_LZMA => return Err(ImageError::unsupported("LZMA compressed UDIF chunks")),
        k => {
            error!("Unknown UDIF chunk type {:08x}", k);
            return Err(ImageError::unsupported(format!("UDIF chunk type {:08x}", k)));
        }
    };

    Ok(Some(s))
}

/// Read `len` bytes at `offset`, failing if they don't all fit in the
/// stream
fn read_at<R: Read + Seek>(stream: &mut R, offset: u64, len: u64) -> ImageResult<Vec<u8>> {
    let size = stream.seek(SeekFrom::End(0))?;

    let len = match offset.checked_add(len) {
        Some(end) if end <= size => len as usize,
        _ => {
            error!(
                "UDIF read of {} bytes at {} goes past the end of the file ({} bytes)",
                len, offset, size
            );
            return Err(ImageError::bad_image(
                "UDIF",
                format!("{} bytes at offset {} past the end of the file", len, offset),
            ));
        }
    };

    let mut buf = vec![0u8; len];

    stream.seek(SeekFrom::Start(offset))?;
    stream.read_exact(&mut buf)?;

    Ok(buf)
}

/// Locate and parse the footer, trailing first then leading
fn read_footer<R: Read + Seek>(stream: &mut R) -> ImageResult<Option<Footer>> {
    let len = stream.seek(SeekFrom::End(0))?;

    if len < FOOTER_SIZE {
        return Ok(None);
    }

    for &offset in &[len - FOOTER_SIZE, 0] {
        let buf = read_at(stream, offset, FOOTER_SIZE)?;

        if &buf[0..4] != b"koly" {
            continue;
        }

        let footer: Footer = Cursor::new(&buf).read_be()?;

        if offset == 0 {
            debug!("Obsolete UDIF image with a leading footer");
        }

        return Ok(Some(footer));
    }

    Ok(None)
}

/// UDIF image
pub struct Udif<R> {
    stream: R,
    footer: Footer,
    info: ImageInfo,
    chunks: ExtentMap<Chunk>,
    /// Decompressed chunks, keyed by first sector
    chunk_cache: BoundedCache<u64, Vec<u8>>,
    sector_cache: BoundedCache<u64, Vec<u8>>,
}

impl<R: Read + Seek> Udif<R> {
    /// Returns true if `stream` has a "koly" footer
    pub fn identify(stream: &mut R) -> ImageResult<bool> {
        Ok(read_footer(stream)?.is_some())
    }

    /// Open an UDIF image with the default cache limits
    pub fn open(stream: R) -> ImageResult<Udif<R>> {
        Udif::open_with_limits(stream, CacheLimits::default())
    }

    /// Open an UDIF image
    pub fn open_with_limits(mut stream: R, limits: CacheLimits) -> ImageResult<Udif<R>> {
        let footer = match read_footer(&mut stream)? {
            Some(f) => f,
            None => return Err(ImageError::bad_image("UDIF", "missing koly footer")),
        };

        let raw_tables = Udif::block_tables(&mut stream, &footer)?;

        let mut chunks = Vec::new();

        for raw in raw_tables {
            let table: BlockTable = Cursor::new(&raw).read_be().map_err(|e| {
                error!("Can't parse UDIF block table: {}", e);
                ImageError::CorruptResourceFork(format!("bad block table: {}", e))
            })?;

            debug!(
                "Block table: sectors {}+{}, {} chunks",
                table.sector_start,
                table.sector_count,
                table.chunks.len()
            );

            for entry in &table.chunks {
                let storage = match storage(entry.kind)? {
                    Some(s) => s,
                    None => continue,
                };

                if entry.sectors == 0 {
                    continue;
                }

                let start = table.sector_start.checked_add(entry.sector);
                let offset = footer.data_fork_offset.checked_add(entry.offset);

                let (start, offset) = match (start, offset) {
                    (Some(s), Some(o)) => (s, o),
                    _ => {
                        return Err(ImageError::CorruptResourceFork(format!(
                            "chunk at sector {}+{} overflows",
                            table.sector_start, entry.sector
                        )))
                    }
                };

                chunks.push((
                    start,
                    Chunk {
                        storage,
                        sectors: entry.sectors,
                        offset,
                        length: entry.length,
                    },
                ));
            }
        }

        if chunks.is_empty() {
            return Err(ImageError::bad_image("UDIF", "image contains no chunks"));
        }

        let chunks = ExtentMap::new(chunks);

        let mut info = ImageInfo::new(footer.sector_count, SECTOR_SIZE as u32, MediaType::GenericHdd);
        info.application = Some("Apple DiskImages".to_string());

        info!(
            "UDIF image: {} sectors in {} chunks",
            footer.sector_count,
            chunks.len()
        );

        Ok(Udif {
            stream,
            footer,
            info,
            chunks,
            chunk_cache: BoundedCache::by_bytes(limits.chunk_bytes),
            sector_cache: BoundedCache::by_entries(limits.sector_entries),
        })
    }

    fn block_tables(stream: &mut R, footer: &Footer) -> ImageResult<Vec<Vec<u8>>> {
        if footer.plist_offset != 0 && footer.plist_length != 0 {
            let raw = read_at(stream, footer.plist_offset, footer.plist_length)?;
            let text = String::from_utf8_lossy(&raw);

            if let Some(tables) = plist::blkx_tables(&text)? {
                return Ok(tables);
            }

            warn!("UDIF property list has no blkx array");
        }

        if footer.rsrc_fork_length != 0 {
            let fork = read_at(stream, footer.rsrc_fork_offset, footer.rsrc_fork_length)?;
            let tables = rsrc::resources(&fork, b"blkx")?;

            if !tables.is_empty() {
                return Ok(tables.into_iter().map(|r| r.data).collect());
            }
        }

        error!("UDIF image has neither a property list nor a resource fork");

        Err(ImageError::CorruptResourceFork(
            "no blkx block tables found".to_string(),
        ))
    }

    /// Check the CRC-32 of the data fork. Returns `None` if the image
    /// doesn't carry one.
    pub fn verify_media_image(&mut self) -> ImageResult<Option<bool>> {
        if self.footer.data_checksum_type != CHECKSUM_CRC32 {
            return Ok(None);
        }

        let expected = u32::from_be_bytes(*array_ref![self.footer.data_checksum, 0, 4]);

        self.stream
            .seek(SeekFrom::Start(self.footer.data_fork_offset))?;

        let mut digest = Crc32Digest::new();
        let mut remaining = self.footer.data_fork_length;
        let mut buf = vec![0u8; 64 * 1024];

        while remaining > 0 {
            let n = remaining.min(buf.len() as u64) as usize;

            self.stream.read_exact(&mut buf[..n])?;
            digest.update(&buf[..n]);
            remaining -= n as u64;
        }

        let crc = digest.finalize();

        debug!("UDIF data fork CRC {:08x}, expected {:08x}", crc, expected);

        Ok(Some(crc == expected))
    }

    fn chunk_data(&mut self, start: u64, chunk: Chunk, codec: Codec) -> ImageResult<&[u8]> {
        if self.chunk_cache.get(&start).is_none() {
            let expected = usize::try_from(chunk.sectors)
                .ok()
                .and_then(|s| s.checked_mul(SECTOR_SIZE))
                .ok_or_else(|| {
                    ImageError::bad_image("UDIF", format!("chunk of {} sectors", chunk.sectors))
                })?;

            let raw = read_at(&mut self.stream, chunk.offset, chunk.length)?;
            let data = codec.decompress(&raw, expected)?;

            self.chunk_cache.insert(start, data);
        }

        match self.chunk_cache.get(&start) {
            Some(d) => Ok(d.as_slice()),
            None => Err(ImageError::Decompression(
                "chunk doesn't fit in the cache".to_string(),
            )),
        }
    }
}

impl<R: Read + Seek> MediaImage for Udif<R> {
    fn format_name(&self) -> String {
        "UDIF".to_string()
    }

    fn info(&self) -> &ImageInfo {
        &self.info
    }

    fn read_sector(&mut self, address: u64) -> ImageResult<Vec<u8>> {
        check_range(&self.info, address, 1)?;

        if let Some(s) = self.sector_cache.get(&address) {
            return Ok(s.clone());
        }

        let (start, chunk) = match self.chunks.find(address) {
            Some((start, &chunk)) if address - start < chunk.sectors => (start, chunk),
            _ => {
                return Err(ImageError::bad_image(
                    "UDIF",
                    format!("sector {} isn't covered by any chunk", address),
                ))
            }
        };

        let relative = (address - start) as usize;

        let sector = match chunk.storage {
            Storage::Zero => vec![0; SECTOR_SIZE],
            Storage::Copy => {
                let offset = chunk
                    .offset
                    .checked_add((relative * SECTOR_SIZE) as u64)
                    .ok_or_else(|| ImageError::bad_image("UDIF", "chunk offset overflows"))?;

                read_at(&mut self.stream, offset, SECTOR_SIZE as u64)?
            }
            Storage::Compressed(codec) => {
                let data = self.chunk_data(start, chunk, codec)?;
                let off = relative * SECTOR_SIZE;

                data[off..off + SECTOR_SIZE].to_vec()
            }
        };

        self.sector_cache.insert(address, sector.clone());

        Ok(sector)
    }
}
