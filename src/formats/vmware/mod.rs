//! VMware virtual disk reader.
//!
//! A VMware disk is described by a text descriptor listing its extents.
//! The descriptor lives in its own file, or is embedded in the first
//! sparse extent of monolithic images. Legacy "COWD" disks have no
//! descriptor at all, their extents are found by probing for
//! `<name>-01.vmdk`, `<name>-02.vmdk`...
//!
//! Sparse extents map grains through a two level table. Grains that
//! were never written are read from the parent disk if there's one,
//! otherwise they read as zeroes.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use super::{check_range, ImageInfo, MediaImage, MediaType};
use crate::cache::{BoundedCache, CacheLimits};
use crate::internal::ExtentMap;
use crate::{ImageError, ImageResult};

use descriptor::{Descriptor, ExtentLine, ExtentType, NO_PARENT_CID};
use header::{COWD_MAGIC, VMDK_MAGIC};

pub mod descriptor;
pub mod header;

const SECTOR_SIZE: usize = 512;

/// Text descriptors larger than this are rejected
const MAX_DESCRIPTOR_SIZE: u64 = 2 * 1024 * 1024;

/// Longest chain of parent disks followed
const MAX_PARENT_DEPTH: usize = 32;

/// Create types backed by physical devices
const DEVICE_CREATE_TYPES: [&str; 7] = [
    "fullDevice",
    "partitionedDevice",
    "vmfsRaw",
    "vmfsRDM",
    "vmfsRDMP",
    "vmfsRawDeviceMap",
    "vmfsPassthroughRawDeviceMap",
];

/// Sparse extent backing file
struct Sparse {
    file: File,
    /// Sectors per grain
    grain_size: u64,
    /// Grain table entries, by grain number
    gtes: Vec<u32>,
    /// A GTE of 1 reads as zeroes
    zeroed_gte: bool,
}

enum Backing {
    Zero,
    Flat { file: File, offset: u64 },
    Sparse(Sparse),
}

struct Extent {
    sectors: u64,
    backing: Backing,
}

/// Where a sector's data comes from
enum Source {
    Zero,
    Parent,
    File { extent: usize, offset: u64 },
    Grain { extent: usize, grain: u64, offset: usize },
}

fn open_extent_file(path: &Path) -> ImageResult<File> {
    match File::open(path) {
        Ok(f) => Ok(f),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            error!("Missing extent {}", path.display());
            Err(ImageError::MissingExtent(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

fn open_sparse(path: &Path) -> ImageResult<Sparse> {
    let mut file = open_extent_file(path)?;

    match header::magic(&mut file)? {
        Some(VMDK_MAGIC) => {
            let h = header::read_sparse_header(&mut file)?;
            check_sparse_header(&h)?;

            let layout = h.grain_layout()?;
            let gtes = header::load_grain_tables(&mut file, &layout)?;

            Ok(Sparse {
                file,
                grain_size: h.grain_size,
                gtes,
                zeroed_gte: h.flags & header::FLAG_ZEROED_GTE != 0,
            })
        }
        Some(COWD_MAGIC) => {
            let h = header::read_cowd_header(&mut file)?;
            let layout = h.grain_layout()?;
            let gtes = header::load_grain_tables(&mut file, &layout)?;

            Ok(Sparse {
                file,
                grain_size: u64::from(h.grain_size),
                gtes,
                zeroed_gte: false,
            })
        }
        _ => Err(ImageError::bad_image(
            "VMware",
            format!("{} isn't a sparse extent", path.display()),
        )),
    }
}

fn check_sparse_header(h: &header::SparseHeader) -> ImageResult<()> {
    if h.compression != 0 || h.flags & header::FLAG_COMPRESSED != 0 {
        return Err(ImageError::unsupported("compressed VMware grains"));
    }

    if h.flags & header::FLAG_MARKERS != 0 {
        return Err(ImageError::unsupported("stream-optimized VMware images"));
    }

    Ok(())
}

/// Legacy COWD extents following `path`: `<stem>-01.<ext>`, `-02`...
fn cowd_extents(path: &Path) -> Vec<PathBuf> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut paths = vec![path.to_path_buf()];

    for n in 1..100 {
        let p = path.with_file_name(format!("{}-{:02}{}", stem, n, ext));

        if !p.exists() {
            break;
        }

        paths.push(p);
    }

    paths
}

/// Build the descriptor of a legacy COWD disk
fn cowd_descriptor(path: &Path) -> ImageResult<Descriptor> {
    let mut extents = Vec::new();
    let mut geometry = None;

    for p in cowd_extents(path) {
        let mut f = File::open(&p)?;
        let h = header::read_cowd_header(&mut f)?;

        geometry.get_or_insert((h.cylinders, h.heads, h.spt));

        extents.push(ExtentLine {
            access: descriptor::Access::ReadWrite,
            sectors: u64::from(h.sectors),
            kind: ExtentType::VmfsSparse,
            file: p.file_name().map(|n| n.to_string_lossy().into_owned()),
            offset: 0,
        });
    }

    debug!("COWD disk with {} extents", extents.len());

    let (c, h, s) = geometry.unwrap_or((0, 0, 0));
    let known = |v: u32| if v == 0 { None } else { Some(v) };

    Ok(Descriptor {
        version: 1,
        cid: 0,
        parent_cid: NO_PARENT_CID,
        create_type: "vmfsSparse".to_string(),
        extents,
        adapter_type: None,
        cylinders: known(c),
        heads: known(h),
        sectors_per_track: known(s),
        parent_hint: None,
    })
}

/// Read the descriptor of the disk at `path`, wherever it's stored
fn read_descriptor(path: &Path) -> ImageResult<Descriptor> {
    let mut file = File::open(path)?;

    match header::magic(&mut file)? {
        Some(VMDK_MAGIC) => {
            let h = header::read_sparse_header(&mut file)?;
            check_sparse_header(&h)?;

            if h.descriptor_size == 0 {
                debug!("Sparse extent without descriptor");

                return Ok(Descriptor {
                    version: 1,
                    cid: 0,
                    parent_cid: NO_PARENT_CID,
                    create_type: "monolithicSparse".to_string(),
                    extents: vec![ExtentLine {
                        access: descriptor::Access::ReadWrite,
                        sectors: h.capacity,
                        kind: ExtentType::Sparse,
                        file: path.file_name().map(|n| n.to_string_lossy().into_owned()),
                        offset: 0,
                    }],
                    adapter_type: None,
                    cylinders: None,
                    heads: None,
                    sectors_per_track: None,
                    parent_hint: None,
                });
            }

            let mut raw = vec![0u8; (h.descriptor_size * SECTOR_SIZE as u64) as usize];
            file.seek(SeekFrom::Start(h.descriptor_offset * SECTOR_SIZE as u64))?;
            file.read_exact(&mut raw)?;

            descriptor::parse(&String::from_utf8_lossy(&raw))
        }
        Some(COWD_MAGIC) => cowd_descriptor(path),
        _ => {
            let len = file.seek(SeekFrom::End(0))?;

            if len > MAX_DESCRIPTOR_SIZE {
                return Err(ImageError::bad_image("VMware", "not a descriptor file"));
            }

            let mut raw = Vec::with_capacity(len as usize);
            file.seek(SeekFrom::Start(0))?;
            file.read_to_end(&mut raw)?;

            let text = String::from_utf8_lossy(&raw);

            if !descriptor::is_descriptor(&text) {
                return Err(ImageError::bad_image("VMware", "not a descriptor file"));
            }

            descriptor::parse(&text)
        }
    }
}

/// VMware virtual disk
pub struct Vmware {
    descriptor: Descriptor,
    info: ImageInfo,
    extents: Vec<Extent>,
    /// Extent index by first sector
    map: ExtentMap<usize>,
    parent: Option<Box<Vmware>>,
    /// Grains of sparse extents, keyed by (extent, grain)
    grain_cache: BoundedCache<(usize, u64), Vec<u8>>,
    sector_cache: BoundedCache<u64, Vec<u8>>,
}

impl Vmware {
    /// Returns true if `path` looks like a VMware disk: a sparse extent
    /// or a text descriptor
    pub fn identify(path: &Path) -> ImageResult<bool> {
        let mut file = File::open(path)?;

        match header::magic(&mut file)? {
            Some(VMDK_MAGIC) | Some(COWD_MAGIC) => return Ok(true),
            None => return Ok(false),
            _ => (),
        }

        let mut start = Vec::with_capacity(256);
        file.seek(SeekFrom::Start(0))?;
        file.take(256).read_to_end(&mut start)?;

        Ok(descriptor::is_descriptor(&String::from_utf8_lossy(&start)))
    }

    /// Open the disk at `path` with the default cache limits
    pub fn open(path: &Path) -> ImageResult<Vmware> {
        Vmware::open_with_limits(path, CacheLimits::default())
    }

    /// Open the disk at `path`. Extents and parent are looked up in the
    /// same directory.
    pub fn open_with_limits(path: &Path, limits: CacheLimits) -> ImageResult<Vmware> {
        Vmware::open_chain(path, limits, &mut HashSet::new())
    }

    /// Open `path` and its parents. `chain` holds the canonical paths of
    /// the children already opened.
    fn open_chain(
        path: &Path,
        limits: CacheLimits,
        chain: &mut HashSet<PathBuf>,
    ) -> ImageResult<Vmware> {
        let canonical = fs::canonicalize(path)?;

        if chain.contains(&canonical) {
            error!("VMware parent chain loops back to {}", canonical.display());
            return Err(ImageError::bad_image(
                "VMware",
                format!("parent chain loops back to {}", canonical.display()),
            ));
        }

        if chain.len() >= MAX_PARENT_DEPTH {
            error!("VMware parent chain is more than {} disks deep", MAX_PARENT_DEPTH);
            return Err(ImageError::bad_image(
                "VMware",
                format!("more than {} disks in the parent chain", MAX_PARENT_DEPTH),
            ));
        }

        chain.insert(canonical);

        let descriptor = read_descriptor(path)?;

        if descriptor.create_type == "streamOptimized" {
            return Err(ImageError::unsupported("stream-optimized VMware images"));
        }

        if DEVICE_CREATE_TYPES.contains(&descriptor.create_type.as_str()) {
            return Err(ImageError::unsupported(format!(
                "VMware {} disks",
                descriptor.create_type
            )));
        }

        let dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut extents = Vec::with_capacity(descriptor.extents.len());
        let mut map = Vec::with_capacity(descriptor.extents.len());
        let mut first = 0;

        for line in &descriptor.extents {
            let file = || match &line.file {
                Some(f) => Ok(dir.join(f)),
                None => Err(ImageError::bad_image(
                    "VMware",
                    format!("{:?} extent without a file", line.kind),
                )),
            };

            let backing = match line.kind {
                ExtentType::Zero => Backing::Zero,
                ExtentType::Flat | ExtentType::Vmfs => Backing::Flat {
                    file: open_extent_file(&file()?)?,
                    offset: line.offset,
                },
                ExtentType::Sparse | ExtentType::VmfsSparse => {
                    Backing::Sparse(open_sparse(&file()?)?)
                }
                ExtentType::VmfsRdm | ExtentType::VmfsRaw => {
                    return Err(ImageError::unsupported("VMware raw device extents"))
                }
            };

            debug!(
                "Extent {:?} {:?}: sectors {}+{}",
                line.kind, line.file, first, line.sectors
            );

            map.push((first, extents.len()));
            extents.push(Extent {
                sectors: line.sectors,
                backing,
            });

            first += line.sectors;
        }

        let parent = if descriptor.has_parent() {
            Some(Box::new(Vmware::open_parent(dir, &descriptor, limits, chain)?))
        } else {
            None
        };

        let mut info = ImageInfo::new(descriptor.sectors(), SECTOR_SIZE as u32, MediaType::GenericHdd);
        info.application = Some("VMware".to_string());

        if let (Some(c), Some(h), Some(s)) = (
            descriptor.cylinders,
            descriptor.heads,
            descriptor.sectors_per_track,
        ) {
            info.cylinders = c;
            info.heads = h;
            info.sectors_per_track = s;
        }

        if let Some(adapter) = &descriptor.adapter_type {
            info.comments = Some(format!("Adapter type: {}", adapter));
        }

        info!(
            "VMware {} disk: {} sectors in {} extents{}",
            descriptor.create_type,
            info.sectors,
            extents.len(),
            if parent.is_some() { ", with parent" } else { "" }
        );

        Ok(Vmware {
            descriptor,
            info,
            extents,
            map: ExtentMap::new(map),
            parent,
            grain_cache: BoundedCache::by_bytes(limits.chunk_bytes),
            sector_cache: BoundedCache::by_entries(limits.sector_entries),
        })
    }

    fn open_parent(
        dir: &Path,
        descriptor: &Descriptor,
        limits: CacheLimits,
        chain: &mut HashSet<PathBuf>,
    ) -> ImageResult<Vmware> {
        let hint = match &descriptor.parent_hint {
            Some(h) => h,
            None => {
                error!("VMware disk has a parent but no parentFileNameHint");
                return Err(ImageError::MissingParent(PathBuf::new()));
            }
        };

        let path = dir.join(hint);

        if !path.exists() {
            error!("Missing parent image {}", path.display());
            return Err(ImageError::MissingParent(path));
        }

        let parent = Vmware::open_chain(&path, limits, chain)?;

        if parent.descriptor.cid != descriptor.parent_cid {
            warn!(
                "Parent CID {:08x} doesn't match the expected {:08x}",
                parent.descriptor.cid, descriptor.parent_cid
            );
        }

        Ok(parent)
    }

    /// The disk descriptor
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Returns true if unallocated grains are read from a parent disk
    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    fn locate(&self, address: u64) -> ImageResult<Source> {
        let (first, &index) = match self.map.find(address) {
            Some(e) => e,
            None => {
                return Err(ImageError::SectorOutOfRange {
                    address,
                    sectors: self.info.sectors,
                })
            }
        };

        let extent = &self.extents[index];
        let relative = address - first;

        if relative >= extent.sectors {
            return Err(ImageError::SectorOutOfRange {
                address,
                sectors: self.info.sectors,
            });
        }

        let source = match &extent.backing {
            Backing::Zero => Source::Zero,
            Backing::Flat { offset, .. } => Source::File {
                extent: index,
                offset: (offset + relative) * SECTOR_SIZE as u64,
            },
            Backing::Sparse(s) => {
                let grain = relative / s.grain_size;
                let in_grain = (relative % s.grain_size) as usize * SECTOR_SIZE;

                match s.gtes.get(grain as usize).copied().unwrap_or(0) {
                    0 if self.parent.is_some() => Source::Parent,
                    0 => Source::Zero,
                    1 if s.zeroed_gte => Source::Zero,
                    gte => Source::Grain {
                        extent: index,
                        grain: u64::from(gte),
                        offset: in_grain,
                    },
                }
            }
        };

        Ok(source)
    }

    fn read_at(&mut self, extent: usize, offset: u64, len: usize) -> ImageResult<Vec<u8>> {
        let file = match &mut self.extents[extent].backing {
            Backing::Flat { file, .. } => file,
            Backing::Sparse(s) => &mut s.file,
            Backing::Zero => return Ok(vec![0; len]),
        };

        let mut buf = vec![0u8; len];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;

        Ok(buf)
    }

    fn grain(&mut self, extent: usize, grain: u64) -> ImageResult<&[u8]> {
        let key = (extent, grain);

        if self.grain_cache.get(&key).is_none() {
            let grain_size = match &self.extents[extent].backing {
                Backing::Sparse(s) => s.grain_size as usize,
                _ => 1,
            };

            let data = self.read_at(extent, grain * SECTOR_SIZE as u64, grain_size * SECTOR_SIZE)?;

            self.grain_cache.insert(key, data);
        }

        match self.grain_cache.get(&key) {
            Some(g) => Ok(g.as_slice()),
            None => Err(ImageError::bad_image("VMware", "grain cache failure")),
        }
    }
}

impl MediaImage for Vmware {
    fn format_name(&self) -> String {
        match &self.parent {
            Some(p) => format!("VMware (child of {})", p.format_name()),
            None => "VMware".to_string(),
        }
    }

    fn info(&self) -> &ImageInfo {
        &self.info
    }

    fn read_sector(&mut self, address: u64) -> ImageResult<Vec<u8>> {
        check_range(&self.info, address, 1)?;

        if let Some(s) = self.sector_cache.get(&address) {
            return Ok(s.clone());
        }

        let sector = match self.locate(address)? {
            Source::Zero => vec![0; SECTOR_SIZE],
            Source::Parent => match self.parent.as_mut() {
                Some(p) if address < p.info().sectors => p.read_sector(address)?,
                _ => vec![0; SECTOR_SIZE],
            },
            Source::File { extent, offset } => self.read_at(extent, offset, SECTOR_SIZE)?,
            Source::Grain {
                extent,
                grain,
                offset,
            } => self.grain(extent, grain)?[offset..offset + SECTOR_SIZE].to_vec(),
        };

        self.sector_cache.insert(address, sector.clone());

        Ok(sector)
    }
}
