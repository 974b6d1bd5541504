//! VMware text descriptor parsing

use std::sync::OnceLock;

use regex::Regex;

use crate::{ImageError, ImageResult};

/// Parent CID value of images without a parent
pub const NO_PARENT_CID: u32 = 0xffff_ffff;

/// Extent access mode
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Access {
    /// RW
    ReadWrite,
    /// RDONLY
    ReadOnly,
    /// NOACCESS
    NoAccess,
}

/// Extent storage type
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExtentType {
    /// Raw preallocated data
    Flat,
    /// Hosted sparse extent ("KDMV" or "COWD")
    Sparse,
    /// Reads as zeroes, no backing file
    Zero,
    /// ESX preallocated data
    Vmfs,
    /// ESX sparse extent
    VmfsSparse,
    /// Raw device mapping
    VmfsRdm,
    /// Raw device
    VmfsRaw,
}

impl ExtentType {
    fn parse(s: &str) -> Option<ExtentType> {
        let t = match s {
            "FLAT" => ExtentType::Flat,
            "SPARSE" => ExtentType::Sparse,
            "ZERO" => ExtentType::Zero,
            "VMFS" => ExtentType::Vmfs,
            "VMFSSPARSE" => ExtentType::VmfsSparse,
            "VMFSRDM" => ExtentType::VmfsRdm,
            "VMFSRAW" => ExtentType::VmfsRaw,
            _ => return None,
        };

        Some(t)
    }
}

/// Extent line of a descriptor
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ExtentLine {
    /// Access mode
    pub access: Access,
    /// Length in sectors
    pub sectors: u64,
    /// Storage type
    pub kind: ExtentType,
    /// Backing file, relative to the descriptor
    pub file: Option<String>,
    /// Offset of the extent in the backing file, in sectors
    pub offset: u64,
}

/// Parsed disk descriptor
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Descriptor {
    /// Descriptor version
    pub version: u32,
    /// Content ID
    pub cid: u32,
    /// Content ID of the parent, [`NO_PARENT_CID`] if there's none
    pub parent_cid: u32,
    /// `createType` value
    pub create_type: String,
    /// Extents, in disk order
    pub extents: Vec<ExtentLine>,
    /// `ddb.adapterType`
    pub adapter_type: Option<String>,
    /// `ddb.geometry.cylinders`
    pub cylinders: Option<u32>,
    /// `ddb.geometry.heads`
    pub heads: Option<u32>,
    /// `ddb.geometry.sectors`
    pub sectors_per_track: Option<u32>,
    /// `parentFileNameHint`
    pub parent_hint: Option<String>,
}

impl Descriptor {
    /// Returns true if the image has a parent
    pub fn has_parent(&self) -> bool {
        self.parent_cid != NO_PARENT_CID
    }

    /// Total number of sectors covered by the extents
    pub fn sectors(&self) -> u64 {
        self.extents.iter().map(|e| e.sectors).sum()
    }
}

/// Returns true if `text` looks like a disk descriptor
pub fn is_descriptor(text: &str) -> bool {
    text.trim_start().starts_with("# Disk DescriptorFile")
}

/// Line patterns of a descriptor, compiled once
struct Patterns {
    version: Regex,
    cid: Regex,
    parent_cid: Regex,
    create_type: Regex,
    extent: Regex,
    adapter: Regex,
    geometry: Regex,
    parent_hint: Regex,
}

impl Patterns {
    fn new() -> Result<Patterns, regex::Error> {
        Ok(Patterns {
            version: Regex::new(r"^\s*version\s*=\s*(?P<v>\d+)\s*$")?,
            cid: Regex::new(r"^\s*CID\s*=\s*(?P<cid>[0-9a-fA-F]{8})\s*$")?,
            parent_cid: Regex::new(r"^\s*parentCID\s*=\s*(?P<cid>[0-9a-fA-F]{8})\s*$")?,
            create_type: Regex::new(r#"^\s*createType\s*=\s*"(?P<t>[^"]+)"\s*$"#)?,
            extent: Regex::new(
                r#"^\s*(?P<access>RW|RDONLY|NOACCESS)\s+(?P<sectors>\d+)\s+(?P<type>FLAT|SPARSE|ZERO|VMFS|VMFSSPARSE|VMFSRDM|VMFSRAW)(\s+"(?P<file>[^"]+)")?(\s+(?P<offset>\d+))?\s*$"#,
            )?,
            adapter: Regex::new(r#"^\s*ddb\.adapterType\s*=\s*"(?P<t>[^"]+)"\s*$"#)?,
            geometry: Regex::new(
                r#"^\s*ddb\.geometry\.(?P<k>cylinders|heads|sectors)\s*=\s*"(?P<v>\d+)"\s*$"#,
            )?,
            parent_hint: Regex::new(r#"^\s*parentFileNameHint\s*=\s*"(?P<f>[^"]+)"\s*$"#)?,
        })
    }
}

fn patterns() -> ImageResult<&'static Patterns> {
    static PATTERNS: OnceLock<Result<Patterns, regex::Error>> = OnceLock::new();

    PATTERNS
        .get_or_init(Patterns::new)
        .as_ref()
        .map_err(|e| ImageError::bad_image("VMware", e.to_string()))
}

fn hex_u32(s: &str) -> ImageResult<u32> {
    u32::from_str_radix(s, 16)
        .map_err(|_| ImageError::bad_image("VMware", format!("invalid CID {}", s)))
}

/// Parse a disk descriptor
pub fn parse(text: &str) -> ImageResult<Descriptor> {
    let re = patterns()?;

    let mut desc = Descriptor {
        version: 1,
        cid: 0,
        parent_cid: NO_PARENT_CID,
        create_type: String::new(),
        extents: Vec::new(),
        adapter_type: None,
        cylinders: None,
        heads: None,
        sectors_per_track: None,
        parent_hint: None,
    };

    let number = |s: &str| {
        s.parse::<u64>()
            .map_err(|_| ImageError::bad_image("VMware", format!("invalid number {}", s)))
    };

    for line in text.lines() {
        let line = line.trim_end_matches('\0');

        if line.trim_start().starts_with('#') {
            continue;
        }

        if let Some(c) = re.version.captures(line) {
            desc.version = number(&c["v"])? as u32;
        } else if let Some(c) = re.cid.captures(line) {
            desc.cid = hex_u32(&c["cid"])?;
        } else if let Some(c) = re.parent_cid.captures(line) {
            desc.parent_cid = hex_u32(&c["cid"])?;
        } else if let Some(c) = re.create_type.captures(line) {
            desc.create_type = c["t"].to_string();
        } else if let Some(c) = re.extent.captures(line) {
            let access = match &c["access"] {
                "RW" => Access::ReadWrite,
                "RDONLY" => Access::ReadOnly,
                _ => Access::NoAccess,
            };

            let kind = match ExtentType::parse(&c["type"]) {
                Some(k) => k,
                None => continue,
            };

            let offset = match c.name("offset") {
                Some(o) => number(o.as_str())?,
                None => 0,
            };

            desc.extents.push(ExtentLine {
                access,
                sectors: number(&c["sectors"])?,
                kind,
                file: c.name("file").map(|f| f.as_str().to_string()),
                offset,
            });
        } else if let Some(c) = re.adapter.captures(line) {
            desc.adapter_type = Some(c["t"].to_string());
        } else if let Some(c) = re.geometry.captures(line) {
            let v = Some(number(&c["v"])? as u32);

            match &c["k"] {
                "cylinders" => desc.cylinders = v,
                "heads" => desc.heads = v,
                _ => desc.sectors_per_track = v,
            }
        } else if let Some(c) = re.parent_hint.captures(line) {
            desc.parent_hint = Some(c["f"].to_string());
        }
    }

    if desc.extents.is_empty() {
        return Err(ImageError::bad_image("VMware", "descriptor has no extents"));
    }

    Ok(desc)
}
