//! Classic Mac OS resource fork parsing, used by old UDIF images to
//! store their block tables.

use crate::{ImageError, ImageResult};

fn corrupt(desc: &str) -> ImageError {
    ImageError::CorruptResourceFork(desc.to_string())
}

fn be16(buf: &[u8], off: usize) -> ImageResult<u16> {
    buf.get(off..off + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| corrupt("truncated resource map"))
}

fn be32(buf: &[u8], off: usize) -> ImageResult<u32> {
    buf.get(off..off + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| corrupt("truncated resource map"))
}

/// A single resource
#[derive(Clone, Debug)]
pub struct Resource {
    /// Resource ID
    pub id: i16,
    /// Resource contents
    pub data: Vec<u8>,
}

/// Return every resource of type `kind` in `fork`, in map order
pub fn resources(fork: &[u8], kind: &[u8; 4]) -> ImageResult<Vec<Resource>> {
    let data_offset = be32(fork, 0)? as usize;
    let map_offset = be32(fork, 4)? as usize;

    let type_list = map_offset + usize::from(be16(fork, map_offset + 24)?);
    let types = usize::from(be16(fork, type_list)?).wrapping_add(1) & 0xffff;

    let mut found = Vec::new();

    for t in 0..types {
        let entry = type_list + 2 + t * 8;

        let name = fork
            .get(entry..entry + 4)
            .ok_or_else(|| corrupt("truncated type list"))?;

        if name != kind {
            continue;
        }

        let count = usize::from(be16(fork, entry + 4)?) + 1;
        let refs = type_list + usize::from(be16(fork, entry + 6)?);

        for r in 0..count {
            let reference = refs + r * 12;

            let id = be16(fork, reference)? as i16;
            let offset = be32(fork, reference + 4)? as usize & 0xff_ffff;

            let start = data_offset + offset;
            let len = be32(fork, start)? as usize;

            let data = fork
                .get(start + 4..start + 4 + len)
                .ok_or_else(|| corrupt("resource data out of bounds"))?;

            found.push(Resource {
                id,
                data: data.to_vec(),
            });
        }
    }

    Ok(found)
}

/// Build a resource fork holding `res` as resources of type `kind`
#[cfg(test)]
pub fn build(kind: &[u8; 4], res: &[&[u8]]) -> Vec<u8> {
    let data_offset = 256usize;

    let mut data = Vec::new();
    let mut offsets = Vec::new();

    for r in res {
        offsets.push(data.len());
        data.extend_from_slice(&(r.len() as u32).to_be_bytes());
        data.extend_from_slice(r);
    }

    let map_offset = data_offset + data.len();

    let mut map = vec![0u8; 28];
    // Type list right after the map header
    map[24..26].copy_from_slice(&28u16.to_be_bytes());
    map.extend_from_slice(&0u16.to_be_bytes());
    map.extend_from_slice(kind);
    map.extend_from_slice(&(res.len() as u16 - 1).to_be_bytes());
    map.extend_from_slice(&10u16.to_be_bytes());

    for (i, off) in offsets.iter().enumerate() {
        map.extend_from_slice(&(i as i16).to_be_bytes());
        map.extend_from_slice(&0xffffu16.to_be_bytes());
        map.extend_from_slice(&(*off as u32).to_be_bytes());
        map.extend_from_slice(&0u32.to_be_bytes());
    }

    let mut fork = vec![0u8; data_offset];
    fork[0..4].copy_from_slice(&(data_offset as u32).to_be_bytes());
    fork[4..8].copy_from_slice(&(map_offset as u32).to_be_bytes());
    fork[8..12].copy_from_slice(&(data.len() as u32).to_be_bytes());
    fork[12..16].copy_from_slice(&(map.len() as u32).to_be_bytes());
    fork.extend_from_slice(&data);
    fork.extend_from_slice(&map);

    fork
}
