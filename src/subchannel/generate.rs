//! Synthesis of the subchannel of sectors that have none.
//!
//! The generated blocks only carry mode 1 positioning in Q and the
//! pregap flag in P, which is enough to make the disc continuously
//! addressable.

use std::collections::BTreeSet;

use log::{debug, warn};

use crate::bcd::Bcd;
use crate::msf::Msf;
use crate::output::{SectorTag, WritableOpticalImage};
use crate::track::{Track, TrackLayout};
use crate::ImageResult;

use super::log::Sinks;
use super::{interleave, position_q, CHANNEL_SIZE, Q_OFFSET, SUBCHANNEL_SIZE};

/// Build the interleaved subchannel of `sector`.
///
/// `track_start` is the first sector of the track, pregap included, and
/// `pregap` its length. `index` is used as-is unless it's 0, in which
/// case it's derived from the pregap.
pub fn generate_block(
    sector: i64,
    sequence: u32,
    pregap: u64,
    track_start: u64,
    flags: u8,
    index: u16,
) -> Option<[u8; SUBCHANNEL_SIZE]> {
    let index1 = (track_start + pregap) as i64;
    let in_pregap = sector < index1;

    let index = match index {
        0 if !in_pregap => 1,
        i => i,
    };

    let relative = if in_pregap {
        index1 - sector
    } else {
        sector - index1
    };

    let tno = u8::try_from(sequence).ok().and_then(Bcd::from_binary)?;
    let index = u8::try_from(index).ok().and_then(Bcd::from_binary)?;
    let relative = u32::try_from(relative).ok().and_then(Msf::from_sector_index)?;
    let absolute = Msf::from_lba(sector)?;

    let q = position_q(flags, tno, index, relative, absolute);

    let mut planes = [0u8; SUBCHANNEL_SIZE];

    if in_pregap {
        planes[..CHANNEL_SIZE].fill(0xff);
    }

    planes[Q_OFFSET..Q_OFFSET + CHANNEL_SIZE].copy_from_slice(q.raw());

    Some(interleave(&planes))
}

/// Returns the track to describe `sector` with, its first sector and
/// its pregap. Sectors before track 1 belong to a hidden track that
/// borrows track 1's attributes.
fn owner(layout: &TrackLayout, sector: i64) -> Option<(&Track, u64, u64)> {
    match layout.track_for_sector(sector) {
        Some(t) if t.sequence != 0 => Some((t, t.start_sector, t.pregap)),
        _ => {
            let first = layout.track(1).ok().or_else(|| layout.tracks().first())?;

            Some((first, 0, first.start_sector))
        }
    }
}

/// Generate and write the subchannel of every sector in `missing`.
/// Sectors that got one are removed from the set. Returns the number of
/// generated sectors.
pub fn generate_subchannels(
    missing: &mut BTreeSet<i64>,
    layout: &TrackLayout,
    output: &mut dyn WritableOpticalImage,
    sinks: &mut Sinks,
) -> ImageResult<usize> {
    if missing.is_empty() {
        return Ok(0);
    }

    sinks.dump_line(&format!("Generating subchannel for {} sectors", missing.len()));

    if let Some(s) = sinks.status.as_mut() {
        s.init_progress();
    }

    let total = missing.len() as u64;
    let mut generated = Vec::new();

    for (n, &sector) in missing.iter().enumerate() {
        if let Some(s) = sinks.status.as_mut() {
            s.update_progress(
                &format!("Generating subchannel for sector {}", sector),
                n as u64,
                total,
            );
        }

        let (track, start, pregap) = match owner(layout, sector) {
            Some(o) => o,
            None => continue,
        };

        let index = track.index_for_sector(sector).unwrap_or(0);

        let sub = match generate_block(
            sector,
            track.sequence,
            pregap,
            start,
            track.control_flags(),
            index,
        ) {
            Some(s) => s,
            None => {
                warn!("Can't generate subchannel for sector {}", sector);
                continue;
            }
        };

        output.write_sectors_tag(&sub, sector as u64, 1, SectorTag::CdSectorSubchannel)?;

        if let Some(l) = sinks.subchannel() {
            l.write_entry(&sub, true, sector, 1, true, false);
        }

        generated.push(sector);
    }

    if let Some(s) = sinks.status.as_mut() {
        s.end_progress();
    }

    debug!("Generated {} of {} missing subchannels", generated.len(), total);

    for s in &generated {
        missing.remove(s);
    }

    Ok(generated.len())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::output::SubchannelStore;
    use crate::subchannel::{deinterleave, QBlock};
    use crate::track::TrackType;

    #[test]
    fn pregap_block() {
        let sub = generate_block(995, 2, 5, 995, 0, 0).unwrap();
        let planes = deinterleave(&sub);
        let q = QBlock::from_planes(&planes);

        assert!(planes[..CHANNEL_SIZE].iter().all(|&b| b == 0xff));
        assert!(q.crc_ok());
        assert_eq!(q.index(), 0);
        assert_eq!(q.relative_sectors(), 5);
        assert_eq!(q.absolute_lba(), 995);
    }

    #[test]
    fn track_block() {
        let sub = generate_block(1010, 2, 5, 995, 4, 0).unwrap();
        let planes = deinterleave(&sub);
        let q = QBlock::from_planes(&planes);

        assert!(planes[..CHANNEL_SIZE].iter().all(|&b| b == 0));
        assert_eq!(q.control(), 4);
        assert_eq!(q.tno(), 2);
        assert_eq!(q.index(), 1);
        assert_eq!(q.relative_sectors(), 10);
    }

    #[test]
    fn hidden_track() {
        let layout = TrackLayout::new(vec![Track::new(1, 1, 150, 999, TrackType::Mode1)]).unwrap();
        let mut missing: BTreeSet<i64> = [0, 151].into_iter().collect();
        let mut store = SubchannelStore::new();

        let n = generate_subchannels(&mut missing, &layout, &mut store, &mut Sinks::none()).unwrap();

        assert_eq!(n, 2);
        assert!(missing.is_empty());

        let q = QBlock::from_planes(&deinterleave(store.get(0).unwrap()));
        assert!(q.crc_ok());
        assert!(q.data());
        assert_eq!(q.tno(), 1);
        assert_eq!(q.index(), 0);
        assert_eq!(q.relative_sectors(), 150);
        assert_eq!(q.absolute_lba(), 0);

        let q = QBlock::from_planes(&deinterleave(store.get(151).unwrap()));
        assert_eq!(q.index(), 1);
        assert_eq!(q.relative_sectors(), 1);
    }
}
