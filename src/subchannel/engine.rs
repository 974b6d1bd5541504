//! Subchannel repair engine.
//!
//! [`write_subchannel_to_image`] is called by the dumping loop for
//! every chunk of sectors read from the drive. It keeps the track
//! layout up to date with the pregaps and indexes found in the Q
//! channel, collects ISRCs and the MCN, and when asked to, repairs the
//! subchannel and writes it at the position the Q channel says it
//! belongs to.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::bcd::Bcd;
use crate::msf::{FRAMES_PER_MINUTE, FRAMES_PER_SECOND, LBA_OFFSET};
use crate::output::{SectorTag, WritableOpticalImage};
use crate::track::TrackLayout;
use crate::ImageResult;

use super::log::Sinks;
use super::packets::{check_cdtext_packets, detect_rw_packets};
use super::repair::{fix_q_subchannel, KnownCodes};
use super::{
    convert_q_to_raw, decode_isrc, decode_mcn, deinterleave, interleave, rw_quiet, PChannel,
    QBlock, SubchannelMode, BLANK_ISRC, BLANK_MCN, CHANNEL_SIZE, Q_OFFSET, RW_OFFSET,
    SUBCHANNEL_SIZE,
};

/// What the engine is allowed to do
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RepairOptions {
    /// Validate the subchannel and write it at the position given by the Q channel
    pub fix_position: bool,
    /// Repair P, R-W and Q when they're damaged
    pub fix_content: bool,
    /// Allow recomputing the Q CRC as a last resort
    pub fix_crc: bool,
    /// The data comes straight from a drive. Pregaps are then counted
    /// from index 1 backwards.
    pub dumping: bool,
}

impl RepairOptions {
    /// Set `fix_position`
    pub fn fix_position(mut self, v: bool) -> RepairOptions {
        self.fix_position = v;
        self
    }

    /// Set `fix_content`
    pub fn fix_content(mut self, v: bool) -> RepairOptions {
        self.fix_content = v;
        self
    }

    /// Set `fix_crc`
    pub fn fix_crc(mut self, v: bool) -> RepairOptions {
        self.fix_crc = v;
        self
    }

    /// Set `dumping`
    pub fn dumping(mut self, v: bool) -> RepairOptions {
        self.dumping = v;
        self
    }
}

/// State carried by a dump session from one call to the next
#[derive(Clone, Default, Debug)]
pub struct SubchannelState {
    /// Last known ISRC of every track
    pub isrcs: BTreeMap<u8, String>,
    /// Disc media catalog number
    pub mcn: Option<String>,
    /// Sectors still missing a valid subchannel
    pub missing: BTreeSet<i64>,
    /// Smallest relative position seen in the pregap of every track
    pub smallest_pregap: BTreeMap<u8, i32>,
}

impl SubchannelState {
    /// Create a state where every sector in `start..end` is missing its subchannel
    pub fn with_missing(start: i64, end: i64) -> SubchannelState {
        SubchannelState {
            missing: (start..end).collect(),
            ..SubchannelState::default()
        }
    }
}

/// One chunk of subchannel read from the drive
#[derive(Clone, Copy, Debug)]
pub struct SubchannelChunk<'a> {
    /// Format of `data`
    pub supported: SubchannelMode,
    /// Subchannel format wanted in the image
    pub desired: SubchannelMode,
    /// Subchannel of `count` sectors
    pub data: &'a [u8],
    /// Sector the chunk was read at
    pub start_sector: u64,
    /// Number of sectors in the chunk
    pub count: u32,
    /// Track being dumped
    pub current_track: u8,
}

/// Changes made to the track layout while processing a chunk
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct SubchannelOutcome {
    /// An index or pregap was updated
    pub indexes_changed: bool,
    /// Sectors that became part of a pregap and must be (re)read
    pub new_pregap_sectors: Vec<u64>,
}

/// Process a chunk of subchannel, see the module documentation.
///
/// Sectors that can't be repaired are not an error, they're just left
/// in `state.missing`. Only errors from the output image are returned.
pub fn write_subchannel_to_image(
    chunk: &SubchannelChunk,
    layout: &mut TrackLayout,
    state: &mut SubchannelState,
    output: &mut dyn WritableOpticalImage,
    options: &RepairOptions,
    sinks: &mut Sinks,
) -> ImageResult<SubchannelOutcome> {
    let raw: Cow<[u8]> = match chunk.supported {
        SubchannelMode::Q16 => Cow::Owned(convert_q_to_raw(chunk.data)),
        _ => Cow::Borrowed(chunk.data),
    };

    let count = (chunk.count as usize).min(raw.len() / SUBCHANNEL_SIZE);
    let raw = &raw[..count * SUBCHANNEL_SIZE];
    let start = chunk.start_sector as i64;

    if !options.fix_position && chunk.desired != SubchannelMode::None {
        output.write_sectors_tag(
            raw,
            chunk.start_sector,
            count as u32,
            SectorTag::CdSectorSubchannel,
        )?;
    }

    // Logged the way the drive returned it
    if let Some(l) = sinks.subchannel() {
        l.write_entry(
            chunk.data,
            chunk.supported != SubchannelMode::Q16,
            start,
            count as u32,
            false,
            false,
        );
    }

    let mut planes: Vec<[u8; SUBCHANNEL_SIZE]> = raw
        .chunks_exact(SUBCHANNEL_SIZE)
        .map(|b| deinterleave(array_ref![b, 0, SUBCHANNEL_SIZE]))
        .collect();

    let mut outcome = SubchannelOutcome::default();

    extract_indexes(
        &planes,
        start,
        chunk.current_track,
        layout,
        state,
        options,
        sinks,
        &mut outcome,
    );

    if !options.fix_position || chunk.desired == SubchannelMode::None {
        return Ok(outcome);
    }

    let mut prev_pos = i64::MIN;

    for n in 0..count {
        let lba = start + n as i64;
        let mut block = planes[n];
        let raw_block = array_ref![raw, n * SUBCHANNEL_SIZE, SUBCHANNEL_SIZE];

        let p = PChannel::new(*array_ref![block, 0, CHANNEL_SIZE]);
        let mut p_ok = p.valid();
        let mut crc_ok = QBlock::from_planes(&block).crc_ok();
        let mut rw_ok = rw_quiet(&block);
        let mut rw_packet = false;
        let mut cdtext = false;

        if !rw_ok {
            let found = detect_rw_packets(raw_block);
            rw_packet = found.rw_packet;
            cdtext = found.cdtext;

            if cdtext {
                rw_ok = check_cdtext_packets(raw_block);
            } else if rw_packet {
                rw_ok = true;
            }
        }

        if !p_ok && options.fix_content {
            block[..CHANNEL_SIZE].copy_from_slice(p.fixed().raw());
            p_ok = true;

            if let Some(l) = sinks.subchannel() {
                l.write_p_fix(lba);
            }
        }

        if !rw_ok && !rw_packet && !cdtext && options.fix_content {
            block[RW_OFFSET..].fill(0);
            rw_ok = true;

            if let Some(l) = sinks.subchannel() {
                l.write_rw_fix(lba);
            }
        }

        // Repairs need a neighbour on both sides
        if !crc_ok && options.fix_content && n > 0 && n + 1 < count {
            let q = QBlock::from_planes(&block);
            let prev = QBlock::from_planes(&planes[n - 1]);
            let next = QBlock::from_planes(&planes[n + 1]);

            let known = KnownCodes {
                mcn: state.mcn.as_deref(),
                isrc: state.isrcs.get(&chunk.current_track).map(String::as_str),
            };

            let fixed = fix_q_subchannel(q.raw(), Some(prev.raw()), Some(next.raw()), options.fix_crc, known);

            if fixed.fixed {
                block[Q_OFFSET..Q_OFFSET + CHANNEL_SIZE].copy_from_slice(&fixed.q);
                crc_ok = true;

                if let Some(l) = sinks.subchannel() {
                    l.write_q_fixes(lba, fixed.flags);
                }
            }
        }

        planes[n] = block;

        if !p_ok || !crc_ok || !rw_ok {
            continue;
        }

        let q = QBlock::from_planes(&block);

        let a_pos = if q.mode() == 1 {
            q.absolute_lba()
        } else {
            // Only the frame is known, take the minute and second from where we expect to be
            let expected = lba + LBA_OFFSET;
            let minute_second = expected - expected % i64::from(FRAMES_PER_SECOND);
            let mut pos = minute_second + i64::from(q.aframe()) - LBA_OFFSET;

            if pos < prev_pos {
                pos += i64::from(FRAMES_PER_SECOND);
            }

            pos
        };

        // Can't address the lead-in
        if a_pos < 0 {
            continue;
        }

        prev_pos = a_pos;

        let sub = interleave(&block);

        output.write_sector_tag(&sub, a_pos as u64, SectorTag::CdSectorSubchannel)?;
        state.missing.remove(&a_pos);

        if let Some(l) = sinks.subchannel() {
            l.write_entry(&sub, true, a_pos, 1, false, true);
        }
    }

    Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
fn extract_indexes(
    planes: &[[u8; SUBCHANNEL_SIZE]],
    start: i64,
    current_track: u8,
    layout: &mut TrackLayout,
    state: &mut SubchannelState,
    options: &RepairOptions,
    sinks: &mut Sinks,
    outcome: &mut SubchannelOutcome,
) {
    for (n, block) in planes.iter().enumerate() {
        let sector = start + n as i64;
        let q = QBlock::from_planes(block);

        match q.mode() {
            3 => isrc(&q, sector, current_track, layout, state, sinks),
            2 => mcn(&q, state, sinks),
            1 => position(&q, layout, state, options, sinks, outcome),
            _ => (),
        }
    }
}

fn isrc(
    q: &QBlock,
    sector: i64,
    current_track: u8,
    layout: &TrackLayout,
    state: &mut SubchannelState,
    sinks: &mut Sinks,
) {
    let isrc = match decode_isrc(q.raw()) {
        Some(i) if i != BLANK_ISRC => i,
        _ => return,
    };

    if !q.crc_ok() {
        return;
    }

    match state.isrcs.get(&current_track) {
        None => {
            sinks.dump_line(&format!("Found ISRC for track {}: {}", current_track, isrc));
            state.isrcs.insert(current_track, isrc);
        }
        Some(old) if *old != isrc => {
            // Reads around track boundaries may belong to the neighbour
            let owner = layout.track_for_sector(sector).map(|t| t.sequence);

            if owner != Some(u32::from(current_track)) {
                return;
            }

            sinks.dump_line(&format!(
                "ISRC for track {} changed from {} to {}",
                current_track, old, isrc
            ));
            state.isrcs.insert(current_track, isrc);
        }
        _ => (),
    }
}

fn mcn(q: &QBlock, state: &mut SubchannelState, sinks: &mut Sinks) {
    let mcn = match decode_mcn(q.raw()) {
        Some(m) if m != BLANK_MCN => m,
        _ => return,
    };

    if !q.crc_ok() {
        return;
    }

    match state.mcn.as_deref() {
        None => sinks.dump_line(&format!("Found MCN: {}", mcn)),
        Some(old) if old != mcn => {
            sinks.dump_line(&format!("MCN changed from {} to {}", old, mcn))
        }
        _ => return,
    }

    state.mcn = Some(mcn);
}

fn position(
    q: &QBlock,
    layout: &mut TrackLayout,
    state: &mut SubchannelState,
    options: &RepairOptions,
    sinks: &mut Sinks,
    outcome: &mut SubchannelOutcome,
) {
    if !q.crc_ok() {
        return;
    }

    let raw = q.raw();

    let tno = match Bcd::from_bcd(raw[1]) {
        Some(t) => t.binary(),
        None => return,
    };

    let pos = match layout.position(u32::from(tno)) {
        Some(p) => p,
        None => return,
    };

    let index = match Bcd::from_bcd(raw[2]) {
        Some(i) => i.binary(),
        None => return,
    };

    if index == 0 {
        if tno > 1 {
            pregap(q, tno, pos, layout, state, options, sinks, outcome);
        }

        return;
    }

    let a_pos = q.absolute_lba();
    let index = u16::from(index);
    let track = &mut layout.tracks_mut()[pos];

    if index == 1 && a_pos > track.start_sector as i64 {
        return;
    }

    if let Some(&known) = track.indexes.get(&index) {
        if i64::from(known) <= a_pos {
            return;
        }
    }

    let lba = match i32::try_from(a_pos) {
        Ok(l) => l,
        Err(_) => return,
    };

    track.indexes.insert(index, lba);
    outcome.indexes_changed = true;

    sinks.dump_line(&format!("Setting index {} for track {} to LBA {}", index, tno, lba));
}

#[allow(clippy::too_many_arguments)]
fn pregap(
    q: &QBlock,
    tno: u8,
    pos: usize,
    layout: &mut TrackLayout,
    state: &mut SubchannelState,
    options: &RepairOptions,
    sinks: &mut Sinks,
    outcome: &mut SubchannelOutcome,
) {
    let raw = q.raw();

    // Relative time counts down to index 1 in the pregap
    let q_pos = i64::from(Bcd::from_bcd(raw[3]).map_or(0, Bcd::binary)) * i64::from(FRAMES_PER_MINUTE)
        + i64::from(Bcd::from_bcd(raw[4]).map_or(0, Bcd::binary)) * i64::from(FRAMES_PER_SECOND)
        + i64::from(Bcd::from_bcd(raw[5]).map_or(0, Bcd::binary));

    let smallest = *state
        .smallest_pregap
        .entry(tno)
        .or_insert(if options.dumping { 1 } else { 0 });

    let session = layout.tracks()[pos].session;

    // The first track of a session has no pregap to speak of
    if layout.first_track_in_session(session) == Some(u32::from(tno)) {
        return;
    }

    let q_pos = q_pos as i32;

    if q_pos < smallest {
        let dif = (smallest - q_pos) as u64;

        state.smallest_pregap.insert(tno, q_pos);

        grow(layout, pos, dif, tno, sinks, outcome);
    }

    let current = layout.tracks()[pos].pregap;

    if q_pos > 0 && current < q_pos as u64 {
        grow(layout, pos, q_pos as u64 - current, tno, sinks, outcome);
    }
}

fn grow(
    layout: &mut TrackLayout,
    pos: usize,
    delta: u64,
    tno: u8,
    sinks: &mut Sinks,
    outcome: &mut SubchannelOutcome,
) {
    let new = layout.grow_pregap(pos, delta);

    if new.is_empty() {
        return;
    }

    let track = &layout.tracks()[pos];

    debug!(
        "Track {} now starts at {} with {} pregap sectors",
        tno, track.start_sector, track.pregap
    );

    let msg = format!("Pregap for track {} set to {} sectors", tno, track.pregap);
    sinks.dump_line(&msg);
    sinks.status(&msg);

    outcome.new_pregap_sectors.extend(new);
    outcome.indexes_changed = true;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::msf::Msf;
    use crate::output::SubchannelStore;
    use crate::subchannel::log::SubchannelLog;
    use crate::subchannel::packets::{cdtext_pack, from_cdtext};
    use crate::subchannel::{encode_isrc, encode_mcn, position_q, Q16_SIZE};
    use crate::track::{Track, TrackType};
    use crate::crc;

    fn layout() -> TrackLayout {
        TrackLayout::new(vec![
            Track::new(1, 1, 0, 999, TrackType::Audio),
            Track::new(2, 1, 1000, 1999, TrackType::Audio),
        ])
        .unwrap()
    }

    fn raw_q(q: &[u8; 12]) -> [u8; SUBCHANNEL_SIZE] {
        let mut planes = [0u8; SUBCHANNEL_SIZE];
        planes[Q_OFFSET..Q_OFFSET + CHANNEL_SIZE].copy_from_slice(q);

        interleave(&planes)
    }

    fn pregap_q(tno: u8, remaining: u32, lba: i64) -> [u8; SUBCHANNEL_SIZE] {
        let q = position_q(
            0,
            Bcd::from_binary(tno).unwrap(),
            Bcd::ZERO,
            Msf::from_sector_index(remaining).unwrap(),
            Msf::from_lba(lba).unwrap(),
        );

        raw_q(q.raw())
    }

    fn index_q(tno: u8, index: u8, lba: i64) -> [u8; SUBCHANNEL_SIZE] {
        let q = position_q(
            0,
            Bcd::from_binary(tno).unwrap(),
            Bcd::from_binary(index).unwrap(),
            Msf::ZERO,
            Msf::from_lba(lba).unwrap(),
        );

        raw_q(q.raw())
    }

    fn scan(data: &[u8], start: u64, layout: &mut TrackLayout, state: &mut SubchannelState) -> SubchannelOutcome {
        let chunk = SubchannelChunk {
            supported: SubchannelMode::Raw,
            desired: SubchannelMode::None,
            data,
            start_sector: start,
            count: (data.len() / SUBCHANNEL_SIZE) as u32,
            current_track: 2,
        };

        let mut store = SubchannelStore::new();

        write_subchannel_to_image(
            &chunk,
            layout,
            state,
            &mut store,
            &RepairOptions::default(),
            &mut Sinks::none(),
        )
        .unwrap()
    }

    /// Validate and reposition a raw chunk read on track 2
    fn repair(data: &[u8], start: u64, state: &mut SubchannelState, options: RepairOptions) -> SubchannelStore {
        let chunk = SubchannelChunk {
            supported: SubchannelMode::Raw,
            desired: SubchannelMode::Raw,
            data,
            start_sector: start,
            count: (data.len() / SUBCHANNEL_SIZE) as u32,
            current_track: 2,
        };

        let mut store = SubchannelStore::new();

        write_subchannel_to_image(&chunk, &mut layout(), state, &mut store, &options, &mut Sinks::none())
            .unwrap();

        store
    }

    /// (bytes, is_raw, lba, count, fixed) of every entry
    #[derive(Default)]
    struct Entries(Vec<(usize, bool, i64, u32, bool)>);

    impl SubchannelLog for Entries {
        fn write_entry(&mut self, data: &[u8], is_raw: bool, lba: i64, count: u32, _generated: bool, fixed: bool) {
            self.0.push((data.len(), is_raw, lba, count, fixed));
        }
    }

    #[test]
    fn pregap_discovery() {
        let mut l = layout();
        let mut state = SubchannelState::default();

        let out = scan(&pregap_q(2, 3, 997), 997, &mut l, &mut state);

        assert!(out.indexes_changed);
        assert_eq!(out.new_pregap_sectors, vec![997, 998, 999]);
        assert_eq!(l.tracks()[1].pregap, 3);
        assert_eq!(l.tracks()[1].start_sector, 997);
        assert_eq!(l.tracks()[0].end_sector, 996);

        // A shorter pregap never shrinks it
        let out = scan(&pregap_q(2, 1, 999), 999, &mut l, &mut state);
        assert_eq!(l.tracks()[1].pregap, 3);
        assert!(out.new_pregap_sectors.is_empty());
    }

    #[test]
    fn first_track_has_no_pregap() {
        let mut l = layout();
        let mut state = SubchannelState::default();

        let out = scan(&pregap_q(1, 5, 0), 0, &mut l, &mut state);

        assert!(!out.indexes_changed);
        assert_eq!(l.tracks()[0].pregap, 0);
    }

    #[test]
    fn indexes_only_move_earlier() {
        let mut l = layout();
        let mut state = SubchannelState::default();

        let out = scan(&index_q(2, 2, 1500), 1500, &mut l, &mut state);
        assert!(out.indexes_changed);
        assert_eq!(l.tracks()[1].indexes.get(&2), Some(&1500));

        let out = scan(&index_q(2, 2, 1600), 1600, &mut l, &mut state);
        assert!(!out.indexes_changed);
        assert_eq!(l.tracks()[1].indexes.get(&2), Some(&1500));

        let out = scan(&index_q(2, 2, 1400), 1400, &mut l, &mut state);
        assert!(out.indexes_changed);
        assert_eq!(l.tracks()[1].indexes.get(&2), Some(&1400));

        // Index 1 can't be later than the track start
        let out = scan(&index_q(2, 1, 1001), 1001, &mut l, &mut state);
        assert!(!out.indexes_changed);
        assert_eq!(l.tracks()[1].indexes.get(&1), Some(&1000));
    }

    #[test]
    fn isrc_and_mcn_collection() {
        let mut l = layout();
        let mut state = SubchannelState::default();

        let mut q = [0u8; 12];
        q[0] = 0x03;
        encode_isrc(&mut q, "USRC17607839");
        crc::q_crc_stamp(&mut q);

        let mut m = [0u8; 12];
        m[0] = 0x02;
        encode_mcn(&mut m, "0123456789012");
        crc::q_crc_stamp(&mut m);

        let mut data = raw_q(&q).to_vec();
        data.extend_from_slice(&raw_q(&m));

        scan(&data, 1200, &mut l, &mut state);

        assert_eq!(state.isrcs.get(&2).map(String::as_str), Some("USRC17607839"));
        assert_eq!(state.mcn.as_deref(), Some("0123456789012"));

        // Read from track 1's area: not trusted
        encode_isrc(&mut q, "USRC17607840");
        crc::q_crc_stamp(&mut q);
        scan(&raw_q(&q), 10, &mut l, &mut state);
        assert_eq!(state.isrcs.get(&2).map(String::as_str), Some("USRC17607839"));

        scan(&raw_q(&q), 1300, &mut l, &mut state);
        assert_eq!(state.isrcs.get(&2).map(String::as_str), Some("USRC17607840"));
    }

    #[test]
    fn verbatim_write_without_repositioning() {
        let mut l = layout();
        let mut state = SubchannelState::with_missing(0, 10);
        let data = [0x5au8; SUBCHANNEL_SIZE * 2];

        let chunk = SubchannelChunk {
            supported: SubchannelMode::Raw,
            desired: SubchannelMode::Raw,
            data: &data,
            start_sector: 4,
            count: 2,
            current_track: 1,
        };

        let mut store = SubchannelStore::new();

        write_subchannel_to_image(
            &chunk,
            &mut l,
            &mut state,
            &mut store,
            &RepairOptions::default(),
            &mut Sinks::none(),
        )
        .unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(5).unwrap()[..], data[..SUBCHANNEL_SIZE]);
        // Nothing was validated so nothing is considered recovered
        assert_eq!(state.missing.len(), 10);
    }

    #[test]
    fn q_only_input_is_expanded_and_placed() {
        let mut l = layout();
        let mut state = SubchannelState::with_missing(1500, 1503);

        let mut data = Vec::new();
        let mut expected = Vec::new();

        for lba in 1500..1503i64 {
            let q = position_q(
                0,
                Bcd::from_binary(2).unwrap(),
                Bcd::from_binary(1).unwrap(),
                Msf::from_sector_index((lba - 1000) as u32).unwrap(),
                Msf::from_lba(lba).unwrap(),
            );

            let mut q16 = [0u8; Q16_SIZE];
            q16[..CHANNEL_SIZE].copy_from_slice(q.raw());
            let mut raw = raw_q(q.raw());

            // P flag
            if lba == 1502 {
                q16[15] = 0x80;
                raw.iter_mut().for_each(|b| *b |= 0x80);
            }

            data.extend_from_slice(&q16);
            expected.push(raw);
        }

        let chunk = SubchannelChunk {
            supported: SubchannelMode::Q16,
            desired: SubchannelMode::Raw,
            data: &data,
            start_sector: 1500,
            count: 3,
            current_track: 2,
        };

        let mut store = SubchannelStore::new();
        let mut entries = Entries::default();

        {
            let mut sinks = Sinks {
                subchannel: Some(&mut entries),
                ..Sinks::none()
            };

            write_subchannel_to_image(
                &chunk,
                &mut l,
                &mut state,
                &mut store,
                &RepairOptions::default().fix_position(true),
                &mut sinks,
            )
            .unwrap();
        }

        assert_eq!(store.len(), 3);
        for (n, raw) in expected.iter().enumerate() {
            assert_eq!(store.get(1500 + n as u64), Some(raw));
        }
        assert!(state.missing.is_empty());

        // The input is logged as read, the placed blocks as raw
        assert_eq!(entries.0[0], (3 * Q16_SIZE, false, 1500, 3, false));
        assert_eq!(
            entries.0[1..],
            [
                (SUBCHANNEL_SIZE, true, 1500, 1, true),
                (SUBCHANNEL_SIZE, true, 1501, 1, true),
                (SUBCHANNEL_SIZE, true, 1502, 1, true),
            ]
        );
    }

    #[test]
    fn raw_input_is_logged_as_raw() {
        let mut l = layout();
        let mut state = SubchannelState::default();
        let data = index_q(2, 1, 1500);
        let mut entries = Entries::default();

        let chunk = SubchannelChunk {
            supported: SubchannelMode::Raw,
            desired: SubchannelMode::None,
            data: &data,
            start_sector: 1500,
            count: 1,
            current_track: 2,
        };

        let mut sinks = Sinks {
            subchannel: Some(&mut entries),
            ..Sinks::none()
        };

        write_subchannel_to_image(
            &chunk,
            &mut l,
            &mut state,
            &mut SubchannelStore::new(),
            &RepairOptions::default(),
            &mut sinks,
        )
        .unwrap();

        drop(sinks);

        assert_eq!(entries.0, vec![(SUBCHANNEL_SIZE, true, 1500, 1, false)]);
    }

    fn mcn_q(aframe: u8) -> [u8; SUBCHANNEL_SIZE] {
        let mut m = [0u8; 12];
        m[0] = 0x02;
        encode_mcn(&mut m, "0123456789012");
        m[9] = aframe;
        crc::q_crc_stamp(&mut m);

        raw_q(&m)
    }

    #[test]
    fn frame_only_positions_carry_into_next_second() {
        let mut state = SubchannelState::with_missing(1040, 1060);

        // The drive returned the blocks one sector late. The second
        // block's frame wraps to 0 and must land after the first one.
        let mut data = mcn_q(0x74).to_vec();
        data.extend_from_slice(&mcn_q(0x00));

        let store = repair(&data, 1048, &mut state, RepairOptions::default().fix_position(true));

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(1049), Some(&mcn_q(0x74)));
        assert_eq!(store.get(1050), Some(&mcn_q(0x00)));
        assert!(store.get(1048).is_none());

        assert!(state.missing.contains(&1048));
        assert!(!state.missing.contains(&1049));
        assert!(!state.missing.contains(&1050));
        assert_eq!(state.mcn.as_deref(), Some("0123456789012"));
    }

    /// Position block at `lba` carrying CD-TEXT in R-W
    fn with_cdtext(lba: i64, packs: &[[u8; 18]; 4]) -> [u8; SUBCHANNEL_SIZE] {
        let mut raw = index_q(2, 1, lba);

        for (b, s) in raw.iter_mut().zip(from_cdtext(packs).iter()) {
            *b |= s;
        }

        raw
    }

    #[test]
    fn cdtext_is_never_cleared() {
        let packs = [cdtext_pack(0), cdtext_pack(1), cdtext_pack(2), cdtext_pack(3)];
        let mut damaged = packs;
        damaged[1][5] ^= 0x04;

        let good = with_cdtext(1500, &packs);
        let bad = with_cdtext(1501, &damaged);

        let mut data = good.to_vec();
        data.extend_from_slice(&bad);

        for &fix_content in &[false, true] {
            let mut state = SubchannelState::with_missing(1500, 1502);
            let options = RepairOptions::default()
                .fix_position(true)
                .fix_content(fix_content);

            let store = repair(&data, 1500, &mut state, options);

            // Valid CD-TEXT goes through untouched, a damaged pack
            // leaves the sector missing instead of zeroing R-W
            assert_eq!(store.get(1500), Some(&good));
            assert!(store.get(1501).is_none());
            assert_eq!(state.missing.iter().copied().collect::<Vec<_>>(), vec![1501]);
        }
    }
}
