//! Whole-crate scenarios going through several modules

use std::collections::BTreeSet;

use crate::bcd::Bcd;
use crate::crc;
use crate::msf::Msf;
use crate::output::SubchannelStore;
use crate::subchannel::engine::SubchannelChunk;
use crate::subchannel::generate::generate_block;
use crate::subchannel::log::{Sinks, TextSubchannelLog};
use crate::subchannel::repair::KnownCodes;
use crate::subchannel::{
    convert_q_to_raw, deinterleave, fix_q_subchannel, generate_subchannels, interleave, position_q,
    rw_quiet, write_subchannel_to_image, PChannel, QBlock, RepairOptions, SubchannelMode,
    SubchannelState, CHANNEL_SIZE, Q_OFFSET, SUBCHANNEL_SIZE,
};
use crate::track::{Track, TrackLayout, TrackType};

fn two_tracks() -> TrackLayout {
    TrackLayout::new(vec![
        Track::new(1, 1, 0, 999, TrackType::Audio),
        Track::new(2, 1, 1000, 1999, TrackType::Audio),
    ])
    .unwrap()
}

#[test]
fn all_zero_q_fails_crc() {
    let planes = deinterleave(&[0; SUBCHANNEL_SIZE]);
    let q = QBlock::from_planes(&planes);

    assert_eq!(q.crc(), 0);
    assert!(!q.crc_ok());
    assert!(!crc::q_crc_ok(&[0; CHANNEL_SIZE]));
}

#[test]
fn p_all_set() {
    let mut planes = [0u8; SUBCHANNEL_SIZE];
    planes[..CHANNEL_SIZE].fill(0xff);

    let p = PChannel::new(*array_ref![planes, 0, CHANNEL_SIZE]);

    assert!(p.valid());
    assert_eq!(p.weight(), 96);
    assert_eq!(p.fixed(), p);
    assert!(rw_quiet(&planes));
}

#[test]
fn interleave_round_trip() {
    let mut raw = [0u8; SUBCHANNEL_SIZE];
    let mut seed = 0x1234_5678u32;

    for b in raw.iter_mut() {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
        *b = (seed >> 16) as u8;
    }

    assert_eq!(interleave(&deinterleave(&raw)), raw);
}

#[test]
fn single_bit_flips_break_the_crc() {
    let q = position_q(
        0x4,
        Bcd::from_binary(3).unwrap(),
        Bcd::ONE,
        Msf::from_sector_index(12).unwrap(),
        Msf::from_lba(30_000).unwrap(),
    );

    assert!(q.crc_ok());

    for byte in 0..10 {
        for bit in 0..8 {
            let mut raw = *q.raw();
            raw[byte] ^= 1 << bit;

            assert!(!crc::q_crc_ok(&raw), "flip {}:{} undetected", byte, bit);
        }
    }
}

#[test]
fn repairing_a_valid_q_is_a_no_op() {
    let q = position_q(
        0,
        Bcd::ONE,
        Bcd::ONE,
        Msf::ZERO,
        Msf::from_lba(0).unwrap(),
    );

    let out = fix_q_subchannel(q.raw(), None, None, true, KnownCodes::default());

    assert!(out.fixed);
    assert!(out.flags.is_empty());
    assert_eq!(&out.q, q.raw());
}

#[test]
fn q_only_expansion_sets_p_from_flag() {
    let q = position_q(
        0,
        Bcd::ONE,
        Bcd::ONE,
        Msf::ZERO,
        Msf::from_lba(0).unwrap(),
    );

    let mut q16 = [0u8; 32];
    q16[..CHANNEL_SIZE].copy_from_slice(q.raw());
    q16[15] = 0x80;
    q16[16..16 + CHANNEL_SIZE].copy_from_slice(q.raw());

    let raw = convert_q_to_raw(&q16);
    assert_eq!(raw.len(), 2 * SUBCHANNEL_SIZE);

    let first = deinterleave(array_ref![raw, 0, SUBCHANNEL_SIZE]);
    let second = deinterleave(array_ref![raw, SUBCHANNEL_SIZE, SUBCHANNEL_SIZE]);

    assert!(first[..CHANNEL_SIZE].iter().all(|&b| b == 0xff));
    assert!(second[..CHANNEL_SIZE].iter().all(|&b| b == 0));
    assert_eq!(QBlock::from_planes(&first), q);
    assert!(rw_quiet(&second));
}

#[test]
fn pregap_only_grows() {
    let mut layout = two_tracks();
    let mut state = SubchannelState::default();
    let mut store = SubchannelStore::new();

    let mut last = 0;

    for remaining in [2u32, 5, 3, 7, 1] {
        let q = position_q(
            0,
            Bcd::from_binary(2).unwrap(),
            Bcd::ZERO,
            Msf::from_sector_index(remaining).unwrap(),
            Msf::from_lba(1000 - i64::from(remaining)).unwrap(),
        );

        let mut planes = [0u8; SUBCHANNEL_SIZE];
        planes[Q_OFFSET..Q_OFFSET + CHANNEL_SIZE].copy_from_slice(q.raw());
        let raw = interleave(&planes);

        let chunk = SubchannelChunk {
            supported: SubchannelMode::Raw,
            desired: SubchannelMode::None,
            data: &raw,
            start_sector: 1000 - u64::from(remaining),
            count: 1,
            current_track: 2,
        };

        write_subchannel_to_image(
            &chunk,
            &mut layout,
            &mut state,
            &mut store,
            &RepairOptions::default(),
            &mut Sinks::none(),
        )
        .unwrap();

        let track = layout.track(2).unwrap();

        assert!(track.pregap >= last);
        assert_eq!(track.start_sector + track.pregap, 1000);
        assert_eq!(layout.track(1).unwrap().end_sector, track.start_sector - 1);

        last = track.pregap;
    }

    assert_eq!(last, 7);
    assert!(store.is_empty());
}

/// Read subchannel at 1000..1005 with a stray ADR bit and a noisy P
/// channel, repair it, then synthesize what's still missing.
#[test]
fn repair_then_generate() {
    let mut layout = two_tracks();
    let mut state = SubchannelState::with_missing(995, 1010);
    let mut store = SubchannelStore::new();

    let mut data = Vec::new();

    for (n, sector) in (1000..1005).enumerate() {
        let sub = generate_block(sector, 2, 0, 1000, 0, 0).unwrap();
        let mut planes = deinterleave(&sub);

        match n {
            2 => planes[Q_OFFSET] |= 0x08,
            3 => planes[0] = 0x01,
            _ => (),
        }

        data.extend_from_slice(&interleave(&planes));
    }

    let chunk = SubchannelChunk {
        supported: SubchannelMode::Raw,
        desired: SubchannelMode::Raw,
        data: &data,
        start_sector: 1000,
        count: 5,
        current_track: 2,
    };

    let options = RepairOptions::default()
        .fix_position(true)
        .fix_content(true)
        .dumping(true);

    let mut log = TextSubchannelLog::new(Vec::new());
    let mut lines: Vec<String> = Vec::new();

    {
        let mut sinks = Sinks {
            subchannel: Some(&mut log),
            dump: Some(&mut lines),
            ..Sinks::none()
        };

        let out =
            write_subchannel_to_image(&chunk, &mut layout, &mut state, &mut store, &options, &mut sinks)
                .unwrap();

        assert!(!out.indexes_changed);
    }

    assert_eq!(store.len(), 5);

    let expected: BTreeSet<i64> = (995..1000).chain(1005..1010).collect();
    assert_eq!(state.missing, expected);

    let q = QBlock::from_planes(&deinterleave(store.get(1002).unwrap()));
    assert!(q.crc_ok());
    assert_eq!(q.adr(), 1);

    let planes = deinterleave(store.get(1003).unwrap());
    assert!(planes[..CHANNEL_SIZE].iter().all(|&b| b == 0));

    let text = String::from_utf8(log.into_inner()).unwrap();
    assert!(text.contains("fixed Q ADR"));
    assert!(text.contains("fixed P subchannel"));

    let generated =
        generate_subchannels(&mut state.missing, &layout, &mut store, &mut Sinks::none()).unwrap();

    assert_eq!(generated, 10);
    assert!(state.missing.is_empty());

    for sector in (995..1000).chain(1005..1010) {
        let planes = deinterleave(store.get(sector as u64).unwrap());
        let q = QBlock::from_planes(&planes);

        assert!(q.crc_ok());
        assert_eq!(q.absolute_lba(), sector);
        assert_eq!(q.tno(), if sector < 1000 { 1 } else { 2 });
        assert_eq!(q.index(), 1);
    }
}

#[test]
fn synthesized_pregap() {
    let mut tracks = vec![
        Track::new(1, 1, 0, 1199, TrackType::Mode1),
        Track::new(2, 1, 1200, 1999, TrackType::Audio),
    ];
    tracks[1].pregap = 150;
    tracks[1].indexes.insert(0, 1200);
    tracks[1].indexes.insert(1, 1350);
    tracks[1].indexes.insert(2, 1500);

    let layout = TrackLayout::new(tracks).unwrap();
    let mut missing: BTreeSet<i64> = [1210, 1349, 1350, 1600].into_iter().collect();
    let mut store = SubchannelStore::new();

    generate_subchannels(&mut missing, &layout, &mut store, &mut Sinks::none()).unwrap();

    let q_at = |s: u64| QBlock::from_planes(&deinterleave(store.get(s).unwrap()));

    assert_eq!(q_at(1210).index(), 0);
    assert_eq!(q_at(1210).relative_sectors(), 140);
    assert!(deinterleave(store.get(1210).unwrap())[..CHANNEL_SIZE]
        .iter()
        .all(|&b| b == 0xff));

    assert_eq!(q_at(1349).relative_sectors(), 1);
    assert_eq!(q_at(1350).index(), 1);
    assert_eq!(q_at(1350).relative_sectors(), 0);
    assert_eq!(q_at(1600).index(), 2);
    assert_eq!(q_at(1600).relative_sectors(), 250);
    assert_eq!(q_at(1600).absolute_lba(), 1600);
    assert!(q_at(1600).audio());
}
