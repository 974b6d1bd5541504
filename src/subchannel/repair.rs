//! Q channel repair.
//!
//! A damaged Q block is repaired by trying a list of strategies in
//! order, from the cheapest stray bit fixes to borrowing whole fields
//! from the neighbouring blocks. The last resort is to just recompute
//! the CRC, which is only done when explicitly allowed.
//!
//! A strategy either proposes a complete fix (only returned when the
//! CRC of the candidate checks out), proposes a change that is kept
//! for the following strategies, or passes.

use bitflags::bitflags;

use crate::bcd::{bcd_to_binary, binary_to_bcd};
use crate::crc;
use crate::msf::{Msf, FRAMES_PER_SECOND};

use super::{encode_isrc, encode_mcn, QBlock, CHANNEL_SIZE};

type Q = [u8; CHANNEL_SIZE];

bitflags! {
    /// Fields of a Q block modified by a repair
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct QFix: u16 {
        /// ADR nibble
        const ADR = 1 << 0;
        /// Control nibble
        const CONTROL = 1 << 1;
        /// Mode 1 zero byte
        const ZERO = 1 << 2;
        /// Track number
        const TNO = 1 << 3;
        /// Index number
        const INDEX = 1 << 4;
        /// Track relative position
        const REL_POS = 1 << 5;
        /// Absolute position (or absolute frame in modes 2 and 3)
        const ABS_POS = 1 << 6;
        /// CRC recomputed over the data
        const CRC = 1 << 7;
        /// Media catalog number
        const MCN = 1 << 8;
        /// International standard recording code
        const ISRC = 1 << 9;
    }
}

/// Result of a repair attempt
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct QRepairOutcome {
    /// True if `q` now has a valid CRC
    pub fixed: bool,
    /// The repaired block. Unchanged from the input if the repair failed.
    pub q: Q,
    /// Fields that were modified
    pub flags: QFix,
}

/// Codes known to be good from earlier reads, used to rewrite mode 2 and 3 blocks
#[derive(Clone, Copy, Default, Debug)]
pub struct KnownCodes<'a> {
    /// Disc media catalog number
    pub mcn: Option<&'a str>,
    /// ISRC of the current track
    pub isrc: Option<&'a str>,
}

/// Everything a strategy may look at besides the block being repaired
struct Context<'a> {
    /// Previous block, only if its CRC is valid
    prev: Option<Q>,
    /// Next block, only if its CRC is valid
    next: Option<Q>,
    fix_crc: bool,
    known: KnownCodes<'a>,
}

impl<'a> Context<'a> {
    fn both(&self) -> Option<(Q, Q)> {
        self.prev.zip(self.next)
    }
}

enum Step {
    /// The block is repaired
    Fixed(Q, QFix),
    /// Keep the change and carry on with the next strategy
    Carry(Q, QFix),
    /// Nothing to do
    Pass,
}

type Strategy = fn(&Q, &Context) -> Step;

/// Strategies tried on any block
const COMMON: &[Strategy] = &[
    strip_adr,
    brute_force_adr,
    prev_control,
    next_control,
    agreeing_control,
];

/// Strategies for mode 1 (position) blocks
const POSITION: &[Strategy] = &[
    zero_field,
    agreeing_tno,
    agreeing_index,
    relative_from_prev,
    relative_from_next,
    absolute_from_prev,
    absolute_from_next,
    stamp_crc_single,
];

/// Strategies for mode 2 (MCN) and mode 3 (ISRC) blocks
const CODES: &[Strategy] = &[aframe_from_prev, aframe_from_next, known_codes, stamp_crc_both];

/// Try to repair `q` using its neighbours. Neighbours with a bad CRC
/// are ignored. A block with a valid CRC is returned as-is.
pub fn fix_q_subchannel(
    q: &Q,
    prev: Option<&Q>,
    next: Option<&Q>,
    fix_crc: bool,
    known: KnownCodes,
) -> QRepairOutcome {
    let failed = QRepairOutcome {
        fixed: false,
        q: *q,
        flags: QFix::empty(),
    };

    if crc::q_crc_ok(q) {
        return QRepairOutcome {
            fixed: true,
            ..failed
        };
    }

    let ctx = Context {
        prev: prev.filter(|p| crc::q_crc_ok(p)).copied(),
        next: next.filter(|n| crc::q_crc_ok(n)).copied(),
        fix_crc,
        known,
    };

    let mut cur = *q;
    let mut flags = QFix::empty();

    if let Some(q) = run(COMMON, &mut cur, &mut flags, &ctx) {
        return QRepairOutcome {
            fixed: true,
            q,
            flags,
        };
    }

    let specific = match cur[0] & 3 {
        1 => POSITION,
        2 | 3 => CODES,
        _ => return failed,
    };

    match run(specific, &mut cur, &mut flags, &ctx) {
        Some(q) => QRepairOutcome {
            fixed: true,
            q,
            flags,
        },
        None => failed,
    }
}

fn run(chain: &[Strategy], cur: &mut Q, flags: &mut QFix, ctx: &Context) -> Option<Q> {
    for strategy in chain {
        match strategy(cur, ctx) {
            Step::Fixed(q, f) => {
                *flags |= f;
                return Some(q);
            }
            Step::Carry(q, f) => {
                *cur = q;
                *flags |= f;

                if crc::q_crc_ok(cur) {
                    return Some(*cur);
                }
            }
            Step::Pass => (),
        }
    }

    None
}

fn retest(q: Q, flag: QFix) -> Step {
    if crc::q_crc_ok(&q) {
        Step::Fixed(q, flag)
    } else {
        Step::Pass
    }
}

/// Clear ADR bits 2 and 3, no mode we handle uses them
fn strip_adr(q: &Q, _: &Context) -> Step {
    if q[0] & 0x0c == 0 {
        return Step::Pass;
    }

    let mut c = *q;
    c[0] &= 0xf3;

    Step::Carry(c, QFix::ADR)
}

fn brute_force_adr(q: &Q, _: &Context) -> Step {
    for adr in 1..=3 {
        if q[0] & 0xf == adr {
            continue;
        }

        let mut c = *q;
        c[0] = (q[0] & 0xf0) | adr;

        if let Step::Fixed(c, f) = retest(c, QFix::ADR) {
            return Step::Fixed(c, f);
        }
    }

    Step::Pass
}

fn borrow_control(q: &Q, neighbour: Option<Q>) -> Step {
    match neighbour {
        Some(n) if n[0] & 0xf0 != q[0] & 0xf0 => {
            let mut c = *q;
            c[0] = (n[0] & 0xf0) | (q[0] & 0x0f);

            retest(c, QFix::CONTROL)
        }
        _ => Step::Pass,
    }
}

fn prev_control(q: &Q, ctx: &Context) -> Step {
    borrow_control(q, ctx.prev)
}

fn next_control(q: &Q, ctx: &Context) -> Step {
    borrow_control(q, ctx.next)
}

/// Both neighbours agree on a different control nibble, trust them
fn agreeing_control(q: &Q, ctx: &Context) -> Step {
    match ctx.both() {
        Some((p, n)) if p[0] & 0xf0 == n[0] & 0xf0 && q[0] & 0xf0 != n[0] & 0xf0 => {
            let mut c = *q;
            c[0] = (n[0] & 0xf0) | (q[0] & 0x0f);

            Step::Carry(c, QFix::CONTROL)
        }
        _ => Step::Pass,
    }
}

fn zero_field(q: &Q, _: &Context) -> Step {
    if q[6] == 0 {
        return Step::Pass;
    }

    let mut c = *q;
    c[6] = 0;

    Step::Carry(c, QFix::ZERO)
}

fn agreeing_byte(q: &Q, ctx: &Context, pos: usize, flag: QFix) -> Step {
    match ctx.both() {
        Some((p, n)) if p[pos] == n[pos] && q[pos] != n[pos] => {
            let mut c = *q;
            c[pos] = n[pos];

            Step::Carry(c, flag)
        }
        _ => Step::Pass,
    }
}

fn agreeing_tno(q: &Q, ctx: &Context) -> Step {
    agreeing_byte(q, ctx, 1, QFix::TNO)
}

fn agreeing_index(q: &Q, ctx: &Context) -> Step {
    agreeing_byte(q, ctx, 2, QFix::INDEX)
}

/// Replace the MSF at `pos` with the one of `from` moved by one frame,
/// unless the two are already one frame apart
fn shift_msf(q: &Q, from: &Q, pos: usize, forward: bool, flag: QFix) -> Step {
    let sectors = |b: &Q| {
        let block = QBlock::new(*b);

        if pos == 3 {
            block.relative_sectors()
        } else {
            block.absolute_lba()
        }
    };

    let delta = if forward {
        sectors(q) - sectors(from)
    } else {
        sectors(from) - sectors(q)
    };

    if delta == 1 {
        return Step::Pass;
    }

    let msf = Msf::from_bcd_slice(&from[pos..pos + 3]).and_then(|m| {
        if forward {
            m.next()
        } else {
            m.prev()
        }
    });

    match msf {
        Some(m) => {
            let mut c = *q;
            c[pos..pos + 3].copy_from_slice(&m.to_bcd_bytes());

            Step::Carry(c, flag)
        }
        None => Step::Pass,
    }
}

/// The relative position counts down in the pregap, only fix it in the track proper
fn in_track(q: &Q, n: &Q) -> bool {
    bcd_to_binary(q[2]) > 0 && bcd_to_binary(n[2]) > 0
}

fn relative_from_prev(q: &Q, ctx: &Context) -> Step {
    match ctx.prev {
        Some(p) if in_track(q, &p) => shift_msf(q, &p, 3, true, QFix::REL_POS),
        _ => Step::Pass,
    }
}

fn relative_from_next(q: &Q, ctx: &Context) -> Step {
    match ctx.next {
        Some(n) if in_track(q, &n) => shift_msf(q, &n, 3, false, QFix::REL_POS),
        _ => Step::Pass,
    }
}

fn absolute_from_prev(q: &Q, ctx: &Context) -> Step {
    match ctx.prev {
        Some(p) => shift_msf(q, &p, 7, true, QFix::ABS_POS),
        None => Step::Pass,
    }
}

fn absolute_from_next(q: &Q, ctx: &Context) -> Step {
    match ctx.next {
        Some(n) => shift_msf(q, &n, 7, false, QFix::ABS_POS),
        None => Step::Pass,
    }
}

fn stamped(q: &Q) -> Step {
    let mut c = *q;
    crc::q_crc_stamp(&mut c);

    Step::Fixed(c, QFix::CRC)
}

/// Accept the fields as they are and recompute the CRC, provided a single valid neighbour
/// (the previous one if possible) agrees on everything but the position and is exactly one
/// frame away.
fn stamp_crc_single(q: &Q, ctx: &Context) -> Step {
    if !ctx.fix_crc {
        return Step::Pass;
    }

    let (n, before) = match (ctx.prev, ctx.next) {
        (Some(p), _) => (p, true),
        (None, Some(n)) => (n, false),
        (None, None) => return Step::Pass,
    };

    if q[0..3] != n[0..3] || q[6] != 0 {
        return Step::Pass;
    }

    let cur = QBlock::new(*q);
    let other = QBlock::new(n);

    let (abs_delta, rel_delta) = if before {
        (
            cur.absolute_lba() - other.absolute_lba(),
            cur.relative_sectors() - other.relative_sectors(),
        )
    } else {
        (
            other.absolute_lba() - cur.absolute_lba(),
            other.relative_sectors() - cur.relative_sectors(),
        )
    };

    // Relative time runs backwards in the pregap
    let expected_rel = if cur.index() == 0 { -1 } else { 1 };

    if abs_delta != 1 || rel_delta != expected_rel {
        return Step::Pass;
    }

    stamped(q)
}

fn aframe(q: &Q, from: &Q, forward: bool) -> Step {
    let f = u32::from(bcd_to_binary(from[9]));

    if f >= FRAMES_PER_SECOND {
        return Step::Pass;
    }

    let f = if forward {
        (f + 1) % FRAMES_PER_SECOND
    } else {
        (f + FRAMES_PER_SECOND - 1) % FRAMES_PER_SECOND
    };

    let b = binary_to_bcd(f as u8);

    if q[9] == b {
        return Step::Pass;
    }

    let mut c = *q;
    c[9] = b;

    Step::Carry(c, QFix::ABS_POS)
}

fn aframe_from_prev(q: &Q, ctx: &Context) -> Step {
    match ctx.prev {
        Some(p) => aframe(q, &p, true),
        None => Step::Pass,
    }
}

fn aframe_from_next(q: &Q, ctx: &Context) -> Step {
    match ctx.next {
        Some(n) => aframe(q, &n, false),
        None => Step::Pass,
    }
}

/// Rewrite the MCN or ISRC with the value known to be good
fn known_codes(q: &Q, ctx: &Context) -> Step {
    let mut c = *q;

    let (encoded, flag) = match q[0] & 3 {
        2 => (ctx.known.mcn.map_or(false, |m| encode_mcn(&mut c, m)), QFix::MCN),
        3 => (ctx.known.isrc.map_or(false, |i| encode_isrc(&mut c, i)), QFix::ISRC),
        _ => (false, QFix::empty()),
    };

    if !encoded || c == *q {
        return Step::Pass;
    }

    Step::Carry(c, flag)
}

fn stamp_crc_both(q: &Q, ctx: &Context) -> Step {
    if ctx.fix_crc && ctx.both().is_some() {
        stamped(q)
    } else {
        Step::Pass
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bcd::Bcd;
    use crate::subchannel::position_q;

    fn pos(lba: i64, control: u8) -> Q {
        let rel = Msf::from_lba(lba - 1000 - 150).unwrap();

        *position_q(
            control,
            Bcd::from_binary(2).unwrap(),
            Bcd::ONE,
            rel,
            Msf::from_lba(lba).unwrap(),
        )
        .raw()
    }

    fn fix(q: &Q, prev: &Q, next: &Q, fix_crc: bool) -> QRepairOutcome {
        fix_q_subchannel(q, Some(prev), Some(next), fix_crc, KnownCodes::default())
    }

    #[test]
    fn valid_block_is_left_alone() {
        let q = pos(2000, 0);
        let out = fix_q_subchannel(&q, None, None, true, KnownCodes::default());

        assert!(out.fixed);
        assert_eq!(out.q, q);
        assert!(out.flags.is_empty());
    }

    #[test]
    fn stray_adr_bits() {
        let good = pos(2000, 0);
        let mut bad = good;
        bad[0] |= 0x08;

        let out = fix(&bad, &pos(1999, 0), &pos(2001, 0), false);

        assert!(out.fixed);
        assert_eq!(out.q, good);
        assert_eq!(out.flags, QFix::ADR);
    }

    #[test]
    fn wrong_adr() {
        let good = pos(2000, 0);
        let mut bad = good;
        bad[0] = (bad[0] & 0xf0) | 2;

        let out = fix_q_subchannel(&bad, None, None, false, KnownCodes::default());

        assert!(out.fixed);
        assert_eq!(out.q, good);
        assert_eq!(out.flags, QFix::ADR);
    }

    #[test]
    fn control_from_neighbour() {
        let good = pos(2000, 4);
        let mut bad = good;
        bad[0] = 0x01;

        let out = fix(&bad, &pos(1999, 4), &[0; 12], false);

        assert!(out.fixed);
        assert_eq!(out.q, good);
        assert_eq!(out.flags, QFix::CONTROL);
    }

    #[test]
    fn tno_and_absolute_position() {
        let good = pos(2000, 0);
        let mut bad = good;
        bad[1] = 0x12;
        bad[9] ^= 0x01;

        let out = fix(&bad, &pos(1999, 0), &pos(2001, 0), false);

        assert!(out.fixed);
        assert_eq!(out.q, good);
        assert!(out.flags.contains(QFix::TNO | QFix::ABS_POS));
        assert!(!out.flags.contains(QFix::CRC));
    }

    #[test]
    fn relative_position() {
        let good = pos(2000, 0);
        let mut bad = good;
        bad[5] = 0x70;

        let out = fix(&bad, &pos(1999, 0), &pos(2001, 0), false);

        assert!(out.fixed);
        assert_eq!(out.q, good);
        assert_eq!(out.flags, QFix::REL_POS);
    }

    #[test]
    fn crc_stamp_needs_permission_and_a_neighbour() {
        let good = pos(2000, 0);
        let mut bad = good;
        bad[10] ^= 0xff;

        let out = fix(&bad, &pos(1999, 0), &pos(2001, 0), false);
        assert!(!out.fixed);
        assert_eq!(out.q, bad);
        assert!(out.flags.is_empty());

        let out = fix(&bad, &pos(1999, 0), &pos(2001, 0), true);
        assert!(out.fixed);
        assert_eq!(out.q, good);
        assert_eq!(out.flags, QFix::CRC);

        // Neither neighbour is valid
        let out = fix(&bad, &[0; 12], &[0; 12], true);
        assert!(!out.fixed);
    }

    #[test]
    fn crc_stamp_single_neighbour() {
        let good = pos(2000, 0);
        let mut bad = good;
        bad[11] ^= 0x10;

        let out = fix_q_subchannel(&bad, None, Some(&pos(2001, 0)), true, KnownCodes::default());
        assert!(out.fixed);
        assert_eq!(out.flags, QFix::CRC);
        assert_eq!(out.q, good);
    }

    fn mcn_q(aframe: u8) -> Q {
        let mut q = [0u8; 12];
        q[0] = 0x02;
        encode_mcn(&mut q, "0123456789012");
        q[9] = binary_to_bcd(aframe);
        crc::q_crc_stamp(&mut q);
        q
    }

    #[test]
    fn mcn_aframe() {
        let good = mcn_q(10);
        let mut bad = good;
        bad[9] = 0x13;

        let out = fix(&bad, &mcn_q(9), &mcn_q(11), false);

        assert!(out.fixed);
        assert_eq!(out.q, good);
        assert_eq!(out.flags, QFix::ABS_POS);
    }

    #[test]
    fn known_mcn() {
        let good = mcn_q(74);
        let mut bad = good;
        bad[3] ^= 0x20;

        let known = KnownCodes {
            mcn: Some("0123456789012"),
            isrc: None,
        };

        let out = fix_q_subchannel(&bad, Some(&mcn_q(73)), Some(&mcn_q(0)), false, known);

        assert!(out.fixed);
        assert_eq!(out.q, good);
        assert_eq!(out.flags, QFix::MCN);
    }

    #[test]
    fn isrc_crc_stamp_needs_both_neighbours() {
        let mut q = [0u8; 12];
        q[0] = 0x03;
        encode_isrc(&mut q, "USRC17607839");
        q[9] = 0x05;

        let mut prev = q;
        prev[9] = 0x04;
        crc::q_crc_stamp(&mut prev);

        let mut next = q;
        next[9] = 0x06;
        crc::q_crc_stamp(&mut next);

        let out = fix_q_subchannel(&q, Some(&prev), None, true, KnownCodes::default());
        assert!(!out.fixed);

        let out = fix_q_subchannel(&q, Some(&prev), Some(&next), true, KnownCodes::default());
        assert!(out.fixed);
        assert!(out.q[..10] == q[..10]);
        assert_eq!(out.flags, QFix::CRC);
    }
}
