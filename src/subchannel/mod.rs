//! Subchannel data interface.
//!
//! The subchannel data (sometimes called subcode or control bytes) is
//! stored alongside each sector on the CD. There are 8 subchannels
//! named P, Q, R, S, T, U, V and W. Each of them contain 12 bytes of
//! data per sector for a total of 96bytes of subchannel data per
//! sector.
//!
//! Drives return the subchannel *interleaved*: every byte holds one
//! bit of each channel, P in the most significant bit and W in the
//! least significant one. Most of the processing in this module works
//! on the *deinterleaved* form where each channel occupies 12
//! contiguous bytes (P at offset 0, Q at offset 12, R at offset 24...).
//!
//! The subchannel data is not protected by the error correction code
//! in CD-ROMs so it's more likely to be corrupted than regular data,
//! which is why the [`engine`] tries so hard to repair it.
//!
//! For more details see section 22 of [ECMA-130]
//! (http://www.ecma-international.org/publications/files/ECMA-ST/Ecma-130.pdf)
//! and [Wikipedia's article on the subject]
//! (https://en.wikipedia.org/wiki/Compact_Disc_subcode)

use std::fmt;

use crate::bcd::{bcd_to_binary, Bcd};
use crate::crc;
use crate::msf::{Msf, FRAMES_PER_MINUTE, FRAMES_PER_SECOND, LBA_OFFSET};

pub mod engine;
pub mod generate;
pub mod log;
pub mod packets;
pub mod repair;

pub use self::engine::{write_subchannel_to_image, RepairOptions, SubchannelOutcome, SubchannelState};
pub use self::generate::generate_subchannels;
pub use self::repair::{fix_q_subchannel, QFix, QRepairOutcome};

/// Size of the subchannel of one sector
pub const SUBCHANNEL_SIZE: usize = 96;

/// Size of one deinterleaved channel
pub const CHANNEL_SIZE: usize = 12;

/// Size of the Q-only subchannel some drives return
pub const Q16_SIZE: usize = 16;

/// Offset of the Q channel in a deinterleaved block
pub const Q_OFFSET: usize = CHANNEL_SIZE;

/// Offset of the R channel in a deinterleaved block. R to W are contiguous.
pub const RW_OFFSET: usize = 2 * CHANNEL_SIZE;

/// ISRC decoded from a blank Q block
pub const BLANK_ISRC: &str = "000000000000";

/// MCN decoded from a blank Q block
pub const BLANK_MCN: &str = "0000000000000";

/// Subchannel read modes supported by a drive or wanted in an image
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubchannelMode {
    /// No subchannel
    None,
    /// 96 bytes of interleaved P to W
    Raw,
    /// 16 bytes containing the deinterleaved Q channel
    Q16,
    /// 96 bytes of R to W only
    Rw,
}

impl SubchannelMode {
    /// Number of bytes returned per sector in this mode
    pub fn sector_size(self) -> usize {
        match self {
            SubchannelMode::None => 0,
            SubchannelMode::Q16 => Q16_SIZE,
            SubchannelMode::Raw | SubchannelMode::Rw => SUBCHANNEL_SIZE,
        }
    }
}

/// Split an interleaved subchannel block into 8 contiguous 12-byte channels, P first
pub fn deinterleave(raw: &[u8; SUBCHANNEL_SIZE]) -> [u8; SUBCHANNEL_SIZE] {
    let mut planes = [0u8; SUBCHANNEL_SIZE];

    for (i, &b) in raw.iter().enumerate() {
        let byte = i / 8;
        let shift = 7 - (i % 8);

        for channel in 0..8 {
            let bit = (b >> (7 - channel)) & 1;

            planes[channel * CHANNEL_SIZE + byte] |= bit << shift;
        }
    }

    planes
}

/// Inverse of [`deinterleave`]
pub fn interleave(planes: &[u8; SUBCHANNEL_SIZE]) -> [u8; SUBCHANNEL_SIZE] {
    let mut raw = [0u8; SUBCHANNEL_SIZE];

    for (i, r) in raw.iter_mut().enumerate() {
        let byte = i / 8;
        let shift = 7 - (i % 8);

        for channel in 0..8 {
            let bit = (planes[channel * CHANNEL_SIZE + byte] >> shift) & 1;

            *r |= bit << (7 - channel);
        }
    }

    raw
}

/// Expand a buffer of 16-byte Q-only subchannel into the interleaved
/// 96-byte form. Q goes through as-is, R to W are zero and P is all set
/// if bit 7 of the 16th byte is set.
pub fn convert_q_to_raw(q16: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(q16.len() / Q16_SIZE * SUBCHANNEL_SIZE);

    for q in q16.chunks_exact(Q16_SIZE) {
        let mut planes = [0u8; SUBCHANNEL_SIZE];

        if q[15] & 0x80 != 0 {
            planes[..CHANNEL_SIZE].fill(0xff);
        }

        planes[Q_OFFSET..Q_OFFSET + CHANNEL_SIZE].copy_from_slice(&q[..CHANNEL_SIZE]);

        out.extend_from_slice(&interleave(&planes));
    }

    out
}

/// This struct contains the Subchannel P data of one sector.
///
/// This subchannel indicates the beginning of an information
/// track. All bits of the p-channel of a Section should be set to the
/// same value (per the standard).
///
/// See section 22.2 of ECMA-130 for more informations.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PChannel([u8; CHANNEL_SIZE]);

impl PChannel {
    /// Number of bits in the channel
    pub const BITS: u32 = CHANNEL_SIZE as u32 * 8;

    /// Create a PChannel instance from 12 bytes of subchannel data.
    pub fn new(raw: [u8; CHANNEL_SIZE]) -> PChannel {
        PChannel(raw)
    }

    /// Return the raw contents
    pub fn raw(&self) -> &[u8; CHANNEL_SIZE] {
        &self.0
    }

    /// Return true if all the bits of the channel are set to the same
    /// value as the standard mandates
    pub fn valid(&self) -> bool {
        self.0.iter().all(|&b| b == 0) || self.0.iter().all(|&b| b == 0xff)
    }

    /// Number of bits set
    pub fn weight(&self) -> u32 {
        self.0.iter().map(|b| b.count_ones()).sum()
    }

    /// Majority vote: all set if at least half the bits are, clear
    /// otherwise
    pub fn fixed(&self) -> PChannel {
        if self.weight() >= Self::BITS / 2 {
            PChannel([0xff; CHANNEL_SIZE])
        } else {
            PChannel([0; CHANNEL_SIZE])
        }
    }
}

/// Returns true if the R to W channels of a deinterleaved block are
/// blank, that is all clear or all set
pub fn rw_quiet(planes: &[u8; SUBCHANNEL_SIZE]) -> bool {
    let rw = &planes[RW_OFFSET..];

    rw.iter().all(|&b| b == 0) || rw.iter().all(|&b| b == 0xff)
}

/// This struct contains the Subchannel Q data of one sector.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct QBlock([u8; CHANNEL_SIZE]);

impl QBlock {
    /// Create a QBlock instance from 12 bytes of subchannel data.
    pub fn new(raw: [u8; CHANNEL_SIZE]) -> QBlock {
        QBlock(raw)
    }

    /// Extract the Q channel out of a deinterleaved block
    pub fn from_planes(planes: &[u8; SUBCHANNEL_SIZE]) -> QBlock {
        QBlock(*array_ref![planes, Q_OFFSET, CHANNEL_SIZE])
    }

    /// Return the raw 12 bytes of subchannel data
    pub fn raw(&self) -> &[u8; CHANNEL_SIZE] {
        &self.0
    }

    /// Return the control nibble (high 4 bits of the first byte)
    pub fn control(&self) -> u8 {
        self.0[0] >> 4
    }

    /// Retrieve the mode (ADR) of the data specified by this
    /// Q-subchannel. Mode 1 is position, 2 is MCN and 3 is ISRC.
    ///
    /// This field is specified over 4 bits but only the low two are
    /// meaningful for the modes we care about.
    pub fn adr(&self) -> u8 {
        self.0[0] & 0xf
    }

    /// ADR restricted to its two low bits, the way the engine dispatches
    pub fn mode(&self) -> u8 {
        self.0[0] & 3
    }

    /// Return true if this is a data track
    pub fn data(&self) -> bool {
        self.0[0] & 0x40 != 0
    }

    /// Return true if this is an audio track
    pub fn audio(&self) -> bool {
        !self.data()
    }

    /// Return true if the "digital copy permitted" flag is set
    pub fn digital_copy_permitted(&self) -> bool {
        self.0[0] & 0x20 != 0
    }

    /// Return true if this is an audio track and pre-emphasis is
    /// enabled.
    pub fn pre_emphasis(&self) -> bool {
        self.audio() && (self.0[0] & 0x10 != 0)
    }

    /// Return true if this is a 4-channel audio track.
    pub fn four_channel_audio(&self) -> bool {
        self.audio() && (self.0[0] & 0x80 != 0)
    }

    /// Track number, decoded from BCD
    pub fn tno(&self) -> u8 {
        bcd_to_binary(self.0[1])
    }

    /// Index number, decoded from BCD
    pub fn index(&self) -> u8 {
        bcd_to_binary(self.0[2])
    }

    /// Track relative time in mode 1, `None` if it isn't valid BCD
    pub fn relative(&self) -> Option<Msf> {
        Msf::from_bcd_slice(&self.0[3..6])
    }

    /// Absolute time in mode 1, `None` if it isn't valid BCD
    pub fn absolute(&self) -> Option<Msf> {
        Msf::from_bcd_slice(&self.0[7..10])
    }

    /// Relative position in sectors. Garbage BCD is decoded naively.
    pub fn relative_sectors(&self) -> i64 {
        msf_sectors(self.0[3], self.0[4], self.0[5])
    }

    /// Absolute LBA (00:02:00 is LBA 0). Garbage BCD is decoded naively.
    pub fn absolute_lba(&self) -> i64 {
        msf_sectors(self.0[7], self.0[8], self.0[9]) - LBA_OFFSET
    }

    /// The field that must be zero in mode 1
    pub fn zero(&self) -> u8 {
        self.0[6]
    }

    /// Absolute frame of modes 2 and 3
    pub fn aframe(&self) -> u8 {
        bcd_to_binary(self.0[9])
    }

    /// Return the 16bit CRC stored at the end of the subchannel data.
    pub fn crc(&self) -> u16 {
        u16::from_be_bytes([self.0[10], self.0[11]])
    }

    /// Returns true if the stored CRC matches the data
    pub fn crc_ok(&self) -> bool {
        crc::q_crc_ok(&self.0)
    }
}

impl fmt::Debug for QBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let q = &self.0;

        match self.mode() {
            1 => write!(
                f,
                "Q[{:x} TNO {:02x} IDX {:02x} REL {:02x}:{:02x}:{:02x} ABS {:02x}:{:02x}:{:02x}",
                q[0], q[1], q[2], q[3], q[4], q[5], q[7], q[8], q[9]
            )?,
            2 => write!(
                f,
                "Q[{:x} MCN {}",
                q[0],
                decode_mcn(q).unwrap_or_else(|| "?".to_string())
            )?,
            3 => write!(
                f,
                "Q[{:x} ISRC {}",
                q[0],
                decode_isrc(q).unwrap_or_else(|| "?".to_string())
            )?,
            _ => write!(f, "Q[{:02x?}", &q[..10])?,
        }

        write!(
            f,
            " CRC {:04x} {}]",
            self.crc(),
            if self.crc_ok() { "ok" } else { "bad" }
        )
    }
}

fn msf_sectors(m: u8, s: u8, f: u8) -> i64 {
    i64::from(bcd_to_binary(m)) * i64::from(FRAMES_PER_MINUTE)
        + i64::from(bcd_to_binary(s)) * i64::from(FRAMES_PER_SECOND)
        + i64::from(bcd_to_binary(f))
}

/// Map an ISRC character to its 6-bit code. Digits map to 0x00-0x09 and
/// letters to 0x11-0x2a. Lower case letters are accepted.
pub fn isrc_code(c: char) -> Option<u8> {
    match c.to_ascii_uppercase() {
        d @ '0'..='9' => Some(d as u8 - b'0'),
        l @ 'A'..='Z' => Some(l as u8 - b'A' + 0x11),
        _ => None,
    }
}

fn isrc_char(code: u8) -> Option<char> {
    match code {
        0x00..=0x09 => Some((b'0' + code) as char),
        0x11..=0x2a => Some((b'A' + code - 0x11) as char),
        _ => None,
    }
}

fn bcd_digit(n: u8) -> Option<char> {
    if n < 10 {
        Some((b'0' + n) as char)
    } else {
        None
    }
}

/// Decode the ISRC from a mode 3 Q block. The first five characters
/// are 6-bit codes packed in bytes 1 to 4, the last seven are BCD
/// digits in bytes 5 to 8. Returns `None` if a character can't be
/// decoded. A blank block decodes to [`BLANK_ISRC`].
pub fn decode_isrc(q: &[u8; CHANNEL_SIZE]) -> Option<String> {
    let codes = [
        q[1] >> 2,
        ((q[1] & 0x3) << 4) | (q[2] >> 4),
        ((q[2] & 0xf) << 2) | (q[3] >> 6),
        q[3] & 0x3f,
        q[4] >> 2,
    ];

    let mut isrc = String::with_capacity(12);

    for c in codes {
        isrc.push(isrc_char(c)?);
    }

    for &b in &q[5..8] {
        isrc.push(bcd_digit(b >> 4)?);
        isrc.push(bcd_digit(b & 0xf)?);
    }

    isrc.push(bcd_digit(q[8] >> 4)?);

    Some(isrc)
}

/// Encode `isrc` in bytes 1 to 8 of a mode 3 Q block, leaving the
/// other bytes alone. Returns false and leaves `q` untouched if `isrc`
/// isn't valid.
pub fn encode_isrc(q: &mut [u8; CHANNEL_SIZE], isrc: &str) -> bool {
    let chars: Vec<char> = isrc.chars().collect();

    if chars.len() != 12 {
        return false;
    }

    let mut codes = [0u8; 5];
    for (code, &c) in codes.iter_mut().zip(&chars[..5]) {
        match isrc_code(c) {
            Some(v) => *code = v,
            None => return false,
        }
    }

    let mut digits = [0u8; 7];
    for (d, c) in digits.iter_mut().zip(&chars[5..]) {
        match c.to_digit(10) {
            Some(v) => *d = v as u8,
            None => return false,
        }
    }

    q[1] = (codes[0] << 2) | (codes[1] >> 4);
    q[2] = ((codes[1] & 0xf) << 4) | (codes[2] >> 2);
    q[3] = ((codes[2] & 0x3) << 6) | codes[3];
    q[4] = codes[4] << 2;
    q[5] = (digits[0] << 4) | digits[1];
    q[6] = (digits[2] << 4) | digits[3];
    q[7] = (digits[4] << 4) | digits[5];
    q[8] = digits[6] << 4;

    true
}

/// Decode the 13 digit MCN from a mode 2 Q block. Returns `None` if a
/// nibble isn't a decimal digit. A blank block decodes to [`BLANK_MCN`].
pub fn decode_mcn(q: &[u8; CHANNEL_SIZE]) -> Option<String> {
    let mut mcn = String::with_capacity(13);

    for &b in &q[1..7] {
        mcn.push(bcd_digit(b >> 4)?);
        mcn.push(bcd_digit(b & 0xf)?);
    }

    mcn.push(bcd_digit(q[7] >> 4)?);

    Some(mcn)
}

/// Encode `mcn` in bytes 1 to 8 of a mode 2 Q block. Returns false and
/// leaves `q` untouched if `mcn` isn't 13 decimal digits.
pub fn encode_mcn(q: &mut [u8; CHANNEL_SIZE], mcn: &str) -> bool {
    let digits = match mcn
        .chars()
        .map(|c| c.to_digit(10).map(|d| d as u8))
        .collect::<Option<Vec<u8>>>()
    {
        Some(d) => d,
        None => return false,
    };

    if digits.len() != 13 {
        return false;
    }

    for (i, pair) in digits[..12].chunks_exact(2).enumerate() {
        q[1 + i] = (pair[0] << 4) | pair[1];
    }

    q[7] = digits[12] << 4;
    q[8] = 0;

    true
}

/// Build a mode 1 (position) Q block with a valid CRC
pub fn position_q(control: u8, track: Bcd, index: Bcd, relative: Msf, absolute: Msf) -> QBlock {
    let mut q = [0u8; CHANNEL_SIZE];

    q[0] = (control << 4) | 1;
    q[1] = track.bcd();
    q[2] = index.bcd();
    q[3..6].copy_from_slice(&relative.to_bcd_bytes());
    q[7..10].copy_from_slice(&absolute.to_bcd_bytes());

    crc::q_crc_stamp(&mut q);

    QBlock(q)
}
