//! R-W channel packet classification.
//!
//! In the interleaved form the six low bits of every subchannel byte
//! are one R-W *symbol*. A sector carries 96 symbols, grouped in four
//! packs of 24. CD+G and friends use the packs directly, CD-TEXT
//! repacks each group of 4 symbols into 3 bytes giving four 18-byte
//! packs protected by a CRC-16.

use crate::crc;

use super::SUBCHANNEL_SIZE;

/// Symbols in a R-W pack
pub const PACK_SYMBOLS: usize = 24;

/// Bytes in a CD-TEXT pack
pub const CDTEXT_PACK_SIZE: usize = 18;

/// Number of packs per sector
pub const PACKS_PER_SECTOR: usize = SUBCHANNEL_SIZE / PACK_SYMBOLS;

/// Mode/item symbols of the packet types we recognize (CD+G, CD+EG, MIDI and friends)
const GRAPHICS_MODES: [u8; 5] = [0x08, 0x09, 0x0a, 0x18, 0x38];

/// Mode/item symbol of CD-TEXT packs in the program area
const CDTEXT_MODE: u8 = 0x14;

/// Kinds of packets found in the R-W channels of a sector
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct RwPackets {
    /// At least one pack has a null mode
    pub zero: bool,
    /// At least one graphics, extended graphics or MIDI pack
    pub rw_packet: bool,
    /// At least one CD-TEXT pack
    pub cdtext: bool,
}

/// Extract the four 24-symbol packs of an interleaved block
pub fn rw_packs(raw: &[u8; SUBCHANNEL_SIZE]) -> [[u8; PACK_SYMBOLS]; PACKS_PER_SECTOR] {
    let mut packs = [[0u8; PACK_SYMBOLS]; PACKS_PER_SECTOR];

    for (n, pack) in packs.iter_mut().enumerate() {
        for (j, s) in pack.iter_mut().enumerate() {
            *s = raw[n * PACK_SYMBOLS + j] & 0x3f;
        }
    }

    packs
}

/// Repack the symbols of an interleaved block into the four 18-byte
/// CD-TEXT packs
pub fn cdtext_packs(raw: &[u8; SUBCHANNEL_SIZE]) -> [[u8; CDTEXT_PACK_SIZE]; PACKS_PER_SECTOR] {
    let mut packs = [[0u8; CDTEXT_PACK_SIZE]; PACKS_PER_SECTOR];

    for (pack, symbols) in packs.iter_mut().zip(rw_packs(raw).iter()) {
        for (out, s) in pack.chunks_exact_mut(3).zip(symbols.chunks_exact(4)) {
            out[0] = (s[0] << 2) | (s[1] >> 4);
            out[1] = ((s[1] & 0xf) << 4) | (s[2] >> 2);
            out[2] = ((s[2] & 0x3) << 6) | s[3];
        }
    }

    packs
}

/// Classify the R-W packets of an interleaved subchannel block
pub fn detect_rw_packets(raw: &[u8; SUBCHANNEL_SIZE]) -> RwPackets {
    let mut found = RwPackets::default();

    for pack in rw_packs(raw).iter() {
        match pack[0] {
            0 => found.zero = true,
            CDTEXT_MODE => found.cdtext = true,
            m if GRAPHICS_MODES.contains(&m) => found.rw_packet = true,
            _ => (),
        }
    }

    if cdtext_packs(raw).iter().any(|p| p[0] & 0x80 != 0) {
        found.cdtext = true;
    }

    found
}

/// Check the CRC of every CD-TEXT pack present in an interleaved block.
/// Packs with a null CRC are not checked.
pub fn check_cdtext_packets(raw: &[u8; SUBCHANNEL_SIZE]) -> bool {
    cdtext_packs(raw)
        .iter()
        .filter(|p| p[0] & 0x80 != 0)
        .all(|p| {
            let stored = u16::from_be_bytes([p[16], p[17]]);

            stored == 0 || stored == crc::crc16(&p[..16])
        })
}

/// Build an interleaved block whose R-W symbols come from the
/// given 18-byte CD-TEXT packs
#[cfg(test)]
pub(crate) fn from_cdtext(packs: &[[u8; CDTEXT_PACK_SIZE]; 4]) -> [u8; SUBCHANNEL_SIZE] {
    let mut raw = [0u8; SUBCHANNEL_SIZE];

    for (n, pack) in packs.iter().enumerate() {
        for (k, b) in pack.chunks_exact(3).enumerate() {
            let bits = (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]);

            for s in 0..4 {
                raw[n * PACK_SYMBOLS + k * 4 + s] = ((bits >> (18 - 6 * s)) & 0x3f) as u8;
            }
        }
    }

    raw
}

#[cfg(test)]
pub(crate) fn cdtext_pack(seq: u8) -> [u8; CDTEXT_PACK_SIZE] {
    let mut p = [0u8; CDTEXT_PACK_SIZE];
    p[0] = 0x80;
    p[1] = 1;
    p[2] = seq;
    p[4..10].copy_from_slice(b"HELLO\0");

    let crc = crc::crc16(&p[..16]).to_be_bytes();
    p[16] = crc[0];
    p[17] = crc[1];

    p
}
