//! Positions in the Q subchannel are "minute:second:frame" triplets
//! of BCD bytes, a frame being one sector. There are 75 frames in a
//! second and 60 seconds in a minute.
//!
//! Absolute MSFs start at 00:00:00 two seconds (150 sectors) before
//! LBA 0. Relative MSFs count from the start of the track, or down to
//! index 1 while in a pregap.

use std::fmt;
use std::str::FromStr;

use crate::bcd::Bcd;
use crate::ImageError;

/// Number of sectors between MSF 00:00:00 and LBA 0
pub const LBA_OFFSET: i64 = 150;

/// Sectors per second
pub const FRAMES_PER_SECOND: u32 = 75;

/// Sectors per minute
pub const FRAMES_PER_MINUTE: u32 = 60 * FRAMES_PER_SECOND;

/// Minute, second and frame, each one BCD encoded
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Msf(Bcd, Bcd, Bcd);

impl Msf {
    /// 00:00:00
    pub const ZERO: Msf = Msf(Bcd::ZERO, Bcd::ZERO, Bcd::ZERO);

    /// 99:59:74, the last addressable frame
    pub const MAX: Msf = Msf(Bcd::MAX, Bcd::TABLE[59], Bcd::TABLE[74]);

    /// Returns `None` if the seconds are above 59 or the frames above 74
    pub const fn new(m: Bcd, s: Bcd, f: Bcd) -> Option<Msf> {
        if s.bcd() <= 0x59 && f.bcd() <= 0x74 {
            Some(Msf(m, s, f))
        } else {
            None
        }
    }

    /// Build an MSF from three raw BCD bytes as found in a Q block
    pub const fn from_bcd(m: u8, s: u8, f: u8) -> Option<Msf> {
        match (Bcd::from_bcd(m), Bcd::from_bcd(s), Bcd::from_bcd(f)) {
            (Some(m), Some(s), Some(f)) => Msf::new(m, s, f),
            _ => None,
        }
    }

    /// Same as [`Msf::from_bcd`] with the bytes taken from the start of `b`
    pub fn from_bcd_slice(b: &[u8]) -> Option<Msf> {
        match b {
            [m, s, f, ..] => Msf::from_bcd(*m, *s, *f),
            _ => None,
        }
    }

    /// The three BCD bytes in Q subchannel order
    pub const fn to_bcd_bytes(self) -> [u8; 3] {
        [self.0.bcd(), self.1.bcd(), self.2.bcd()]
    }

    /// Number of frames since 00:00:00
    pub const fn sector_index(self) -> u32 {
        let Msf(m, s, f) = self;

        m.binary() as u32 * FRAMES_PER_MINUTE
            + s.binary() as u32 * FRAMES_PER_SECOND
            + f.binary() as u32
    }

    /// Inverse of [`Msf::sector_index`], `None` past 99:59:74
    pub const fn from_sector_index(si: u32) -> Option<Msf> {
        let m = si / FRAMES_PER_MINUTE;

        if m > 99 {
            return None;
        }

        let s = (si / FRAMES_PER_SECOND) % 60;
        let f = si % FRAMES_PER_SECOND;

        Some(Msf(
            Bcd::TABLE[m as usize],
            Bcd::TABLE[s as usize],
            Bcd::TABLE[f as usize],
        ))
    }

    /// Logical block address of an absolute MSF
    pub const fn to_lba(self) -> i64 {
        self.sector_index() as i64 - LBA_OFFSET
    }

    /// Absolute MSF of `lba`, `None` if it can't be represented
    pub fn from_lba(lba: i64) -> Option<Msf> {
        let si = u32::try_from(lba.checked_add(LBA_OFFSET)?).ok()?;

        Msf::from_sector_index(si)
    }

    /// The following frame, carrying into the seconds and minutes.
    /// `None` at 99:59:74.
    pub fn next(self) -> Option<Msf> {
        let Msf(m, s, f) = self;

        if f.bcd() < 0x74 {
            Some(Msf(m, s, f.wrapping_next()))
        } else if s.bcd() < 0x59 {
            Some(Msf(m, s.wrapping_next(), Bcd::ZERO))
        } else if m != Bcd::MAX {
            Some(Msf(m.wrapping_next(), Bcd::ZERO, Bcd::ZERO))
        } else {
            None
        }
    }

    /// The preceding frame, borrowing from the seconds and minutes.
    /// `None` at 00:00:00.
    pub fn prev(self) -> Option<Msf> {
        let Msf(m, s, f) = self;

        if f != Bcd::ZERO {
            Some(Msf(m, s, f.wrapping_prev()))
        } else if s != Bcd::ZERO {
            Some(Msf(m, s.wrapping_prev(), Bcd::TABLE[74]))
        } else if m != Bcd::ZERO {
            Some(Msf(m.wrapping_prev(), Bcd::TABLE[59], Bcd::TABLE[74]))
        } else {
            None
        }
    }
}

impl fmt::Display for Msf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.0, self.1, self.2)
    }
}

impl fmt::Debug for Msf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Msf {
    type Err = ImageError;

    /// Parse "MM:SS:FF"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = s
            .split(':')
            .map(Bcd::from_str)
            .collect::<Result<Vec<Bcd>, ImageError>>()?;

        match fields[..] {
            [m, s, f] => Msf::new(m, s, f).ok_or(ImageError::InvalidMsf),
            _ => Err(ImageError::InvalidMsf),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn msf(m: u8, s: u8, f: u8) -> Msf {
        Msf::from_bcd(m, s, f).unwrap()
    }

    #[test]
    fn sector_index_round_trip() {
        for &(m, s, f) in &[
            (0x00, 0x00, 0x00),
            (0x00, 0x01, 0x00),
            (0x12, 0x34, 0x56),
            (0x99, 0x59, 0x74),
        ] {
            let m = msf(m, s, f);

            assert_eq!(Msf::from_sector_index(m.sector_index()), Some(m));
        }

        assert_eq!(Msf::from_sector_index(100 * FRAMES_PER_MINUTE), None);
        assert_eq!(msf(0x01, 0x00, 0x00).sector_index(), 4500);
    }

    #[test]
    fn lba() {
        assert_eq!(msf(0x00, 0x02, 0x00).to_lba(), 0);
        assert_eq!(Msf::ZERO.to_lba(), -150);
        assert_eq!(Msf::from_lba(0), Some(msf(0x00, 0x02, 0x00)));
        assert_eq!(Msf::from_lba(4350), Some(msf(0x01, 0x00, 0x00)));
        assert_eq!(Msf::from_lba(-151), None);
    }

    #[test]
    fn next_prev() {
        assert_eq!(msf(0x00, 0x00, 0x09).next(), Some(msf(0x00, 0x00, 0x10)));
        assert_eq!(msf(0x00, 0x00, 0x74).next(), Some(msf(0x00, 0x01, 0x00)));
        assert_eq!(msf(0x00, 0x59, 0x74).next(), Some(msf(0x01, 0x00, 0x00)));
        assert_eq!(msf(0x00, 0x01, 0x00).prev(), Some(msf(0x00, 0x00, 0x74)));
        assert_eq!(msf(0x01, 0x00, 0x00).prev(), Some(msf(0x00, 0x59, 0x74)));
        assert_eq!(msf(0x00, 0x10, 0x10).prev(), Some(msf(0x00, 0x10, 0x09)));
        assert_eq!(Msf::ZERO.prev(), None);
        assert_eq!(Msf::MAX.next(), None);
    }

    #[test]
    fn ordering() {
        assert!(msf(0x00, 0x59, 0x74) < msf(0x01, 0x00, 0x00));
        assert!(msf(0x00, 0x10, 0x00) > msf(0x00, 0x09, 0x74));
    }

    #[test]
    fn parse() {
        assert_eq!("01:02:03".parse::<Msf>().unwrap(), msf(0x01, 0x02, 0x03));
        assert_eq!("99:59:74".parse::<Msf>().unwrap(), Msf::MAX);

        assert!("00:00".parse::<Msf>().is_err());
        assert!("00:00:00:00".parse::<Msf>().is_err());
        assert!("00:60:00".parse::<Msf>().is_err());
        assert!("00:00:75".parse::<Msf>().is_err());
    }
}
