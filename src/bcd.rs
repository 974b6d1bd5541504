//! The CD format uses binary-coded decimal (BCD) extensively in its
//! internal format (track numbers, seek positions etc...) probably in
//! order to make it easier to display those informations on the first
//! CD players.

use std::fmt;
use std::str::FromStr;

use crate::ImageError;

/// A single packed BCD value in the range 0-99 (2 digits, 4bits per
/// digit).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bcd(u8);

impl Bcd {
    /// Lookup table of all the valid BCD values, indexed by their binary value
    pub const TABLE: [Bcd; 100] = {
        let mut table = [Bcd(0); 100];
        let mut i = 0;

        while i < 100 {
            table[i] = Bcd((((i / 10) << 4) | (i % 10)) as u8);
            i += 1;
        }

        table
    };

    /// BCD 00
    pub const ZERO: Bcd = Bcd(0);

    /// BCD 01
    pub const ONE: Bcd = Bcd(1);

    /// BCD 99
    pub const MAX: Bcd = Bcd(0x99);

    /// Build a `Bcd` from an `u8` in BCD format. Returns `None` if
    /// the value provided is not valid BCD.
    pub const fn from_bcd(b: u8) -> Option<Bcd> {
        if b <= 0x99 && (b & 0xf) <= 0x9 {
            Some(Bcd(b))
        } else {
            None
        }
    }

    /// Build a `Bcd` from a binary `u8`. Returns `None` if the value
    /// is greater than 99.
    pub const fn from_binary(b: u8) -> Option<Bcd> {
        if b > 99 {
            None
        } else {
            Some(Bcd::TABLE[b as usize])
        }
    }

    /// Returns the BCD as an u8
    pub const fn bcd(self) -> u8 {
        self.0
    }

    /// Convert the BCD as a binary byte
    pub const fn binary(self) -> u8 {
        let b = self.0;

        (b >> 4) * 10 + (b & 0xf)
    }

    /// Returns the BCD value plus one. Wrap to 0 if `self` is equal
    /// to 99.
    pub const fn wrapping_next(self) -> Bcd {
        let b = self.0;

        if b & 0xf < 9 {
            Bcd(b + 1)
        } else if b < 0x99 {
            Bcd((b & 0xf0) + 0x10)
        } else {
            Bcd(0)
        }
    }

    /// Returns the BCD value minus one. Wrap to 99 if `self` is equal
    /// to 0.
    pub const fn wrapping_prev(self) -> Bcd {
        let b = self.0;

        if b & 0xf > 0 {
            Bcd(b - 1)
        } else if b > 0 {
            Bcd((b & 0xf0) - 0x10 + 0x9)
        } else {
            Bcd::MAX
        }
    }
}

/// Decode a raw byte as BCD without validation. Invalid nibbles are
/// decoded naively (`0x1a` gives 20), which is what a drive reporting
/// a garbled timestamp would display.
pub const fn bcd_to_binary(b: u8) -> u8 {
    (b >> 4) * 10 + (b & 0xf)
}

/// Encode a binary value in the range 0-99 as BCD. Values above 99
/// are truncated to their last two digits.
pub const fn binary_to_bcd(b: u8) -> u8 {
    Bcd::TABLE[(b % 100) as usize].0
}

impl FromStr for Bcd {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let b = u8::from_str(s).map_err(|_| ImageError::BadBcd)?;

        Bcd::from_binary(b).ok_or(ImageError::BadBcd)
    }
}

impl fmt::Display for Bcd {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02x}", self.0)
    }
}

impl fmt::Debug for Bcd {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[test]
fn conversions() {
    assert!(Bcd::from_bcd(0) == Some(Bcd(0)));
    assert!(Bcd::from_bcd(1) == Some(Bcd(1)));
    assert!(Bcd::from_bcd(0x42) == Some(Bcd(0x42)));
    assert!(Bcd::from_bcd(0x1a).is_none());
    assert!(Bcd::from_bcd(0xf2).is_none());

    assert!(Bcd::from_binary(0) == Some(Bcd(0)));
    assert!(Bcd::from_binary(1) == Some(Bcd(1)));
    assert!(Bcd::from_binary(42) == Some(Bcd(0x42)));
    assert!(Bcd::from_binary(100).is_none());
    assert!(Bcd::from_binary(0xff).is_none());

    assert_eq!(bcd_to_binary(0x59), 59);
    assert_eq!(binary_to_bcd(74), 0x74);
}

#[test]
fn next_and_prev() {
    assert_eq!(Bcd(0x09).wrapping_next(), Bcd(0x10));
    assert_eq!(Bcd(0x99).wrapping_next(), Bcd(0x00));
    assert_eq!(Bcd(0x10).wrapping_prev(), Bcd(0x09));
    assert_eq!(Bcd(0x00).wrapping_prev(), Bcd(0x99));
    assert_eq!(Bcd(0x42).wrapping_prev(), Bcd(0x41));

    for i in 0..99 {
        let b = Bcd::TABLE[i];
        assert_eq!(b.wrapping_next().wrapping_prev(), b);
    }
}

#[test]
fn from_str() {
    assert!(Bcd::from_str("00").ok() == Some(Bcd(0)));
    assert!(Bcd::from_str("0").ok() == Some(Bcd(0)));
    assert!(Bcd::from_str("04").ok() == Some(Bcd(4)));
    assert!(Bcd::from_str("99").ok() == Some(Bcd(0x99)));
    assert!(Bcd::from_str("42").ok() == Some(Bcd(0x42)));

    assert!(Bcd::from_str("0x00").is_err());
    assert!(Bcd::from_str("ab").is_err());
    assert!(Bcd::from_str("100").is_err());
    assert!(Bcd::from_str("-2").is_err());
}
