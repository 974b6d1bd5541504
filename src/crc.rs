//! Checksum primitives.
//!
//! The Q subchannel and CD-TEXT packs are protected by a CRC-16 using
//! the CCITT polynomial (x^16 + x^12 + x^5 + 1, 0x1021), computed MSB
//! first with a null initial value. The checksum is recorded inverted
//! on the disc, which is the `CRC-16/GSM` entry of the CRC catalogue.
//!
//! UDIF images use the usual CRC-32 (ISO-HDLC) for their data fork
//! checksum.

use crc::{Crc, CRC_16_GSM, CRC_32_ISO_HDLC};

static CRC16_CCITT_INVERTED: Crc<u16> = Crc::<u16>::new(&CRC_16_GSM);
static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Compute the subchannel CRC-16 over `data`
pub fn crc16(data: &[u8]) -> u16 {
    CRC16_CCITT_INVERTED.checksum(data)
}

/// Compute the CRC-16 of the first 10 bytes of a Q subchannel and
/// return it in the big-endian order it's stored in bytes 10 and 11
pub fn q_crc(q: &[u8; 12]) -> [u8; 2] {
    crc16(&q[..10]).to_be_bytes()
}

/// Returns true if the CRC stored in bytes 10 and 11 of `q` matches
/// its contents
pub fn q_crc_ok(q: &[u8; 12]) -> bool {
    q_crc(q) == [q[10], q[11]]
}

/// Recompute and store the CRC of `q`
pub fn q_crc_stamp(q: &mut [u8; 12]) {
    let crc = q_crc(q);

    q[10] = crc[0];
    q[11] = crc[1];
}

/// Compute the CRC-32 over `data`
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Incremental CRC-32 used when the data doesn't fit in memory
pub struct Crc32Digest {
    digest: crc::Digest<'static, u32>,
}

impl Crc32Digest {
    /// Start a new digest
    pub fn new() -> Crc32Digest {
        Crc32Digest {
            digest: CRC32.digest(),
        }
    }

    /// Feed more data into the digest
    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    /// Return the final checksum
    pub fn finalize(self) -> u32 {
        self.digest.finalize()
    }
}

impl Default for Crc32Digest {
    fn default() -> Crc32Digest {
        Crc32Digest::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn check_values() {
        // Catalogue check values for "123456789"
        assert_eq!(crc16(b"123456789"), 0xce3c);
        assert_eq!(crc32(b"123456789"), 0xcbf43926);
    }

    #[test]
    fn null_q_is_not_valid() {
        // The CRC is stored inverted so a blank Q can never pass
        let q = [0u8; 12];

        assert_eq!(q_crc(&q), [0xff, 0xff]);
        assert!(!q_crc_ok(&q));
    }

    #[test]
    fn stamp() {
        let mut q = [0x41, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];

        q_crc_stamp(&mut q);
        assert!(q_crc_ok(&q));

        // Every single bit error in the payload must be caught
        for byte in 0..10 {
            for bit in 0..8 {
                let mut bad = q;
                bad[byte] ^= 1 << bit;
                assert!(!q_crc_ok(&bad));
            }
        }
    }

    #[test]
    fn incremental_crc32() {
        let mut d = Crc32Digest::new();
        d.update(b"1234");
        d.update(b"56789");

        assert_eq!(d.finalize(), crc32(b"123456789"));
    }
}
