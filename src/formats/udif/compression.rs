//! Chunk decompressors

use std::io::Read;

use bzip2::read::BzDecoder;
use flate2::read::ZlibDecoder;

use crate::{ImageError, ImageResult};

/// Compression algorithm of a UDIF chunk
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Codec {
    /// Apple Data Compression
    Adc,
    /// zlib
    Zlib,
    /// bzip2
    Bzip2,
    /// Apple RLE, as used by DART
    AppleRle,
}

impl Codec {
    /// Decompress `input`, which must expand to exactly `expected` bytes.
    /// Short output is padded with zeroes.
    pub fn decompress(self, input: &[u8], expected: usize) -> ImageResult<Vec<u8>> {
        let mut out = match self {
            Codec::Adc => adc_decompress(input, expected)?,
            Codec::AppleRle => rle_decompress(input, expected),
            Codec::Zlib => read_all(ZlibDecoder::new(input), expected)?,
            Codec::Bzip2 => read_all(BzDecoder::new(input), expected)?,
        };

        if out.len() < expected {
            log::debug!(
                "{:?} chunk decompressed to {} bytes, expected {}",
                self,
                out.len(),
                expected
            );
        }

        out.resize(expected, 0);

        Ok(out)
    }
}

fn read_all<R: Read>(decoder: R, expected: usize) -> ImageResult<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);

    decoder
        .take(expected as u64)
        .read_to_end(&mut out)
        .map_err(|e| ImageError::Decompression(e.to_string()))?;

    Ok(out)
}

/// Decompress Apple Data Compression. Stops once `max` bytes have been
/// produced.
pub fn adc_decompress(input: &[u8], max: usize) -> ImageResult<Vec<u8>> {
    let mut out = Vec::with_capacity(max);
    let mut pos = 0;

    let truncated = || ImageError::Decompression("truncated ADC stream".to_string());

    while pos < input.len() && out.len() < max {
        let b = input[pos];

        let (len, offset) = if b & 0x80 != 0 {
            let len = usize::from(b & 0x7f) + 1;
            let literal = input.get(pos + 1..pos + 1 + len).ok_or_else(truncated)?;

            out.extend_from_slice(literal);
            pos += 1 + len;
            continue;
        } else if b & 0x40 != 0 {
            let o = input.get(pos + 1..pos + 3).ok_or_else(truncated)?;
            pos += 3;

            (
                usize::from(b & 0x3f) + 4,
                usize::from(u16::from_be_bytes([o[0], o[1]])),
            )
        } else {
            let o = *input.get(pos + 1).ok_or_else(truncated)?;
            pos += 2;

            (
                usize::from((b & 0x3f) >> 2) + 3,
                (usize::from(b & 0x03) << 8) | usize::from(o),
            )
        };

        if offset >= out.len() {
            return Err(ImageError::Decompression(format!(
                "ADC back reference {} out of window",
                offset
            )));
        }

        // Overlapping copies repeat the pattern
        let start = out.len() - offset - 1;
        for i in 0..len {
            let c = out[start + i];
            out.push(c);
        }
    }

    out.truncate(max);

    Ok(out)
}

/// Runs longer than this are considered corrupted and skipped
const RLE_MAX_RUN: i32 = 20960;

/// Decompress Apple RLE: a stream of big-endian signed 16-bit run
/// headers. A positive run is followed by that many literal 16-bit
/// words, a negative one by a single word to repeat.
pub fn rle_decompress(input: &[u8], max: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(max);
    let mut pos = 0;

    while pos + 2 <= input.len() && out.len() < max {
        let run = i32::from(i16::from_be_bytes([input[pos], input[pos + 1]]));
        pos += 2;

        if run == 0 || run.abs() >= RLE_MAX_RUN {
            continue;
        }

        if run > 0 {
            let len = run as usize * 2;
            let end = (pos + len).min(input.len());

            out.extend_from_slice(&input[pos..end]);
            pos = end;
        } else {
            let word = match input.get(pos..pos + 2) {
                Some(w) => [w[0], w[1]],
                None => break,
            };
            pos += 2;

            for _ in 0..-run {
                out.extend_from_slice(&word);
            }
        }
    }

    out.truncate(max);

    out
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn adc() {
        // "abcd" literal, then a 6 byte copy from 4 bytes back, then a
        // 3 byte copy of the last byte
        let input = [0x83, b'a', b'b', b'c', b'd', 0x0c, 0x03, 0x00, 0x00];

        let out = adc_decompress(&input, 100).unwrap();

        assert_eq!(out, b"abcdabcdabbbb");
    }

    #[test]
    fn adc_three_byte_form() {
        let input = [0x80, b'x', 0x42, 0x00, 0x00];

        assert_eq!(adc_decompress(&input, 100).unwrap(), vec![b'x'; 7]);
    }

    #[test]
    fn adc_bad_reference() {
        assert!(adc_decompress(&[0x00, 0x05], 100).is_err());
        assert!(adc_decompress(&[0x85, 1], 100).is_err());
    }

    #[test]
    fn rle() {
        let input = [0x00, 0x02, 1, 2, 3, 4, 0xff, 0xfd, 0xaa, 0x55, 0x00, 0x00];

        assert_eq!(
            rle_decompress(&input, 100),
            vec![1, 2, 3, 4, 0xaa, 0x55, 0xaa, 0x55, 0xaa, 0x55]
        );
        assert_eq!(rle_decompress(&input, 5), vec![1, 2, 3, 4, 0xaa]);
    }

    #[test]
    fn zlib_and_bzip2() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();

        let mut z = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        z.write_all(&data).unwrap();
        let z = z.finish().unwrap();

        assert_eq!(Codec::Zlib.decompress(&z, 4096).unwrap(), data);

        let mut b = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        b.write_all(&data).unwrap();
        let b = b.finish().unwrap();

        assert_eq!(Codec::Bzip2.decompress(&b, 4096).unwrap(), data);
    }

    #[test]
    fn garbage_zlib() {
        assert!(Codec::Zlib.decompress(&[0xde, 0xad, 0xbe, 0xef], 512).is_err());
    }
}
