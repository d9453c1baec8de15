//! Bulk-transfer frames: type A (nibble split) and type B (7-bit
//! pass-through) encodings, 14-bit length prefix and 7-bit checksum.
//!
//! Frame layout on the wire:
//!
//! ```text
//! len_msb len_lsb  data[len]  checksum
//! ```
//!
//! `len` counts encoded bytes; `checksum` makes the 7-bit sum of the
//! encoded data plus itself zero.

use nom::bytes::complete::take;
use nom::combinator::verify;
use nom::number::complete::u8 as byte;
use nom::sequence::pair;
use nom::IResult;
use thiserror::Error;

/// Largest encoded length a 14-bit prefix can carry.
pub const MAX_FRAME_LEN: usize = 0x3FFF;

/// Bulk-transfer decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Frame ended before its declared length plus checksum.
    #[error("frame truncated")]
    Truncated,

    /// A length byte had its top bit set.
    #[error("malformed length prefix")]
    MalformedLength,

    /// Declared length does not fit the target.
    #[error("length {actual} does not match expected {expected}")]
    LengthMismatch {
        /// Length the target requires.
        expected: usize,
        /// Length carried by the frame.
        actual: usize,
    },

    /// Checksum byte does not cancel the data sum.
    #[error("checksum {found:#04x}, expected {expected:#04x}")]
    Checksum {
        /// Checksum computed over the data.
        expected: u8,
        /// Checksum carried by the frame.
        found: u8,
    },

    /// Type A data with an odd number of nibbles.
    #[error("odd nibble count {0}")]
    OddNibbles(usize),

    /// A data byte out of range for the encoding.
    #[error("byte {0:#04x} is not valid in this encoding")]
    InvalidByte(u8),

    /// Encoded data longer than a 14-bit length.
    #[error("payload of {0} bytes exceeds the frame limit")]
    TooLong(usize),
}

/// Binary-to-MIDI transfer encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Each byte as low nibble then high nibble.
    TypeA,
    /// 7-bit bytes passed through.
    TypeB,
}

/// Two's complement of the 7-bit sum of `data`.
pub fn checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    sum.wrapping_neg() & 0x7F
}

/// Encode raw bytes for the wire.
pub fn encode(data: &[u8], encoding: Encoding) -> Result<Vec<u8>, TransferError> {
    match encoding {
        Encoding::TypeA => Ok(data.iter().flat_map(|b| [b & 0x0F, b >> 4]).collect()),
        Encoding::TypeB => match data.iter().find(|b| **b > 0x7F) {
            Some(b) => Err(TransferError::InvalidByte(*b)),
            None => Ok(data.to_vec()),
        },
    }
}

/// Decode wire data back to raw bytes.
pub fn decode(encoded: &[u8], encoding: Encoding) -> Result<Vec<u8>, TransferError> {
    if let Some(b) = encoded.iter().find(|b| **b > 0x7F) {
        return Err(TransferError::InvalidByte(*b));
    }
    match encoding {
        Encoding::TypeA => {
            if encoded.len() % 2 != 0 {
                return Err(TransferError::OddNibbles(encoded.len()));
            }
            encoded
                .chunks_exact(2)
                .map(|pair| {
                    if pair[0] > 0x0F || pair[1] > 0x0F {
                        Err(TransferError::InvalidByte(pair[0].max(pair[1])))
                    } else {
                        Ok(pair[0] | (pair[1] << 4))
                    }
                })
                .collect()
        }
        Encoding::TypeB => Ok(encoded.to_vec()),
    }
}

/// Build a complete frame around `data`.
pub fn frame(data: &[u8], encoding: Encoding) -> Result<Vec<u8>, TransferError> {
    let encoded = encode(data, encoding)?;
    if encoded.len() > MAX_FRAME_LEN {
        return Err(TransferError::TooLong(encoded.len()));
    }
    let mut out = Vec::with_capacity(encoded.len() + 3);
    out.push(((encoded.len() >> 7) & 0x7F) as u8);
    out.push((encoded.len() & 0x7F) as u8);
    out.extend_from_slice(&encoded);
    out.push(checksum(&encoded));
    Ok(out)
}

fn seven_bit(input: &[u8]) -> IResult<&[u8], u8> {
    verify(byte, |b: &u8| *b < 0x80)(input)
}

fn length_prefix(input: &[u8]) -> IResult<&[u8], usize> {
    let (input, (msb, lsb)) = pair(seven_bit, seven_bit)(input)?;
    Ok((input, ((msb as usize) << 7) | lsb as usize))
}

fn raw_frame(input: &[u8]) -> IResult<&[u8], (&[u8], u8)> {
    let (input, len) = length_prefix(input)?;
    let (input, data) = take(len)(input)?;
    let (input, sum) = byte(input)?;
    Ok((input, (data, sum)))
}

/// Parse and decode one frame from the front of `input`.
///
/// Returns the decoded bytes and whatever follows the checksum.
pub fn parse_frame(input: &[u8], encoding: Encoding) -> Result<(Vec<u8>, &[u8]), TransferError> {
    if input.len() >= 2 && (input[0] > 0x7F || input[1] > 0x7F) {
        return Err(TransferError::MalformedLength);
    }
    let (rest, (data, found)) = raw_frame(input).map_err(|_| TransferError::Truncated)?;
    let expected = checksum(data);
    if found != expected {
        return Err(TransferError::Checksum { expected, found });
    }
    Ok((decode(data, encoding)?, rest))
}

/// Parse a frame that must decode to exactly `expected` bytes.
pub fn parse_frame_exact(
    input: &[u8],
    encoding: Encoding,
    expected: usize,
) -> Result<Vec<u8>, TransferError> {
    let (data, _) = parse_frame(input, encoding)?;
    if data.len() != expected {
        return Err(TransferError::LengthMismatch {
            expected,
            actual: data.len(),
        });
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_a_sends_low_nibble_first() {
        assert_eq!(encode(&[0xA5, 0x0F], Encoding::TypeA).unwrap(), vec![0x05, 0x0A, 0x0F, 0x00]);
    }

    #[test]
    fn round_trips_full_byte_range() {
        let data: Vec<u8> = (0..=255).collect();
        let f = frame(&data, Encoding::TypeA).unwrap();
        let (back, rest) = parse_frame(&f, Encoding::TypeA).unwrap();
        assert_eq!(back, data);
        assert!(rest.is_empty());

        let seven: Vec<u8> = (0..128).collect();
        let f = frame(&seven, Encoding::TypeB).unwrap();
        assert_eq!(parse_frame(&f, Encoding::TypeB).unwrap().0, seven);
    }

    #[test]
    fn data_plus_checksum_sums_to_zero() {
        for data in [&b"IBM MFC"[..], &[0x7F; 300][..], &[][..]] {
            let f = frame(data, Encoding::TypeA).unwrap();
            let sum: u32 = f[2..].iter().map(|b| *b as u32).sum();
            assert_eq!(sum & 0x7F, 0);
        }
    }

    #[test]
    fn length_prefix_is_fourteen_bit_big_endian() {
        let f = frame(&[0u8; 0xC20], Encoding::TypeA).unwrap();
        let len = 0xC20 * 2;
        assert_eq!(f[0], (len >> 7) as u8);
        assert_eq!(f[1], (len & 0x7F) as u8);
        assert_eq!(f.len(), len + 3);
    }

    #[test]
    fn corrupted_frames_are_rejected() {
        let mut f = frame(&[1, 2, 3], Encoding::TypeB).unwrap();
        let last = f.len() - 1;
        f[last] ^= 0x01;
        assert!(matches!(
            parse_frame(&f, Encoding::TypeB),
            Err(TransferError::Checksum { .. })
        ));
        assert_eq!(parse_frame(&[0x00, 0x05, 1, 2], Encoding::TypeB), Err(TransferError::Truncated));
        assert_eq!(parse_frame(&[0x80, 0x01, 0, 0], Encoding::TypeB), Err(TransferError::MalformedLength));
        let f = frame(&[1, 2, 3], Encoding::TypeB).unwrap();
        assert_eq!(
            parse_frame_exact(&f, Encoding::TypeB, 4),
            Err(TransferError::LengthMismatch { expected: 4, actual: 3 })
        );
    }

    #[test]
    fn type_b_refuses_eight_bit_data() {
        assert_eq!(encode(&[0x80], Encoding::TypeB), Err(TransferError::InvalidByte(0x80)));
    }
}
