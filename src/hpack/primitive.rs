//! RFC 7541 §5: integer and string primitive representations.

use crate::error::HpackError;
use crate::hpack::huffman;
use bytes::{BufMut, Bytes, BytesMut};

/// Encode `value` with an N-bit prefix (§5.1), ORing the result into whatever flag bits the
/// caller has already set in the prefix byte they hand us.
pub fn encode_integer(value: usize, prefix_bits: u8, flag_bits: u8, out: &mut BytesMut) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        out.put_u8(flag_bits | value as u8);
        return;
    }
    out.put_u8(flag_bits | max_prefix as u8);
    let mut remaining = value - max_prefix;
    while remaining >= 128 {
        out.put_u8(((remaining % 128) | 0x80) as u8);
        remaining /= 128;
    }
    out.put_u8(remaining as u8);
}

/// Decode an N-bit-prefixed integer, returning the value and the number of bytes consumed.
pub fn decode_integer(buf: &[u8], prefix_bits: u8) -> Result<(usize, usize), HpackError> {
    if buf.is_empty() {
        return Err(HpackError::TruncatedInteger);
    }
    let mask = (1u8 << prefix_bits) - 1;
    let mut value = (buf[0] & mask) as usize;
    if value < mask as usize {
        return Ok((value, 1));
    }
    let mut consumed = 1;
    let mut shift = 0u32;
    loop {
        let byte = *buf.get(consumed).ok_or(HpackError::TruncatedInteger)?;
        consumed += 1;
        let added = ((byte & 0x7F) as usize)
            .checked_shl(shift)
            .ok_or(HpackError::IntegerOverflow)?;
        value = value.checked_add(added).ok_or(HpackError::IntegerOverflow)?;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return Err(HpackError::IntegerOverflow);
        }
    }
    Ok((value, consumed))
}

/// Encode a header string, choosing Huffman whenever it is strictly smaller (§5.2).
pub fn encode_string(data: &[u8], out: &mut BytesMut) {
    let huffman_len = huffman::encoded_len(data);
    if huffman_len < data.len() {
        encode_integer(huffman_len, 7, 0x80, out);
        out.extend_from_slice(&huffman::encode(data));
    } else {
        encode_integer(data.len(), 7, 0x00, out);
        out.extend_from_slice(data);
    }
}

/// Decode a header string, returning the bytes and the number of bytes consumed.
pub fn decode_string(buf: &[u8]) -> Result<(Bytes, usize), HpackError> {
    if buf.is_empty() {
        return Err(HpackError::Truncated);
    }
    let is_huffman = buf[0] & 0x80 != 0;
    let (len, prefix_len) = decode_integer(buf, 7)?;
    let end = prefix_len
        .checked_add(len)
        .ok_or(HpackError::IntegerOverflow)?;
    let raw = buf.get(prefix_len..end).ok_or(HpackError::Truncated)?;
    let value = if is_huffman {
        Bytes::from(huffman::decode(raw)?)
    } else {
        Bytes::copy_from_slice(raw)
    };
    Ok((value, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_integer(value: usize, prefix_bits: u8) {
        let mut out = BytesMut::new();
        encode_integer(value, prefix_bits, 0, &mut out);
        let (decoded, consumed) = decode_integer(&out, prefix_bits).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(consumed, out.len());
    }

    #[test]
    fn integer_examples_from_rfc() {
        // RFC 7541 §C.1.1: 10 encoded with a 5-bit prefix is a single byte.
        let mut out = BytesMut::new();
        encode_integer(10, 5, 0, &mut out);
        assert_eq!(&out[..], &[0b00001010]);

        // §C.1.2: 1337 encoded with a 5-bit prefix is three bytes.
        let mut out = BytesMut::new();
        encode_integer(1337, 5, 0, &mut out);
        assert_eq!(&out[..], &[0b00011111, 0b10011010, 0b00001010]);

        // §C.1.3: 42 encoded with an 8-bit prefix is one byte.
        let mut out = BytesMut::new();
        encode_integer(42, 8, 0, &mut out);
        assert_eq!(&out[..], &[42]);
    }

    #[test]
    fn integer_round_trips() {
        for prefix in [4u8, 5, 6, 7, 8] {
            for value in [0usize, 1, 30, 127, 128, 1337, 100_000, 16_000_000] {
                roundtrip_integer(value, prefix);
            }
        }
    }

    #[test]
    fn string_round_trips_with_and_without_huffman() {
        for s in [&b""[..], b"www.example.com", b"no-gzip", b"custom-key"] {
            let mut out = BytesMut::new();
            encode_string(s, &mut out);
            let (decoded, consumed) = decode_string(&out).unwrap();
            assert_eq!(&decoded[..], s);
            assert_eq!(consumed, out.len());
        }
    }
}
