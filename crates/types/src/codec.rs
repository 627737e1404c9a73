//! Centralized SCALE encoding and decoding functions.
//!
//! Chain values travel in the SCALE format. This module wraps
//! `parity-scale-codec` with consistent error handling via snafu so callers
//! never deal with the codec's error type directly.
//!
//! Decoding through [`decode`] is strict: every input byte must be consumed.
//! A value that decodes but leaves trailing bytes does not have the shape the
//! caller asked for, and is reported as [`CodecError::TrailingBytes`].

use parity_scale_codec::{Compact, Decode, Encode};
use snafu::{ResultExt, Snafu, ensure};

/// Error type for codec operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CodecError {
    /// The bytes do not decode into the requested type.
    #[snafu(display("Decoding {type_name} failed: {source}"))]
    Decode {
        /// Name of the target type.
        type_name: &'static str,
        /// The underlying SCALE error.
        source: parity_scale_codec::Error,
    },

    /// The value decoded but input bytes were left over.
    #[snafu(display("Decoding {type_name} left {remaining} trailing bytes"))]
    TrailingBytes {
        /// Name of the target type.
        type_name: &'static str,
        /// Number of unconsumed bytes.
        remaining: usize,
    },

    /// A hex string could not be parsed.
    #[snafu(display("Invalid hex string: {source}"))]
    Hex {
        /// The underlying hex error.
        source: hex::FromHexError,
    },

    /// Structured data did not match the schema the decoder expected.
    #[snafu(display("Schema mismatch: {message}"))]
    Schema {
        /// Description of the mismatch.
        message: String,
    },
}

/// Encodes a value to SCALE bytes.
#[inline]
pub fn encode<T: Encode>(value: &T) -> Vec<u8> {
    value.encode()
}

/// Decodes SCALE bytes into a value, requiring all input to be consumed.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the bytes are malformed for `T`, or
/// [`CodecError::TrailingBytes`] if bytes remain after decoding.
pub fn decode<T: Decode>(bytes: &[u8]) -> Result<T, CodecError> {
    let type_name = std::any::type_name::<T>();
    let mut input = bytes;
    let value = T::decode(&mut input).context(DecodeSnafu { type_name })?;
    ensure!(input.is_empty(), TrailingBytesSnafu { type_name, remaining: input.len() });
    Ok(value)
}

/// Decodes a value from the front of `input`, advancing the slice.
///
/// Used when a buffer holds several concatenated values.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the leading bytes are malformed for `T`.
pub fn decode_prefix<T: Decode>(input: &mut &[u8]) -> Result<T, CodecError> {
    T::decode(input).context(DecodeSnafu { type_name: std::any::type_name::<T>() })
}

/// Encodes an integer in SCALE compact form.
#[inline]
pub fn encode_compact(value: u128) -> Vec<u8> {
    Compact(value).encode()
}

/// Encodes bytes as a `0x`-prefixed lowercase hex string.
#[inline]
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parses a hex string with or without the `0x` prefix.
///
/// # Errors
///
/// Returns [`CodecError::Hex`] if the string contains non-hex characters or
/// has odd length.
pub fn from_hex(s: &str) -> Result<Vec<u8>, CodecError> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(trimmed).context(HexSnafu)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Encode, Decode)]
    struct BucketRecord {
        owner: [u8; 32],
        objects: Vec<[u8; 4]>,
        frozen: bool,
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut bytes = encode(&7u32);
        bytes.push(0xff);
        let err = decode::<u32>(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::TrailingBytes { remaining: 1, .. }));
    }

    #[test]
    fn decode_rejects_short_input() {
        let err = decode::<u64>(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, CodecError::Decode { .. }));
    }

    #[test]
    fn decode_struct_with_nested_vec() {
        let record = BucketRecord { owner: [9; 32], objects: vec![[1; 4], [2; 4]], frozen: true };
        let decoded: BucketRecord = decode(&encode(&record)).expect("decode record");
        assert_eq!(decoded, record);
    }

    #[test]
    fn decode_prefix_advances_input() {
        let mut buf = encode(&1u8);
        buf.extend(encode(&2u16));
        let mut input = buf.as_slice();
        assert_eq!(decode_prefix::<u8>(&mut input).unwrap(), 1);
        assert_eq!(decode_prefix::<u16>(&mut input).unwrap(), 2);
        assert!(input.is_empty());
    }

    #[test]
    fn compact_encoding_modes() {
        assert_eq!(encode_compact(0), vec![0x00]);
        assert_eq!(encode_compact(1), vec![0x04]);
        assert_eq!(encode_compact(63), vec![0xfc]);
        assert_eq!(encode_compact(64), vec![0x01, 0x01]);
        assert_eq!(encode_compact(16384), vec![0x02, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn hex_helpers() {
        assert_eq!(to_hex(&[0xde, 0xad]), "0xdead");
        assert_eq!(from_hex("0xdead").unwrap(), vec![0xde, 0xad]);
        assert_eq!(from_hex("beef").unwrap(), vec![0xbe, 0xef]);
        assert!(matches!(from_hex("0xzz"), Err(CodecError::Hex { .. })));
    }
}
