//! Hashing functions used by the chain's storage and transaction formats.
//!
//! The chain derives storage keys with xxHash ("twox") for module and item
//! names and with BLAKE2b for user-controlled map keys. Transaction hashes
//! and oversized signing payloads use BLAKE2b-256.
//!
//! - [`twox_64`], [`twox_128`]: concatenated xxHash64 digests with seeds `0..n`
//! - [`blake2_128`], [`blake2_256`], [`blake2_512`]: BLAKE2b with truncated output

use blake2::{
    Blake2b, Blake2b512, Digest,
    digest::consts::{U16, U32},
};
use xxhash_rust::xxh64::xxh64;

/// 32-byte hash output.
pub type Hash256 = [u8; 32];

type Blake2b128 = Blake2b<U16>;
type Blake2b256 = Blake2b<U32>;

/// xxHash64 with seed 0, little-endian.
#[inline]
pub fn twox_64(data: &[u8]) -> [u8; 8] {
    xxh64(data, 0).to_le_bytes()
}

/// Two xxHash64 digests (seeds 0 and 1) concatenated little-endian.
///
/// Used for the module and item segments of every storage key.
#[inline]
pub fn twox_128(data: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&xxh64(data, 0).to_le_bytes());
    out[8..].copy_from_slice(&xxh64(data, 1).to_le_bytes());
    out
}

/// BLAKE2b with a 16-byte digest.
#[inline]
pub fn blake2_128(data: &[u8]) -> [u8; 16] {
    let mut hasher = Blake2b128::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// BLAKE2b with a 32-byte digest.
#[inline]
pub fn blake2_256(data: &[u8]) -> Hash256 {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// BLAKE2b with the full 64-byte digest.
#[inline]
pub fn blake2_512(data: &[u8]) -> [u8; 64] {
    let mut hasher = Blake2b512::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// BLAKE2b-256 over several inputs without concatenating them first.
pub fn blake2_256_concat(parts: &[&[u8]]) -> Hash256 {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}
