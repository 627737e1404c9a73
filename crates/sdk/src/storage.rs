//! Storage key derivation and value decoding.
//!
//! A storage key is `twox128(module) ++ twox128(item) ++ fragments`, where
//! each fragment is an already-encoded map key, usually hashed with one of the
//! [`KeyHasher`] schemes. Derivation is pure: the same inputs always produce
//! the same bytes, and fragment order matters.

use std::fmt;

use cess_types::{blake2_128, blake2_256, twox_64, twox_128};
use parity_scale_codec::{Decode, Encode};

use crate::error::{EncodingSnafu, Result};

/// Length of the `twox128(module) ++ twox128(item)` prefix.
pub const PREFIX_LEN: usize = 32;

/// Hashing scheme applied to a map key before it is appended to the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyHasher {
    /// Key appended as-is.
    Identity,
    /// `twox64(key) ++ key`.
    Twox64Concat,
    /// `blake2_128(key) ++ key`.
    Blake2_128Concat,
    /// `blake2_128(key)`.
    Blake2_128,
    /// `blake2_256(key)`.
    Blake2_256,
    /// `twox128(key)`.
    Twox128,
}

impl KeyHasher {
    /// Applies the hasher to already-encoded key bytes.
    #[must_use]
    pub fn hash(self, encoded: &[u8]) -> Vec<u8> {
        match self {
            Self::Identity => encoded.to_vec(),
            Self::Twox64Concat => [twox_64(encoded).as_slice(), encoded].concat(),
            Self::Blake2_128Concat => [blake2_128(encoded).as_slice(), encoded].concat(),
            Self::Blake2_128 => blake2_128(encoded).to_vec(),
            Self::Blake2_256 => blake2_256(encoded).to_vec(),
            Self::Twox128 => twox_128(encoded).to_vec(),
        }
    }

    /// Length of the hash part preceding the raw key, for concat hashers.
    ///
    /// Returns `None` for hashers that do not keep the key recoverable.
    #[must_use]
    pub fn concat_prefix_len(self) -> Option<usize> {
        match self {
            Self::Identity => Some(0),
            Self::Twox64Concat => Some(8),
            Self::Blake2_128Concat => Some(16),
            Self::Blake2_128 | Self::Blake2_256 | Self::Twox128 => None,
        }
    }
}

/// Address of a storage value: module, item and ordered key fragments.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageAddress {
    module: String,
    item: String,
    fragments: Vec<Vec<u8>>,
}

impl StorageAddress {
    /// Address of a plain value or of a whole map (no fragments).
    pub fn new(module: impl Into<String>, item: impl Into<String>) -> Self {
        Self { module: module.into(), item: item.into(), fragments: Vec::new() }
    }

    /// Appends a fragment that is already encoded and hashed.
    #[must_use]
    pub fn with_raw_fragment(mut self, fragment: impl Into<Vec<u8>>) -> Self {
        self.fragments.push(fragment.into());
        self
    }

    /// SCALE-encodes `key`, hashes it with `hasher` and appends the result.
    #[must_use]
    pub fn with_key<K: Encode + ?Sized>(self, hasher: KeyHasher, key: &K) -> Self {
        let fragment = hasher.hash(&key.encode());
        self.with_raw_fragment(fragment)
    }

    /// Module name.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Item name.
    #[must_use]
    pub fn item(&self) -> &str {
        &self.item
    }

    /// Encoded fragments, in order.
    #[must_use]
    pub fn fragments(&self) -> &[Vec<u8>] {
        &self.fragments
    }

    /// `twox128(module) ++ twox128(item)`.
    #[must_use]
    pub fn prefix(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PREFIX_LEN);
        out.extend_from_slice(&twox_128(self.module.as_bytes()));
        out.extend_from_slice(&twox_128(self.item.as_bytes()));
        out
    }

    /// Full key: prefix followed by every fragment in order.
    #[must_use]
    pub fn derive(&self) -> Vec<u8> {
        let extra: usize = self.fragments.iter().map(Vec::len).sum();
        let mut out = self.prefix();
        out.reserve(extra);
        for fragment in &self.fragments {
            out.extend_from_slice(fragment);
        }
        out
    }

    /// Strips this address's derived key from the front of `full_key`.
    ///
    /// Used to recover map keys from enumerated storage keys. Returns `None`
    /// if `full_key` is not under this address.
    #[must_use]
    pub fn key_suffix<'k>(&self, full_key: &'k [u8]) -> Option<&'k [u8]> {
        full_key.strip_prefix(self.derive().as_slice())
    }

    /// Decodes a raw storage value into `T`, consuming every byte.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Encoding`](crate::SdkError::Encoding) naming the
    /// address if the bytes do not match `T`.
    pub fn decode<T: Decode>(&self, bytes: &[u8]) -> Result<T> {
        cess_types::decode(bytes)
            .map_err(|e| EncodingSnafu { message: format!("{self}: {e}") }.build())
    }
}

impl fmt::Display for StorageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.item)?;
        if !self.fragments.is_empty() {
            write!(f, "[{} keys]", self.fragments.len())?;
        }
        Ok(())
    }
}

impl fmt::Debug for StorageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageAddress")
            .field("module", &self.module)
            .field("item", &self.item)
            .field("key", &cess_types::to_hex(&self.derive()))
            .finish()
    }
}

/// Decodes the raw map key behind a concat-hashed fragment.
///
/// `suffix` is what [`StorageAddress::key_suffix`] returned; `hasher` is the
/// hasher the map uses for its first key.
///
/// # Errors
///
/// Returns an encoding error if the hasher is not a concat hasher or the
/// bytes do not decode into `K`.
pub fn decode_map_key<K: Decode>(hasher: KeyHasher, suffix: &[u8]) -> Result<K> {
    let skip = hasher.concat_prefix_len().ok_or_else(|| {
        EncodingSnafu { message: format!("{hasher:?} does not keep the key recoverable") }.build()
    })?;
    let Some(mut rest) = suffix.get(skip..) else {
        return EncodingSnafu { message: "storage key shorter than its hash" }.fail();
    };
    Ok(cess_types::decode_prefix(&mut rest)?)
}
