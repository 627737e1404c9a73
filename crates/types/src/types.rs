//! Core chain value types shared across the SDK.
//!
//! - Fixed-width hash newtypes ([`BlockHash`], [`TxHash`]) with `0x` hex text form
//! - Numeric aliases for block numbers, nonces and balances
//! - [`RuntimeVersion`], as reported by the node

use std::fmt;

use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codec::{CodecError, from_hex};

/// Block height.
pub type BlockNumber = u32;

/// Per-account transaction counter.
pub type Nonce = u32;

/// Token amount in the chain's smallest unit.
pub type Balance = u128;

// ============================================================================
// Hash Types
// ============================================================================

/// Generates a newtype wrapper around a 32-byte hash.
///
/// Each generated type provides:
/// - Standard derives plus SCALE `Encode`/`Decode`
/// - Serde as a `0x`-prefixed hex string, the form node RPC uses
/// - `Display` and `Debug` in the same hex form
/// - `from_hex()` parsing and `as_bytes()` access
macro_rules! define_hash {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Encode, Decode)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Creates the hash from raw bytes.
            #[inline]
            pub const fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Returns the raw bytes.
            #[inline]
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Parses a hex string with or without the `0x` prefix.
            ///
            /// # Errors
            ///
            /// Returns [`CodecError`] if the string is not hex or not 32 bytes.
            pub fn from_hex(s: &str) -> Result<Self, CodecError> {
                let bytes = from_hex(s)?;
                let len = bytes.len();
                let array: [u8; 32] = bytes.try_into().map_err(|_| CodecError::Schema {
                    message: format!("expected 32 bytes for {}, got {len}", stringify!($name)),
                })?;
                Ok(Self(array))
            }
        }

        impl From<[u8; 32]> for $name {
            #[inline]
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(0x{})", stringify!($name), hex::encode(self.0))
            }
        }

        impl std::str::FromStr for $name {
            type Err = CodecError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

define_hash!(
    /// Hash identifying a block.
    BlockHash
);

define_hash!(
    /// Hash identifying a submitted extrinsic: BLAKE2b-256 of its encoded bytes.
    TxHash
);

// ============================================================================
// Runtime Version
// ============================================================================

/// Runtime version reported by `state_getRuntimeVersion`.
///
/// `spec_version` and `transaction_version` are mixed into every signing
/// payload, so a runtime upgrade invalidates transactions signed against the
/// old values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeVersion {
    /// Runtime name.
    #[serde(default)]
    pub spec_name: String,
    /// Implementation name.
    #[serde(default)]
    pub impl_name: String,
    /// Version of the runtime logic.
    pub spec_version: u32,
    /// Version of the extrinsic format.
    pub transaction_version: u32,
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} (tx {})", self.spec_name, self.spec_version, self.transaction_version)
    }
}
