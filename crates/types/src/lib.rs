//! Chain primitives for the CESS client SDK.
//!
//! This crate provides the foundational types used by `cess-sdk`:
//! - Hashing functions used by storage keys and transactions (xxHash, BLAKE2b)
//! - SCALE encode/decode wrappers with snafu errors
//! - [`AccountId`] with SS58 address rendering
//! - [`Role`] normalization for participant registration
//! - Block and transaction hash newtypes, [`RuntimeVersion`]
//! - Client-side validation of call arguments

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod account;
pub mod codec;
pub mod hash;
pub mod role;
pub mod types;
pub mod validation;

// Re-export commonly used types at crate root
pub use account::{AccountId, AddressError, CESS_SS58_PREFIX, SUBSTRATE_SS58_PREFIX};
pub use codec::{CodecError, decode, decode_prefix, encode, from_hex, to_hex};
pub use hash::{Hash256, blake2_128, blake2_256, blake2_256_concat, blake2_512, twox_64, twox_128};
pub use role::{Role, UnknownRoleError};
pub use types::*;
pub use validation::{ValidationError, validate_bucket_name, validate_domain};

/// Re-export of the SCALE codec so downstream crates derive against the same version.
pub use parity_scale_codec;
