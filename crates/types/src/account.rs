//! Account identifiers and their SS58 text form.
//!
//! An [`AccountId`] is the 32-byte public key of a signer. On the wire it is
//! encoded as a fixed array; for humans it is rendered as an SS58 string: a
//! base58 encoding of `prefix ++ key ++ checksum`, where the checksum is the
//! first two bytes of `blake2b_512("SS58PRE" ++ prefix ++ key)`.

use std::{fmt, str::FromStr};

use parity_scale_codec::{Decode, Encode, MaxEncodedLen};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::{Snafu, ensure};

use crate::hash::blake2_512;

/// SS58 network prefix of the CESS chain.
pub const CESS_SS58_PREFIX: u16 = 11330;

/// Generic Substrate SS58 prefix.
pub const SUBSTRATE_SS58_PREFIX: u16 = 42;

const CHECKSUM_LEN: usize = 2;
const SS58_PREFIX_TAG: &[u8] = b"SS58PRE";

/// Errors produced while parsing an account address.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum AddressError {
    /// The string is not valid base58.
    #[snafu(display("Address is not valid base58"))]
    Base58,

    /// The decoded payload has an unexpected length.
    #[snafu(display("Address payload has invalid length {len}"))]
    InvalidLength {
        /// Decoded payload length in bytes.
        len: usize,
    },

    /// The network prefix byte is outside the supported ranges.
    #[snafu(display("Address has an unsupported prefix encoding"))]
    InvalidPrefix,

    /// The checksum does not match the payload.
    #[snafu(display("Address checksum mismatch"))]
    Checksum,

    /// The address belongs to a different network.
    #[snafu(display("Address prefix {found} does not match expected {expected}"))]
    WrongNetwork {
        /// Prefix the caller required.
        expected: u16,
        /// Prefix found in the address.
        found: u16,
    },
}

/// 32-byte account identifier (public key).
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Encode, Decode, MaxEncodedLen,
)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    /// Creates an account identifier from raw public key bytes.
    #[inline]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw public key bytes.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Renders the account as SS58 with the given network prefix.
    ///
    /// Prefixes above 16383 are not representable and are masked to 14 bits.
    pub fn to_ss58(&self, prefix: u16) -> String {
        let prefix = prefix & 0b0011_1111_1111_1111;
        let mut payload = encode_prefix(prefix);
        payload.extend_from_slice(&self.0);
        let checksum = ss58_checksum(&payload);
        payload.extend_from_slice(&checksum[..CHECKSUM_LEN]);
        bs58::encode(payload).into_string()
    }

    /// Parses an SS58 string of any network, returning the account and its prefix.
    ///
    /// # Errors
    ///
    /// Returns an [`AddressError`] if the string is not base58, has the wrong
    /// length, uses a reserved prefix encoding, or fails the checksum.
    pub fn parse_ss58(s: &str) -> Result<(Self, u16), AddressError> {
        let data = bs58::decode(s).into_vec().map_err(|_| AddressError::Base58)?;
        ensure!(data.len() >= 2, InvalidLengthSnafu { len: data.len() });

        let (prefix_len, prefix) = match data[0] {
            0..=63 => (1, u16::from(data[0])),
            64..=127 => {
                let lower = (data[0] << 2) | (data[1] >> 6);
                let upper = data[1] & 0b0011_1111;
                (2, u16::from(lower) | (u16::from(upper) << 8))
            },
            _ => return InvalidPrefixSnafu.fail(),
        };

        let expected_len = prefix_len + 32 + CHECKSUM_LEN;
        ensure!(data.len() == expected_len, InvalidLengthSnafu { len: data.len() });

        let body_end = prefix_len + 32;
        let checksum = ss58_checksum(&data[..body_end]);
        ensure!(data[body_end..] == checksum[..CHECKSUM_LEN], ChecksumSnafu);

        let mut key = [0u8; 32];
        key.copy_from_slice(&data[prefix_len..body_end]);
        Ok((Self(key), prefix))
    }

    /// Parses an SS58 string and requires it to carry `expected` as prefix.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::WrongNetwork`] if the prefix differs, or any
    /// error from [`AccountId::parse_ss58`].
    pub fn from_ss58(s: &str, expected: u16) -> Result<Self, AddressError> {
        let (account, found) = Self::parse_ss58(s)?;
        ensure!(found == expected, WrongNetworkSnafu { expected, found });
        Ok(account)
    }
}

fn encode_prefix(prefix: u16) -> Vec<u8> {
    if prefix < 64 {
        return vec![prefix as u8];
    }
    let first = ((prefix & 0b0000_0000_1111_1100) as u8) >> 2;
    let second = ((prefix >> 8) as u8) | (((prefix & 0b0000_0000_0000_0011) as u8) << 6);
    vec![first | 0b0100_0000, second]
}

fn ss58_checksum(body: &[u8]) -> [u8; 64] {
    let mut preimage = Vec::with_capacity(SS58_PREFIX_TAG.len() + body.len());
    preimage.extend_from_slice(SS58_PREFIX_TAG);
    preimage.extend_from_slice(body);
    blake2_512(&preimage)
}

impl From<[u8; 32]> for AccountId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for AccountId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ss58(CESS_SS58_PREFIX))
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId(0x{})", hex::encode(self.0))
    }
}

/// Accepts an SS58 address of any network or a `0x`-prefixed 32-byte hex key.
impl FromStr for AccountId {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(hex_str) = s.strip_prefix("0x") {
            let bytes = hex::decode(hex_str).map_err(|_| AddressError::Base58)?;
            let key: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| AddressError::InvalidLength { len: bytes.len() })?;
            return Ok(Self(key));
        }
        Self::parse_ss58(s).map(|(account, _)| account)
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const ALICE_HEX: &str = "d43593c715fdd31c61141abd04a99fd6822c8558854ccde39a5684e7a56da27d";
    const ALICE_SS58: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";

    fn alice() -> AccountId {
        let bytes: [u8; 32] = hex::decode(ALICE_HEX).unwrap().try_into().unwrap();
        AccountId(bytes)
    }

    #[test]
    fn known_substrate_address() {
        assert_eq!(alice().to_ss58(SUBSTRATE_SS58_PREFIX), ALICE_SS58);
        let (parsed, prefix) = AccountId::parse_ss58(ALICE_SS58).unwrap();
        assert_eq!(parsed, alice());
        assert_eq!(prefix, SUBSTRATE_SS58_PREFIX);
    }

    #[test]
    fn two_byte_prefix_survives_parse() {
        let rendered = alice().to_ss58(CESS_SS58_PREFIX);
        let (parsed, prefix) = AccountId::parse_ss58(&rendered).unwrap();
        assert_eq!(parsed, alice());
        assert_eq!(prefix, CESS_SS58_PREFIX);
        assert_eq!(alice().to_string(), rendered);
    }

    #[test]
    fn wrong_network_is_rejected() {
        let err = AccountId::from_ss58(ALICE_SS58, CESS_SS58_PREFIX).unwrap_err();
        assert_eq!(err, AddressError::WrongNetwork { expected: CESS_SS58_PREFIX, found: 42 });
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let mut data = bs58::decode(ALICE_SS58).into_vec().unwrap();
        let last = data.len() - 1;
        data[last] ^= 0x01;
        let corrupted = bs58::encode(data).into_string();
        assert_eq!(AccountId::parse_ss58(&corrupted).unwrap_err(), AddressError::Checksum);
    }

    #[test]
    fn from_str_accepts_hex() {
        let parsed: AccountId = format!("0x{ALICE_HEX}").parse().unwrap();
        assert_eq!(parsed, alice());
        assert!("0x1234".parse::<AccountId>().is_err());
    }

    #[test]
    fn serde_uses_ss58_text() {
        let json = serde_json::to_string(&alice()).unwrap();
        let back: AccountId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, alice());
    }

    proptest! {
        #[test]
        fn any_key_and_prefix_parses_back(key in any::<[u8; 32]>(), prefix in 0u16..16384) {
            let account = AccountId(key);
            let (parsed, found) = AccountId::parse_ss58(&account.to_ss58(prefix)).unwrap();
            prop_assert_eq!(parsed, account);
            prop_assert_eq!(found, prefix);
        }
    }
}
