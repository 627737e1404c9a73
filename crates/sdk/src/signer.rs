//! Transaction signing.
//!
//! The engine only needs two things from a signer: its account and a
//! signature over a payload. Key custody stays with the [`Signer`]
//! implementation; [`Ed25519Signer`] is the in-process default.

use std::fmt;

use cess_types::AccountId;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use parity_scale_codec::{Decode, Encode};

use crate::error::{Result, SigningSnafu};

/// Signature tagged with its scheme, as the runtime expects it.
#[derive(Clone, PartialEq, Eq, Encode, Decode)]
pub enum MultiSignature {
    /// Ed25519 signature.
    #[codec(index = 0)]
    Ed25519([u8; 64]),
    /// Sr25519 signature.
    #[codec(index = 1)]
    Sr25519([u8; 64]),
    /// Secp256k1 ECDSA signature with recovery byte.
    #[codec(index = 2)]
    Ecdsa([u8; 65]),
}

impl fmt::Debug for MultiSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (scheme, bytes): (&str, &[u8]) = match self {
            Self::Ed25519(b) => ("Ed25519", b),
            Self::Sr25519(b) => ("Sr25519", b),
            Self::Ecdsa(b) => ("Ecdsa", b),
        };
        write!(f, "{scheme}(0x{}..)", hex::encode(&bytes[..8]))
    }
}

/// Produces signatures for one account.
pub trait Signer: Send + Sync + fmt::Debug {
    /// Account whose key signs.
    fn account_id(&self) -> AccountId;

    /// Signs `payload`.
    fn sign(&self, payload: &[u8]) -> Result<MultiSignature>;
}

/// Ed25519 keypair held in memory.
#[derive(Clone)]
pub struct Ed25519Signer {
    key: SigningKey,
    account: AccountId,
}

impl Ed25519Signer {
    /// Creates a signer from a 32-byte secret seed.
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let key = SigningKey::from_bytes(&seed);
        let account = AccountId(key.verifying_key().to_bytes());
        Self { key, account }
    }

    /// Creates a signer from a hex seed, with or without `0x`.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Signing`](crate::SdkError::Signing) unless the
    /// string is 32 bytes of hex.
    pub fn from_seed_hex(seed: &str) -> Result<Self> {
        let bytes = cess_types::from_hex(seed)
            .map_err(|e| SigningSnafu { message: format!("invalid seed: {e}") }.build())?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SigningSnafu { message: "seed must be 32 bytes" }.build())?;
        Ok(Self::from_seed(seed))
    }

    /// Creates a signer with a fresh random seed.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_seed(rand::random())
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer").field("account", &self.account).finish_non_exhaustive()
    }
}

impl Signer for Ed25519Signer {
    fn account_id(&self) -> AccountId {
        self.account
    }

    fn sign(&self, payload: &[u8]) -> Result<MultiSignature> {
        Ok(MultiSignature::Ed25519(self.key.sign(payload).to_bytes()))
    }
}

/// Checks an Ed25519 signature against `account`.
///
/// Other schemes are reported as invalid.
#[must_use]
pub fn verify(account: &AccountId, payload: &[u8], signature: &MultiSignature) -> bool {
    let MultiSignature::Ed25519(bytes) = signature else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(account.as_bytes()) else {
        return false;
    };
    key.verify(payload, &Signature::from_bytes(bytes)).is_ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn rfc8032_test_vector_one() {
        let signer = Ed25519Signer::from_seed_hex(
            "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60",
        )
        .unwrap();
        assert_eq!(
            hex::encode(signer.account_id().as_bytes()),
            "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a"
        );
        let MultiSignature::Ed25519(sig) = signer.sign(b"").unwrap() else {
            panic!("expected ed25519");
        };
        assert_eq!(
            hex::encode(sig),
            "e5564300c360ac729086e2cc806e828a84877f1eb8e5d974d873e065224901555fb8821590a33bacc61e39701cf9b46bd25bf5f0595bbe24655141438e7a100b"
        );
    }

    #[test]
    fn signatures_verify_against_account() {
        let signer = Ed25519Signer::generate();
        let sig = signer.sign(b"payload").unwrap();
        assert!(verify(&signer.account_id(), b"payload", &sig));
        assert!(!verify(&signer.account_id(), b"other", &sig));
        assert!(!verify(&Ed25519Signer::generate().account_id(), b"payload", &sig));
    }

    #[test]
    fn multi_signature_encoding_is_tagged() {
        let encoded = MultiSignature::Ed25519([9; 64]).encode();
        assert_eq!(encoded.len(), 65);
        assert_eq!(encoded[0], 0);
        assert_eq!(MultiSignature::Ecdsa([1; 65]).encode()[0], 2);
        assert!(!verify(&AccountId([0; 32]), b"x", &MultiSignature::Sr25519([0; 64])));
    }

    #[test]
    fn bad_seed_rejected() {
        assert!(Ed25519Signer::from_seed_hex("0x1234").is_err());
        assert!(Ed25519Signer::from_seed_hex("zz").is_err());
    }
}
