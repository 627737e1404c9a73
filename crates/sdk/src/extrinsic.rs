//! Signed extrinsic construction.
//!
//! Wire format of a signed (version 4) extrinsic:
//!
//! ```text
//! compact(len) ++ 0x84 ++ 0x00 ++ account ++ signature ++ era ++ compact(nonce) ++ compact(tip) ++ call
//! ```
//!
//! The signature covers the [`SigningPayload`]: the call, the signed extra
//! (era, nonce, tip) and the implicit data the runtime checks but does not
//! transmit (spec version, transaction version, genesis hash, era checkpoint).

use cess_types::{AccountId, Balance, BlockHash, Nonce, TxHash, blake2_256};
use parity_scale_codec::{Compact, Decode, Encode, Input};

use crate::{
    error::{EncodingSnafu, Result},
    metadata::Metadata,
    signer::MultiSignature,
};

/// Version byte of a signed extrinsic (`0b1000_0000 | 4`).
const SIGNED_V4: u8 = 0x84;

/// `MultiAddress::Id` tag.
const ADDRESS_ID: u8 = 0x00;

/// Payloads longer than this are hashed before signing.
const MAX_UNHASHED_PAYLOAD: usize = 256;

/// Transaction validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Era {
    /// Valid forever.
    Immortal,
    /// Valid for `period` blocks starting at the block whose number is `phase` modulo `period`.
    Mortal {
        /// Power of two in `4..=65536`.
        period: u64,
        /// Position of the birth block within the period.
        phase: u64,
    },
}

impl Era {
    /// Mortal era of roughly `period` blocks starting at `current`.
    ///
    /// `period` is rounded up to a power of two and clamped to `4..=65536`.
    #[must_use]
    pub fn mortal(period: u64, current: u64) -> Self {
        let period = period.checked_next_power_of_two().unwrap_or(1 << 16).clamp(4, 1 << 16);
        let phase = current % period;
        let quantize_factor = (period >> 12).max(1);
        let quantized_phase = phase / quantize_factor * quantize_factor;
        Self::Mortal { period, phase: quantized_phase }
    }

    /// First block number at which a transaction with this era is valid,
    /// given that it was built at `current`.
    #[must_use]
    pub fn birth(self, current: u64) -> u64 {
        match self {
            Self::Immortal => 0,
            Self::Mortal { period, phase } => (current.max(phase) - phase) / period * period + phase,
        }
    }

    /// Whether the era has no expiry.
    #[must_use]
    pub fn is_immortal(self) -> bool {
        matches!(self, Self::Immortal)
    }
}

impl Encode for Era {
    fn encode_to<T: parity_scale_codec::Output + ?Sized>(&self, output: &mut T) {
        match *self {
            Self::Immortal => output.push_byte(0),
            Self::Mortal { period, phase } => {
                let quantize_factor = (period >> 12).max(1);
                let low = u64::from(period.trailing_zeros().saturating_sub(1).clamp(1, 15));
                let encoded = (low | ((phase / quantize_factor) << 4)) as u16;
                encoded.encode_to(output);
            },
        }
    }
}

impl Decode for Era {
    fn decode<I: Input>(input: &mut I) -> std::result::Result<Self, parity_scale_codec::Error> {
        let first = input.read_byte()?;
        if first == 0 {
            return Ok(Self::Immortal);
        }
        let encoded = u64::from(first) + (u64::from(input.read_byte()?) << 8);
        let period = 2 << (encoded % (1 << 4));
        let quantize_factor = (period >> 12).max(1);
        let phase = (encoded >> 4) * quantize_factor;
        if period >= 4 && phase < period {
            Ok(Self::Mortal { period, phase })
        } else {
            Err("Invalid period and phase".into())
        }
    }
}

/// A call by name with its SCALE-encoded arguments.
///
/// Arguments are appended in declaration order; the runtime decodes them
/// positionally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    descriptor: String,
    args: Vec<u8>,
}

impl CallRequest {
    /// Starts a call to `"Module.method"` with no arguments.
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self { descriptor: descriptor.into(), args: Vec::new() }
    }

    /// Appends one encoded argument.
    #[must_use]
    pub fn arg<A: Encode + ?Sized>(mut self, value: &A) -> Self {
        value.encode_to(&mut self.args);
        self
    }

    /// Appends pre-encoded argument bytes.
    #[must_use]
    pub fn raw_args(mut self, bytes: &[u8]) -> Self {
        self.args.extend_from_slice(bytes);
        self
    }

    /// The `"Module.method"` descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Encoded arguments.
    #[must_use]
    pub fn args(&self) -> &[u8] {
        &self.args
    }

    /// Encodes `pallet_index ++ call_index ++ args` using `metadata`.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if the descriptor does not resolve.
    pub fn encode_call(&self, metadata: &Metadata) -> Result<Vec<u8>> {
        let (pallet, call) = metadata.call_index(&self.descriptor)?;
        let mut out = Vec::with_capacity(2 + self.args.len());
        out.push(pallet);
        out.push(call);
        out.extend_from_slice(&self.args);
        Ok(out)
    }
}

/// Fields the signer commits to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningPayload<'a> {
    /// Encoded call.
    pub call: &'a [u8],
    /// Validity window.
    pub era: Era,
    /// Account nonce.
    pub nonce: Nonce,
    /// Priority tip.
    pub tip: Balance,
    /// Runtime spec version.
    pub spec_version: u32,
    /// Runtime transaction version.
    pub transaction_version: u32,
    /// Genesis hash.
    pub genesis_hash: BlockHash,
    /// Era birth block hash (the genesis hash for immortal transactions).
    pub checkpoint: BlockHash,
}

impl SigningPayload<'_> {
    /// Bytes handed to the signer, hashed with BLAKE2b-256 when longer than 256 bytes.
    #[must_use]
    pub fn to_signable(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.call.len() + 96);
        out.extend_from_slice(self.call);
        self.era.encode_to(&mut out);
        Compact(self.nonce).encode_to(&mut out);
        Compact(self.tip).encode_to(&mut out);
        self.spec_version.encode_to(&mut out);
        self.transaction_version.encode_to(&mut out);
        out.extend_from_slice(self.genesis_hash.as_bytes());
        out.extend_from_slice(self.checkpoint.as_bytes());
        if out.len() > MAX_UNHASHED_PAYLOAD { blake2_256(&out).to_vec() } else { out }
    }
}

/// A signed extrinsic ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncheckedExtrinsic {
    /// Signing account.
    pub signer: AccountId,
    /// Signature over the signing payload.
    pub signature: MultiSignature,
    /// Validity window.
    pub era: Era,
    /// Account nonce.
    pub nonce: Nonce,
    /// Priority tip.
    pub tip: Balance,
    /// Encoded call.
    pub call: Vec<u8>,
}

impl UncheckedExtrinsic {
    /// Encodes the extrinsic with its length prefix.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.call.len() + 128);
        body.push(SIGNED_V4);
        body.push(ADDRESS_ID);
        self.signer.encode_to(&mut body);
        self.signature.encode_to(&mut body);
        self.era.encode_to(&mut body);
        Compact(self.nonce).encode_to(&mut body);
        Compact(self.tip).encode_to(&mut body);
        body.extend_from_slice(&self.call);

        let mut out = Compact(body.len() as u32).encode();
        out.extend_from_slice(&body);
        out
    }

    /// Decodes a length-prefixed signed extrinsic.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if the bytes are truncated, the length prefix
    /// disagrees with the body, or the extrinsic is unsigned.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut input = bytes;
        let len = cess_types::decode_prefix::<Compact<u32>>(&mut input)?.0 as usize;
        if input.len() != len {
            return EncodingSnafu {
                message: format!("extrinsic length prefix {len} but body is {} bytes", input.len()),
            }
            .fail();
        }

        let version: u8 = cess_types::decode_prefix(&mut input)?;
        let address_tag: u8 = cess_types::decode_prefix(&mut input)?;
        if version != SIGNED_V4 || address_tag != ADDRESS_ID {
            return EncodingSnafu {
                message: format!("unsupported extrinsic version {version:#04x}/{address_tag}"),
            }
            .fail();
        }

        let signer = cess_types::decode_prefix(&mut input)?;
        let signature = cess_types::decode_prefix(&mut input)?;
        let era = cess_types::decode_prefix(&mut input)?;
        let nonce = cess_types::decode_prefix::<Compact<Nonce>>(&mut input)?.0;
        let tip = cess_types::decode_prefix::<Compact<Balance>>(&mut input)?.0;
        Ok(Self { signer, signature, era, nonce, tip, call: input.to_vec() })
    }
}

/// Hash that identifies an encoded extrinsic.
#[must_use]
pub fn tx_hash(encoded: &[u8]) -> TxHash {
    TxHash(blake2_256(encoded))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{
        metadata::{IndexedName, PalletMetadata},
        signer::{Ed25519Signer, Signer, verify},
    };

    fn metadata() -> Metadata {
        Metadata::new(vec![PalletMetadata {
            name: "FileBank".to_owned(),
            index: 11,
            calls: vec![IndexedName::new("create_bucket", 7)],
            storage: vec![],
            events: vec![],
            errors: vec![],
        }])
    }

    #[test]
    fn immortal_era_is_single_zero_byte() {
        assert_eq!(Era::Immortal.encode(), vec![0]);
        assert_eq!(cess_types::decode::<Era>(&[0]).unwrap(), Era::Immortal);
    }

    #[test]
    fn mortal_era_known_encodings() {
        // period 64, phase 42 (current block 42)
        let era = Era::mortal(64, 42);
        assert_eq!(era, Era::Mortal { period: 64, phase: 42 });
        assert_eq!(era.encode(), vec![0xa5, 0x02]);
        assert_eq!(cess_types::decode::<Era>(&[0xa5, 0x02]).unwrap(), era);

        // period 32768, phase 20000 quantized by 8
        let era = Era::mortal(32768, 20000);
        assert_eq!(era, Era::Mortal { period: 32768, phase: 20000 });
        assert_eq!(era.encode(), vec![0x4e, 0x9c]);
    }

    #[test]
    fn mortal_period_is_rounded_and_clamped() {
        assert!(matches!(Era::mortal(50, 0), Era::Mortal { period: 64, .. }));
        assert!(matches!(Era::mortal(1, 0), Era::Mortal { period: 4, .. }));
        assert!(matches!(Era::mortal(1 << 20, 0), Era::Mortal { period: 65536, .. }));
    }

    #[test]
    fn era_birth() {
        let era = Era::mortal(64, 1000);
        assert_eq!(era.birth(1000), 1000);
        assert_eq!(era.birth(1010), 1000);
        assert_eq!(Era::Immortal.birth(1000), 0);
    }

    #[test]
    fn call_encoding_prefixes_indices() {
        let call = CallRequest::new("FileBank.create_bucket").arg(&[1u8; 32]).arg(&b"bucket".to_vec());
        let encoded = call.encode_call(&metadata()).unwrap();
        assert_eq!(&encoded[..2], &[11, 7]);
        assert_eq!(encoded.len(), 2 + 32 + 1 + 6);
        assert!(CallRequest::new("FileBank.missing").encode_call(&metadata()).is_err());
    }

    #[test]
    fn long_payload_is_hashed() {
        let call = vec![0u8; 300];
        let payload = SigningPayload {
            call: &call,
            era: Era::Immortal,
            nonce: 0,
            tip: 0,
            spec_version: 1,
            transaction_version: 1,
            genesis_hash: BlockHash([1; 32]),
            checkpoint: BlockHash([1; 32]),
        };
        assert_eq!(payload.to_signable().len(), 32);

        let short = SigningPayload { call: &call[..2], ..payload };
        // call ++ era ++ nonce ++ tip ++ spec ++ tx ++ genesis ++ checkpoint
        assert_eq!(short.to_signable().len(), 2 + 1 + 1 + 1 + 4 + 4 + 32 + 32);
    }

    #[test]
    fn signed_extrinsic_layout_and_decode() {
        let signer = Ed25519Signer::from_seed([5; 32]);
        let call = CallRequest::new("FileBank.create_bucket").arg(&7u32).encode_call(&metadata()).unwrap();
        let payload = SigningPayload {
            call: &call,
            era: Era::mortal(64, 100),
            nonce: 5,
            tip: 0,
            spec_version: 100,
            transaction_version: 1,
            genesis_hash: BlockHash([2; 32]),
            checkpoint: BlockHash([3; 32]),
        };
        let signature = signer.sign(&payload.to_signable()).unwrap();
        let xt = UncheckedExtrinsic {
            signer: signer.account_id(),
            signature,
            era: payload.era,
            nonce: 5,
            tip: 0,
            call: call.clone(),
        };
        let bytes = xt.encode();

        // compact(len) is two bytes here because the body exceeds 63 bytes
        let body = &bytes[2..];
        assert_eq!(body[0], 0x84);
        assert_eq!(body[1], 0x00);
        assert_eq!(&body[2..34], signer.account_id().as_bytes());
        assert_eq!(body[34], 0x00, "ed25519 signature tag");

        let decoded = UncheckedExtrinsic::decode(&bytes).unwrap();
        assert_eq!(decoded, xt);
        assert_eq!(decoded.nonce, 5);
        assert!(verify(&decoded.signer, &payload.to_signable(), &decoded.signature));

        assert_eq!(tx_hash(&bytes), tx_hash(&bytes));
        assert_ne!(tx_hash(&bytes), tx_hash(&bytes[1..]));
    }

    #[test]
    fn decode_rejects_bad_length_and_unsigned() {
        let mut bytes = Compact(3u32).encode();
        bytes.extend([0x04, 0x00, 0x00]);
        assert!(UncheckedExtrinsic::decode(&bytes).is_err());

        let mut short = Compact(10u32).encode();
        short.extend([0x84, 0x00]);
        assert!(UncheckedExtrinsic::decode(&short).is_err());
    }
}
