//! Redundancy coding of segments into fragments.

use std::fmt;

use reed_solomon_erasure::galois_8::ReedSolomon;
use snafu::ensure;

use crate::error::{ErasureSnafu, Result};

/// Data fragments per segment on the storage network.
pub const DEFAULT_DATA_SHARDS: usize = 4;

/// Parity fragments per segment on the storage network.
pub const DEFAULT_PARITY_SHARDS: usize = 8;

/// Turns a segment into fragments and back.
pub trait ErasureCoder: Send + Sync + fmt::Debug {
    /// Fragments needed to rebuild a segment.
    fn data_shards(&self) -> usize;

    /// Extra fragments that may be lost.
    fn parity_shards(&self) -> usize;

    /// Splits `segment` into `data_shards + parity_shards` equally sized fragments.
    fn encode(&self, segment: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Rebuilds a segment of `segment_len` bytes. Missing fragments are `None`.
    fn reconstruct(&self, fragments: Vec<Option<Vec<u8>>>, segment_len: usize) -> Result<Vec<u8>>;

    /// Total fragments per segment.
    fn total_shards(&self) -> usize {
        self.data_shards() + self.parity_shards()
    }
}

/// Systematic Reed-Solomon coding over GF(2^8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReedSolomonCoder {
    data_shards: usize,
    parity_shards: usize,
}

impl Default for ReedSolomonCoder {
    fn default() -> Self {
        Self { data_shards: DEFAULT_DATA_SHARDS, parity_shards: DEFAULT_PARITY_SHARDS }
    }
}

impl ReedSolomonCoder {
    /// Coder with the given shard counts.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Erasure`](crate::SdkError::Erasure) if the counts
    /// are rejected by the codec (zero, or more than 256 in total).
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        ReedSolomon::new(data_shards, parity_shards)
            .map_err(|e| ErasureSnafu { message: e.to_string() }.build())?;
        Ok(Self { data_shards, parity_shards })
    }

    fn codec(&self) -> Result<ReedSolomon> {
        ReedSolomon::new(self.data_shards, self.parity_shards)
            .map_err(|e| ErasureSnafu { message: e.to_string() }.build())
    }
}

impl ErasureCoder for ReedSolomonCoder {
    fn data_shards(&self) -> usize {
        self.data_shards
    }

    fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    fn encode(&self, segment: &[u8]) -> Result<Vec<Vec<u8>>> {
        ensure!(!segment.is_empty(), ErasureSnafu { message: "cannot encode an empty segment" });
        let shard_len = segment.len().div_ceil(self.data_shards);
        let mut shards = vec![vec![0u8; shard_len]; self.total_shards()];
        for (shard, chunk) in shards.iter_mut().zip(segment.chunks(shard_len)) {
            shard[..chunk.len()].copy_from_slice(chunk);
        }
        self.codec()?.encode(&mut shards).map_err(|e| ErasureSnafu { message: e.to_string() }.build())?;
        Ok(shards)
    }

    fn reconstruct(&self, mut fragments: Vec<Option<Vec<u8>>>, segment_len: usize) -> Result<Vec<u8>> {
        ensure!(
            fragments.len() == self.total_shards(),
            ErasureSnafu {
                message: format!("expected {} fragments, got {}", self.total_shards(), fragments.len())
            }
        );
        let present = fragments.iter().filter(|f| f.is_some()).count();
        ensure!(
            present >= self.data_shards,
            ErasureSnafu { message: format!("only {present} of {} required fragments", self.data_shards) }
        );

        self.codec()?
            .reconstruct_data(&mut fragments)
            .map_err(|e| ErasureSnafu { message: e.to_string() }.build())?;

        let mut segment = Vec::with_capacity(segment_len);
        for fragment in fragments.into_iter().take(self.data_shards).flatten() {
            segment.extend_from_slice(&fragment);
        }
        ensure!(
            segment.len() >= segment_len,
            ErasureSnafu { message: "reconstructed data shorter than the segment" }
        );
        segment.truncate(segment_len);
        Ok(segment)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn survives_losing_every_parity_worth_of_fragments() {
        let coder = ReedSolomonCoder::default();
        let segment: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let fragments = coder.encode(&segment).unwrap();
        assert_eq!(fragments.len(), 12);
        assert!(fragments.iter().all(|f| f.len() == 1024));

        let mut partial: Vec<Option<Vec<u8>>> = fragments.into_iter().map(Some).collect();
        for lost in [0, 2, 3, 5, 6, 7, 9, 11] {
            partial[lost] = None;
        }
        assert_eq!(coder.reconstruct(partial, segment.len()).unwrap(), segment);
    }

    #[test]
    fn too_few_fragments_fail() {
        let coder = ReedSolomonCoder::new(2, 1).unwrap();
        let fragments = coder.encode(b"abcdef").unwrap();
        let mut partial: Vec<Option<Vec<u8>>> = fragments.into_iter().map(Some).collect();
        partial[0] = None;
        partial[1] = None;
        assert!(matches!(coder.reconstruct(partial, 6), Err(crate::SdkError::Erasure { .. })));
        assert!(coder.reconstruct(vec![None], 6).is_err());
    }

    #[test]
    fn invalid_shard_counts_are_rejected() {
        assert!(ReedSolomonCoder::new(0, 2).is_err());
        assert!(ReedSolomonCoder::new(200, 100).is_err());
    }
}
