//! Fragment placement and transfer.
//!
//! [`FileDistributor`] turns a file into a [`FileManifest`]: it segments the
//! data, codes each segment into fragments, assigns fragments to peers
//! round-robin and writes them through a [`FragmentTransport`] with bounded
//! concurrency. [`FileDistributor::retrieve`] reverses the process, tolerating
//! up to `parity_shards` unreachable or corrupted fragments per segment.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use cess_types::{Hash256, blake2_256};
use futures::{StreamExt, TryStreamExt, stream};
use snafu::ensure;

use super::{
    erasure::{ErasureCoder, ReedSolomonCoder},
    merkle::{Blake2MerkleBuilder, MerkleBuilder},
    segment::Segmenter,
};
use crate::{
    config::RetryPolicy,
    error::{ErasureSnafu, InvalidArgumentSnafu, Result},
    retry::with_retry,
};

/// Concurrent fragment transfers per file.
pub const DEFAULT_TRANSFER_CONCURRENCY: usize = 8;

/// Moves fragment bytes to and from storage peers.
#[async_trait]
pub trait FragmentTransport: Send + Sync + fmt::Debug {
    /// Stores `data` on `peer` under `hash`.
    async fn write_fragment(&self, peer: &str, hash: &Hash256, data: &[u8]) -> Result<()>;

    /// Fetches the fragment stored on `peer` under `hash`.
    async fn read_fragment(&self, peer: &str, hash: &Hash256) -> Result<Vec<u8>>;
}

/// Where one fragment was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentPlacement {
    /// Position within its segment.
    pub index: usize,
    /// BLAKE2b-256 of the fragment bytes.
    pub hash: Hash256,
    /// Peer holding the fragment.
    pub peer: String,
}

/// One segment's hash and fragment placements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentManifest {
    /// BLAKE2b-256 of the padded segment.
    pub hash: Hash256,
    /// Fragments in coding order.
    pub fragments: Vec<FragmentPlacement>,
}

/// Everything needed to locate and verify a distributed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileManifest {
    /// Merkle root over the segment hashes.
    pub root: Hash256,
    /// Original file length in bytes.
    pub size: u64,
    /// Padded segment length in bytes.
    pub segment_size: usize,
    /// Segments in file order.
    pub segments: Vec<SegmentManifest>,
}

impl FileManifest {
    /// Segment hashes in file order.
    #[must_use]
    pub fn segment_hashes(&self) -> Vec<Hash256> {
        self.segments.iter().map(|s| s.hash).collect()
    }

    /// Total fragments across all segments.
    #[must_use]
    pub fn fragment_count(&self) -> usize {
        self.segments.iter().map(|s| s.fragments.len()).sum()
    }
}

/// Segments, codes and places files across storage peers.
#[derive(Debug, Clone)]
pub struct FileDistributor {
    transport: Arc<dyn FragmentTransport>,
    segmenter: Segmenter,
    coder: Arc<dyn ErasureCoder>,
    merkle: Arc<dyn MerkleBuilder>,
    retry_policy: RetryPolicy,
    concurrency: usize,
}

impl FileDistributor {
    /// Distributor with network defaults: 32 MiB segments, 4 data and 8
    /// parity fragments, BLAKE2b merkle roots.
    #[must_use]
    pub fn new(transport: Arc<dyn FragmentTransport>) -> Self {
        Self {
            transport,
            segmenter: Segmenter::default(),
            coder: Arc::new(ReedSolomonCoder::default()),
            merkle: Arc::new(Blake2MerkleBuilder),
            retry_policy: RetryPolicy::default(),
            concurrency: DEFAULT_TRANSFER_CONCURRENCY,
        }
    }

    /// Sets the segmenter.
    #[must_use]
    pub fn with_segmenter(mut self, segmenter: Segmenter) -> Self {
        self.segmenter = segmenter;
        self
    }

    /// Sets the erasure coder.
    #[must_use]
    pub fn with_coder(mut self, coder: Arc<dyn ErasureCoder>) -> Self {
        self.coder = coder;
        self
    }

    /// Sets the merkle builder.
    #[must_use]
    pub fn with_merkle(mut self, merkle: Arc<dyn MerkleBuilder>) -> Self {
        self.merkle = merkle;
        self
    }

    /// Sets the per-fragment retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets how many fragment transfers run at once. Clamped to at least one.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Plans placement for `data` without transferring anything.
    ///
    /// Returns the manifest alongside the fragment bytes in placement order.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::InvalidArgument`](crate::SdkError::InvalidArgument)
    /// for empty data or an empty peer list, and
    /// [`SdkError::Erasure`](crate::SdkError::Erasure) if coding fails.
    pub fn plan(&self, data: &[u8], peers: &[String]) -> Result<(FileManifest, Vec<Vec<u8>>)> {
        ensure!(!peers.is_empty(), InvalidArgumentSnafu { message: "no storage peers given" });

        let segments = self.segmenter.split(data)?;
        let mut manifests = Vec::with_capacity(segments.len());
        let mut payloads = Vec::with_capacity(segments.len() * self.coder.total_shards());
        let mut slot = 0usize;

        for segment in &segments {
            let fragments = self.coder.encode(&segment.data)?;
            let mut placements = Vec::with_capacity(fragments.len());
            for (index, fragment) in fragments.into_iter().enumerate() {
                placements.push(FragmentPlacement {
                    index,
                    hash: blake2_256(&fragment),
                    peer: peers[slot % peers.len()].clone(),
                });
                payloads.push(fragment);
                slot += 1;
            }
            manifests.push(SegmentManifest { hash: segment.hash, fragments: placements });
        }

        let hashes: Vec<Hash256> = segments.iter().map(|s| s.hash).collect();
        let root = self
            .merkle
            .root(&hashes)
            .ok_or_else(|| ErasureSnafu { message: "file produced no segments" }.build())?;

        let manifest = FileManifest {
            root,
            size: data.len() as u64,
            segment_size: self.segmenter.segment_size(),
            segments: manifests,
        };
        Ok((manifest, payloads))
    }

    /// Writes every fragment of `data` to `peers` and returns the manifest.
    ///
    /// Each fragment write is retried under the configured policy. The first
    /// fragment that still fails aborts the distribution.
    ///
    /// # Errors
    ///
    /// See [`plan`](Self::plan); transfer failures surface as
    /// [`SdkError::Fragment`](crate::SdkError::Fragment) or
    /// [`SdkError::RetryExhausted`](crate::SdkError::RetryExhausted).
    pub async fn distribute(&self, data: &[u8], peers: &[String]) -> Result<FileManifest> {
        let (manifest, payloads) = self.plan(data, peers)?;
        let placements = manifest.segments.iter().flat_map(|s| s.fragments.iter());

        stream::iter(placements.zip(payloads))
            .map(|(placement, payload)| async move {
                with_retry(&self.retry_policy, || {
                    self.transport.write_fragment(&placement.peer, &placement.hash, &payload)
                })
                .await
            })
            .buffer_unordered(self.concurrency)
            .try_collect::<Vec<()>>()
            .await?;

        tracing::info!(
            root = %cess_types::to_hex(&manifest.root),
            size = manifest.size,
            segments = manifest.segments.len(),
            fragments = manifest.fragment_count(),
            peers = peers.len(),
            "file distributed"
        );
        Ok(manifest)
    }

    /// Reassembles the file described by `manifest`.
    ///
    /// Fragments that cannot be read or whose hash does not match are treated
    /// as lost.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Erasure`](crate::SdkError::Erasure) if a segment has
    /// too few intact fragments or reconstructs to the wrong hash.
    pub async fn retrieve(&self, manifest: &FileManifest) -> Result<Vec<u8>> {
        let mut file = Vec::with_capacity(manifest.segments.len() * manifest.segment_size);

        for (position, segment) in manifest.segments.iter().enumerate() {
            let mut fragments: Vec<Option<Vec<u8>>> =
                stream::iter(segment.fragments.iter())
                    .map(|placement| self.fetch(placement))
                    .buffered(self.concurrency)
                    .collect()
                    .await;
            fragments.resize(self.coder.total_shards(), None);

            let data = self.coder.reconstruct(fragments, manifest.segment_size)?;
            ensure!(
                blake2_256(&data) == segment.hash,
                ErasureSnafu { message: format!("segment {position} failed hash verification") }
            );
            file.extend_from_slice(&data);
        }

        let size = usize::try_from(manifest.size)
            .map_err(|_| InvalidArgumentSnafu { message: "file too large for this platform" }.build())?;
        ensure!(
            file.len() >= size,
            ErasureSnafu { message: "manifest size exceeds reconstructed data" }
        );
        file.truncate(size);
        Ok(file)
    }

    async fn fetch(&self, placement: &FragmentPlacement) -> Option<Vec<u8>> {
        let read = with_retry(&self.retry_policy, || {
            self.transport.read_fragment(&placement.peer, &placement.hash)
        })
        .await;
        match read {
            Ok(bytes) if blake2_256(&bytes) == placement.hash => Some(bytes),
            Ok(_) => {
                tracing::warn!(peer = %placement.peer, index = placement.index, "fragment hash mismatch");
                None
            },
            Err(err) => {
                tracing::warn!(peer = %placement.peer, index = placement.index, error = %err, "fragment unavailable");
                None
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{SdkError, mock::MemoryTransport};

    fn peers(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("/ip4/10.0.0.{i}/tcp/4001")).collect()
    }

    fn distributor(transport: &Arc<MemoryTransport>) -> FileDistributor {
        FileDistributor::new(Arc::clone(transport) as Arc<dyn FragmentTransport>)
            .with_segmenter(Segmenter::new(64).unwrap())
            .with_retry_policy(
                RetryPolicy::builder()
                    .with_max_attempts(2)
                    .with_initial_backoff(Duration::from_millis(1))
                    .build(),
            )
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn placement_is_round_robin_across_segments() {
        let transport = MemoryTransport::new();
        let (manifest, payloads) = distributor(&transport).plan(&sample(100), &peers(5)).unwrap();

        assert_eq!(manifest.segments.len(), 2);
        assert_eq!(manifest.fragment_count(), 24);
        assert_eq!(payloads.len(), 24);
        let order: Vec<&str> =
            manifest.segments.iter().flat_map(|s| s.fragments.iter()).map(|f| f.peer.as_str()).collect();
        for (slot, peer) in order.iter().enumerate() {
            assert_eq!(*peer, peers(5)[slot % 5]);
        }
        assert_eq!(manifest.root, Blake2MerkleBuilder.root(&manifest.segment_hashes()).unwrap());
    }

    #[test]
    fn empty_inputs_are_rejected() {
        let transport = MemoryTransport::new();
        let distributor = distributor(&transport);
        assert!(matches!(distributor.plan(b"data", &[]), Err(SdkError::InvalidArgument { .. })));
        assert!(matches!(distributor.plan(&[], &peers(1)), Err(SdkError::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn distribute_then_retrieve_with_lost_peers() {
        let transport = MemoryTransport::new();
        let distributor = distributor(&transport);
        let data = sample(150);

        let manifest = distributor.distribute(&data, &peers(12)).await.unwrap();
        assert_eq!(transport.fragment_count(), 36);

        // With 12 peers each segment spreads one fragment per peer, so losing
        // eight peers still leaves four fragments of every segment.
        for peer in &peers(12)[..8] {
            transport.set_peer_down(peer, true);
        }
        assert_eq!(distributor.retrieve(&manifest).await.unwrap(), data);
    }

    #[tokio::test]
    async fn transient_write_failures_are_retried() {
        let transport = MemoryTransport::new();
        let distributor = distributor(&transport);
        transport.fail_next_writes(&peers(1)[0], 1);

        distributor.distribute(&sample(64), &peers(1)).await.unwrap();
        assert_eq!(transport.fragment_count(), 12);
    }

    #[tokio::test]
    async fn unreachable_peer_aborts_distribution() {
        let transport = MemoryTransport::new();
        let distributor = distributor(&transport);
        transport.set_peer_down(&peers(3)[1], true);

        let err = distributor.distribute(&sample(10), &peers(3)).await.unwrap_err();
        assert!(matches!(err, SdkError::RetryExhausted { attempts: 2, .. }), "got {err}");
    }

    #[tokio::test]
    async fn corrupted_fragments_count_as_lost() {
        let transport = MemoryTransport::new();
        let distributor = distributor(&transport);
        let data = sample(40);
        let manifest = distributor.distribute(&data, &peers(12)).await.unwrap();

        for placement in &manifest.segments[0].fragments[..9] {
            transport.corrupt(&placement.peer, &placement.hash);
        }
        let err = distributor.retrieve(&manifest).await.unwrap_err();
        assert!(matches!(err, SdkError::Erasure { .. }), "got {err}");
    }
}
