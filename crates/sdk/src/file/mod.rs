//! File distribution helpers.
//!
//! ```text
//! file ──► Segmenter ──► segments ──► ErasureCoder ──► fragments
//!                           │                              │
//!                           ▼                              ▼
//!                    MerkleBuilder                FragmentTransport
//!                           │                              │
//!                           └────────► FileManifest ◄──────┘
//! ```

mod erasure;
mod merkle;
mod segment;
mod transfer;

pub use erasure::{DEFAULT_DATA_SHARDS, DEFAULT_PARITY_SHARDS, ErasureCoder, ReedSolomonCoder};
pub use merkle::{Blake2Hasher, Blake2MerkleBuilder, MerkleBuilder};
pub use segment::{DEFAULT_SEGMENT_SIZE, Segment, Segmenter};
pub use transfer::{
    DEFAULT_TRANSFER_CONCURRENCY, FileDistributor, FileManifest, FragmentPlacement, FragmentTransport,
    SegmentManifest,
};
