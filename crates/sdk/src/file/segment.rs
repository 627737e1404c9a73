//! Fixed-size file segmentation.

use cess_types::{Hash256, blake2_256};
use snafu::ensure;

use crate::error::{InvalidArgumentSnafu, Result};

/// Segment size used by the storage network (32 MiB).
pub const DEFAULT_SEGMENT_SIZE: usize = 32 * 1024 * 1024;

/// One padded segment of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Position within the file.
    pub index: usize,
    /// Segment bytes, zero-padded to the segment size.
    pub data: Vec<u8>,
    /// BLAKE2b-256 of `data`.
    pub hash: Hash256,
}

/// Splits files into equally sized segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segmenter {
    segment_size: usize,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self { segment_size: DEFAULT_SEGMENT_SIZE }
    }
}

impl Segmenter {
    /// Segmenter producing `segment_size`-byte segments.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::InvalidArgument`](crate::SdkError::InvalidArgument)
    /// if `segment_size` is zero.
    pub fn new(segment_size: usize) -> Result<Self> {
        ensure!(segment_size > 0, InvalidArgumentSnafu { message: "segment size must be positive" });
        Ok(Self { segment_size })
    }

    /// Bytes per segment.
    #[must_use]
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Number of segments a file of `len` bytes occupies.
    #[must_use]
    pub fn segment_count(&self, len: usize) -> usize {
        len.div_ceil(self.segment_size)
    }

    /// Splits `data` into segments, padding the last one with zeros.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::InvalidArgument`](crate::SdkError::InvalidArgument)
    /// for empty input.
    pub fn split(&self, data: &[u8]) -> Result<Vec<Segment>> {
        ensure!(!data.is_empty(), InvalidArgumentSnafu { message: "cannot segment an empty file" });
        Ok(data
            .chunks(self.segment_size)
            .enumerate()
            .map(|(index, chunk)| {
                let mut bytes = chunk.to_vec();
                bytes.resize(self.segment_size, 0);
                let hash = blake2_256(&bytes);
                Segment { index, data: bytes, hash }
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn pads_the_tail_segment() {
        let segmenter = Segmenter::new(8).unwrap();
        let segments = segmenter.split(b"0123456789").unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].data, b"01234567");
        assert_eq!(segments[1].data, b"89\0\0\0\0\0\0");
        assert_eq!(segments[1].index, 1);
        assert_eq!(segments[1].hash, blake2_256(b"89\0\0\0\0\0\0"));
        assert_eq!(segmenter.segment_count(10), 2);
        assert_eq!(segmenter.segment_count(16), 2);
    }

    #[test]
    fn rejects_empty_input_and_zero_size() {
        assert!(Segmenter::new(0).is_err());
        assert!(Segmenter::default().split(&[]).is_err());
        assert_eq!(Segmenter::default().segment_size(), DEFAULT_SEGMENT_SIZE);
    }
}
