//! Typed, bounds-checked views into checkpoint memory.
//!
//! Views never own data. Their lifetime is tied to the [`super::Checkpoint`]
//! (or test buffer) they borrow from, so a view can never outlive the
//! mapping it points into.

use crate::error::{OxmoeError, Result};
use crate::quantization::{bf16_from_le, groups_per_row, MXFP4_BYTES_PER_GROUP};

/// Read-only view of little-endian BF16 elements.
#[derive(Debug, Clone, Copy)]
pub struct Bf16View<'a> {
    bytes: &'a [u8],
}

impl<'a> Bf16View<'a> {
    /// Wrap a byte range holding BF16 lanes.
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() % 2 != 0 {
            return Err(OxmoeError::Checkpoint(format!(
                "BF16 view over odd byte length {}",
                bytes.len()
            )));
        }
        Ok(Self { bytes })
    }

    /// An empty view.
    pub fn empty() -> Self {
        Self { bytes: &[] }
    }

    /// Number of BF16 elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len() / 2
    }

    /// Whether the view has no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode element `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.len()`, like slice indexing.
    #[inline(always)]
    pub fn get(&self, i: usize) -> f32 {
        bf16_from_le([self.bytes[2 * i], self.bytes[2 * i + 1]])
    }

    /// Sub-view of `len` elements starting at `start`.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the view.
    #[inline]
    pub fn slice(&self, start: usize, len: usize) -> Bf16View<'a> {
        Bf16View {
            bytes: &self.bytes[2 * start..2 * (start + len)],
        }
    }

    /// Decoded elements in order.
    pub fn iter(&self) -> impl Iterator<Item = f32> + 'a {
        self.bytes
            .chunks_exact(2)
            .map(|lane| bf16_from_le([lane[0], lane[1]]))
    }

    /// Decode the whole view into an owned buffer.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.iter().collect()
    }

    /// Raw bytes backing the view.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

/// An MXFP4 matrix: `rows` rows of `groups` packed 32-value groups.
///
/// `blocks` holds `rows * groups * 16` bytes and `scales` holds
/// `rows * groups` exponent bytes. Row `r`'s scales apply only to row `r`'s
/// blocks.
#[derive(Debug, Clone, Copy)]
pub struct Mxfp4Weight<'a> {
    blocks: &'a [u8],
    scales: &'a [u8],
    rows: usize,
    groups: usize,
}

impl<'a> Mxfp4Weight<'a> {
    /// Pair co-indexed `blocks` and `scales`, checking both byte counts.
    pub fn new(blocks: &'a [u8], scales: &'a [u8], rows: usize, groups: usize) -> Result<Self> {
        if blocks.len() != rows * groups * MXFP4_BYTES_PER_GROUP {
            return Err(OxmoeError::shape(
                "mxfp4 blocks",
                rows * groups * MXFP4_BYTES_PER_GROUP,
                blocks.len(),
            ));
        }
        if scales.len() != rows * groups {
            return Err(OxmoeError::shape("mxfp4 scales", rows * groups, scales.len()));
        }
        Ok(Self {
            blocks,
            scales,
            rows,
            groups,
        })
    }

    /// Number of rows (output features, across all experts for a stacked tensor).
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Groups per row.
    #[inline]
    pub fn groups(&self) -> usize {
        self.groups
    }

    /// Packed payload.
    #[inline]
    pub fn blocks(&self) -> &'a [u8] {
        self.blocks
    }

    /// Per-group exponent bytes.
    #[inline]
    pub fn scales(&self) -> &'a [u8] {
        self.scales
    }

    /// Whether a row of this matrix can hold `in_features` values.
    pub fn fits(&self, in_features: usize) -> bool {
        self.groups == groups_per_row(in_features)
    }

    /// Rows `[start, start + count)` as their own matrix.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds [`Self::rows`].
    pub fn slice_rows(&self, start: usize, count: usize) -> Mxfp4Weight<'a> {
        assert!(start + count <= self.rows, "row range out of bounds");
        let row_bytes = self.groups * MXFP4_BYTES_PER_GROUP;
        Mxfp4Weight {
            blocks: &self.blocks[start * row_bytes..(start + count) * row_bytes],
            scales: &self.scales[start * self.groups..(start + count) * self.groups],
            rows: count,
            groups: self.groups,
        }
    }

    /// Packed blocks and scales for row `r`.
    #[inline(always)]
    pub fn row(&self, r: usize) -> (&'a [u8], &'a [u8]) {
        let row_bytes = self.groups * MXFP4_BYTES_PER_GROUP;
        (
            &self.blocks[r * row_bytes..(r + 1) * row_bytes],
            &self.scales[r * self.groups..(r + 1) * self.groups],
        )
    }
}
