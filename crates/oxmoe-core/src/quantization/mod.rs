//! Weight formats stored in the checkpoint.
//!
//! The engine reads two encodings straight out of file-backed memory and
//! never materializes a dense copy of the weights:
//!
//! - **BF16**: the upper half of an IEEE-754 `f32`. Decoding is a 16-bit left
//!   shift followed by a bit reinterpretation, so it is exact.
//! - **MXFP4**: 4-bit E2M1 values packed two per byte, 32 values per group,
//!   with one power-of-two exponent byte (bias 127) shared by the group.
//!
//! Both decoders are pure and allocation free. The MXFP4 decoder is fused into
//! [`crate::kernels::mxfp4_matmul`]; the helpers here exist so the arithmetic
//! can be tested apart from the multiply-accumulate loop.

mod mxfp4;

pub use mxfp4::{
    decode_group, decode_nibble, groups_per_row, ldexp, FP4_VALUES, MXFP4_BYTES_PER_GROUP,
    MXFP4_SCALE_BIAS, MXFP4_VALUES_PER_GROUP,
};

/// Decode one BF16 bit pattern to `f32`.
///
/// Every bit pattern, NaN payloads included, maps to the `f32` whose upper
/// 16 bits are `bits` and whose lower 16 bits are zero.
#[inline(always)]
pub fn bf16_to_f32(bits: u16) -> f32 {
    f32::from_bits(u32::from(bits) << 16)
}

/// Decode a little-endian BF16 lane from a two-byte slice.
#[inline(always)]
pub(crate) fn bf16_from_le(lane: [u8; 2]) -> f32 {
    bf16_to_f32(u16::from_le_bytes(lane))
}

/// Element formats a tensor view can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// Truncated 16-bit float.
    BF16,
    /// Unsigned byte (MXFP4 blocks and scales).
    U8,
}

impl DType {
    /// Bytes per stored element.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            Self::BF16 => 2,
            Self::U8 => 1,
        }
    }

    /// Name as written in a safetensors header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BF16 => "BF16",
            Self::U8 => "U8",
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
