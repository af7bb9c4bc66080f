//! MXFP4 (E2M1 with shared E8M0 scale) decoding.
//!
//! # Layout
//!
//! A quantized matrix `[rows, in_features]` is stored as two tensors:
//!
//! - `blocks`: `[rows, groups, 16]` bytes. Byte `i` of a group packs value
//!   `2i` in its low nibble and value `2i + 1` in its high nibble.
//! - `scales`: `[rows, groups]` bytes. Group exponent is `scale - 127`.
//!
//! A decoded value is `FP4_VALUES[nibble] * 2^(scale - 127)`.

/// Values per shared-scale group.
pub const MXFP4_VALUES_PER_GROUP: usize = 32;

/// Packed bytes per group (two nibbles per byte).
pub const MXFP4_BYTES_PER_GROUP: usize = 16;

/// Exponent bias of the scale byte.
pub const MXFP4_SCALE_BIAS: i32 = 127;

/// E2M1 lookup table indexed by nibble. Bit 3 is the sign.
pub const FP4_VALUES: [f32; 16] = [
    0.0, 0.5, 1.0, 1.5, 2.0, 3.0, 4.0, 6.0, -0.0, -0.5, -1.0, -1.5, -2.0, -3.0, -4.0, -6.0,
];

/// `2^e` for `e` in the normal exponent range.
#[inline(always)]
fn pow2(e: i32) -> f32 {
    debug_assert!((-126..=127).contains(&e));
    f32::from_bits(((e + 127) as u32) << 23)
}

/// `x * 2^exp` with a single rounding.
///
/// Only valid for `x` drawn from [`FP4_VALUES`] and `exp` in `[-127, 128]`,
/// which covers every scale byte. The exponent is applied in two halves so
/// both factors are normal floats; the first product is exact because table
/// values carry at most two significant bits.
#[inline(always)]
pub fn ldexp(x: f32, exp: i32) -> f32 {
    let half = exp / 2;
    x * pow2(half) * pow2(exp - half)
}

/// Decode a single nibble under a group scale byte.
#[inline(always)]
pub fn decode_nibble(nibble: u8, scale: u8) -> f32 {
    ldexp(
        FP4_VALUES[usize::from(nibble & 0x0F)],
        i32::from(scale) - MXFP4_SCALE_BIAS,
    )
}

/// Decode one packed group into 32 floats.
///
/// `block` must hold exactly [`MXFP4_BYTES_PER_GROUP`] bytes.
pub fn decode_group(block: &[u8], scale: u8, out: &mut [f32; MXFP4_VALUES_PER_GROUP]) {
    debug_assert_eq!(block.len(), MXFP4_BYTES_PER_GROUP);
    for (i, &byte) in block.iter().enumerate() {
        out[2 * i] = decode_nibble(byte & 0x0F, scale);
        out[2 * i + 1] = decode_nibble(byte >> 4, scale);
    }
}

/// Number of groups a row of `in_features` values occupies.
///
/// A trailing partial group is zero-padded in storage.
#[inline]
pub fn groups_per_row(in_features: usize) -> usize {
    in_features.div_ceil(MXFP4_VALUES_PER_GROUP)
}
