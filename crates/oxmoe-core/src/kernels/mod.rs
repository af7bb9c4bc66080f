//! CPU compute kernels.
//!
//! Every kernel is a pure function over caller-owned `f32` buffers and
//! borrowed weight views. Buffer lengths are checked at entry and reported
//! as [`crate::error::OxmoeError::ShapeMismatch`]; nothing is resized or
//! truncated.
//!
//! Activations are row-major `[seq_len, features]`. Per-head tensors are
//! `[seq_len, heads, head_dim]`.
//!
//! # Summation order
//!
//! Every dot product accumulates left to right in `f32`, one multiply and
//! one add per element. With the `parallel` feature, work is split across
//! independent output elements only, so each element is still reduced in
//! the same order and results are bit-identical to the serial build.

mod attention;
mod embedding;
mod linear;
mod moe;
mod rmsnorm;
mod rope;

pub use attention::{key_range, sdpa_with_sinks, AttentionShape};
pub use embedding::{embedding_lookup, unembedding_logits};
pub use linear::{linear_bf16, mxfp4_matmul};
pub use moe::{moe_combine, swiglu, topk_gating, ExpertChoice};
pub use rmsnorm::rmsnorm;
pub use rope::{apply_rope, inv_freq, RopeScaling};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Numerically stable softmax, in place.
///
/// Subtracts the maximum, exponentiates, and divides by the sequential sum.
/// If the sum underflows to zero the exponentials are left unnormalized.
pub fn softmax_in_place(values: &mut [f32]) {
    let mut max = f32::NEG_INFINITY;
    for &v in values.iter() {
        if v > max {
            max = v;
        }
    }
    let mut sum = 0.0f32;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum == 0.0 {
        return;
    }
    for v in values.iter_mut() {
        *v /= sum;
    }
}

/// Set `out[i] = f(i)` for every element.
#[inline]
pub(crate) fn fill_each<F>(out: &mut [f32], f: F)
where
    F: Fn(usize) -> f32 + Sync + Send,
{
    #[cfg(feature = "parallel")]
    out.par_iter_mut().enumerate().for_each(|(i, dst)| *dst = f(i));
    #[cfg(not(feature = "parallel"))]
    out.iter_mut().enumerate().for_each(|(i, dst)| *dst = f(i));
}

/// Run `f(row_index, row)` over `chunk`-sized rows of `out`.
#[inline]
pub(crate) fn for_each_row<F>(out: &mut [f32], chunk: usize, f: F)
where
    F: Fn(usize, &mut [f32]) + Sync + Send,
{
    #[cfg(feature = "parallel")]
    out.par_chunks_mut(chunk)
        .enumerate()
        .for_each(|(r, row)| f(r, row));
    #[cfg(not(feature = "parallel"))]
    out.chunks_mut(chunk)
        .enumerate()
        .for_each(|(r, row)| f(r, row));
}
