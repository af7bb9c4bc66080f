//! Causal scaled dot-product attention with per-head sink logits.
//!
//! Each query head `h` reads kv head `h / (num_q_heads / num_kv_heads)`
//! (grouped-query attention). For query position `t` the visible keys are
//! [`key_range`]`(t, window)`.
//!
//! The sink is a learned logit per query head that joins the softmax as a
//! key with no value. It takes probability mass away from the real keys and
//! contributes nothing to the output, so the real-key weights of a row sum to
//! strictly less than one.

use super::{for_each_row, softmax_in_place};
use crate::checkpoint::Bf16View;
use crate::error::{ensure_len, OxmoeError, Result};
use std::ops::Range;

/// Head layout shared by Q, K, V and the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttentionShape {
    /// Sequence length.
    pub seq_len: usize,
    /// Query heads.
    pub num_q_heads: usize,
    /// Key/value heads.
    pub num_kv_heads: usize,
    /// Per-head dimension.
    pub head_dim: usize,
}

impl AttentionShape {
    fn validate(&self) -> Result<()> {
        if self.num_q_heads == 0 || self.num_kv_heads == 0 || self.head_dim == 0 {
            return Err(OxmoeError::InvalidConfig(format!(
                "attention needs non-zero heads and head_dim, got {self:?}"
            )));
        }
        if self.num_q_heads % self.num_kv_heads != 0 {
            return Err(OxmoeError::InvalidConfig(format!(
                "{} query heads do not divide into {} kv heads",
                self.num_q_heads, self.num_kv_heads
            )));
        }
        Ok(())
    }

    /// Query heads per kv head.
    pub fn group_size(&self) -> usize {
        self.num_q_heads / self.num_kv_heads
    }
}

/// Keys visible to query position `t`.
///
/// `window` of `None` (or `Some(0)`) is full causal attention. With
/// `Some(w)` the range is the last `min(t + 1, w)` positions ending at `t`.
pub fn key_range(t: usize, window: Option<usize>) -> Range<usize> {
    let start = match window {
        Some(w) if w > 0 => (t + 1).saturating_sub(w),
        _ => 0,
    };
    start..t + 1
}

/// Attention over `q` (`[seq, q_heads, hd]`), `k`/`v` (`[seq, kv_heads, hd]`)
/// into `out` (`[seq, q_heads, hd]`).
///
/// Logits are `(q . k) * sm_scale`; the head's sink logit is appended before
/// the softmax and its weight is dropped afterwards.
#[allow(clippy::too_many_arguments)]
pub fn sdpa_with_sinks(
    q: &[f32],
    k: &[f32],
    v: &[f32],
    sinks: Bf16View<'_>,
    shape: AttentionShape,
    sm_scale: f32,
    window: Option<usize>,
    out: &mut [f32],
) -> Result<()> {
    shape.validate()?;
    let AttentionShape {
        seq_len,
        num_q_heads,
        num_kv_heads,
        head_dim,
    } = shape;
    ensure_len("attention q", seq_len * num_q_heads * head_dim, q.len())?;
    ensure_len("attention k", seq_len * num_kv_heads * head_dim, k.len())?;
    ensure_len("attention v", seq_len * num_kv_heads * head_dim, v.len())?;
    ensure_len("attention sinks", num_q_heads, sinks.len())?;
    ensure_len("attention output", seq_len * num_q_heads * head_dim, out.len())?;
    if seq_len == 0 {
        return Ok(());
    }

    let group = shape.group_size();
    let kv_row = |pos: usize, kv_head: usize| (pos * num_kv_heads + kv_head) * head_dim;

    for_each_row(out, num_q_heads * head_dim, |t, out_t| {
        let keys = key_range(t, window);
        let mut weights = Vec::with_capacity(keys.len() + 1);

        for (h, out_row) in out_t.chunks_exact_mut(head_dim).enumerate() {
            let kv_head = h / group;
            let q_row = &q[(t * num_q_heads + h) * head_dim..][..head_dim];

            weights.clear();
            for pos in keys.clone() {
                let k_row = &k[kv_row(pos, kv_head)..][..head_dim];
                let mut acc = 0.0f32;
                for (a, b) in q_row.iter().zip(k_row) {
                    acc += a * b;
                }
                weights.push(acc * sm_scale);
            }
            weights.push(sinks.get(h));
            softmax_in_place(&mut weights);

            out_row.fill(0.0);
            for (pos, &w) in keys.clone().zip(weights.iter()) {
                let v_row = &v[kv_row(pos, kv_head)..][..head_dim];
                for (o, x) in out_row.iter_mut().zip(v_row) {
                    *o += w * x;
                }
            }
        }
    });
    Ok(())
}
