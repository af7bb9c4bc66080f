//! Rotary Position Embeddings (RoPE) with NTK-aware scaling.
//!
//! RoPE encodes position by rotating dimension `i` of each head together with
//! dimension `i + head_dim/2`, by an angle proportional to the position and
//! to a per-pair inverse frequency.
//!
//! With a scaling factor above one, frequencies are blended between the
//! original ("extrapolated") value and the value divided by the factor
//! ("interpolated") along a linear ramp between two frequency-index cutoffs,
//! and every rotation is multiplied by a concentration of
//! `0.1 * ln(factor) + 1`.
//!
//! # Reference
//!
//! [RoFormer: Enhanced Transformer with Rotary Position Embedding](https://arxiv.org/abs/2104.09864)
//!
//! [YaRN: Efficient Context Window Extension of Large Language Models](https://arxiv.org/abs/2309.00071)

use crate::error::{ensure_len, OxmoeError, Result};
use std::f32::consts::PI;

/// Rotary frequency parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RopeScaling {
    /// Base of the geometric frequency progression.
    pub theta: f32,
    /// Context extension factor. Values `<= 1` disable NTK blending.
    pub scaling_factor: f32,
    /// Sets the high pair-index cutoff; pairs above it are fully interpolated.
    pub ntk_alpha: f32,
    /// Sets the low pair-index cutoff; pairs below it are fully extrapolated.
    pub ntk_beta: f32,
    /// Context length the model was trained at.
    pub initial_context_length: usize,
}

impl RopeScaling {
    /// Plain RoPE with no context extension.
    pub fn unscaled(theta: f32) -> Self {
        Self {
            theta,
            scaling_factor: 1.0,
            ntk_alpha: 1.0,
            ntk_beta: 32.0,
            initial_context_length: 4096,
        }
    }

    /// Rotation magnitude multiplier.
    pub fn concentration(&self) -> f32 {
        if self.scaling_factor > 1.0 {
            0.1 * self.scaling_factor.ln() + 1.0
        } else {
            1.0
        }
    }
}

/// Per-pair inverse frequencies for `head_dim`, after NTK blending.
pub fn inv_freq(head_dim: usize, scaling: &RopeScaling) -> Vec<f32> {
    let half = head_dim / 2;
    let mut freqs: Vec<f32> = (0..half)
        .map(|i| {
            let exponent = (2 * i) as f32 / head_dim as f32;
            1.0 / scaling.theta.powf(exponent)
        })
        .collect();

    if scaling.scaling_factor > 1.0 {
        let d_half = head_dim as f32 * 0.5;
        let icl = scaling.initial_context_length as f32;
        let ln_theta = scaling.theta.ln();
        let low = d_half * (icl / (scaling.ntk_beta * 2.0 * PI)).ln() / ln_theta;
        let high = d_half * (icl / (scaling.ntk_alpha * 2.0 * PI)).ln() / ln_theta;

        for (i, f) in freqs.iter_mut().enumerate() {
            let ramp = (i as f32 - low) / (high - low);
            let mask = 1.0 - ramp.clamp(0.0, 1.0);
            let interpolation = *f / scaling.scaling_factor;
            let extrapolation = *f;
            *f = interpolation * (1.0 - mask) + extrapolation * mask;
        }
    }
    freqs
}

fn rotate(row: &mut [f32], cos: &[f32], sin: &[f32]) {
    let half = cos.len();
    let (x1, x2) = row.split_at_mut(half);
    for d in 0..half {
        let (a, b) = (x1[d], x2[d]);
        x1[d] = a * cos[d] - b * sin[d];
        x2[d] = b * cos[d] + a * sin[d];
    }
}

/// Rotate `q` (`[seq, q_heads, head_dim]`) and `k` (`[seq, kv_heads, head_dim]`)
/// in place. Token `t` is at position `t`.
pub fn apply_rope(
    q: &mut [f32],
    k: &mut [f32],
    seq_len: usize,
    num_q_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
    scaling: &RopeScaling,
) -> Result<()> {
    if head_dim == 0 || head_dim % 2 != 0 {
        return Err(OxmoeError::InvalidConfig(format!(
            "rope head_dim must be even and non-zero, got {head_dim}"
        )));
    }
    ensure_len("rope q", seq_len * num_q_heads * head_dim, q.len())?;
    ensure_len("rope k", seq_len * num_kv_heads * head_dim, k.len())?;

    let half = head_dim / 2;
    let freqs = inv_freq(head_dim, scaling);
    let concentration = scaling.concentration();
    let mut cos = vec![0.0f32; half];
    let mut sin = vec![0.0f32; half];

    for t in 0..seq_len {
        for d in 0..half {
            let angle = t as f32 * freqs[d];
            cos[d] = angle.cos() * concentration;
            sin[d] = angle.sin() * concentration;
        }
        let q_rows = &mut q[t * num_q_heads * head_dim..(t + 1) * num_q_heads * head_dim];
        for row in q_rows.chunks_exact_mut(head_dim) {
            rotate(row, &cos, &sin);
        }
        let k_rows = &mut k[t * num_kv_heads * head_dim..(t + 1) * num_kv_heads * head_dim];
        for row in k_rows.chunks_exact_mut(head_dim) {
            rotate(row, &cos, &sin);
        }
    }
    Ok(())
}
