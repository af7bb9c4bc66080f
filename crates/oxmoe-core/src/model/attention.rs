//! Attention sublayer.
//!
//! `x + out_proj(sdpa_with_sinks(rope(split(qkv_proj(rmsnorm(x))))))`

use super::ModelConfig;
use crate::checkpoint::{Bf16View, Checkpoint};
use crate::error::{ensure_len, Result};
use crate::kernels::{
    apply_rope, linear_bf16, rmsnorm, sdpa_with_sinks, AttentionShape, RopeScaling,
};
use tracing::trace;

/// One layer's attention weights bound to the checkpoint.
#[derive(Debug, Clone)]
pub struct AttentionBlock<'a> {
    /// Pre-attention RMSNorm scale: [hidden]
    norm_scale: Bf16View<'a>,
    /// Fused projection: [q_dim + 2 * kv_dim, hidden], rows ordered Q, K, V.
    qkv_weight: Bf16View<'a>,
    /// [q_dim + 2 * kv_dim]
    qkv_bias: Bf16View<'a>,
    /// Output projection: [hidden, q_dim]
    out_weight: Bf16View<'a>,
    /// [hidden]
    out_bias: Bf16View<'a>,
    /// Per-head sink logits: [num_q_heads]
    sinks: Bf16View<'a>,
    hidden: usize,
    num_q_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
    eps: f32,
    sm_scale: f32,
    rope: RopeScaling,
    /// Sliding window, or `None` for full causal attention.
    window: Option<usize>,
    layer_idx: usize,
}

impl<'a> AttentionBlock<'a> {
    /// Bind `block.{layer_idx}.attn.*` and check every size against `config`.
    ///
    /// `window` is this layer's sliding window, normally
    /// [`ModelConfig::layer_window`].
    pub fn new(
        checkpoint: &'a Checkpoint,
        config: &ModelConfig,
        layer_idx: usize,
        window: Option<usize>,
    ) -> Result<Self> {
        config.validate()?;
        let prefix = format!("block.{layer_idx}.attn");
        let hidden = config.hidden_size;
        let qkv_dim = config.qkv_dim();

        let bind = |suffix: &str, expected: usize| -> Result<Bf16View<'a>> {
            let name = format!("{prefix}.{suffix}");
            let view = checkpoint.bf16(&name)?;
            ensure_len(&name, expected, view.len())?;
            Ok(view)
        };

        Ok(Self {
            norm_scale: bind("norm.scale", hidden)?,
            qkv_weight: bind("qkv.weight", qkv_dim * hidden)?,
            qkv_bias: bind("qkv.bias", qkv_dim)?,
            out_weight: bind("out.weight", hidden * config.q_dim())?,
            out_bias: bind("out.bias", hidden)?,
            sinks: bind("sinks", config.num_attention_heads)?,
            hidden,
            num_q_heads: config.num_attention_heads,
            num_kv_heads: config.num_key_value_heads,
            head_dim: config.head_dim,
            eps: config.rms_norm_eps,
            sm_scale: config.sm_scale(),
            rope: config.rope_scaling(),
            window,
            layer_idx,
        })
    }

    /// Sliding window of this layer.
    pub fn window(&self) -> Option<usize> {
        self.window
    }

    /// `out = x + attention(norm(x))` over `[seq, hidden]`.
    pub fn forward(&self, x: &[f32], out: &mut [f32]) -> Result<()> {
        let hidden = self.hidden;
        let seq_len = x.len() / hidden;
        ensure_len("attention input", seq_len * hidden, x.len())?;
        ensure_len("attention output", x.len(), out.len())?;

        let q_dim = self.num_q_heads * self.head_dim;
        let kv_dim = self.num_kv_heads * self.head_dim;
        let qkv_dim = q_dim + 2 * kv_dim;

        let mut normed = vec![0.0f32; x.len()];
        rmsnorm(x, self.norm_scale, self.eps, hidden, &mut normed)?;

        let mut qkv = vec![0.0f32; seq_len * qkv_dim];
        linear_bf16(
            &normed,
            self.qkv_weight,
            Some(self.qkv_bias),
            hidden,
            qkv_dim,
            &mut qkv,
        )?;

        let mut q = Vec::with_capacity(seq_len * q_dim);
        let mut k = Vec::with_capacity(seq_len * kv_dim);
        let mut v = Vec::with_capacity(seq_len * kv_dim);
        for row in qkv.chunks_exact(qkv_dim) {
            let (q_row, rest) = row.split_at(q_dim);
            let (k_row, v_row) = rest.split_at(kv_dim);
            q.extend_from_slice(q_row);
            k.extend_from_slice(k_row);
            v.extend_from_slice(v_row);
        }

        apply_rope(
            &mut q,
            &mut k,
            seq_len,
            self.num_q_heads,
            self.num_kv_heads,
            self.head_dim,
            &self.rope,
        )?;

        let shape = AttentionShape {
            seq_len,
            num_q_heads: self.num_q_heads,
            num_kv_heads: self.num_kv_heads,
            head_dim: self.head_dim,
        };
        let mut attn = vec![0.0f32; seq_len * q_dim];
        sdpa_with_sinks(
            &q,
            &k,
            &v,
            self.sinks,
            shape,
            self.sm_scale,
            self.window,
            &mut attn,
        )?;

        linear_bf16(
            &attn,
            self.out_weight,
            Some(self.out_bias),
            q_dim,
            hidden,
            out,
        )?;
        for (o, &r) in out.iter_mut().zip(x) {
            *o += r;
        }
        trace!(layer = self.layer_idx, seq_len, "attention sublayer");
        Ok(())
    }
}
