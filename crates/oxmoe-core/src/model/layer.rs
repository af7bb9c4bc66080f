//! Transformer decoder layer.
//!
//! A single layer combining:
//! - Pre-attention RMSNorm + attention with sinks, residual add
//! - Pre-MLP RMSNorm + mixture-of-experts MLP, residual add

use super::{AttentionBlock, MlpBlock, ModelConfig};
use crate::checkpoint::Checkpoint;
use crate::error::{ensure_len, Result};

/// A single transformer decoder layer.
#[derive(Debug, Clone)]
pub struct TransformerBlock<'a> {
    /// Attention sublayer.
    attn: AttentionBlock<'a>,
    /// MoE sublayer.
    mlp: MlpBlock<'a>,
    /// Layer index (for debugging).
    layer_idx: usize,
}

impl<'a> TransformerBlock<'a> {
    /// Create a layer from already-bound sublayers.
    pub fn new(attn: AttentionBlock<'a>, mlp: MlpBlock<'a>, layer_idx: usize) -> Self {
        Self {
            attn,
            mlp,
            layer_idx,
        }
    }

    /// Bind both sublayers of `layer_idx` from the checkpoint.
    pub fn load(
        checkpoint: &'a Checkpoint,
        config: &ModelConfig,
        layer_idx: usize,
        window: Option<usize>,
    ) -> Result<Self> {
        let attn = AttentionBlock::new(checkpoint, config, layer_idx, window)?;
        let mlp = MlpBlock::new(checkpoint, config, layer_idx)?;
        Ok(Self::new(attn, mlp, layer_idx))
    }

    /// `out = mlp(attn(x))`, each sublayer with its own residual.
    pub fn forward(&self, x: &[f32], out: &mut [f32]) -> Result<()> {
        ensure_len("layer output", x.len(), out.len())?;
        let mut after_attn = vec![0.0f32; x.len()];
        self.attn.forward(x, &mut after_attn)?;
        self.mlp.forward(&after_attn, out)
    }

    /// Get the layer index.
    pub fn layer_idx(&self) -> usize {
        self.layer_idx
    }

    /// Get the attention sublayer.
    pub fn attention(&self) -> &AttentionBlock<'a> {
        &self.attn
    }

    /// Get the MLP sublayer.
    pub fn mlp(&self) -> &MlpBlock<'a> {
        &self.mlp
    }
}
