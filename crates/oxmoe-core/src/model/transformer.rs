//! Full forward pass.

use super::{ModelConfig, TransformerBlock};
use crate::checkpoint::{Bf16View, Checkpoint};
use crate::error::{ensure_len, Result};
use crate::kernels::{embedding_lookup, rmsnorm, unembedding_logits};
use std::time::Instant;
use tracing::{debug, info};

/// A mixture-of-experts transformer bound to a checkpoint.
///
/// Holds only borrowed weight views; every forward call allocates its own
/// activations, so a `Transformer` can be shared across threads.
#[derive(Debug)]
pub struct Transformer<'a> {
    /// Model configuration.
    config: ModelConfig,
    /// Token embedding table: [vocab, hidden]
    embedding: Bf16View<'a>,
    /// Decoder layers.
    blocks: Vec<TransformerBlock<'a>>,
    /// Final RMSNorm scale: [hidden]
    norm_scale: Bf16View<'a>,
    /// Output projection: [vocab, hidden]
    unembedding: Bf16View<'a>,
}

impl<'a> Transformer<'a> {
    /// Bind every weight the model needs and check its size against `config`.
    ///
    /// Binds the embedding, then each layer in order, then the final norm and
    /// the unembedding. The first missing or mis-sized tensor aborts loading.
    pub fn load(checkpoint: &'a Checkpoint, config: ModelConfig) -> Result<Self> {
        config.validate()?;
        let start = Instant::now();
        let hidden = config.hidden_size;
        let vocab = config.vocab_size;

        let embedding = checkpoint.bf16("embedding.weight")?;
        ensure_len("embedding.weight", vocab * hidden, embedding.len())?;

        let blocks = (0..config.num_hidden_layers)
            .map(|layer| {
                let window = config.layer_window(layer);
                debug!(layer, ?window, "binding layer");
                TransformerBlock::load(checkpoint, &config, layer, window)
            })
            .collect::<Result<Vec<_>>>()?;

        let norm_scale = checkpoint.bf16("norm.scale")?;
        ensure_len("norm.scale", hidden, norm_scale.len())?;
        let unembedding = checkpoint.bf16("unembedding.weight")?;
        ensure_len("unembedding.weight", vocab * hidden, unembedding.len())?;

        info!(
            layers = blocks.len(),
            hidden,
            vocab,
            experts = config.num_experts,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "model loaded"
        );

        Ok(Self {
            config,
            embedding,
            blocks,
            norm_scale,
            unembedding,
        })
    }

    /// Get model configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Get the decoder layers.
    pub fn blocks(&self) -> &[TransformerBlock<'a>] {
        &self.blocks
    }

    /// Logits for every position: `[tokens.len(), vocab]`, row-major.
    ///
    /// Ids outside the vocabulary embed as zero rows. An empty sequence yields
    /// empty logits.
    pub fn forward(&self, tokens: &[i32]) -> Result<Vec<f32>> {
        let hidden = self.config.hidden_size;
        let vocab = self.config.vocab_size;
        let seq_len = tokens.len();

        let mut x = vec![0.0f32; seq_len * hidden];
        embedding_lookup(self.embedding, vocab, hidden, tokens, &mut x)?;

        let mut next = vec![0.0f32; seq_len * hidden];
        for block in &self.blocks {
            block.forward(&x, &mut next)?;
            std::mem::swap(&mut x, &mut next);
        }

        rmsnorm(&x, self.norm_scale, self.config.rms_norm_eps, hidden, &mut next)?;
        let mut logits = vec![0.0f32; seq_len * vocab];
        unembedding_logits(self.unembedding, vocab, hidden, &next, &mut logits)?;
        debug!(seq_len, "forward");
        Ok(logits)
    }

    /// Logits of the last position only.
    pub fn forward_last(&self, tokens: &[i32]) -> Result<Vec<f32>> {
        let vocab = self.config.vocab_size;
        let mut logits = self.forward(tokens)?;
        let start = logits.len().saturating_sub(vocab);
        Ok(logits.split_off(start))
    }
}
