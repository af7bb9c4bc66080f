//! Hand-checkable checkpoints for block and model tests.

use super::ModelConfig;
use crate::checkpoint::{Checkpoint, CheckpointBuilder};
use crate::quantization::{groups_per_row, MXFP4_BYTES_PER_GROUP};

/// Every projection zero, every norm scale one, every expert bias
/// `expert_bias`.
///
/// Attention reduces to the identity and each MoE sublayer adds
/// `expert_bias` to every lane. Embedding row `v` is one-hot at `v % hidden`
/// and the unembedding is the transpose, so logits read back the normalized
/// residual stream.
pub(crate) fn zero_layer(config: &ModelConfig, expert_bias: f32) -> Checkpoint {
    let h = config.hidden_size;
    let i = config.intermediate_size;
    let e = config.num_experts;
    let qkv = config.qkv_dim();
    let q = config.q_dim();
    let heads = config.num_attention_heads;

    let mut one_hot = vec![0.0; config.vocab_size * h];
    for v in 0..config.vocab_size {
        one_hot[v * h + v % h] = 1.0;
    }

    let mut b = CheckpointBuilder::new();
    b.add_bf16("embedding.weight", &[config.vocab_size, h], &one_hot);
    b.add_bf16("unembedding.weight", &[config.vocab_size, h], &one_hot);
    b.add_bf16("norm.scale", &[h], &vec![1.0; h]);

    for layer in 0..config.num_hidden_layers {
        let attn = format!("block.{layer}.attn");
        b.add_bf16(&format!("{attn}.norm.scale"), &[h], &vec![1.0; h]);
        b.add_bf16(&format!("{attn}.qkv.weight"), &[qkv, h], &vec![0.0; qkv * h]);
        b.add_bf16(&format!("{attn}.qkv.bias"), &[qkv], &vec![0.0; qkv]);
        b.add_bf16(&format!("{attn}.out.weight"), &[h, q], &vec![0.0; h * q]);
        b.add_bf16(&format!("{attn}.out.bias"), &[h], &vec![0.0; h]);
        b.add_bf16(&format!("{attn}.sinks"), &[heads], &vec![0.0; heads]);

        let mlp = format!("block.{layer}.mlp");
        b.add_bf16(&format!("{mlp}.norm.scale"), &[h], &vec![1.0; h]);
        b.add_bf16(&format!("{mlp}.gate.weight"), &[e, h], &vec![0.0; e * h]);
        b.add_bf16(&format!("{mlp}.gate.bias"), &[e], &vec![0.0; e]);

        let g1 = groups_per_row(h);
        b.add_u8(
            &format!("{mlp}.mlp1_weight.blocks"),
            &[e, 2 * i, g1, MXFP4_BYTES_PER_GROUP],
            &vec![0; e * 2 * i * g1 * MXFP4_BYTES_PER_GROUP],
        );
        b.add_u8(
            &format!("{mlp}.mlp1_weight.scales"),
            &[e, 2 * i, g1],
            &vec![127; e * 2 * i * g1],
        );
        b.add_bf16(&format!("{mlp}.mlp1_bias"), &[e, 2 * i], &vec![0.0; e * 2 * i]);

        let g2 = groups_per_row(i);
        b.add_u8(
            &format!("{mlp}.mlp2_weight.blocks"),
            &[e, h, g2, MXFP4_BYTES_PER_GROUP],
            &vec![0; e * h * g2 * MXFP4_BYTES_PER_GROUP],
        );
        b.add_u8(
            &format!("{mlp}.mlp2_weight.scales"),
            &[e, h, g2],
            &vec![127; e * h * g2],
        );
        b.add_bf16(
            &format!("{mlp}.mlp2_bias"),
            &[e, h],
            &vec![expert_bias; e * h],
        );
    }

    Checkpoint::from_bytes(b.to_bytes().unwrap()).unwrap()
}
