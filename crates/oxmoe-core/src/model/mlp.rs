//! Mixture-of-experts feed-forward sublayer.
//!
//! For each token: gate the normalized hidden state, route it to the top-k
//! experts, run each expert's `mlp2(swiglu(mlp1(x)))` on MXFP4 weights and
//! combine the results by routing weight.
//!
//! # Formula
//!
//! `MoE(x) = x + sum_k w_k * (W2_k @ SwiGLU(W1_k @ norm(x) + b1_k) + b2_k)`
//!
//! # Reference
//!
//! [GLU Variants Improve Transformer](https://arxiv.org/abs/2002.05202)

use super::ModelConfig;
use crate::checkpoint::{Bf16View, Checkpoint, Mxfp4Weight};
use crate::error::{ensure_len, Result};
use crate::kernels::{linear_bf16, moe_combine, mxfp4_matmul, rmsnorm, swiglu, topk_gating};
use crate::quantization::groups_per_row;
use tracing::trace;

/// One layer's MoE weights bound to the checkpoint.
#[derive(Debug, Clone)]
pub struct MlpBlock<'a> {
    /// Pre-MLP RMSNorm scale: [hidden]
    norm_scale: Bf16View<'a>,
    /// Router: [num_experts, hidden]
    gate_weight: Bf16View<'a>,
    /// [num_experts]
    gate_bias: Bf16View<'a>,
    /// Stacked up projections: [num_experts * 2 * intermediate] rows of `hidden`.
    mlp1_weight: Mxfp4Weight<'a>,
    /// [num_experts, 2 * intermediate]
    mlp1_bias: Bf16View<'a>,
    /// Stacked down projections: [num_experts * hidden] rows of `intermediate`.
    mlp2_weight: Mxfp4Weight<'a>,
    /// [num_experts, hidden]
    mlp2_bias: Bf16View<'a>,
    hidden: usize,
    intermediate: usize,
    num_experts: usize,
    experts_per_token: usize,
    eps: f32,
    swiglu_alpha: f32,
    swiglu_limit: f32,
    layer_idx: usize,
}

impl<'a> MlpBlock<'a> {
    /// Bind `block.{layer_idx}.mlp.*` and check every size against `config`.
    pub fn new(checkpoint: &'a Checkpoint, config: &ModelConfig, layer_idx: usize) -> Result<Self> {
        config.validate()?;
        let prefix = format!("block.{layer_idx}.mlp");
        let hidden = config.hidden_size;
        let intermediate = config.intermediate_size;
        let experts = config.num_experts;

        let bind = |suffix: &str, expected: usize| -> Result<Bf16View<'a>> {
            let name = format!("{prefix}.{suffix}");
            let view = checkpoint.bf16(&name)?;
            ensure_len(&name, expected, view.len())?;
            Ok(view)
        };
        let bind_mxfp4 = |suffix: &str, rows: usize, in_features: usize| -> Result<Mxfp4Weight<'a>> {
            let name = format!("{prefix}.{suffix}");
            let weight = checkpoint.mxfp4(&name, &[experts, rows])?;
            ensure_len(
                &format!("{name}.blocks groups"),
                groups_per_row(in_features),
                weight.groups(),
            )?;
            Ok(weight)
        };

        Ok(Self {
            norm_scale: bind("norm.scale", hidden)?,
            gate_weight: bind("gate.weight", experts * hidden)?,
            gate_bias: bind("gate.bias", experts)?,
            mlp1_weight: bind_mxfp4("mlp1_weight", 2 * intermediate, hidden)?,
            mlp1_bias: bind("mlp1_bias", experts * 2 * intermediate)?,
            mlp2_weight: bind_mxfp4("mlp2_weight", hidden, intermediate)?,
            mlp2_bias: bind("mlp2_bias", experts * hidden)?,
            hidden,
            intermediate,
            num_experts: experts,
            experts_per_token: config.experts_per_token,
            eps: config.rms_norm_eps,
            swiglu_alpha: config.swiglu_alpha,
            swiglu_limit: config.swiglu_limit,
            layer_idx,
        })
    }

    /// `out = x + moe(norm(x))` over `[seq, hidden]`.
    pub fn forward(&self, x: &[f32], out: &mut [f32]) -> Result<()> {
        let hidden = self.hidden;
        let seq_len = x.len() / hidden;
        ensure_len("mlp input", seq_len * hidden, x.len())?;
        ensure_len("mlp output", x.len(), out.len())?;

        let mut normed = vec![0.0f32; x.len()];
        rmsnorm(x, self.norm_scale, self.eps, hidden, &mut normed)?;

        let up = 2 * self.intermediate;
        let mut gate_logits = vec![0.0f32; self.num_experts];
        let mut h1 = vec![0.0f32; up];
        let mut act = vec![0.0f32; self.intermediate];
        let mut expert_out = vec![0.0f32; self.experts_per_token * hidden];
        let mut weights = Vec::with_capacity(self.experts_per_token);

        for (t, ((x_row, normed_row), out_row)) in x
            .chunks_exact(hidden)
            .zip(normed.chunks_exact(hidden))
            .zip(out.chunks_exact_mut(hidden))
            .enumerate()
        {
            linear_bf16(
                normed_row,
                self.gate_weight,
                Some(self.gate_bias),
                hidden,
                self.num_experts,
                &mut gate_logits,
            )?;
            let choices = topk_gating(&gate_logits, self.experts_per_token)?;

            weights.clear();
            for (choice, dst) in choices.iter().zip(expert_out.chunks_exact_mut(hidden)) {
                let e = choice.expert;
                mxfp4_matmul(
                    normed_row,
                    self.mlp1_weight.slice_rows(e * up, up),
                    Some(self.mlp1_bias.slice(e * up, up)),
                    &mut h1,
                )?;
                swiglu(&h1, self.swiglu_alpha, self.swiglu_limit, &mut act)?;
                mxfp4_matmul(
                    &act,
                    self.mlp2_weight.slice_rows(e * hidden, hidden),
                    Some(self.mlp2_bias.slice(e * hidden, hidden)),
                    dst,
                )?;
                weights.push(choice.weight);
            }
            trace!(layer = self.layer_idx, token = t, ?choices, "routed");

            moe_combine(&expert_out, &weights, hidden, out_row)?;
            for (o, &r) in out_row.iter_mut().zip(x_row) {
                *o += r;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointBuilder;

    /// Tiny MoE where expert `e` has zero weights and bias `mlp2_bias[e] = e + 1`,
    /// so the routed expert can be read straight off the output.
    fn bias_only_moe(gate_bias: [f32; 2]) -> (ModelConfig, Checkpoint) {
        moe_with_mlp1_groups(gate_bias, 1)
    }

    fn moe_with_mlp1_groups(gate_bias: [f32; 2], groups: usize) -> (ModelConfig, Checkpoint) {
        let config = ModelConfig::tiny();
        let (h, i, e) = (4, 4, 2);
        let mut b = CheckpointBuilder::new();
        b.add_bf16("block.0.mlp.norm.scale", &[h], &[1.0; 4]);
        b.add_bf16("block.0.mlp.gate.weight", &[e, h], &[0.0; 8]);
        b.add_bf16("block.0.mlp.gate.bias", &[e], &gate_bias);
        b.add_u8(
            "block.0.mlp.mlp1_weight.blocks",
            &[e, 2 * i, groups, 16],
            &vec![0; e * 2 * i * groups * 16],
        );
        b.add_u8(
            "block.0.mlp.mlp1_weight.scales",
            &[e, 2 * i, groups],
            &vec![127; e * 2 * i * groups],
        );
        b.add_bf16("block.0.mlp.mlp1_bias", &[e, 2 * i], &[0.0; 16]);
        b.add_u8("block.0.mlp.mlp2_weight.blocks", &[e, h, 1, 16], &[0; 2 * 4 * 16]);
        b.add_u8("block.0.mlp.mlp2_weight.scales", &[e, h, 1], &[127; 8]);
        b.add_bf16(
            "block.0.mlp.mlp2_bias",
            &[e, h],
            &[1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0],
        );
        let ckpt = Checkpoint::from_bytes(b.to_bytes().unwrap()).unwrap();
        (config, ckpt)
    }

    #[test]
    fn routes_to_higher_gate_logit() {
        let (config, ckpt) = bias_only_moe([0.0, 1.0]);
        let block = MlpBlock::new(&ckpt, &config, 0).unwrap();
        let x = vec![0.5, -0.5, 1.0, 0.0];
        let mut out = vec![0.0; 4];
        block.forward(&x, &mut out).unwrap();
        // Expert 1 (bias 2) with weight 1.0, plus the residual.
        assert_eq!(out, vec![2.5, 1.5, 3.0, 2.0]);
    }

    #[test]
    fn gate_tie_routes_to_lower_expert() {
        let (config, ckpt) = bias_only_moe([0.0, 0.0]);
        let block = MlpBlock::new(&ckpt, &config, 0).unwrap();
        let x = vec![0.0; 8];
        let mut out = vec![0.0; 8];
        block.forward(&x, &mut out).unwrap();
        assert_eq!(out, vec![1.0; 8]);
    }

    #[test]
    fn top2_combines_both_experts() {
        let (mut config, ckpt) = bias_only_moe([0.0, 0.0]);
        config.experts_per_token = 2;
        let block = MlpBlock::new(&ckpt, &config, 0).unwrap();
        let x = vec![0.0; 4];
        let mut out = vec![0.0; 4];
        block.forward(&x, &mut out).unwrap();
        // 0.5 * 1 + 0.5 * 2
        assert_eq!(out, vec![1.5; 4]);
    }

    #[test]
    fn expert_weights_flow_through_swiglu() {
        // Expert 0 only. mlp1 maps x[0] into the gate lane of unit 0 and
        // leaves the linear lane at zero; mlp2 copies unit 0 into output 0.
        let mut config = ModelConfig::tiny();
        config.num_experts = 1;
        let mut mlp1 = vec![0u8; 8 * 16];
        mlp1[0] = 0x02; // row 0 (gate lane of unit 0): weight 1.0 on x[0]
        let mut mlp2 = vec![0u8; 4 * 16];
        mlp2[0] = 0x02; // row 0: weight 1.0 on act[0]

        let mut b = CheckpointBuilder::new();
        b.add_bf16("block.0.mlp.norm.scale", &[4], &[1.0; 4]);
        b.add_bf16("block.0.mlp.gate.weight", &[1, 4], &[0.0; 4]);
        b.add_bf16("block.0.mlp.gate.bias", &[1], &[0.0]);
        b.add_u8("block.0.mlp.mlp1_weight.blocks", &[1, 8, 1, 16], &mlp1);
        b.add_u8("block.0.mlp.mlp1_weight.scales", &[1, 8, 1], &[127; 8]);
        b.add_bf16("block.0.mlp.mlp1_bias", &[1, 8], &[0.0; 8]);
        b.add_u8("block.0.mlp.mlp2_weight.blocks", &[1, 4, 1, 16], &mlp2);
        b.add_u8("block.0.mlp.mlp2_weight.scales", &[1, 4, 1], &[127; 4]);
        b.add_bf16("block.0.mlp.mlp2_bias", &[1, 4], &[0.0; 4]);
        let ckpt = Checkpoint::from_bytes(b.to_bytes().unwrap()).unwrap();
        let block = MlpBlock::new(&ckpt, &config, 0).unwrap();

        // rms of [2, 0, 0, 0] is 1, so normed[0] = 2 (eps aside).
        let x = vec![2.0, 0.0, 0.0, 0.0];
        let mut out = vec![0.0; 4];
        block.forward(&x, &mut out).unwrap();

        let g = out[0] - 2.0;
        let expected = 2.0 / (1.0 + (-1.702f32 * 2.0).exp());
        assert!((g - expected).abs() < 1e-4, "{g} vs {expected}");
        assert_eq!(&out[1..], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn rejects_wrong_expert_count() {
        let (mut config, ckpt) = bias_only_moe([0.0, 0.0]);
        config.num_experts = 3;
        assert!(MlpBlock::new(&ckpt, &config, 0).is_err());
    }

    #[test]
    fn rejects_wrong_group_count() {
        // 4-wide rows fit in one group; the checkpoint stores 2.
        let (config, ckpt) = moe_with_mlp1_groups([0.0, 0.0], 2);
        let err = MlpBlock::new(&ckpt, &config, 0).unwrap_err();
        assert!(err.to_string().contains("mlp1_weight"));
    }
}
