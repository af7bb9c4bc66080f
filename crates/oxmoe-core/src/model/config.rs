//! Model configuration.

use crate::error::{OxmoeError, Result};
use crate::kernels::RopeScaling;
use serde::{Deserialize, Serialize};

/// Which layers use sliding-window attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowLayers {
    /// Layers 0, 2, 4, ... are windowed.
    #[default]
    Even,
    /// Layers 1, 3, 5, ... are windowed.
    Odd,
}

/// Configuration for a mixture-of-experts transformer.
///
/// Field names follow the checkpoint's `config.json`. Any field missing from
/// the JSON takes its [`Default`] value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Number of layers.
    pub num_hidden_layers: usize,
    /// Experts per MoE layer.
    pub num_experts: usize,
    /// Experts routed per token.
    pub experts_per_token: usize,
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Hidden dimension.
    pub hidden_size: usize,
    /// Expert intermediate dimension (SwiGLU output width).
    pub intermediate_size: usize,
    /// Clamp applied to both SwiGLU lanes.
    pub swiglu_limit: f32,
    /// Per-head dimension.
    pub head_dim: usize,
    /// Number of query heads.
    pub num_attention_heads: usize,
    /// Number of KV heads (for GQA).
    pub num_key_value_heads: usize,
    /// Sliding window size for windowed layers. Zero disables windowing.
    pub sliding_window: usize,
    /// Context length the model was trained at.
    pub initial_context_length: usize,
    /// RoPE base.
    pub rope_theta: f32,
    /// RoPE context extension factor.
    pub rope_scaling_factor: f32,
    /// NTK alpha corner.
    pub rope_ntk_alpha: f32,
    /// NTK beta corner.
    pub rope_ntk_beta: f32,
    /// RMS norm epsilon.
    pub rms_norm_eps: f32,
    /// SwiGLU sigmoid slope.
    pub swiglu_alpha: f32,
    /// Parity of windowed layers.
    pub window_layers: WindowLayers,
}

impl ModelConfig {
    /// Load from JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// A toy shape small enough to write out by hand.
    ///
    /// One layer, hidden 4, two experts routed top-1, one head of size 4,
    /// vocabulary of 5. Layer 0 is windowed with `sliding_window = 2`.
    pub fn tiny() -> Self {
        Self {
            num_hidden_layers: 1,
            num_experts: 2,
            experts_per_token: 1,
            vocab_size: 5,
            hidden_size: 4,
            intermediate_size: 4,
            head_dim: 4,
            num_attention_heads: 1,
            num_key_value_heads: 1,
            sliding_window: 2,
            ..Self::default()
        }
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("num_hidden_layers", self.num_hidden_layers),
            ("num_experts", self.num_experts),
            ("experts_per_token", self.experts_per_token),
            ("vocab_size", self.vocab_size),
            ("hidden_size", self.hidden_size),
            ("intermediate_size", self.intermediate_size),
            ("head_dim", self.head_dim),
            ("num_attention_heads", self.num_attention_heads),
            ("num_key_value_heads", self.num_key_value_heads),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(OxmoeError::InvalidConfig(format!("{name} must be non-zero")));
            }
        }
        if self.head_dim % 2 != 0 {
            return Err(OxmoeError::InvalidConfig(format!(
                "head_dim must be even for rotary embedding, got {}",
                self.head_dim
            )));
        }
        if self.num_attention_heads % self.num_key_value_heads != 0 {
            return Err(OxmoeError::InvalidConfig(format!(
                "num_attention_heads ({}) must be a multiple of num_key_value_heads ({})",
                self.num_attention_heads, self.num_key_value_heads
            )));
        }
        if self.experts_per_token > self.num_experts {
            return Err(OxmoeError::InvalidConfig(format!(
                "experts_per_token ({}) exceeds num_experts ({})",
                self.experts_per_token, self.num_experts
            )));
        }
        self.validate_tensor_sizes()?;
        self.validate_floats()
    }

    /// Every weight's element count must fit in `usize`.
    fn validate_tensor_sizes(&self) -> Result<()> {
        let kv_lanes = checked_product("qkv heads", &[2, self.num_key_value_heads])?;
        let qkv_heads = self
            .num_attention_heads
            .checked_add(kv_lanes)
            .ok_or_else(|| OxmoeError::InvalidConfig("qkv heads overflow usize".into()))?;
        let tensors: [(&str, &[usize]); 5] = [
            ("embedding.weight", &[self.vocab_size, self.hidden_size]),
            ("attn.qkv.weight", &[qkv_heads, self.head_dim, self.hidden_size]),
            (
                "mlp.mlp1_weight",
                &[self.num_experts, 2, self.intermediate_size, self.hidden_size],
            ),
            ("mlp.mlp1_bias", &[self.num_experts, 2, self.intermediate_size]),
            (
                "mlp.mlp2_weight",
                &[self.num_experts, self.hidden_size, self.intermediate_size],
            ),
        ];
        for (name, dims) in tensors {
            checked_product(name, dims)?;
        }
        Ok(())
    }

    fn validate_floats(&self) -> Result<()> {
        let invalid = |msg: String| Err(OxmoeError::InvalidConfig(msg));
        if !self.swiglu_limit.is_finite() || self.swiglu_limit < 0.0 {
            return invalid(format!(
                "swiglu_limit must be finite and non-negative, got {}",
                self.swiglu_limit
            ));
        }
        if !self.swiglu_alpha.is_finite() {
            return invalid(format!("swiglu_alpha must be finite, got {}", self.swiglu_alpha));
        }
        if !self.rms_norm_eps.is_finite() || self.rms_norm_eps <= 0.0 {
            return invalid(format!(
                "rms_norm_eps must be finite and positive, got {}",
                self.rms_norm_eps
            ));
        }
        if !self.rope_theta.is_finite() || self.rope_theta <= 0.0 || self.rope_theta == 1.0 {
            return invalid(format!(
                "rope_theta must be a positive finite value other than 1, got {}",
                self.rope_theta
            ));
        }
        if !self.rope_scaling_factor.is_finite() {
            return invalid(format!(
                "rope_scaling_factor must be finite, got {}",
                self.rope_scaling_factor
            ));
        }
        if self.rope_scaling_factor > 1.0 {
            for (name, value) in [
                ("rope_ntk_alpha", self.rope_ntk_alpha),
                ("rope_ntk_beta", self.rope_ntk_beta),
            ] {
                if !value.is_finite() || value <= 0.0 {
                    return invalid(format!("{name} must be finite and positive, got {value}"));
                }
            }
            if self.rope_ntk_alpha == self.rope_ntk_beta {
                return invalid(format!(
                    "rope_ntk_alpha and rope_ntk_beta must differ, both are {}",
                    self.rope_ntk_alpha
                ));
            }
            if self.initial_context_length == 0 {
                return invalid("initial_context_length must be non-zero when scaling".into());
            }
        }
        Ok(())
    }

    /// Query projection width.
    pub fn q_dim(&self) -> usize {
        self.num_attention_heads * self.head_dim
    }

    /// Key (or value) projection width.
    pub fn kv_dim(&self) -> usize {
        self.num_key_value_heads * self.head_dim
    }

    /// Fused QKV projection width.
    pub fn qkv_dim(&self) -> usize {
        self.q_dim() + 2 * self.kv_dim()
    }

    /// Get GQA ratio.
    pub fn gqa_ratio(&self) -> usize {
        self.num_attention_heads / self.num_key_value_heads
    }

    /// Attention logit scale, `1 / sqrt(head_dim)`.
    pub fn sm_scale(&self) -> f32 {
        1.0 / (self.head_dim as f32).sqrt()
    }

    /// Rotary parameters.
    pub fn rope_scaling(&self) -> RopeScaling {
        RopeScaling {
            theta: self.rope_theta,
            scaling_factor: self.rope_scaling_factor,
            ntk_alpha: self.rope_ntk_alpha,
            ntk_beta: self.rope_ntk_beta,
            initial_context_length: self.initial_context_length,
        }
    }

    /// Sliding window for `layer`, or `None` for full causal attention.
    pub fn layer_window(&self, layer: usize) -> Option<usize> {
        if self.sliding_window == 0 {
            return None;
        }
        let windowed = match self.window_layers {
            WindowLayers::Even => layer % 2 == 0,
            WindowLayers::Odd => layer % 2 == 1,
        };
        windowed.then_some(self.sliding_window)
    }
}

fn checked_product(name: &str, dims: &[usize]) -> Result<usize> {
    dims.iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| OxmoeError::InvalidConfig(format!("{name} size overflows usize: {dims:?}")))
}

impl Default for ModelConfig {
    fn default() -> Self {
        // gpt-oss-20b
        Self {
            num_hidden_layers: 24,
            num_experts: 32,
            experts_per_token: 4,
            vocab_size: 201_088,
            hidden_size: 2880,
            intermediate_size: 2880,
            swiglu_limit: 7.0,
            head_dim: 64,
            num_attention_heads: 64,
            num_key_value_heads: 8,
            sliding_window: 128,
            initial_context_length: 4096,
            rope_theta: 150_000.0,
            rope_scaling_factor: 32.0,
            rope_ntk_alpha: 1.0,
            rope_ntk_beta: 32.0,
            rms_norm_eps: 1e-5,
            swiglu_alpha: 1.702,
            window_layers: WindowLayers::Even,
        }
    }
}
