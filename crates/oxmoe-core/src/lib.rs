//! # Oxmoe Core
//!
//! Compute engine for mixture-of-experts transformers with MXFP4 expert
//! weights.
//!
//! This crate provides:
//! - **MXFP4 / BF16 codec** for the checkpoint's on-disk formats
//! - **Checkpoint loader** with memory-mapped, bounds-checked tensor views
//! - **Kernel library**: RMSNorm, projections, RoPE with NTK scaling,
//!   attention with sinks and sliding windows, top-k gating, SwiGLU
//! - **Model composition**: attention and MoE sublayers, decoder layers and
//!   the full forward pass
//!
//! Enable the `parallel` feature to spread kernels over a rayon thread pool.
//! Results stay bit-identical to the serial build.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod checkpoint;
pub mod error;
pub mod kernels;
pub mod model;
pub mod quantization;

pub use error::{OxmoeError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::checkpoint::{Bf16View, Checkpoint, CheckpointBuilder, Mxfp4Weight};
    pub use crate::error::{OxmoeError, Result};
    pub use crate::model::{ModelConfig, TokenCodec, Tokenizer, Transformer};
}
