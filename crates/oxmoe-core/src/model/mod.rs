//! Model composition and inference.
//!
//! Binds checkpoint weights to the kernels:
//! - Model configuration
//! - Attention and mixture-of-experts sublayers
//! - Decoder layers and the full forward pass
//! - Tokenizer and golden validation

mod attention;
mod config;
pub mod golden;
mod layer;
mod mlp;
#[cfg(test)]
mod testing;
mod tokenizer;
mod transformer;

pub use attention::AttentionBlock;
pub use config::{ModelConfig, WindowLayers};
pub use golden::{
    synthetic_checkpoint, GoldenCase, GoldenLogits, GoldenReport, GoldenResult, GoldenSummary,
    GoldenTestHarness, SYNTHETIC_PROMPT,
};
pub use layer::TransformerBlock;
pub use mlp::MlpBlock;
pub use tokenizer::{TokenCodec, Tokenizer};
pub use transformer::Transformer;
