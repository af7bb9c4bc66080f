//! # Oxmoe
//!
//! Greedy text generation for mixture-of-experts transformers.
//!
//! Oxmoe re-exports the compute engine from `oxmoe-core` and adds the
//! generation loop on top:
//! - **Engine**: full-sequence greedy decoding with streamed output
//! - **Tokenizer**: HuggingFace `tokenizer.json` support
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use oxmoe::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let checkpoint = Checkpoint::open("model.safetensors")?;
//!     let tokenizer = Tokenizer::from_file("tokenizer.json")?;
//!     let model = Transformer::load(&checkpoint, ModelConfig::default())?;
//!
//!     let engine = Engine::new(&model, &tokenizer);
//!     let result = engine.generate(&GenerateRequest::new("Hello"), |s| print!("{s}"))?;
//!     println!("\n{} tokens", result.tokens.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Re-export core crate
pub use oxmoe_core::*;

mod engine;

pub use engine::{argmax, Engine, GenerateRequest, GenerateResult};

/// Commonly used types.
pub mod prelude {
    pub use crate::engine::{Engine, GenerateRequest, GenerateResult};
    pub use oxmoe_core::prelude::*;

    // Re-export useful external types
    pub use anyhow;
    pub use tracing;
}
