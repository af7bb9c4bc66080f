//! Error types for oxmoe core.

use thiserror::Error;

/// Result type alias for oxmoe operations.
pub type Result<T> = std::result::Result<T, OxmoeError>;

/// Errors that can occur while loading or running the model.
///
/// Every variant is fatal to the call that produced it. There is no partial
/// result or retry path inside the engine.
#[derive(Error, Debug)]
pub enum OxmoeError {
    /// A weight view or activation buffer disagrees with the size derived
    /// from the model configuration.
    #[error("shape mismatch for {name}: expected {expected} elements, got {actual}")]
    ShapeMismatch {
        /// Logical tensor or buffer name.
        name: String,
        /// Element count derived from the configuration.
        expected: usize,
        /// Element count actually present.
        actual: usize,
    },

    /// A tensor is stored in a format the engine cannot decode.
    #[error("unsupported dtype {dtype} for tensor {name}")]
    UnsupportedDtype {
        /// Tensor name.
        name: String,
        /// Dtype as written in the checkpoint header.
        dtype: String,
    },

    /// The model configuration is internally inconsistent.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A named tensor is missing from the checkpoint.
    #[error("tensor not found: {0}")]
    TensorNotFound(String),

    /// The checkpoint file is malformed.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Tokenizer loading or encoding failed.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// I/O error.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// SafeTensors header error.
    #[error("safetensors error: {0}")]
    SafeTensorsError(#[from] safetensors::SafeTensorError),
}

impl OxmoeError {
    /// Build a [`OxmoeError::ShapeMismatch`] for a named tensor or buffer.
    pub fn shape(name: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch {
            name: name.into(),
            expected,
            actual,
        }
    }
}

/// Fail with [`OxmoeError::ShapeMismatch`] unless `actual == expected`.
pub(crate) fn ensure_len(name: &str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(OxmoeError::shape(name, expected, actual))
    }
}
