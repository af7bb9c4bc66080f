//! Writing safetensors checkpoints.
//!
//! The engine never writes weights at runtime. The builder exists to
//! synthesize small checkpoints for tests, benches and demos.

use crate::error::{OxmoeError, Result};
use crate::quantization::DType;
use half::bf16;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::Path;

/// Encode `values` as little-endian BF16 bytes, rounding to nearest even.
pub fn encode_bf16(values: &[f32]) -> Vec<u8> {
    values
        .iter()
        .flat_map(|&v| bf16::from_f32(v).to_le_bytes())
        .collect()
}

struct PendingTensor {
    name: String,
    dtype: DType,
    shape: Vec<usize>,
    bytes: Vec<u8>,
}

/// Accumulates tensors and serializes them in insertion order.
#[derive(Default)]
pub struct CheckpointBuilder {
    tensors: Vec<PendingTensor>,
}

impl CheckpointBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a BF16 tensor from `f32` values.
    ///
    /// # Panics
    ///
    /// Panics if `values.len()` differs from the shape's element count.
    pub fn add_bf16(&mut self, name: &str, shape: &[usize], values: &[f32]) -> &mut Self {
        assert_eq!(
            shape.iter().product::<usize>(),
            values.len(),
            "shape {shape:?} does not match {} values for {name}",
            values.len()
        );
        self.push(name, DType::BF16, shape, encode_bf16(values))
    }

    /// Add a U8 tensor.
    ///
    /// # Panics
    ///
    /// Panics if `bytes.len()` differs from the shape's element count.
    pub fn add_u8(&mut self, name: &str, shape: &[usize], bytes: &[u8]) -> &mut Self {
        assert_eq!(
            shape.iter().product::<usize>(),
            bytes.len(),
            "shape {shape:?} does not match {} bytes for {name}",
            bytes.len()
        );
        self.push(name, DType::U8, shape, bytes.to_vec())
    }

    fn push(&mut self, name: &str, dtype: DType, shape: &[usize], bytes: Vec<u8>) -> &mut Self {
        self.tensors.retain(|t| t.name != name);
        self.tensors.push(PendingTensor {
            name: name.to_string(),
            dtype,
            shape: shape.to_vec(),
            bytes,
        });
        self
    }

    /// Number of tensors added so far.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether no tensors have been added.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Serialize to safetensors bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header = Map::new();
        let mut offset = 0usize;
        for tensor in &self.tensors {
            let end = offset + tensor.bytes.len();
            header.insert(
                tensor.name.clone(),
                json!({
                    "dtype": tensor.dtype.as_str(),
                    "shape": tensor.shape,
                    "data_offsets": [offset, end],
                }),
            );
            offset = end;
        }

        let mut header = serde_json::to_vec(&Value::Object(header))?;
        // Pad so the data section starts 8-byte aligned.
        let padded = header.len().div_ceil(8) * 8;
        header.resize(padded, b' ');

        let mut out = Vec::with_capacity(8 + header.len() + offset);
        out.extend_from_slice(&(header.len() as u64).to_le_bytes());
        out.extend_from_slice(&header);
        for tensor in &self.tensors {
            out.extend_from_slice(&tensor.bytes);
        }
        Ok(out)
    }

    /// Serialize and write to `path`.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        fs::write(path, bytes).map_err(|e| {
            OxmoeError::Checkpoint(format!("failed to write {}: {}", path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;

    #[test]
    fn bf16_encoding_rounds_to_nearest_even() {
        assert_eq!(encode_bf16(&[1.0]), vec![0x80, 0x3F]);
        // 1 + 2^-8 sits exactly between two BF16 values; ties go to even.
        assert_eq!(encode_bf16(&[1.0 + 1.0 / 256.0]), vec![0x80, 0x3F]);
        assert_eq!(encode_bf16(&[1.0 + 3.0 / 256.0]), vec![0x82, 0x3F]);
    }

    #[test]
    fn header_is_aligned() {
        let mut builder = CheckpointBuilder::new();
        builder.add_u8("odd_name", &[3], &[1, 2, 3]);
        let bytes = builder.to_bytes().unwrap();
        let header_len = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
        assert_eq!(header_len % 8, 0);
        assert_eq!(bytes.len(), 8 + header_len + 3);
    }

    #[test]
    fn re_adding_replaces() {
        let mut builder = CheckpointBuilder::new();
        builder.add_bf16("a", &[1], &[1.0]);
        builder.add_bf16("a", &[2], &[2.0, 3.0]);
        assert_eq!(builder.len(), 1);

        let ckpt = Checkpoint::from_bytes(builder.to_bytes().unwrap()).unwrap();
        assert_eq!(ckpt.bf16("a").unwrap().to_f32_vec(), vec![2.0, 3.0]);
    }

    #[test]
    fn empty_builder_round_trips() {
        let builder = CheckpointBuilder::new();
        assert!(builder.is_empty());
        let ckpt = Checkpoint::from_bytes(builder.to_bytes().unwrap()).unwrap();
        assert!(ckpt.is_empty());
    }

    #[test]
    #[should_panic]
    fn shape_mismatch_panics() {
        CheckpointBuilder::new().add_bf16("x", &[2, 2], &[0.0; 3]);
    }
}
