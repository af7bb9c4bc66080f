//! SafeTensors checkpoint access.
//!
//! The checkpoint is memory-mapped once and indexed by tensor name. All
//! weight access goes through typed views that borrow from the
//! [`Checkpoint`], so weights are never copied and never outlive the mapping.
//!
//! # Example
//!
//! ```ignore
//! use oxmoe_core::checkpoint::Checkpoint;
//!
//! let ckpt = Checkpoint::open("model.safetensors")?;
//! let embedding = ckpt.bf16("embedding.weight")?;
//! let mlp1 = ckpt.mxfp4("block.0.mlp.mlp1_weight", &[32, 5760])?;
//! ```

mod builder;
mod view;

pub use builder::{encode_bf16, CheckpointBuilder};
pub use view::{Bf16View, Mxfp4Weight};

use crate::error::{OxmoeError, Result};
use crate::quantization::{DType, MXFP4_BYTES_PER_GROUP};
use memmap2::Mmap;
use safetensors::{Dtype as StDtype, SafeTensors};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Header metadata for one tensor.
#[derive(Debug, Clone)]
pub struct TensorInfo {
    /// Tensor name.
    pub name: String,
    /// Dtype as written in the header.
    pub dtype: StDtype,
    /// Tensor shape.
    pub shape: Vec<usize>,
    /// Byte range relative to the start of the data section.
    pub data_offsets: (usize, usize),
}

impl TensorInfo {
    /// Number of elements implied by the shape.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Engine dtype, if the stored format is supported.
    pub fn engine_dtype(&self) -> Result<DType> {
        match self.dtype {
            StDtype::BF16 => Ok(DType::BF16),
            StDtype::U8 => Ok(DType::U8),
            other => Err(OxmoeError::UnsupportedDtype {
                name: self.name.clone(),
                dtype: format!("{other:?}"),
            }),
        }
    }
}

impl fmt::Display for TensorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:?}, shape {:?}, offsets [{}, {})",
            self.name, self.dtype, self.shape, self.data_offsets.0, self.data_offsets.1
        )
    }
}

/// Backing memory of a checkpoint.
enum Storage {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for Storage {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Storage::Mapped(mmap) => mmap,
            Storage::Owned(bytes) => bytes,
        }
    }
}

/// A loaded SafeTensors checkpoint.
pub struct Checkpoint {
    storage: Storage,
    /// Offset of the data section (8-byte length prefix + JSON header).
    data_start: usize,
    tensors: HashMap<String, TensorInfo>,
    path: Option<PathBuf>,
}

impl Checkpoint {
    /// Memory-map and index a `.safetensors` file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            OxmoeError::Checkpoint(format!("failed to open {}: {}", path.display(), e))
        })?;
        // SAFETY: the file is opened read-only and the mapping is never written.
        // Truncating the file underneath a live mapping is outside our contract.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
            OxmoeError::Checkpoint(format!("failed to mmap {}: {}", path.display(), e))
        })?;

        let mut checkpoint = Self::index(Storage::Mapped(mmap))?;
        checkpoint.path = Some(path.to_path_buf());
        info!(
            path = %path.display(),
            tensors = checkpoint.len(),
            bytes = checkpoint.storage.len(),
            "opened checkpoint"
        );
        Ok(checkpoint)
    }

    /// Index an in-memory SafeTensors buffer.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::index(Storage::Owned(bytes))
    }

    fn index(storage: Storage) -> Result<Self> {
        // read_metadata validates that offsets are contiguous and that the
        // buffer length matches the header exactly.
        let (header_len, metadata) = SafeTensors::read_metadata(&storage)?;
        let data_start = 8 + header_len;

        let tensors: HashMap<String, TensorInfo> = metadata
            .tensors()
            .into_iter()
            .map(|(name, info)| {
                let info = TensorInfo {
                    name: name.clone(),
                    dtype: info.dtype,
                    shape: info.shape.clone(),
                    data_offsets: info.data_offsets,
                };
                (name, info)
            })
            .collect();

        for info in tensors.values() {
            let end = data_start + info.data_offsets.1;
            if end > storage.len() {
                return Err(OxmoeError::Checkpoint(format!(
                    "tensor {} ends at byte {} but file has {} bytes",
                    info.name,
                    end,
                    storage.len()
                )));
            }
        }
        debug!(tensors = tensors.len(), data_start, "indexed safetensors header");

        Ok(Self {
            storage,
            data_start,
            tensors,
            path: None,
        })
    }

    /// Header metadata for `name`.
    pub fn tensor(&self, name: &str) -> Result<&TensorInfo> {
        self.tensors
            .get(name)
            .ok_or_else(|| OxmoeError::TensorNotFound(name.to_string()))
    }

    /// Whether a tensor exists.
    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    /// All tensor names, sorted.
    pub fn tensor_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tensors.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Number of tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether the checkpoint has no tensors.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Source path, if loaded from a file.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn bytes_of(&self, info: &TensorInfo) -> &[u8] {
        let (start, end) = info.data_offsets;
        &self.storage[self.data_start + start..self.data_start + end]
    }

    fn typed(&self, name: &str, want: DType) -> Result<(&TensorInfo, &[u8])> {
        let info = self.tensor(name)?;
        let dtype = info.engine_dtype()?;
        if dtype != want {
            return Err(OxmoeError::UnsupportedDtype {
                name: name.to_string(),
                dtype: format!("{dtype} (expected {want})"),
            });
        }
        let bytes = self.bytes_of(info);
        if bytes.len() != info.numel() * want.size_in_bytes() {
            return Err(OxmoeError::Checkpoint(format!(
                "tensor {} has {} bytes for shape {:?}",
                name,
                bytes.len(),
                info.shape
            )));
        }
        Ok((info, bytes))
    }

    /// BF16 view of `name`.
    pub fn bf16(&self, name: &str) -> Result<Bf16View<'_>> {
        let (_, bytes) = self.typed(name, DType::BF16)?;
        Bf16View::new(bytes)
    }

    /// Element count of BF16 tensor `name`.
    pub fn bf16_count(&self, name: &str) -> Result<usize> {
        self.typed(name, DType::BF16).map(|(info, _)| info.numel())
    }

    /// Byte view of U8 tensor `name`.
    pub fn u8(&self, name: &str) -> Result<&[u8]> {
        self.typed(name, DType::U8).map(|(_, bytes)| bytes)
    }

    /// Element count of U8 tensor `name`.
    pub fn u8_count(&self, name: &str) -> Result<usize> {
        self.typed(name, DType::U8).map(|(info, _)| info.numel())
    }

    /// MXFP4 pair stored as `{base}.blocks` / `{base}.scales`.
    ///
    /// `expected_prefix` is the leading shape shared by both tensors
    /// (for stacked expert weights: `[num_experts, out_features]`). Blocks must
    /// be `[*prefix, groups, 16]` and scales `[*prefix, groups]`.
    pub fn mxfp4(&self, base: &str, expected_prefix: &[usize]) -> Result<Mxfp4Weight<'_>> {
        let blocks_name = format!("{base}.blocks");
        let scales_name = format!("{base}.scales");
        let (blocks_info, blocks) = self.typed(&blocks_name, DType::U8)?;
        let (scales_info, scales) = self.typed(&scales_name, DType::U8)?;

        let rank = expected_prefix.len();
        if blocks_info.shape.len() != rank + 2 {
            return Err(OxmoeError::Checkpoint(format!(
                "{} has rank {}, expected {}",
                blocks_name,
                blocks_info.shape.len(),
                rank + 2
            )));
        }
        if scales_info.shape.len() != rank + 1 {
            return Err(OxmoeError::Checkpoint(format!(
                "{} has rank {}, expected {}",
                scales_name,
                scales_info.shape.len(),
                rank + 1
            )));
        }
        if blocks_info.shape[..rank] != *expected_prefix {
            return Err(OxmoeError::Checkpoint(format!(
                "{} has leading shape {:?}, expected {:?}",
                blocks_name,
                &blocks_info.shape[..rank],
                expected_prefix
            )));
        }
        if scales_info.shape[..rank] != *expected_prefix {
            return Err(OxmoeError::Checkpoint(format!(
                "{} has leading shape {:?}, expected {:?}",
                scales_name,
                &scales_info.shape[..rank],
                expected_prefix
            )));
        }
        if blocks_info.shape[rank + 1] != MXFP4_BYTES_PER_GROUP {
            return Err(OxmoeError::Checkpoint(format!(
                "{} packs {} bytes per group, expected {}",
                blocks_name,
                blocks_info.shape[rank + 1],
                MXFP4_BYTES_PER_GROUP
            )));
        }
        let groups = blocks_info.shape[rank];
        if scales_info.shape[rank] != groups {
            return Err(OxmoeError::Checkpoint(format!(
                "{} has {} groups but {} has {}",
                scales_name, scales_info.shape[rank], blocks_name, groups
            )));
        }

        let rows = expected_prefix.iter().product();
        Mxfp4Weight::new(blocks, scales, rows, groups)
    }
}

impl fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkpoint")
            .field("path", &self.path)
            .field("tensors", &self.tensors.len())
            .field("bytes", &self.storage.len())
            .finish()
    }
}
