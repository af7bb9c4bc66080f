//! Tokenizer integration for text-to-token and token-to-text conversion.
//!
//! Wraps the HuggingFace tokenizers library. The engine only needs the
//! [`TokenCodec`] surface, so tests can drive generation with a tiny
//! vocabulary.

use crate::error::{OxmoeError, Result};
use std::path::Path;
use tokenizers::Tokenizer as HfTokenizer;
use tracing::warn;

/// End-of-sequence markers, in lookup order.
const EOS_CANDIDATES: [&str; 2] = ["<|return|>", "<|endoftext|>"];

/// Text <-> token id conversion.
pub trait TokenCodec {
    /// Encode text to token ids.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode a single token to its text fragment.
    fn decode(&self, id: u32) -> Result<String>;

    /// Token that ends generation, if the vocabulary has one.
    fn eos_token_id(&self) -> Option<u32>;
}

/// Tokenizer for encoding text to tokens and decoding tokens to text.
#[derive(Clone)]
pub struct Tokenizer {
    /// Underlying HuggingFace tokenizer.
    inner: HfTokenizer,
    /// EOS token ID.
    eos_token_id: Option<u32>,
}

impl Tokenizer {
    /// Load a tokenizer from a tokenizer.json file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let inner = HfTokenizer::from_file(path).map_err(|e| {
            OxmoeError::Tokenizer(format!("failed to load {}: {}", path.display(), e))
        })?;
        Ok(Self::wrap(inner))
    }

    /// Load a tokenizer from in-memory tokenizer.json contents.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Result<Self> {
        let inner = HfTokenizer::from_bytes(bytes)
            .map_err(|e| OxmoeError::Tokenizer(format!("failed to parse tokenizer: {}", e)))?;
        Ok(Self::wrap(inner))
    }

    fn wrap(inner: HfTokenizer) -> Self {
        let eos_token_id = EOS_CANDIDATES
            .iter()
            .find_map(|token| inner.token_to_id(token));
        if eos_token_id.is_none() {
            warn!("tokenizer has no end-of-sequence token");
        }
        Self {
            inner,
            eos_token_id,
        }
    }

    /// Encode text to token IDs, without special tokens.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| OxmoeError::Tokenizer(format!("failed to encode text: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Decode a single token to text.
    pub fn decode(&self, id: u32) -> Result<String> {
        self.decode_all(&[id])
    }

    /// Decode a token sequence to text.
    pub fn decode_all(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, false)
            .map_err(|e| OxmoeError::Tokenizer(format!("failed to decode tokens: {}", e)))
    }

    /// Get vocabulary size, added tokens included.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// Get EOS token ID.
    pub fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }

    /// String to token ID.
    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }
}

impl TokenCodec for Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Tokenizer::encode(self, text)
    }

    fn decode(&self, id: u32) -> Result<String> {
        Tokenizer::decode(self, id)
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("vocab_size", &self.vocab_size())
            .field("eos_token_id", &self.eos_token_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_level(vocab: &str) -> String {
        format!(
            r#"{{
                "version": "1.0",
                "truncation": null,
                "padding": null,
                "added_tokens": [],
                "normalizer": null,
                "pre_tokenizer": {{ "type": "Whitespace" }},
                "post_processor": null,
                "decoder": null,
                "model": {{
                    "type": "WordLevel",
                    "vocab": {vocab},
                    "unk_token": "[UNK]"
                }}
            }}"#
        )
    }

    fn tiny() -> Tokenizer {
        let json = word_level(r#"{ "[UNK]": 0, "hello": 1, "world": 2, "<|endoftext|>": 3 }"#);
        Tokenizer::from_bytes(json).unwrap()
    }

    #[test]
    fn encode_words() {
        let tok = tiny();
        assert_eq!(tok.encode("hello world").unwrap(), vec![1, 2]);
        assert_eq!(tok.encode("hello there").unwrap(), vec![1, 0]);
    }

    #[test]
    fn decode_single_and_sequence() {
        let tok = tiny();
        assert_eq!(tok.decode(2).unwrap(), "world");
        assert_eq!(tok.decode_all(&[1, 2]).unwrap(), "hello world");
    }

    #[test]
    fn eos_falls_back_to_endoftext() {
        let tok = tiny();
        assert_eq!(tok.eos_token_id(), Some(3));
        assert_eq!(tok.vocab_size(), 4);
        assert_eq!(tok.token_to_id("world"), Some(2));
    }

    #[test]
    fn eos_prefers_return_marker() {
        let json = word_level(r#"{ "[UNK]": 0, "<|endoftext|>": 1, "<|return|>": 2 }"#);
        let tok = Tokenizer::from_bytes(json).unwrap();
        assert_eq!(TokenCodec::eos_token_id(&tok), Some(2));
    }

    #[test]
    fn no_eos_marker() {
        let json = word_level(r#"{ "[UNK]": 0, "a": 1 }"#);
        let tok = Tokenizer::from_bytes(json).unwrap();
        assert_eq!(tok.eos_token_id(), None);
    }

    #[test]
    fn from_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        std::fs::write(&path, word_level(r#"{ "[UNK]": 0, "hi": 1 }"#)).unwrap();
        let tok = Tokenizer::from_file(&path).unwrap();
        assert_eq!(TokenCodec::encode(&tok, "hi hi").unwrap(), vec![1, 1]);
    }

    #[test]
    fn malformed_json_is_tokenizer_error() {
        assert!(matches!(
            Tokenizer::from_bytes("{ not json"),
            Err(OxmoeError::Tokenizer(_))
        ));
        assert!(matches!(
            Tokenizer::from_file("/nonexistent/tokenizer.json"),
            Err(OxmoeError::Tokenizer(_))
        ));
    }
}
