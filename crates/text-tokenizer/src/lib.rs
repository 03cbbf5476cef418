//! # text-tokenizer
//!
//! Text preparation for the semantic model.
//!
//! This crate provides:
//! - Whitespace normalization applied before encoding
//! - A `tokenizers`-backed encoder for the multilingual cased BERT vocabulary
//! - A mock encoder for running the pipeline without tokenizer files
//!
//! # Example
//!
//! ```ignore
//! use bark_core::TextEncoder;
//! use text_tokenizer::BertTextEncoder;
//!
//! let encoder = BertTextEncoder::from_file("tokenizer.json")?;
//! let ids = encoder.encode("Hello world")?;
//! println!("Token IDs: {:?}", ids);
//! ```

use std::path::Path;

use bark_core::{BarkError, BarkResult, TextEncoder};
use tracing::instrument;

/// Collapse every whitespace run to one space and trim both ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Encoder wrapping a `tokenizers` BERT tokenizer.
#[derive(Debug)]
pub struct BertTextEncoder {
    inner: tokenizers::Tokenizer,
}

impl BertTextEncoder {
    /// Load a tokenizer from a `tokenizer.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> BarkResult<Self> {
        let path = path.as_ref();
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| BarkError::FileLoad {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
        })?;
        Ok(Self { inner })
    }

    /// Create a tokenizer from a JSON string.
    pub fn from_json(json: &str) -> BarkResult<Self> {
        let inner = tokenizers::Tokenizer::from_bytes(json.as_bytes())
            .map_err(|e| BarkError::config(format!("invalid tokenizer JSON: {e}")))?;
        Ok(Self { inner })
    }

    /// Get the underlying tokenizers::Tokenizer.
    pub fn inner(&self) -> &tokenizers::Tokenizer {
        &self.inner
    }
}

impl TextEncoder for BertTextEncoder {
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    fn encode(&self, text: &str) -> BarkResult<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| BarkError::tokenization(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

/// A mock encoder for testing without tokenizer files.
///
/// Every whitespace-separated word becomes one id derived from its bytes.
#[derive(Debug)]
pub struct MockTextEncoder {
    vocab_size: usize,
}

impl Default for MockTextEncoder {
    fn default() -> Self {
        Self::new(119_547)
    }
}

impl MockTextEncoder {
    /// Create a new mock encoder.
    pub fn new(vocab_size: usize) -> Self {
        Self { vocab_size }
    }
}

impl TextEncoder for MockTextEncoder {
    fn encode(&self, text: &str) -> BarkResult<Vec<u32>> {
        let ids = text
            .split_whitespace()
            .map(|word| {
                let hash = word
                    .bytes()
                    .fold(17u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
                (hash % self.vocab_size as u64) as u32
            })
            .collect();
        Ok(ids)
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}
