//! Trait definitions for the pretrained models the pipeline drives.
//!
//! The forward passes themselves live outside this workspace; the decoders
//! only need next-token logits, the codec only needs its two decode stages.

use candle_core::{Device, Tensor};

use crate::cache::KvCache;
use crate::error::BarkResult;
use crate::types::CodebookMatrix;

/// A model whose weights can be moved between devices.
pub trait DevicePlaced {
    /// Device currently holding the weights.
    fn device(&self) -> Device;

    /// Move the weights to `device`.
    fn to_device(&mut self, device: &Device) -> BarkResult<()>;
}

/// Text encoder producing raw (un-offset) token ids for the semantic model.
pub trait TextEncoder: Send + Sync {
    /// Encode text without special tokens.
    fn encode(&self, text: &str) -> BarkResult<Vec<u32>>;

    /// Get the vocabulary size.
    fn vocab_size(&self) -> usize;
}

/// Autoregressive model returning logits for the next position.
///
/// Used for both the text-to-semantic and the semantic-to-coarse GPT. The
/// semantic model merges the text and history halves of its 513-token prompt
/// internally.
pub trait CausalLm: DevicePlaced + Send {
    /// Logits over the full output vocabulary for the position after `input`.
    ///
    /// With `cache = Some(..)` and a non-empty cache, `input` holds only the
    /// newest token; the model must extend the cache with what it consumed.
    fn forward(&mut self, input: &[u32], cache: Option<&mut KvCache>) -> BarkResult<Vec<f32>>;

    /// Size of the output vocabulary.
    fn vocab_size(&self) -> usize;
}

/// Non-causal model predicting one codebook over a fixed-width buffer.
pub trait FineLm: DevicePlaced + Send {
    /// Per-frame logits for codebook `codebook`.
    ///
    /// `buffer` has `N_FINE_CODEBOOKS` rows and `FINE_CONTEXT_LEN` frames;
    /// the result has one logit row per frame, each at least
    /// `CODEBOOK_SIZE` wide.
    fn forward(&mut self, codebook: usize, buffer: &CodebookMatrix) -> BarkResult<Vec<Vec<f32>>>;
}

/// Neural audio codec split into its quantizer and waveform decoder.
pub trait CodecModel: DevicePlaced + Send {
    /// `(n_q, batch, frames)` u32 codes to `(batch, dim, frames)` embeddings.
    fn quantizer_decode(&self, codes: &Tensor) -> BarkResult<Tensor>;

    /// `(batch, dim, frames)` embeddings to `(batch, channels, samples)` audio.
    fn decode(&self, embeddings: &Tensor) -> BarkResult<Tensor>;

    /// `(batch, channels, samples)` audio at [`Self::sample_rate`] to
    /// `(n_q, batch, frames)` u32 codes.
    fn encode(&self, audio: &Tensor) -> BarkResult<Tensor>;

    /// Output sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Output channel count.
    fn channels(&self) -> usize;
}

/// Speech recognition model operating on 16 kHz mono audio.
pub trait Transcriber: Send {
    /// Transcribe 16 kHz mono samples in `[-1, 1]`.
    fn transcribe(&mut self, samples: &[f32]) -> BarkResult<String>;
}
