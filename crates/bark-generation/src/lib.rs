//! # bark-generation
//!
//! Token generation for the three Bark GPT stages.
//!
//! This crate provides:
//! - Temperature, top-k and nucleus sampling with a seeded RNG
//! - Text-to-semantic decoding with early stopping
//! - Semantic-to-coarse decoding over sliding windows
//! - Coarse-to-fine decoding over overlapping non-causal chunks
//! - Deterministic mock models for running the decoders without weights
//!
//! The models themselves are reached through the traits in `bark_core`.
//!
//! # Example
//!
//! ```ignore
//! use bark_core::{ExecutionContext, SemanticOptions};
//! use bark_generation::{generate_semantic, MockCausalLm, Sampler};
//! use text_tokenizer::MockTextEncoder;
//!
//! let mut model = MockCausalLm::semantic(0);
//! let mut sampler = Sampler::seeded(Some(42));
//! let tokens = generate_semantic(
//!     &mut model,
//!     &MockTextEncoder::default(),
//!     "Hello there",
//!     None,
//!     &SemanticOptions::default(),
//!     &mut sampler,
//!     &ExecutionContext::cpu(),
//! )?;
//! ```

pub mod coarse;
pub mod fine;
pub mod mock;
mod progress;
pub mod sampling;
pub mod semantic;

pub use coarse::{generate_coarse, trim_history, CoarseHistory};
pub use fine::generate_fine;
pub use mock::{MockCausalLm, MockFineLm};
pub use sampling::{Sample, Sampler, SamplingConfig};
pub use semantic::generate_semantic;
