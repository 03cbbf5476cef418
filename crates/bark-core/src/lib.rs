//! # bark-core
//!
//! Core types, traits, and error definitions for the bark-rs workspace.
//!
//! This crate provides the foundational abstractions used across all other crates
//! in the workspace, including:
//!
//! - Vocabulary and rate constants shared by every generation stage
//! - Token containers (`SemanticTokens`, `CodebookMatrix`) and `Waveform`
//! - Trait definitions for the external model collaborators
//! - Unified error handling via `BarkError`
//! - Configuration structures and the per-call `ExecutionContext`

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod traits;
pub mod types;

pub use cache::{KvCache, LayerKvCache};
pub use config::{
    CoarseOptions, DeviceConfig, DeviceType, ExecutionContext, FineOptions, GenerationConfig,
    LoggingConfig, MetricsConfig, PipelineConfig, SemanticOptions,
};
pub use error::{BarkError, BarkResult};
pub use traits::{CausalLm, CodecModel, DevicePlaced, FineLm, TextEncoder, Transcriber};
pub use types::{CodebookMatrix, FullGeneration, HistoryPrompt, SemanticTokens, Waveform};
