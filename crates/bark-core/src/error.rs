//! Unified error types for the bark-rs workspace.

use std::path::PathBuf;

/// Main error type for generation, decoding and model management.
#[derive(Debug, thiserror::Error)]
pub enum BarkError {
    /// Invalid input provided (shape, range or option bounds).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A history prompt violated its shape or value-range invariants.
    #[error("invalid history prompt: {0}")]
    InvalidHistory(String),

    /// Tokenization failed.
    #[error("tokenization failed: {0}")]
    Tokenization(String),

    /// A tokenizer or weight file could not be opened.
    #[error("failed to open {path}: {source}")]
    FileLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A model loader failed.
    #[error("failed to load {model}: {reason}")]
    ModelLoad { model: String, reason: String },

    /// An operation needed a model that is not loaded.
    #[error("no model loaded: {0}")]
    NoModelLoaded(String),

    /// Model inference error.
    #[error("inference error: {0}")]
    Inference(String),

    /// Waveform sample encoding outside the supported set.
    #[error("audio data cannot be converted from {0} to 16-bit int format")]
    UnsupportedEncoding(String),

    /// Audio processing error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Tensor backend error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen in normal operation).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results with BarkError.
pub type BarkResult<T> = Result<T, BarkError>;

impl BarkError {
    /// Create an invalid input error with message.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an invalid history error with message.
    pub fn invalid_history(msg: impl Into<String>) -> Self {
        Self::InvalidHistory(msg.into())
    }

    /// Create a tokenization error with message.
    pub fn tokenization(msg: impl Into<String>) -> Self {
        Self::Tokenization(msg.into())
    }

    /// Create a model load error.
    pub fn model_load(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModelLoad {
            model: model.into(),
            reason: reason.into(),
        }
    }

    /// Create an inference error with message.
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create an audio error with message.
    pub fn audio(msg: impl Into<String>) -> Self {
        Self::Audio(msg.into())
    }

    /// Create a config error with message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error with message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<serde_json::Error> for BarkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BarkError::invalid_history("semantic prompt is empty");
        assert_eq!(
            err.to_string(),
            "invalid history prompt: semantic prompt is empty"
        );

        let err = BarkError::UnsupportedEncoding("u32".into());
        assert_eq!(
            err.to_string(),
            "audio data cannot be converted from u32 to 16-bit int format"
        );

        let err = BarkError::model_load("base.en", "weights missing");
        assert_eq!(err.to_string(), "failed to load base.en: weights missing");
    }

    #[test]
    fn test_error_constructors() {
        let err = BarkError::tokenization("unknown token");
        assert!(matches!(err, BarkError::Tokenization(_)));

        let err = BarkError::inference("model failed");
        assert!(matches!(err, BarkError::Inference(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let err: BarkError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, BarkError::Serialization(_)));
    }
}
