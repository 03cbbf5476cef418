//! Vocabulary layout and rate constants of the Bark token spaces.
//!
//! The semantic and coarse models share one embedding table, so the special
//! tokens of both stages live above the semantic vocabulary.

/// Number of semantic tokens.
pub const SEMANTIC_VOCAB_SIZE: usize = 10_000;

/// Entries per acoustic codebook.
pub const CODEBOOK_SIZE: usize = 1024;

/// Codebooks predicted by the coarse model.
pub const N_COARSE_CODEBOOKS: usize = 2;

/// Codebooks in a complete fine token matrix.
pub const N_FINE_CODEBOOKS: usize = 8;

/// Semantic tokens per second of audio.
pub const SEMANTIC_RATE_HZ: f64 = 49.9;

/// Acoustic frames per second of audio.
pub const COARSE_RATE_HZ: f64 = 75.0;

/// Output sample rate of the codec.
pub const SAMPLE_RATE: u32 = 24_000;

/// Added to every text token id before it enters the semantic model.
pub const TEXT_ENCODING_OFFSET: u32 = 10_048;

/// Pads semantic history; also the end-of-sequence slot of the semantic head.
pub const SEMANTIC_PAD_TOKEN: u32 = 10_000;

/// Pads the encoded text window.
pub const TEXT_PAD_TOKEN: u32 = 129_595;

/// Marks the start of semantic generation.
pub const SEMANTIC_INFER_TOKEN: u32 = 129_599;

/// Pads the semantic window of the coarse model.
pub const COARSE_SEMANTIC_PAD_TOKEN: u32 = 12_048;

/// Marks the start of coarse generation.
pub const COARSE_INFER_TOKEN: u32 = 12_050;

/// Width of the encoded text window.
pub const TEXT_CONTEXT_LEN: usize = 256;

/// Width of the semantic history window.
pub const SEMANTIC_HISTORY_LEN: usize = 256;

/// Step budget of the semantic loop.
pub const MAX_SEMANTIC_STEPS: usize = 768;

/// Semantic slice fed to the coarse model per window.
pub const COARSE_SEMANTIC_WINDOW: usize = 256;

/// Maximum context of the coarse model.
pub const COARSE_MAX_CONTEXT: usize = 1024;

/// Lower bound for the coarse history.
pub const MIN_COARSE_HISTORY: usize = 60;

/// Upper bound for the coarse history.
pub const MAX_COARSE_HISTORY: usize = 630;

/// Fixed (non-causal) context of the fine model.
pub const FINE_CONTEXT_LEN: usize = 1024;

/// Fine history kept in front of the buffer; also the chunk stride.
pub const FINE_HISTORY_LEN: usize = 512;

/// Coarse tokens (flattened, both codebooks) produced per semantic token.
pub fn semantic_to_coarse_ratio() -> f64 {
    COARSE_RATE_HZ / SEMANTIC_RATE_HZ * N_COARSE_CODEBOOKS as f64
}

/// Number of flattened coarse steps generated for `semantic_len` semantic tokens.
pub fn coarse_steps_for(semantic_len: usize) -> usize {
    let per_codebook = (semantic_len as f64 * semantic_to_coarse_ratio() / N_COARSE_CODEBOOKS as f64)
        .floor() as usize;
    per_codebook * N_COARSE_CODEBOOKS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio() {
        let ratio = semantic_to_coarse_ratio();
        assert!((ratio - 3.006_012).abs() < 1e-5);
    }

    #[test]
    fn test_coarse_steps() {
        assert_eq!(coarse_steps_for(0), 0);
        // 100 * 3.006 / 2 = 150.3 -> 150 frames
        assert_eq!(coarse_steps_for(100), 300);
        assert_eq!(coarse_steps_for(1) % N_COARSE_CODEBOOKS, 0);
    }

    #[test]
    fn test_special_tokens_above_vocab() {
        assert!(COARSE_SEMANTIC_PAD_TOKEN as usize
            >= SEMANTIC_VOCAB_SIZE + N_COARSE_CODEBOOKS * CODEBOOK_SIZE);
        assert!(TEXT_PAD_TOKEN > TEXT_ENCODING_OFFSET);
    }
}
