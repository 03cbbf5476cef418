//! Semantic tokens to the first two codebooks.
//!
//! The coarse model emits both codebooks as one interleaved stream. Tokens of
//! codebook `n` live at `SEMANTIC_VOCAB_SIZE + n * CODEBOOK_SIZE` in its
//! output vocabulary. Generation runs in sliding windows: every window sees
//! a fixed slice of semantic tokens, the infer marker, and the most recent
//! coarse tokens.

use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use bark_core::constants::{
    coarse_steps_for, semantic_to_coarse_ratio, CODEBOOK_SIZE, COARSE_INFER_TOKEN,
    COARSE_SEMANTIC_PAD_TOKEN, COARSE_SEMANTIC_WINDOW, N_COARSE_CODEBOOKS, SEMANTIC_VOCAB_SIZE,
};
use bark_core::{
    BarkError, BarkResult, CausalLm, CoarseOptions, CodebookMatrix, ExecutionContext,
    HistoryPrompt, KvCache, SemanticTokens,
};

use crate::progress::stage_bar;
use crate::sampling::{Sampler, SamplingConfig};

/// Semantic and flattened coarse history after trimming to a common duration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoarseHistory {
    pub semantic: Vec<u32>,
    /// Interleaved coarse tokens, already offset into the model vocabulary.
    pub coarse: Vec<u32>,
}

/// Largest semantic history that fits `max_coarse_history` coarse tokens.
pub fn max_semantic_history(max_coarse_history: usize) -> usize {
    (max_coarse_history as f64 / semantic_to_coarse_ratio()).floor() as usize
}

/// Trim a semantic/coarse history pair so both cover the same stretch of audio.
///
/// The last two coarse tokens are dropped afterwards, which shifts the
/// continuation by one frame and aligns it better with the semantic stream.
pub fn trim_history(
    semantic: &SemanticTokens,
    coarse: &CodebookMatrix,
    max_coarse_history: usize,
) -> CoarseHistory {
    let ratio = semantic_to_coarse_ratio();
    let flat: Vec<u32> = coarse
        .interleaved_with_offset(CODEBOOK_SIZE as u32)
        .into_iter()
        .map(|t| t + SEMANTIC_VOCAB_SIZE as u32)
        .collect();

    let n_semantic = max_semantic_history(max_coarse_history)
        .min(semantic.len() - semantic.len() % 2)
        .min((flat.len() as f64 / ratio).floor() as usize);
    if n_semantic == 0 {
        return CoarseHistory::default();
    }
    let n_coarse = ((n_semantic as f64 * ratio).round_ties_even() as usize).min(flat.len());

    let ids = semantic.ids();
    let semantic_tail = ids[ids.len() - n_semantic..].to_vec();
    let mut coarse_tail = flat[flat.len() - n_coarse..].to_vec();
    coarse_tail.truncate(coarse_tail.len().saturating_sub(2));

    CoarseHistory {
        semantic: semantic_tail,
        coarse: coarse_tail,
    }
}

/// Generate the two coarse codebooks for `semantic`.
#[instrument(skip_all, fields(semantic_len = semantic.len(), has_history = history.is_some()))]
pub fn generate_coarse(
    model: &mut dyn CausalLm,
    semantic: &SemanticTokens,
    history: Option<&HistoryPrompt>,
    opts: &CoarseOptions,
    sampler: &mut Sampler,
    ctx: &ExecutionContext,
) -> BarkResult<CodebookMatrix> {
    semantic.validate("semantic tokens")?;
    opts.validate()?;

    let trimmed = match history {
        Some(h) => {
            h.validate()?;
            match (&h.semantic, &h.coarse) {
                (Some(sem), Some(coarse)) => trim_history(sem, coarse, opts.max_coarse_history),
                _ => {
                    warn!("History lacks semantic or coarse tokens, generating coarse without history");
                    CoarseHistory::default()
                }
            }
        }
        None => CoarseHistory::default(),
    };

    let n_steps = coarse_steps_for(semantic.len());
    if n_steps == 0 {
        return Err(BarkError::invalid_input(format!(
            "{} semantic tokens are too few to produce a coarse frame",
            semantic.len()
        )));
    }

    let start = Instant::now();
    let generated = ctx.with_placement(model, |model| {
        window_loop(model, semantic, &trimmed, n_steps, opts, sampler)
    })?;
    if generated.len() != n_steps {
        return Err(BarkError::internal(format!(
            "generated {} coarse tokens, expected {n_steps}",
            generated.len()
        )));
    }

    let de_offset: Vec<u32> = generated
        .iter()
        .enumerate()
        .map(|(i, &t)| {
            let codebook = i % N_COARSE_CODEBOOKS;
            t - (SEMANTIC_VOCAB_SIZE + codebook * CODEBOOK_SIZE) as u32
        })
        .collect();
    let coarse = CodebookMatrix::from_interleaved(N_COARSE_CODEBOOKS, &de_offset)?;
    info!(
        frames = coarse.frames(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Coarse generation finished"
    );
    Ok(coarse)
}

/// Run the sliding windows and return only the newly generated tokens.
fn window_loop(
    model: &mut dyn CausalLm,
    semantic: &SemanticTokens,
    history: &CoarseHistory,
    n_steps: usize,
    opts: &CoarseOptions,
    sampler: &mut Sampler,
) -> BarkResult<Vec<u32>> {
    let ratio = semantic_to_coarse_ratio();
    let max_semantic = max_semantic_history(opts.max_coarse_history);
    let params = SamplingConfig::stage(opts.temperature, opts.top_k, opts.top_p);

    let mut x_semantic = history.semantic.clone();
    x_semantic.extend_from_slice(semantic.ids());
    let base_semantic_idx = history.semantic.len();
    let mut x_coarse = history.coarse.clone();

    let n_windows = n_steps.div_ceil(opts.sliding_window_len);
    let pb = stage_bar("coarse", n_windows as u64, opts.silent);
    let mut n_step = 0usize;

    for _ in 0..n_windows {
        let semantic_idx = base_semantic_idx + (n_step as f64 / ratio).round_ties_even() as usize;
        let from = semantic_idx.saturating_sub(max_semantic).min(x_semantic.len());
        let to = (from + COARSE_SEMANTIC_WINDOW).min(x_semantic.len());

        let mut x_in = Vec::with_capacity(
            COARSE_SEMANTIC_WINDOW + 1 + opts.max_coarse_history + opts.sliding_window_len,
        );
        x_in.extend_from_slice(&x_semantic[from..to]);
        x_in.resize(COARSE_SEMANTIC_WINDOW, COARSE_SEMANTIC_PAD_TOKEN);
        x_in.push(COARSE_INFER_TOKEN);
        x_in.extend_from_slice(&x_coarse[x_coarse.len().saturating_sub(opts.max_coarse_history)..]);

        let mut cache = opts.use_kv_caching.then(KvCache::default);
        for _ in 0..opts.sliding_window_len {
            if n_step >= n_steps {
                break;
            }
            let is_major = n_step % N_COARSE_CODEBOOKS == 0;
            let logit_start = SEMANTIC_VOCAB_SIZE + usize::from(!is_major) * CODEBOOK_SIZE;
            let logit_end = logit_start + CODEBOOK_SIZE;

            let input = match &cache {
                Some(c) if !c.is_empty() => &x_in[x_in.len() - 1..],
                _ => &x_in[..],
            };
            let logits = model.forward(input, cache.as_mut())?;
            if logits.len() < logit_end {
                return Err(BarkError::inference(format!(
                    "coarse model returned {} logits, expected at least {logit_end}",
                    logits.len()
                )));
            }

            let sample = sampler.sample_with(&logits[logit_start..logit_end], &params)?;
            let token = (sample.token + logit_start) as u32;
            x_coarse.push(token);
            x_in.push(token);
            n_step += 1;
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    debug!(windows = n_windows, steps = n_step, "Coarse windows complete");

    Ok(x_coarse.split_off(history.coarse.len()))
}
