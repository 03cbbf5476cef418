//! Text to semantic tokens.
//!
//! The semantic model sees a fixed 513-token prompt: 256 offset text tokens,
//! 256 tokens of semantic history and one infer marker. Generation extends
//! that prompt one token at a time until an end condition is met.

use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use bark_core::constants::{
    MAX_SEMANTIC_STEPS, SEMANTIC_HISTORY_LEN, SEMANTIC_INFER_TOKEN, SEMANTIC_PAD_TOKEN,
    SEMANTIC_RATE_HZ, SEMANTIC_VOCAB_SIZE, TEXT_CONTEXT_LEN, TEXT_ENCODING_OFFSET, TEXT_PAD_TOKEN,
};
use bark_core::{
    BarkError, BarkResult, CausalLm, ExecutionContext, HistoryPrompt, KvCache, SemanticOptions,
    SemanticTokens, TextEncoder,
};

use text_tokenizer::normalize_whitespace;

use crate::progress::stage_bar;
use crate::sampling::{Sampler, SamplingConfig};

/// Length of the prompt in front of the generated tokens.
pub const SEMANTIC_PROMPT_LEN: usize = TEXT_CONTEXT_LEN + SEMANTIC_HISTORY_LEN + 1;

/// Encode `text` into the fixed-width text window.
///
/// Text longer than the window is truncated with a warning.
pub fn encode_text_window(encoder: &dyn TextEncoder, text: &str) -> BarkResult<Vec<u32>> {
    let normalized = normalize_whitespace(text);
    let mut encoded: Vec<u32> = encoder
        .encode(&normalized)?
        .into_iter()
        .map(|id| id + TEXT_ENCODING_OFFSET)
        .collect();
    if encoded.len() > TEXT_CONTEXT_LEN {
        let lopped = (encoded.len() - TEXT_CONTEXT_LEN) as f64 / encoded.len() as f64 * 100.0;
        warn!(
            tokens = encoded.len(),
            "Text too long, lopping off last {:.1}%",
            lopped
        );
        encoded.truncate(TEXT_CONTEXT_LEN);
    }
    encoded.resize(TEXT_CONTEXT_LEN, TEXT_PAD_TOKEN);
    Ok(encoded)
}

/// The last `SEMANTIC_HISTORY_LEN` history tokens, right-padded.
pub fn semantic_history_window(history: Option<&SemanticTokens>) -> Vec<u32> {
    let mut window = match history {
        Some(tokens) => {
            let ids = tokens.ids();
            ids[ids.len().saturating_sub(SEMANTIC_HISTORY_LEN)..].to_vec()
        }
        None => Vec::with_capacity(SEMANTIC_HISTORY_LEN),
    };
    window.resize(SEMANTIC_HISTORY_LEN, SEMANTIC_PAD_TOKEN);
    window
}

/// Generate semantic tokens for `text`, optionally conditioned on a voice.
#[instrument(skip_all, fields(text_len = text.len(), has_history = history.is_some()))]
pub fn generate_semantic(
    model: &mut dyn CausalLm,
    encoder: &dyn TextEncoder,
    text: &str,
    history: Option<&HistoryPrompt>,
    opts: &SemanticOptions,
    sampler: &mut Sampler,
    ctx: &ExecutionContext,
) -> BarkResult<SemanticTokens> {
    let semantic_history = history.and_then(|h| h.semantic.as_ref());
    if let Some(tokens) = semantic_history {
        tokens.validate("semantic_prompt").map_err(|e| match e {
            BarkError::InvalidInput(msg) => BarkError::InvalidHistory(msg),
            other => other,
        })?;
    }

    let mut context = encode_text_window(encoder, text)?;
    context.extend(semantic_history_window(semantic_history));
    context.push(SEMANTIC_INFER_TOKEN);
    debug_assert_eq!(context.len(), SEMANTIC_PROMPT_LEN);

    let start = Instant::now();
    let tokens = ctx.with_placement(model, |model| decode_loop(model, context, opts, sampler))?;
    info!(
        tokens = tokens.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Semantic generation finished"
    );
    Ok(tokens)
}

fn decode_loop(
    model: &mut dyn CausalLm,
    mut context: Vec<u32>,
    opts: &SemanticOptions,
    sampler: &mut Sampler,
) -> BarkResult<SemanticTokens> {
    let params = SamplingConfig::stage(opts.temperature, opts.top_k, opts.top_p);
    let eos_slot = SEMANTIC_VOCAB_SIZE;
    let mut cache = opts.use_kv_caching.then(KvCache::default);
    let mut generated_s = 0.0f64;

    let pb = stage_bar("semantic", 100, opts.silent);
    for n in 0..MAX_SEMANTIC_STEPS {
        let input = match &cache {
            Some(c) if !c.is_empty() => &context[context.len() - 1..],
            _ => &context[..],
        };
        let logits = model.forward(input, cache.as_mut())?;
        if logits.len() <= SEMANTIC_PAD_TOKEN as usize {
            return Err(BarkError::inference(format!(
                "semantic model returned {} logits, expected more than {SEMANTIC_PAD_TOKEN}",
                logits.len()
            )));
        }

        let mut relevant = logits[..SEMANTIC_VOCAB_SIZE].to_vec();
        if opts.allow_early_stop {
            relevant.push(logits[SEMANTIC_PAD_TOKEN as usize]);
        }
        let sample = sampler.sample_with(&relevant, &params)?;

        if opts.allow_early_stop {
            let eos_p = sample.probs[eos_slot];
            if sample.token == eos_slot || opts.min_eos_p.is_some_and(|p| eos_p >= p) {
                debug!(step = n, eos_p, "End of semantic sequence");
                break;
            }
        }

        context.push(sample.token as u32);
        generated_s += 1.0 / SEMANTIC_RATE_HZ;
        if opts
            .max_gen_duration_s
            .is_some_and(|max| generated_s > max as f64)
        {
            debug!(step = n, generated_s, "Reached maximum generation duration");
            break;
        }

        pb.set_position(((100 * n) as f64 / MAX_SEMANTIC_STEPS as f64).round() as u64);
    }
    pb.finish_and_clear();

    let out = context.split_off(SEMANTIC_PROMPT_LEN);
    if out.iter().any(|&t| t as usize >= SEMANTIC_VOCAB_SIZE) {
        return Err(BarkError::internal("semantic output left the vocabulary"));
    }
    Ok(SemanticTokens::new(out))
}
