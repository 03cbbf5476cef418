//! Coarse codebooks to the full set of eight.
//!
//! The fine model is non-causal over a fixed 1024-frame buffer. Rows that are
//! not yet known hold the placeholder `CODEBOOK_SIZE`. The buffer slides over
//! the input in steps of 512 frames, so most frames are predicted twice.

use std::time::Instant;

use tracing::{debug, info, instrument};

use bark_core::constants::{CODEBOOK_SIZE, FINE_CONTEXT_LEN, FINE_HISTORY_LEN, N_FINE_CODEBOOKS};
use bark_core::{
    BarkError, BarkResult, CodebookMatrix, ExecutionContext, FineLm, FineOptions, HistoryPrompt,
};

use crate::progress::stage_bar;
use crate::sampling::{argmax, Sampler, SamplingConfig};

/// Number of buffer positions the loop visits for `frames` input frames.
pub fn fine_loop_count(frames: usize, n_history: usize) -> usize {
    let uncovered = frames as i64 - (FINE_CONTEXT_LEN as i64 - n_history as i64);
    let extra = if uncovered > 0 {
        (uncovered as usize).div_ceil(FINE_HISTORY_LEN)
    } else {
        0
    };
    extra + 1
}

/// Placeholder-filled working buffer plus the bookkeeping needed to undo it.
#[derive(Debug, Clone)]
pub struct FineBuffer {
    pub tokens: CodebookMatrix,
    pub n_history: usize,
    pub n_pad_end: usize,
}

/// Stack coarse rows over placeholders, prepend history, and pad to the context length.
pub fn build_fine_buffer(
    coarse: &CodebookMatrix,
    fine_history: Option<&CodebookMatrix>,
) -> BarkResult<FineBuffer> {
    let placeholders = CodebookMatrix::filled(
        N_FINE_CODEBOOKS - coarse.rows(),
        coarse.frames(),
        CODEBOOK_SIZE as u32,
    );
    let mut tokens = coarse.vstack(&placeholders)?;

    let mut n_history = 0;
    if let Some(history) = fine_history {
        let tail = history.last_frames(FINE_HISTORY_LEN);
        n_history = tail.frames();
        tokens = tail.hstack(&tokens)?;
    }

    let mut n_pad_end = 0;
    if tokens.frames() < FINE_CONTEXT_LEN {
        n_pad_end = FINE_CONTEXT_LEN - tokens.frames();
        let pad = CodebookMatrix::filled(N_FINE_CODEBOOKS, n_pad_end, CODEBOOK_SIZE as u32);
        tokens = tokens.hstack(&pad)?;
    }

    Ok(FineBuffer {
        tokens,
        n_history,
        n_pad_end,
    })
}

/// Fill in codebooks `coarse.rows()..8` for every frame of `coarse`.
#[instrument(skip_all, fields(rows = coarse.rows(), frames = coarse.frames()))]
pub fn generate_fine(
    model: &mut dyn FineLm,
    coarse: &CodebookMatrix,
    history: Option<&HistoryPrompt>,
    opts: &FineOptions,
    sampler: &mut Sampler,
    ctx: &ExecutionContext,
) -> BarkResult<CodebookMatrix> {
    if coarse.rows() == 0 || coarse.rows() >= N_FINE_CODEBOOKS {
        return Err(BarkError::invalid_input(format!(
            "coarse input must have 1 to {} codebooks, got {}",
            N_FINE_CODEBOOKS - 1,
            coarse.rows()
        )));
    }
    if coarse.frames() == 0 {
        return Err(BarkError::invalid_input("coarse input has no frames"));
    }
    coarse.validate_codebooks(None, "coarse input")?;

    let fine_history = match history {
        Some(h) => {
            h.validate()?;
            h.fine.as_ref()
        }
        None => None,
    };

    let start = Instant::now();
    let buffer = build_fine_buffer(coarse, fine_history)?;
    let n_history = buffer.n_history;
    let n_pad_end = buffer.n_pad_end;
    let filled = ctx.with_placement(model, |model| {
        chunk_loop(model, buffer.tokens, coarse.rows(), coarse.frames(), n_history, opts, sampler)
    })?;

    let fine = filled.slice_frames(n_history, filled.frames() - n_pad_end);
    if fine.frames() != coarse.frames() {
        return Err(BarkError::internal(format!(
            "fine output has {} frames, expected {}",
            fine.frames(),
            coarse.frames()
        )));
    }
    info!(
        frames = fine.frames(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Fine generation finished"
    );
    Ok(fine)
}

fn chunk_loop(
    model: &mut dyn FineLm,
    mut tokens: CodebookMatrix,
    n_coarse: usize,
    frames: usize,
    n_history: usize,
    opts: &FineOptions,
    sampler: &mut Sampler,
) -> BarkResult<CodebookMatrix> {
    let total = tokens.frames();
    let n_loops = fine_loop_count(frames, n_history);
    let pb = stage_bar("fine", n_loops as u64, opts.silent);

    for n in 0..n_loops {
        let start = (n * FINE_HISTORY_LEN).min(total - FINE_CONTEXT_LEN);
        let start_fill = (n_history + n * FINE_HISTORY_LEN).min(total - FINE_HISTORY_LEN);
        let rel_fill = start_fill - start;
        let mut window = tokens.slice_frames(start, start + FINE_CONTEXT_LEN);

        for codebook in n_coarse..N_FINE_CODEBOOKS {
            let logits = model.forward(codebook, &window)?;
            if logits.len() != FINE_CONTEXT_LEN {
                return Err(BarkError::inference(format!(
                    "fine model returned {} positions, expected {FINE_CONTEXT_LEN}",
                    logits.len()
                )));
            }
            for (pos, row) in logits.iter().enumerate().skip(rel_fill) {
                if row.len() < CODEBOOK_SIZE {
                    return Err(BarkError::inference(format!(
                        "fine model returned {} logits, expected at least {CODEBOOK_SIZE}",
                        row.len()
                    )));
                }
                let relevant = &row[..CODEBOOK_SIZE];
                let pred = match opts.temperature {
                    None => argmax(relevant),
                    Some(temp) => {
                        let params = SamplingConfig::stage(temp, None, None);
                        sampler.sample_with(relevant, &params)?.token
                    }
                };
                window.set(codebook, pos, pred as u32);
            }
        }

        for codebook in n_coarse..N_FINE_CODEBOOKS {
            for pos in rel_fill..FINE_CONTEXT_LEN {
                tokens.set(codebook, start + pos, window.get(codebook, pos));
            }
        }
        debug!(chunk = n, start, start_fill, "Fine chunk filled");
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(tokens)
}
