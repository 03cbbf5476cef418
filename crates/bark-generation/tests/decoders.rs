//! End-to-end decoder tests against the mock models.

use bark_core::constants::{CODEBOOK_SIZE, SEMANTIC_VOCAB_SIZE};
use bark_core::{
    BarkError, CoarseOptions, CodebookMatrix, ExecutionContext, FineOptions, HistoryPrompt,
    SemanticOptions, SemanticTokens,
};
use bark_generation::semantic::SEMANTIC_PROMPT_LEN;
use bark_generation::{
    generate_coarse, generate_fine, generate_semantic, MockCausalLm, MockFineLm, Sampler,
};
use text_tokenizer::MockTextEncoder;

fn quiet_semantic() -> SemanticOptions {
    SemanticOptions {
        silent: true,
        ..Default::default()
    }
}

fn quiet_coarse() -> CoarseOptions {
    CoarseOptions {
        silent: true,
        ..Default::default()
    }
}

fn semantic_input(len: usize) -> SemanticTokens {
    SemanticTokens::new((0..len as u32).map(|i| (i * 37) % 10_000).collect())
}

#[test]
fn test_semantic_tokens_in_vocabulary() {
    let mut model = MockCausalLm::semantic(3).with_eos_after(SEMANTIC_PROMPT_LEN, 40);
    let mut sampler = Sampler::seeded(Some(1));
    let tokens = generate_semantic(
        &mut model,
        &MockTextEncoder::default(),
        "The quick brown fox",
        None,
        &quiet_semantic(),
        &mut sampler,
        &ExecutionContext::cpu(),
    )
    .unwrap();

    assert_eq!(tokens.len(), 40);
    assert!(tokens.ids().iter().all(|&t| (t as usize) < SEMANTIC_VOCAB_SIZE));
}

#[test]
fn test_semantic_zero_duration_stops_immediately() {
    let mut model = MockCausalLm::semantic(3);
    let opts = SemanticOptions {
        max_gen_duration_s: Some(0.0),
        ..quiet_semantic()
    };
    let tokens = generate_semantic(
        &mut model,
        &MockTextEncoder::default(),
        "hello",
        None,
        &opts,
        &mut Sampler::seeded(Some(2)),
        &ExecutionContext::cpu(),
    )
    .unwrap();

    assert!(tokens.len() <= 1);
    assert!(model.calls() <= 1);
}

#[test]
fn test_semantic_step_budget_without_early_stop() {
    let mut model = MockCausalLm::semantic(5).with_eos_after(SEMANTIC_PROMPT_LEN, 0);
    let opts = SemanticOptions {
        allow_early_stop: false,
        ..quiet_semantic()
    };
    let tokens = generate_semantic(
        &mut model,
        &MockTextEncoder::default(),
        "hello",
        None,
        &opts,
        &mut Sampler::seeded(Some(2)),
        &ExecutionContext::cpu(),
    )
    .unwrap();

    // the end slot is never offered, so the loop runs its full budget
    assert_eq!(tokens.len(), 768);
}

#[test]
fn test_semantic_cache_reuse_matches_full_context() {
    let run = |use_kv_caching: bool| {
        let mut model = MockCausalLm::semantic(9).with_eos_after(SEMANTIC_PROMPT_LEN, 25);
        let opts = SemanticOptions {
            use_kv_caching,
            ..quiet_semantic()
        };
        generate_semantic(
            &mut model,
            &MockTextEncoder::default(),
            "cache me",
            None,
            &opts,
            &mut Sampler::seeded(Some(11)),
            &ExecutionContext::cpu(),
        )
        .unwrap()
    };
    assert_eq!(run(false), run(true));
}

#[test]
fn test_semantic_rejects_bad_history() {
    let history = HistoryPrompt {
        semantic: Some(SemanticTokens::new(vec![10_000])),
        ..Default::default()
    };
    let err = generate_semantic(
        &mut MockCausalLm::semantic(0),
        &MockTextEncoder::default(),
        "hello",
        Some(&history),
        &quiet_semantic(),
        &mut Sampler::seeded(Some(0)),
        &ExecutionContext::cpu(),
    )
    .unwrap_err();
    assert!(matches!(err, BarkError::InvalidHistory(_)));
}

#[test]
fn test_coarse_shape_follows_ratio() {
    let semantic = semantic_input(100);
    let coarse = generate_coarse(
        &mut MockCausalLm::coarse(4),
        &semantic,
        None,
        &quiet_coarse(),
        &mut Sampler::seeded(Some(5)),
        &ExecutionContext::cpu(),
    )
    .unwrap();

    // floor(100 * 3.006 / 2) = 150 frames
    assert_eq!(coarse.shape(), (2, 150));
    assert!(coarse.max_value().unwrap() < CODEBOOK_SIZE as u32);
}

#[test]
fn test_coarse_with_history() {
    let history = HistoryPrompt {
        semantic: Some(semantic_input(300)),
        coarse: Some(CodebookMatrix::filled(2, 450, 17)),
        fine: None,
    };
    let coarse = generate_coarse(
        &mut MockCausalLm::coarse(4),
        &semantic_input(61),
        Some(&history),
        &quiet_coarse(),
        &mut Sampler::seeded(Some(5)),
        &ExecutionContext::cpu(),
    )
    .unwrap();

    // floor(61 * 3.006 / 2) = 91 frames
    assert_eq!(coarse.shape(), (2, 91));
    assert!(coarse.max_value().unwrap() < CODEBOOK_SIZE as u32);
}

#[test]
fn test_coarse_top_p_zero_is_greedy() {
    let opts = CoarseOptions {
        top_p: Some(0.0),
        ..quiet_coarse()
    };
    let run = |seed: u64| {
        generate_coarse(
            &mut MockCausalLm::coarse(8),
            &semantic_input(30),
            None,
            &opts,
            &mut Sampler::seeded(Some(seed)),
            &ExecutionContext::cpu(),
        )
        .unwrap()
    };
    assert_eq!(run(1), run(2));
}

#[test]
fn test_coarse_rejects_bad_options() {
    let opts = CoarseOptions {
        max_coarse_history: 700,
        ..quiet_coarse()
    };
    let err = generate_coarse(
        &mut MockCausalLm::coarse(0),
        &semantic_input(10),
        None,
        &opts,
        &mut Sampler::seeded(Some(0)),
        &ExecutionContext::cpu(),
    )
    .unwrap_err();
    assert!(matches!(err, BarkError::InvalidInput(_)));
}

#[test]
fn test_fine_preserves_length_and_coarse_rows() {
    let coarse = CodebookMatrix::from_rows(vec![
        (0..600).map(|i| i % 1024).collect(),
        (0..600).map(|i| (i * 7) % 1024).collect(),
    ])
    .unwrap();
    let fine = generate_fine(
        &mut MockFineLm::new(1),
        &coarse,
        None,
        &FineOptions::default(),
        &mut Sampler::seeded(Some(3)),
        &ExecutionContext::cpu(),
    )
    .unwrap();

    assert_eq!(fine.shape(), (8, 600));
    assert_eq!(fine.row(0), coarse.row(0));
    assert_eq!(fine.row(1), coarse.row(1));
    assert!(fine.max_value().unwrap() < CODEBOOK_SIZE as u32);
}

#[test]
fn test_fine_multiple_chunks_with_history() {
    let coarse = CodebookMatrix::filled(2, 1100, 3);
    let history = HistoryPrompt {
        fine: Some(CodebookMatrix::filled(8, 300, 44)),
        ..Default::default()
    };
    let mut model = MockFineLm::new(2);
    let opts = FineOptions {
        temperature: None,
        silent: true,
    };
    let fine = generate_fine(
        &mut model,
        &coarse,
        Some(&history),
        &opts,
        &mut Sampler::seeded(Some(0)),
        &ExecutionContext::cpu(),
    )
    .unwrap();

    assert_eq!(fine.frames(), 1100);
    // 1100 - (1024 - 300) = 376 uncovered -> 1 extra loop, 6 codebooks each
    assert_eq!(model.calls(), 2 * 6);
}

#[test]
fn test_fine_rejects_full_input() {
    let err = generate_fine(
        &mut MockFineLm::new(0),
        &CodebookMatrix::filled(8, 10, 0),
        None,
        &FineOptions::default(),
        &mut Sampler::seeded(Some(0)),
        &ExecutionContext::cpu(),
    )
    .unwrap_err();
    assert!(matches!(err, BarkError::InvalidInput(_)));
}

#[test]
fn test_offload_moves_model_around_stage() {
    let mut model = MockCausalLm::semantic(1).with_eos_after(SEMANTIC_PROMPT_LEN, 2);
    let ctx = ExecutionContext::new(candle_core::Device::Cpu, true);
    generate_semantic(
        &mut model,
        &MockTextEncoder::default(),
        "hi",
        None,
        &quiet_semantic(),
        &mut Sampler::seeded(Some(0)),
        &ctx,
    )
    .unwrap();
    assert_eq!(model.moves(), 2);
}
