//! Integration tests for the Bark pipeline.
//!
//! These run every stage end to end over the mock models.

use bark_core::constants::{CODEBOOK_SIZE, N_COARSE_CODEBOOKS, N_FINE_CODEBOOKS, SAMPLE_RATE};
use bark_core::{BarkError, CodebookMatrix, HistoryPrompt, PipelineConfig, SemanticTokens};
use history_prompt::{save_history_npz, HistoryRef};
use runtime::{BarkPipeline, ModelKind};
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> PipelineConfig {
    let mut config = PipelineConfig {
        builtin_prompt_dir: dir.path().join("prompts"),
        custom_speaker_dir: dir.path().join("speakers"),
        ..Default::default()
    };
    config.generation.semantic.silent = true;
    config.generation.coarse.silent = true;
    config.generation.seed = Some(42);
    config
}

fn speaker_history() -> HistoryPrompt {
    HistoryPrompt {
        semantic: Some(SemanticTokens::new((0..200).map(|i| (i * 13) % 10_000).collect())),
        coarse: Some(CodebookMatrix::filled(2, 300, 77)),
        fine: Some(CodebookMatrix::filled(8, 300, 5)),
    }
}

/// Text → semantic → coarse → fine → audio.
#[test]
fn test_text_to_speech_full_generation() {
    let dir = TempDir::new().unwrap();
    let mut pipeline = BarkPipeline::new_mock(&test_config(&dir));

    let out = pipeline
        .text_to_speech("Hello, world! How are you?", None, true)
        .unwrap();
    let full = out.full.expect("full generation requested");

    // mock semantic model stops after 100 tokens
    assert_eq!(full.semantic.len(), 100);
    assert_eq!(full.coarse.shape(), (N_COARSE_CODEBOOKS, 150));
    assert_eq!(full.fine.shape(), (N_FINE_CODEBOOKS, 150));
    assert_eq!(full.fine.row(0), full.coarse.row(0));
    assert!(full.fine.max_value().unwrap() < CODEBOOK_SIZE as u32);

    assert_eq!(out.audio.sample_rate, SAMPLE_RATE);
    assert!((out.audio.duration_secs() - 2.0).abs() < 1e-3);
    for &sample in &out.audio.samples {
        assert!((-1.0..=1.0).contains(&sample), "sample {sample} out of range");
    }
}

/// Same seed, same tokens.
#[test]
fn test_seeded_runs_are_reproducible() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let run = || {
        BarkPipeline::new_mock(&config)
            .text_to_speech("reproducible", None, true)
            .unwrap()
            .full
            .unwrap()
    };
    let a = run();
    let b = run();
    assert_eq!(a.semantic, b.semantic);
    assert_eq!(a.fine, b.fine);
}

/// Custom speaker saved from one run conditions the next.
#[test]
fn test_saved_speaker_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut pipeline = BarkPipeline::new_mock(&test_config(&dir));

    let full = pipeline
        .text_to_speech("first take", None, true)
        .unwrap()
        .full
        .unwrap();
    let path = pipeline.save_speaker("narrator", &full).unwrap();
    assert!(path.exists());
    assert_eq!(
        pipeline.registry().list_custom_speakers().unwrap(),
        vec!["narrator".to_string()]
    );

    let history = HistoryRef::Preset("narrator".into());
    let out = pipeline
        .text_to_speech("second take", Some(&history), false)
        .unwrap();
    assert!(out.full.is_none());
    assert!(out.audio.num_samples() > 0);
}

/// An explicit archive path works like a preset.
#[test]
fn test_history_from_file() {
    let dir = TempDir::new().unwrap();
    let mut pipeline = BarkPipeline::new_mock(&test_config(&dir));
    let path = dir.path().join("voice.npz");
    save_history_npz(&path, &speaker_history()).unwrap();

    let semantic = SemanticTokens::new((0..40).collect());
    let out = pipeline
        .semantic_to_waveform(&semantic, Some(&HistoryRef::File(path)), true, false)
        .unwrap();
    // floor(40 * 3.006 / 2) = 60 frames
    assert_eq!(out.full.unwrap().fine.frames(), 60);
}

/// A missing archive is an error, an unknown preset name is not.
#[test]
fn test_history_resolution_errors() {
    let dir = TempDir::new().unwrap();
    let mut pipeline = BarkPipeline::new_mock(&test_config(&dir));

    let missing = HistoryRef::File(dir.path().join("nope.npz"));
    assert!(pipeline.generate_semantic("hi", Some(&missing)).is_err());

    let unknown = HistoryRef::Preset("nobody".into());
    let tokens = pipeline.generate_semantic("hi", Some(&unknown)).unwrap();
    assert_eq!(tokens.len(), 100);
}

/// A full run with an unknown preset matches an unconditioned run.
#[test]
fn test_text_to_speech_with_unknown_preset() {
    let dir = TempDir::new().unwrap();
    let unknown = HistoryRef::Preset("nobody".into());

    let conditioned = BarkPipeline::new_mock(&test_config(&dir))
        .text_to_speech("Hello there", Some(&unknown), true)
        .unwrap();
    let plain = BarkPipeline::new_mock(&test_config(&dir))
        .text_to_speech("Hello there", None, true)
        .unwrap();

    let full = conditioned.full.unwrap();
    assert_eq!(full.semantic.len(), 100);
    assert_eq!(full.coarse.shape(), (N_COARSE_CODEBOOKS, 150));
    assert_eq!(full.fine.shape(), (N_FINE_CODEBOOKS, 150));
    assert_eq!(conditioned.audio.num_samples(), 150 * 320);
    assert_eq!(Some(full), plain.full);
    assert_eq!(conditioned.audio.samples, plain.audio.samples);
}

/// Invalid inline history is rejected before any decoding.
#[test]
fn test_invalid_inline_history() {
    let dir = TempDir::new().unwrap();
    let mut pipeline = BarkPipeline::new_mock(&test_config(&dir));
    let bad = HistoryRef::Inline(HistoryPrompt {
        coarse: Some(CodebookMatrix::filled(3, 10, 0)),
        ..Default::default()
    });
    let err = pipeline
        .generate_coarse(&SemanticTokens::new(vec![1, 2, 3]), Some(&bad))
        .unwrap_err();
    assert!(matches!(err, BarkError::InvalidHistory(_)));
}

/// Stages can be driven one at a time and models released afterwards.
#[test]
fn test_stage_by_stage_and_unload() {
    let dir = TempDir::new().unwrap();
    let mut pipeline = BarkPipeline::new_mock(&test_config(&dir));

    let semantic = pipeline.generate_semantic("one step at a time", None).unwrap();
    let coarse = pipeline.generate_coarse(&semantic, None).unwrap();
    let fine = pipeline.generate_fine(&coarse, None).unwrap();
    let audio = pipeline.codec_decode(&fine, true).unwrap();

    assert_eq!(audio.num_samples(), fine.frames() * 320);
    assert_eq!(pipeline.loaded_models(), ModelKind::ALL.to_vec());

    pipeline.unload_all();
    assert!(pipeline.loaded_models().is_empty());
}
