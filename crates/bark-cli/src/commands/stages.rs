//! Single-stage commands that read and write token arrays.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use audio_codec::write_wav;
use bark_core::PipelineConfig;
use history_prompt::{
    load_semantic_file, read_codebooks_npy, read_semantic_bundle, write_bundle,
    write_codebooks_npy, write_semantic_npy, HistoryRef,
};

use super::{build_pipeline, read_text_input};

/// Archive collecting the audio of a batch run.
pub const GENERATIONS_BUNDLE: &str = "generations.zip";

fn history_ref(history: Option<&str>) -> Option<HistoryRef> {
    history.filter(|s| !s.is_empty()).map(HistoryRef::parse)
}

/// Text to semantic tokens.
pub fn semantic(
    config: &PipelineConfig,
    input: &str,
    output: &Path,
    history: Option<&str>,
    temp: Option<f32>,
) -> Result<()> {
    let text = read_text_input(input)?;
    let mut pipeline = build_pipeline(config)?;
    if let Some(temp) = temp {
        pipeline.generation_mut().semantic.temperature = temp;
    }

    let start = Instant::now();
    let tokens = pipeline.generate_semantic(&text, history_ref(history).as_ref())?;
    write_semantic_npy(output, &tokens)?;

    info!(tokens = tokens.len(), output = %output.display(), "Semantic tokens saved");
    println!(
        "{} semantic tokens -> {} ({} ms)",
        tokens.len(),
        output.display(),
        start.elapsed().as_millis()
    );
    Ok(())
}

/// Semantic tokens to the two coarse codebooks.
pub fn coarse(
    config: &PipelineConfig,
    input: &Path,
    output: &Path,
    history: Option<&str>,
    temp: Option<f32>,
) -> Result<()> {
    let semantic = load_semantic_file(input)?;
    let mut pipeline = build_pipeline(config)?;
    if let Some(temp) = temp {
        pipeline.generation_mut().coarse.temperature = temp;
    }

    let start = Instant::now();
    let coarse = pipeline.generate_coarse(&semantic, history_ref(history).as_ref())?;
    write_codebooks_npy(output, &coarse)?;

    let (rows, frames) = coarse.shape();
    info!(rows, frames, output = %output.display(), "Coarse tokens saved");
    println!(
        "{} semantic tokens -> coarse [{rows}, {frames}] -> {} ({} ms)",
        semantic.len(),
        output.display(),
        start.elapsed().as_millis()
    );
    Ok(())
}

/// Coarse codebooks to all eight.
pub fn fine(
    config: &PipelineConfig,
    input: &Path,
    output: &Path,
    history: Option<&str>,
    temp: Option<f32>,
) -> Result<()> {
    let coarse = read_codebooks_npy(input)?;
    let mut pipeline = build_pipeline(config)?;
    if temp.is_some() {
        pipeline.generation_mut().fine.temperature = temp;
    }

    let start = Instant::now();
    let fine = pipeline.generate_fine(&coarse, history_ref(history).as_ref())?;
    write_codebooks_npy(output, &fine)?;

    let (rows, frames) = fine.shape();
    info!(rows, frames, output = %output.display(), "Fine tokens saved");
    println!(
        "coarse [{}, {}] -> fine [{rows}, {frames}] -> {} ({} ms)",
        coarse.rows(),
        coarse.frames(),
        output.display(),
        start.elapsed().as_millis()
    );
    Ok(())
}

/// Semantic tokens straight to audio through the coarse, fine and codec stages.
///
/// A `.zip` input holds one semantic `.npy` per utterance. `output` is then a
/// directory that receives `<name>.wav` for each entry and a `generations.zip`
/// bundling them.
pub fn waveform(
    config: &PipelineConfig,
    input: &Path,
    output: &Path,
    history: Option<&str>,
    decode_on_cpu: bool,
) -> Result<()> {
    if input.extension().and_then(|e| e.to_str()) == Some("zip") {
        return waveform_batch(config, input, output, history, decode_on_cpu);
    }

    let semantic = load_semantic_file(input)?;
    let mut pipeline = build_pipeline(config)?;

    let start = Instant::now();
    let speech = pipeline.semantic_to_waveform(
        &semantic,
        history_ref(history).as_ref(),
        false,
        decode_on_cpu,
    )?;
    write_wav(output, &speech.audio)?;

    info!(
        tokens = semantic.len(),
        duration_secs = speech.audio.duration_secs(),
        output = %output.display(),
        "Audio saved to file"
    );
    println!(
        "{} semantic tokens -> {:.2} sec -> {} ({} ms)",
        semantic.len(),
        speech.audio.duration_secs(),
        output.display(),
        start.elapsed().as_millis()
    );
    Ok(())
}

fn waveform_batch(
    config: &PipelineConfig,
    input: &Path,
    out_dir: &Path,
    history: Option<&str>,
    decode_on_cpu: bool,
) -> Result<()> {
    let entries = read_semantic_bundle(input)?;
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("cannot create output directory {}", out_dir.display()))?;
    let mut pipeline = build_pipeline(config)?;
    let history = history_ref(history);

    let start = Instant::now();
    let mut written = Vec::with_capacity(entries.len());
    for (name, semantic) in &entries {
        let speech =
            pipeline.semantic_to_waveform(semantic, history.as_ref(), false, decode_on_cpu)?;
        let path = out_dir.join(format!("{name}.wav"));
        write_wav(&path, &speech.audio)?;
        info!(entry = %name, duration_secs = speech.audio.duration_secs(), "Batch entry rendered");
        println!("{name}: {} tokens -> {:.2} sec", semantic.len(), speech.audio.duration_secs());
        written.push(path);
    }

    let bundle = out_dir.join(GENERATIONS_BUNDLE);
    write_bundle(&bundle, &written)?;
    println!(
        "{} files -> {} ({} ms)",
        written.len(),
        bundle.display(),
        start.elapsed().as_millis()
    );
    Ok(())
}
