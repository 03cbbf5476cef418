//! Prompts command: a recording to coarse and fine history prompts.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use audio_codec::{flatten_audio, read_wav};
use bark_core::{PipelineConfig, Waveform};
use history_prompt::{save_history_npz, write_codebooks_npy};

use super::build_pipeline;

/// Run the prompts command.
///
/// An `.npz` output gets both arrays in one archive; any other output is a
/// directory receiving `coarse_prompt.npy` and `fine_prompt.npy`. With
/// `speaker` the prompt is also stored as a custom speaker.
pub fn run(config: &PipelineConfig, input: &Path, output: &Path, speaker: Option<&str>) -> Result<()> {
    let wav = read_wav(input)?;
    let audio = Waveform::new(flatten_audio(&wav.pcm, wav.channels), wav.sample_rate);
    let mut pipeline = build_pipeline(config)?;

    let start = Instant::now();
    let prompt = pipeline.encode_prompt(&audio)?;
    let (coarse, fine) = match (&prompt.coarse, &prompt.fine) {
        (Some(coarse), Some(fine)) => (coarse, fine),
        _ => anyhow::bail!("encoder returned an incomplete prompt"),
    };

    if output.extension().and_then(|e| e.to_str()) == Some("npz") {
        save_history_npz(output, &prompt)?;
    } else {
        std::fs::create_dir_all(output)
            .with_context(|| format!("cannot create output directory {}", output.display()))?;
        write_codebooks_npy(output.join("coarse_prompt.npy"), coarse)?;
        write_codebooks_npy(output.join("fine_prompt.npy"), fine)?;
    }
    info!(frames = fine.frames(), output = %output.display(), "Prompts saved");

    if let Some(name) = speaker {
        let path = pipeline.registry().save_custom_speaker(name, &prompt)?;
        println!("Saved speaker '{name}' to {}", path.display());
    }

    println!(
        "{:.2} sec -> coarse [{}, {}] + fine [{}, {}] -> {} ({} ms)",
        audio.duration_secs(),
        coarse.rows(),
        coarse.frames(),
        fine.rows(),
        fine.frames(),
        output.display(),
        start.elapsed().as_millis()
    );
    Ok(())
}
