//! Text-to-speech command implementation.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use audio_codec::write_wav;
use bark_core::{HistoryPrompt, PipelineConfig};
use history_prompt::{save_history_npz, HistoryRef};

use super::{build_pipeline, read_text_input};

/// Options for the generate command.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub input: String,
    pub output: PathBuf,
    pub history: Option<String>,
    pub full: Option<PathBuf>,
    pub save_speaker: Option<String>,
    pub text_temp: Option<f32>,
    pub waveform_temp: Option<f32>,
}

/// Run the generate command.
pub async fn run(config: PipelineConfig, options: GenerateOptions) -> Result<()> {
    let start = Instant::now();
    let text = read_text_input(&options.input)?;

    info!(
        text_len = text.len(),
        output = %options.output.display(),
        history = ?options.history,
        "Starting generation"
    );

    let mut pipeline = build_pipeline(&config)?;
    if let Some(temp) = options.text_temp {
        pipeline.generation_mut().semantic.temperature = temp;
    }
    if let Some(temp) = options.waveform_temp {
        pipeline.generation_mut().coarse.temperature = temp;
    }

    let history = options.history.as_deref().map(HistoryRef::parse);
    let output_full = options.full.is_some() || options.save_speaker.is_some();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .context("invalid progress template")?,
    );
    spinner.set_message("Generating audio");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let gen_start = Instant::now();
    let (speech, pipeline) = tokio::task::spawn_blocking(move || {
        let speech = pipeline.text_to_speech(&text, history.as_ref(), output_full);
        (speech, pipeline)
    })
    .await
    .context("generation task panicked")?;
    spinner.finish_and_clear();
    let speech = speech?;
    let gen_duration = gen_start.elapsed();

    debug!(
        samples = speech.audio.num_samples(),
        sample_rate = speech.audio.sample_rate,
        gen_ms = gen_duration.as_millis(),
        "Generation completed"
    );

    let audio_secs = speech.audio.duration_secs();
    let rtf = if audio_secs > 0.0 {
        gen_duration.as_secs_f32() / audio_secs
    } else {
        0.0
    };

    write_wav(&options.output, &speech.audio)?;

    if let Some(full) = &speech.full {
        if let Some(path) = &options.full {
            save_history_npz(path, &HistoryPrompt::from(full.clone()))?;
            info!(path = %path.display(), "Full generation saved");
        }
        if let Some(name) = &options.save_speaker {
            let path = pipeline.save_speaker(name, full)?;
            println!("Saved speaker '{name}' to {}", path.display());
        }
    }

    let total_duration = start.elapsed();

    println!("Generation complete!");
    println!();
    println!("Output:    {}", options.output.display());
    if let Some(full) = &speech.full {
        println!("Tokens:    {} semantic, {} frames", full.semantic.len(), full.fine.frames());
    }
    println!();
    println!("Audio:");
    println!("  Duration:    {audio_secs:.2} sec");
    println!("  Samples:     {}", speech.audio.num_samples());
    println!("  Sample rate: {} Hz", speech.audio.sample_rate);
    println!();
    println!("Performance:");
    println!("  Generation:  {} ms", gen_duration.as_millis());
    println!("  Total:       {} ms", total_duration.as_millis());
    println!("  RTF:         {rtf:.3}x");

    info!(
        output = %options.output.display(),
        duration_secs = audio_secs,
        rtf = rtf,
        "Audio saved to file"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_util::config_in;
    use audio_codec::read_wav;
    use history_prompt::{inspect_archive, PresetRegistry};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_generate_basic() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("hello.wav");

        let options = GenerateOptions {
            input: "Hello world".to_string(),
            output: output.clone(),
            ..Default::default()
        };
        run(config_in(dir.path()), options).await.unwrap();

        let wav = read_wav(&output).unwrap();
        assert_eq!(wav.sample_rate, 24_000);
        assert_eq!(wav.channels, 1);
        assert!(!wav.pcm.is_empty());
    }

    #[tokio::test]
    async fn test_generate_writes_full_archive_and_speaker() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let full = dir.path().join("full.npz");

        let options = GenerateOptions {
            input: "Keep this voice".to_string(),
            output: dir.path().join("out.wav"),
            full: Some(full.clone()),
            save_speaker: Some("narrator".to_string()),
            ..Default::default()
        };
        run(config.clone(), options).await.unwrap();

        let names: Vec<String> = inspect_archive(&full)
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, ["coarse_prompt", "fine_prompt", "semantic_prompt"]);

        let registry = PresetRegistry::from_config(&config);
        assert_eq!(registry.list_custom_speakers().unwrap(), ["narrator"]);
    }

    #[tokio::test]
    async fn test_generate_with_saved_speaker() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());

        let first = GenerateOptions {
            input: "First".to_string(),
            output: dir.path().join("a.wav"),
            save_speaker: Some("me".to_string()),
            ..Default::default()
        };
        run(config.clone(), first).await.unwrap();

        let second = GenerateOptions {
            input: "Second".to_string(),
            output: dir.path().join("b.wav"),
            history: Some("me".to_string()),
            ..Default::default()
        };
        run(config, second).await.unwrap();
        assert!(dir.path().join("b.wav").exists());
    }

    #[tokio::test]
    async fn test_generate_empty_error() {
        let dir = tempdir().unwrap();
        let options = GenerateOptions {
            input: String::new(),
            output: dir.path().join("x.wav"),
            ..Default::default()
        };
        assert!(run(config_in(dir.path()), options).await.is_err());
    }

    #[tokio::test]
    async fn test_generate_missing_history_file() {
        let dir = tempdir().unwrap();
        let options = GenerateOptions {
            input: "Test".to_string(),
            output: dir.path().join("x.wav"),
            history: Some(dir.path().join("absent.npz").display().to_string()),
            ..Default::default()
        };
        assert!(run(config_in(dir.path()), options).await.is_err());
        assert!(!dir.path().join("x.wav").exists());
    }
}
