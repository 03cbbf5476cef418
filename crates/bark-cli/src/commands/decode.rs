//! Decode command implementation.

use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Result};
use tracing::info;

use audio_codec::write_wav;
use bark_core::{CodebookMatrix, PipelineConfig};
use history_prompt::{inspect_archive, load_fine_prompt, read_codebooks_npy};

use super::build_pipeline;

/// Codebooks to decode from a `.npy` matrix or an archive's `fine_prompt`.
fn load_codes(input: &Path) -> Result<CodebookMatrix> {
    match input.extension().and_then(|e| e.to_str()) {
        Some("npz") => {
            for array in inspect_archive(input)? {
                println!("{array}");
            }
            Ok(load_fine_prompt(input)?)
        }
        Some("npy") => Ok(read_codebooks_npy(input)?),
        _ => bail!(
            "unsupported token file {}, expected .npy or .npz",
            input.display()
        ),
    }
}

/// Run the decode command.
pub fn run(config: &PipelineConfig, input: &Path, output: &Path, decode_on_cpu: bool) -> Result<()> {
    let codes = load_codes(input)?;
    let mut pipeline = build_pipeline(config)?;

    let start = Instant::now();
    let audio = pipeline.codec_decode(&codes, decode_on_cpu)?;
    write_wav(output, &audio)?;

    info!(
        frames = codes.frames(),
        samples = audio.num_samples(),
        output = %output.display(),
        "Decoded audio saved"
    );
    println!(
        "[{}, {}] tokens -> {:.2} sec at {} Hz -> {} ({} ms)",
        codes.rows(),
        codes.frames(),
        audio.duration_secs(),
        audio.sample_rate,
        output.display(),
        start.elapsed().as_millis()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_util::config_in;
    use audio_codec::read_wav;
    use bark_core::{HistoryPrompt, SemanticTokens};
    use history_prompt::{save_history_npz, write_codebooks_npy};
    use tempfile::tempdir;

    #[test]
    fn test_decode_npy() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("fine.npy");
        let output = dir.path().join("out.wav");
        write_codebooks_npy(&input, &CodebookMatrix::filled(8, 75, 17)).unwrap();

        run(&config_in(dir.path()), &input, &output, false).unwrap();

        let wav = read_wav(&output).unwrap();
        assert_eq!(wav.sample_rate, 24_000);
        assert_eq!(wav.pcm.len(), 24_000);
    }

    #[test]
    fn test_decode_archive_fine_prompt_on_cpu() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("speaker.npz");
        let history = HistoryPrompt {
            semantic: Some(SemanticTokens::new(vec![1, 2, 3])),
            coarse: None,
            fine: Some(CodebookMatrix::filled(8, 30, 5)),
        };
        save_history_npz(&input, &history).unwrap();

        let output = dir.path().join("out.wav");
        run(&config_in(dir.path()), &input, &output, true).unwrap();
        assert!(output.exists());
    }

    #[test]
    fn test_decode_ignores_unusable_prompts_beside_fine() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("codes.npz");
        // three coarse rows would fail history validation
        let history = HistoryPrompt {
            semantic: Some(SemanticTokens::new(vec![1, 2, 3])),
            coarse: Some(CodebookMatrix::filled(3, 30, 5)),
            fine: Some(CodebookMatrix::filled(8, 30, 5)),
        };
        save_history_npz(&input, &history).unwrap();
        assert!(history_prompt::load_history_npz(&input).is_err());

        let output = dir.path().join("out.wav");
        run(&config_in(dir.path()), &input, &output, false).unwrap();
        assert_eq!(read_wav(&output).unwrap().pcm.len(), 30 * 320);
    }

    #[test]
    fn test_decode_archive_without_fine_prompt() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("semantic_only.npz");
        let history = HistoryPrompt {
            semantic: Some(SemanticTokens::new(vec![1, 2, 3])),
            ..Default::default()
        };
        save_history_npz(&input, &history).unwrap();

        let err = run(&config_in(dir.path()), &input, &dir.path().join("o.wav"), false)
            .unwrap_err();
        assert!(err.to_string().contains("fine_prompt"));
    }
}
