//! Inspect command implementation.

use std::path::Path;

use anyhow::{bail, Result};

use audio_codec::read_wav;
use history_prompt::inspect_archive;

/// Describe an `.npz` archive's arrays or a WAV file's layout.
pub fn run(input: &Path, json: bool) -> Result<()> {
    match input.extension().and_then(|e| e.to_str()) {
        Some("npz") => {
            let arrays = inspect_archive(input)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&arrays)?);
            } else {
                println!("{}: {} arrays", input.display(), arrays.len());
                for array in &arrays {
                    println!("  {array}");
                }
            }
        }
        Some("wav") => {
            let wav = read_wav(input)?;
            let channels = usize::from(wav.channels.max(1));
            let frames = wav.pcm.len() / channels;
            let secs = frames as f64 / f64::from(wav.sample_rate.max(1));
            println!("{}:", input.display());
            println!("  Encoding:    {}", wav.pcm.dtype_name());
            println!("  Channels:    {}", wav.channels);
            println!("  Sample rate: {} Hz", wav.sample_rate);
            println!("  Shape:       [{frames}, {}]", wav.channels);
            println!("  Duration:    {secs:.2} sec");
        }
        _ => bail!("unsupported file {}, expected .npz or .wav", input.display()),
    }
    Ok(())
}
