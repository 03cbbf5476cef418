//! Transcribe command implementation.

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use tracing::info;

use audio_codec::read_wav;
use runtime::TranscriptionService;

/// Run the transcribe command.
pub fn run(input: &Path, model: &str) -> Result<()> {
    let wav = read_wav(input)?;

    let mut service = TranscriptionService::mock();
    service.load(model)?;

    let start = Instant::now();
    let text = service.transcribe(wav.sample_rate, wav.channels, &wav.pcm)?;

    info!(
        model = model,
        chars = text.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Transcription finished"
    );
    println!("{text}");
    Ok(())
}
