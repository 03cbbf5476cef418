//! Info command implementation.

use bark_core::PipelineConfig;
use runtime::device::{is_cuda_available, is_metal_available};
use runtime::{ModelKind, WHISPER_MODELS};

/// Run the info command.
pub fn run(config: &PipelineConfig) {
    println!("Bark Rust Engine");
    println!("================");
    println!();
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Build info:");
    println!("  Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
    println!(
        "  CUDA: {}",
        if is_cuda_available() { "enabled" } else { "disabled" }
    );
    println!(
        "  Metal: {}",
        if is_metal_available() { "enabled" } else { "disabled" }
    );

    println!();
    println!("Configuration:");
    println!("  Device:          {:?}", config.device.device_type);
    println!("  Offload to CPU:  {}", config.offload_cpu);
    println!("  Seed:            {:?}", config.generation.seed);
    println!("  Prompt dir:      {}", config.builtin_prompt_dir.display());
    println!("  Speaker dir:     {}", config.custom_speaker_dir.display());
    match &config.tokenizer_path {
        Some(path) => println!("  Tokenizer:       {}", path.display()),
        None => println!("  Tokenizer:       (built-in mock)"),
    }

    println!();
    println!("Models:");
    for kind in ModelKind::ALL {
        println!("  {kind}");
    }
    println!("Transcription models: {}", WHISPER_MODELS.join(", "));

    println!();
    println!("Crates:");
    println!("  bark-core: Core types, traits and configuration");
    println!("  text-tokenizer: BERT text tokenization");
    println!("  history-prompt: Speaker prompts and token archives");
    println!("  bark-generation: Semantic, coarse and fine decoders");
    println!("  audio-codec: Codec decoding, PCM and WAV handling");
    println!("  runtime: Pipeline orchestration and model slots");
    println!("  bark-cli: This CLI tool");
}
