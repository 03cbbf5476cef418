//! Bark command-line interface.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;

mod commands;

use commands::PipelineArgs;

/// Bark text-to-audio generation CLI
#[derive(Debug, Parser)]
#[command(name = "bark")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (defaults to the config file's level, then "info")
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Log format (json or text)
    #[arg(long, global = true)]
    log_format: Option<LogFormatArg>,

    #[command(flatten)]
    pipeline: PipelineArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Json,
    Text,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generate speech from text
    Generate {
        /// Input text or file path (use @file.txt for file input)
        input: String,

        /// Output file path (WAV format)
        #[arg(short, long)]
        output: PathBuf,

        /// History prompt: preset name, saved speaker or .npz path
        #[arg(long)]
        history: Option<String>,

        /// Also write the semantic, coarse and fine tokens to this .npz archive
        #[arg(long)]
        full: Option<PathBuf>,

        /// Save the generation as a reusable custom speaker
        #[arg(long)]
        save_speaker: Option<String>,

        /// Sampling temperature of the text-to-semantic stage
        #[arg(long)]
        text_temp: Option<f32>,

        /// Sampling temperature of the coarse stage
        #[arg(long)]
        waveform_temp: Option<f32>,
    },

    /// Generate semantic tokens from text (.npy output)
    Semantic {
        /// Input text or file path (use @file.txt for file input)
        input: String,

        /// Output .npy path
        #[arg(short, long)]
        output: PathBuf,

        /// History prompt: preset name, saved speaker or .npz path
        #[arg(long)]
        history: Option<String>,

        /// Sampling temperature
        #[arg(long)]
        temp: Option<f32>,
    },

    /// Generate the two coarse codebooks from semantic tokens
    Coarse {
        /// Semantic tokens (.npy, or .npz with a semantic_prompt)
        input: PathBuf,

        /// Output .npy path
        #[arg(short, long)]
        output: PathBuf,

        /// History prompt: preset name, saved speaker or .npz path
        #[arg(long)]
        history: Option<String>,

        /// Sampling temperature
        #[arg(long)]
        temp: Option<f32>,
    },

    /// Complete coarse codebooks to all eight
    Fine {
        /// Coarse tokens (.npy)
        input: PathBuf,

        /// Output .npy path
        #[arg(short, long)]
        output: PathBuf,

        /// History prompt: preset name, saved speaker or .npz path
        #[arg(long)]
        history: Option<String>,

        /// Sampling temperature (omit for the configured default)
        #[arg(long)]
        temp: Option<f32>,
    },

    /// Render semantic tokens to audio through the remaining stages
    Waveform {
        /// Semantic tokens (.npy, .npz with a semantic_prompt, or a .zip of .npy files)
        input: PathBuf,

        /// Output WAV file, or output directory for a .zip input
        #[arg(short, long)]
        output: PathBuf,

        /// History prompt: preset name, saved speaker or .npz path
        #[arg(long)]
        history: Option<String>,

        /// Run the codec on the CPU regardless of the selected device
        #[arg(long)]
        cpu: bool,
    },

    /// Encode a recording into coarse and fine history prompts
    Prompts {
        /// Input WAV file
        input: PathBuf,

        /// Output .npz archive, or a directory for separate .npy files
        #[arg(short, long)]
        output: PathBuf,

        /// Also save the prompts as a custom speaker under this name
        #[arg(long)]
        speaker: Option<String>,
    },

    /// Decode codebook tokens to audio
    Decode {
        /// Tokens: .npy matrix or .npz archive with a fine_prompt
        input: PathBuf,

        /// Output file path (WAV format)
        #[arg(short, long)]
        output: PathBuf,

        /// Run the codec on the CPU regardless of the selected device
        #[arg(long)]
        cpu: bool,
    },

    /// Describe a history archive or WAV file
    Inspect {
        /// .npz archive or .wav file
        input: PathBuf,

        /// Print the archive listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Transcribe a WAV file
    Transcribe {
        /// Input WAV file
        input: PathBuf,

        /// Recognition model name
        #[arg(short, long, default_value = "base")]
        model: String,
    },

    /// List history prompts
    Presets {
        /// Include every allowed built-in name, not only those present on disk
        #[arg(long)]
        all: bool,
    },

    /// Show version and configuration info
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = cli.pipeline.load().context("failed to load configuration")?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let format = match cli.log_format {
        Some(LogFormatArg::Json) => runtime::logging::LogFormat::Json,
        Some(LogFormatArg::Text) => runtime::logging::LogFormat::Text,
        None => config.logging.format.parse()?,
    };
    runtime::logging::init_logging(level, format).context("failed to set up logging")?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Bark CLI");

    match cli.command {
        Commands::Generate {
            input,
            output,
            history,
            full,
            save_speaker,
            text_temp,
            waveform_temp,
        } => {
            let options = commands::generate::GenerateOptions {
                input,
                output,
                history,
                full,
                save_speaker,
                text_temp,
                waveform_temp,
            };
            commands::generate::run(config, options)
                .await
                .context("generation failed")?;
        }
        Commands::Semantic {
            input,
            output,
            history,
            temp,
        } => {
            commands::stages::semantic(&config, &input, &output, history.as_deref(), temp)
                .context("semantic generation failed")?;
        }
        Commands::Coarse {
            input,
            output,
            history,
            temp,
        } => {
            commands::stages::coarse(&config, &input, &output, history.as_deref(), temp)
                .context("coarse generation failed")?;
        }
        Commands::Fine {
            input,
            output,
            history,
            temp,
        } => {
            commands::stages::fine(&config, &input, &output, history.as_deref(), temp)
                .context("fine generation failed")?;
        }
        Commands::Waveform {
            input,
            output,
            history,
            cpu,
        } => {
            commands::stages::waveform(&config, &input, &output, history.as_deref(), cpu)
                .context("waveform generation failed")?;
        }
        Commands::Prompts {
            input,
            output,
            speaker,
        } => {
            commands::prompts::run(&config, &input, &output, speaker.as_deref())
                .context("prompt extraction failed")?;
        }
        Commands::Decode { input, output, cpu } => {
            commands::decode::run(&config, &input, &output, cpu).context("decoding failed")?;
        }
        Commands::Inspect { input, json } => {
            commands::inspect::run(&input, json).context("inspection failed")?;
        }
        Commands::Transcribe { input, model } => {
            commands::transcribe::run(&input, &model).context("transcription failed")?;
        }
        Commands::Presets { all } => {
            commands::presets::run(&config, all).context("listing presets failed")?;
        }
        Commands::Info => {
            commands::info::run(&config);
        }
    }

    Ok(())
}
