//! CLI command implementations.

pub mod decode;
pub mod generate;
pub mod info;
pub mod inspect;
pub mod presets;
pub mod prompts;
pub mod stages;
pub mod transcribe;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;

use bark_core::PipelineConfig;
use runtime::device::parse_device_type;
use runtime::{select_device, BarkMetrics, BarkPipeline, ModelLoaders};

/// Pipeline settings shared by every command.
#[derive(Debug, Default, Args)]
pub struct PipelineArgs {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Compute device (auto, cpu, cuda, metal)
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Keep models on the CPU between stages
    #[arg(long, global = true)]
    pub offload_cpu: bool,

    /// Random seed for deterministic generation
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// tokenizer.json of the text tokenizer
    #[arg(long, global = true)]
    pub tokenizer: Option<PathBuf>,

    /// Directory of built-in speaker prompts
    #[arg(long, global = true)]
    pub prompt_dir: Option<PathBuf>,

    /// Directory of saved custom speakers
    #[arg(long, global = true)]
    pub speaker_dir: Option<PathBuf>,

    /// Serve Prometheus metrics on this port
    #[arg(long, global = true)]
    pub metrics_port: Option<u16>,
}

impl PipelineArgs {
    /// Configuration file (or defaults) with command-line overrides applied.
    pub fn load(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("reading {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(device) = &self.device {
            config.device.device_type = parse_device_type(device);
        }
        config.offload_cpu |= self.offload_cpu;
        if self.seed.is_some() {
            config.generation.seed = self.seed;
        }
        if let Some(path) = &self.tokenizer {
            config.tokenizer_path = Some(path.clone());
        }
        if let Some(dir) = &self.prompt_dir {
            config.builtin_prompt_dir = dir.clone();
        }
        if let Some(dir) = &self.speaker_dir {
            config.custom_speaker_dir = dir.clone();
        }
        if self.metrics_port.is_some() {
            config.metrics.port = self.metrics_port;
        }
        config.generation.coarse.validate()?;
        Ok(config)
    }
}

/// Build a pipeline on the configured device.
pub fn build_pipeline(config: &PipelineConfig) -> Result<BarkPipeline> {
    let device = select_device(&config.device)?;
    let metrics = match config.metrics.port {
        Some(port) => {
            info!(port, "Serving Prometheus metrics");
            BarkMetrics::init(port)?
        }
        None => BarkMetrics::init_noop(),
    };
    Ok(BarkPipeline::new(
        config,
        device,
        ModelLoaders::mock(config),
        metrics,
    ))
}

/// Literal text, or the contents of `path` for `@path`.
pub fn read_text_input(input: &str) -> Result<String> {
    let text = if let Some(path) = input.strip_prefix('@') {
        info!(path = path, "Reading text from file");
        std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?
    } else {
        input.to_string()
    };

    if text.trim().is_empty() {
        bail!("input text is empty");
    }
    Ok(text)
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::path::Path;

    use bark_core::PipelineConfig;

    /// Seeded config whose prompt directories live under `dir`.
    pub fn config_in(dir: &Path) -> PipelineConfig {
        let mut config = PipelineConfig {
            builtin_prompt_dir: dir.join("prompts"),
            custom_speaker_dir: dir.join("speakers"),
            ..Default::default()
        };
        config.generation.seed = Some(42);
        config
    }
}
