//! Configuration structures and the per-call execution context.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use candle_core::Device;

use crate::constants::{COARSE_MAX_CONTEXT, COARSE_SEMANTIC_WINDOW, MAX_COARSE_HISTORY, MIN_COARSE_HISTORY};
use crate::error::{BarkError, BarkResult};
use crate::traits::DevicePlaced;

/// Options for text-to-semantic generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticOptions {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub silent: bool,
    /// Stop once the end-token probability reaches this value.
    #[serde(default = "default_min_eos_p")]
    pub min_eos_p: Option<f32>,
    /// Stop once this much audio (in seconds) has been generated.
    #[serde(default)]
    pub max_gen_duration_s: Option<f32>,
    #[serde(default = "default_true")]
    pub allow_early_stop: bool,
    #[serde(default)]
    pub use_kv_caching: bool,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_min_eos_p() -> Option<f32> {
    Some(0.2)
}

fn default_true() -> bool {
    true
}

impl Default for SemanticOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_k: None,
            top_p: None,
            silent: false,
            min_eos_p: default_min_eos_p(),
            max_gen_duration_s: None,
            allow_early_stop: true,
            use_kv_caching: false,
        }
    }
}

/// Options for semantic-to-coarse generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoarseOptions {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub silent: bool,
    /// Flattened coarse tokens of context kept per window, in `[60, 630]`.
    #[serde(default = "default_max_coarse_history")]
    pub max_coarse_history: usize,
    /// Steps sampled per window.
    #[serde(default = "default_sliding_window_len")]
    pub sliding_window_len: usize,
    #[serde(default)]
    pub use_kv_caching: bool,
}

fn default_max_coarse_history() -> usize {
    MAX_COARSE_HISTORY
}

fn default_sliding_window_len() -> usize {
    60
}

impl Default for CoarseOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_k: None,
            top_p: None,
            silent: false,
            max_coarse_history: default_max_coarse_history(),
            sliding_window_len: default_sliding_window_len(),
            use_kv_caching: false,
        }
    }
}

impl CoarseOptions {
    /// Check the history/window bounds imposed by the coarse model.
    pub fn validate(&self) -> BarkResult<()> {
        if !(MIN_COARSE_HISTORY..=MAX_COARSE_HISTORY).contains(&self.max_coarse_history) {
            return Err(BarkError::invalid_input(format!(
                "max_coarse_history must be in [{MIN_COARSE_HISTORY}, {MAX_COARSE_HISTORY}], got {}",
                self.max_coarse_history
            )));
        }
        if self.sliding_window_len == 0 {
            return Err(BarkError::invalid_input("sliding_window_len must be positive"));
        }
        let limit = COARSE_MAX_CONTEXT - COARSE_SEMANTIC_WINDOW;
        if self.max_coarse_history + self.sliding_window_len > limit {
            return Err(BarkError::invalid_input(format!(
                "max_coarse_history + sliding_window_len must be <= {limit}, got {}",
                self.max_coarse_history + self.sliding_window_len
            )));
        }
        Ok(())
    }
}

/// Options for coarse-to-fine generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FineOptions {
    /// `None` selects argmax decoding.
    #[serde(default = "default_fine_temperature")]
    pub temperature: Option<f32>,
    #[serde(default = "default_true")]
    pub silent: bool,
}

fn default_fine_temperature() -> Option<f32> {
    Some(0.5)
}

impl Default for FineOptions {
    fn default() -> Self {
        Self {
            temperature: default_fine_temperature(),
            silent: true,
        }
    }
}

/// Per-stage generation settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub semantic: SemanticOptions,
    #[serde(default)]
    pub coarse: CoarseOptions,
    #[serde(default)]
    pub fine: FineOptions,
    /// Random seed for deterministic generation.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Compute device configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Preferred device type.
    #[serde(default)]
    pub device_type: DeviceType,
    /// Specific GPU device index.
    #[serde(default)]
    pub gpu_index: Option<usize>,
}

/// Device type for computation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Best available accelerator, CPU otherwise.
    #[default]
    Auto,
    /// CPU computation.
    Cpu,
    /// CUDA GPU computation.
    Cuda,
    /// Metal GPU computation (Apple).
    Metal,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (json or text).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus exporter port; no exporter when unset.
    #[serde(default)]
    pub port: Option<u16>,
}

/// Top-level configuration of a pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    /// Keep models on the CPU between calls and move them to the device per stage.
    #[serde(default)]
    pub offload_cpu: bool,
    /// Directory holding the built-in `<name>.npz` speaker prompts.
    #[serde(default = "default_builtin_prompt_dir")]
    pub builtin_prompt_dir: PathBuf,
    /// Directory holding user-saved speaker prompts.
    #[serde(default = "default_custom_speaker_dir")]
    pub custom_speaker_dir: PathBuf,
    /// `tokenizer.json` of the multilingual BERT text tokenizer.
    #[serde(default)]
    pub tokenizer_path: Option<PathBuf>,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_builtin_prompt_dir() -> PathBuf {
    PathBuf::from("assets/prompts")
}

fn default_custom_speaker_dir() -> PathBuf {
    PathBuf::from("data/bark_custom_speakers")
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            offload_cpu: false,
            builtin_prompt_dir: default_builtin_prompt_dir(),
            custom_speaker_dir: default_custom_speaker_dir(),
            tokenizer_path: None,
            generation: GenerationConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> BarkResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| BarkError::FileLoad {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Where a stage runs and whether models are parked on the CPU between stages.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Device used for inference.
    pub device: Device,
    /// Move each model to `device` on stage entry and back to the CPU on exit.
    pub offload_cpu: bool,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::cpu()
    }
}

impl ExecutionContext {
    /// Create a context for `device`.
    pub fn new(device: Device, offload_cpu: bool) -> Self {
        Self {
            device,
            offload_cpu,
        }
    }

    /// CPU-only context without offloading.
    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
            offload_cpu: false,
        }
    }

    /// Run `f` with `model` placed according to the offload policy.
    ///
    /// The model is parked on the CPU again even when `f` fails.
    pub fn with_placement<M, T, F>(&self, model: &mut M, f: F) -> BarkResult<T>
    where
        M: DevicePlaced + ?Sized,
        F: FnOnce(&mut M) -> BarkResult<T>,
    {
        if self.offload_cpu {
            model.to_device(&self.device)?;
        }
        let result = f(model);
        if self.offload_cpu {
            model.to_device(&Device::Cpu)?;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Placed {
        device: Device,
        moves: usize,
    }

    impl DevicePlaced for Placed {
        fn device(&self) -> Device {
            self.device.clone()
        }

        fn to_device(&mut self, device: &Device) -> BarkResult<()> {
            self.device = device.clone();
            self.moves += 1;
            Ok(())
        }
    }

    #[test]
    fn test_semantic_defaults() {
        let opts = SemanticOptions::default();
        assert!((opts.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(opts.min_eos_p, Some(0.2));
        assert!(opts.allow_early_stop);
        assert!(!opts.use_kv_caching);
    }

    #[test]
    fn test_coarse_bounds() {
        assert!(CoarseOptions::default().validate().is_ok());

        let too_small = CoarseOptions {
            max_coarse_history: 59,
            ..Default::default()
        };
        assert!(too_small.validate().is_err());

        let too_wide = CoarseOptions {
            max_coarse_history: 630,
            sliding_window_len: 200,
            ..Default::default()
        };
        assert!(too_wide.validate().is_err());
    }

    #[test]
    fn test_config_from_partial_json() {
        let json = r#"{ "offload_cpu": true, "generation": { "semantic": { "temperature": 0.5 } } }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert!(config.offload_cpu);
        assert!((config.generation.semantic.temperature - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.generation.semantic.min_eos_p, Some(0.2));
        assert_eq!(config.generation.coarse.sliding_window_len, 60);
        assert_eq!(
            config.custom_speaker_dir,
            PathBuf::from("data/bark_custom_speakers")
        );
        assert_eq!(config.device.device_type, DeviceType::Auto);
    }

    #[test]
    fn test_placement_without_offload() {
        let ctx = ExecutionContext::cpu();
        let mut model = Placed {
            device: Device::Cpu,
            moves: 0,
        };
        let out = ctx.with_placement(&mut model, |_| Ok(3)).unwrap();
        assert_eq!(out, 3);
        assert_eq!(model.moves, 0);
    }

    #[test]
    fn test_placement_with_offload_restores_on_error() {
        let ctx = ExecutionContext::new(Device::Cpu, true);
        let mut model = Placed {
            device: Device::Cpu,
            moves: 0,
        };
        let out: BarkResult<()> =
            ctx.with_placement(&mut model, |_| Err(BarkError::inference("boom")));
        assert!(out.is_err());
        assert_eq!(model.moves, 2);
    }
}
