//! Bark pipeline: text → semantic → coarse → fine → waveform.
//!
//! Owns one lazily loaded slot per model, the preset registry, the sampler
//! RNG and the execution context. Calls run one at a time; every method
//! takes `&mut self`.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use candle_core::Device;
use tracing::{debug, info, instrument};

use audio_codec::MockCodec;
use bark_core::constants::N_COARSE_CODEBOOKS;
use bark_core::{
    BarkError, BarkResult, CausalLm, CodebookMatrix, CodecModel, ExecutionContext, FineLm,
    FullGeneration, GenerationConfig, HistoryPrompt, PipelineConfig, SemanticTokens, TextEncoder,
    Waveform,
};
use bark_generation::semantic::SEMANTIC_PROMPT_LEN;
use bark_generation::{MockCausalLm, MockFineLm, Sampler};
use history_prompt::{HistoryRef, PresetRegistry};
use text_tokenizer::{BertTextEncoder, MockTextEncoder};

use crate::metrics::{BarkMetrics, Stage};
use crate::slot::{Loader, ModelSlot};

/// Semantic tokens the mock semantic model emits before it ends a sequence.
const MOCK_SEMANTIC_TOKENS: usize = 100;

/// The models a pipeline can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    TextEncoder,
    Semantic,
    Coarse,
    Fine,
    Codec,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        Self::TextEncoder,
        Self::Semantic,
        Self::Coarse,
        Self::Fine,
        Self::Codec,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextEncoder => "text_encoder",
            Self::Semantic => "semantic",
            Self::Coarse => "coarse",
            Self::Fine => "fine",
            Self::Codec => "codec",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = BarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text_encoder" | "tokenizer" | "text" => Ok(Self::TextEncoder),
            "semantic" => Ok(Self::Semantic),
            "coarse" => Ok(Self::Coarse),
            "fine" => Ok(Self::Fine),
            "codec" | "encodec" => Ok(Self::Codec),
            other => Err(BarkError::invalid_input(format!("unknown model kind: {other}"))),
        }
    }
}

/// Constructors for every model the pipeline drives.
pub struct ModelLoaders {
    pub text_encoder: Loader<dyn TextEncoder>,
    pub semantic: Loader<dyn CausalLm>,
    pub coarse: Loader<dyn CausalLm>,
    pub fine: Loader<dyn FineLm>,
    pub codec: Loader<dyn CodecModel>,
}

impl ModelLoaders {
    /// Deterministic stand-in models.
    ///
    /// The text encoder is the real BERT tokenizer when
    /// `config.tokenizer_path` is set.
    pub fn mock(config: &PipelineConfig) -> Self {
        let seed = config.generation.seed.unwrap_or(0);
        let tokenizer_path = config.tokenizer_path.clone();
        Self {
            text_encoder: Box::new(move || match &tokenizer_path {
                Some(path) => {
                    Ok(Box::new(BertTextEncoder::from_file(path)?) as Box<dyn TextEncoder>)
                }
                None => Ok(Box::new(MockTextEncoder::default()) as Box<dyn TextEncoder>),
            }),
            semantic: Box::new(move || {
                Ok(Box::new(
                    MockCausalLm::semantic(seed)
                        .with_eos_after(SEMANTIC_PROMPT_LEN, MOCK_SEMANTIC_TOKENS),
                ) as Box<dyn CausalLm>)
            }),
            coarse: Box::new(move || Ok(Box::new(MockCausalLm::coarse(seed)) as Box<dyn CausalLm>)),
            fine: Box::new(move || Ok(Box::new(MockFineLm::new(seed)) as Box<dyn FineLm>)),
            codec: Box::new(|| Ok(Box::new(MockCodec::new()?) as Box<dyn CodecModel>)),
        }
    }
}

/// Audio produced by a pipeline call, plus the tokens behind it on request.
#[derive(Debug, Clone)]
pub struct SpeechOutput {
    pub audio: Waveform,
    pub full: Option<FullGeneration>,
}

/// The orchestrating pipeline.
pub struct BarkPipeline {
    text_encoder: ModelSlot<dyn TextEncoder>,
    semantic: ModelSlot<dyn CausalLm>,
    coarse: ModelSlot<dyn CausalLm>,
    fine: ModelSlot<dyn FineLm>,
    codec: ModelSlot<dyn CodecModel>,
    registry: PresetRegistry,
    ctx: ExecutionContext,
    generation: GenerationConfig,
    sampler: Sampler,
    metrics: BarkMetrics,
}

impl fmt::Debug for BarkPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BarkPipeline")
            .field("ctx", &self.ctx)
            .field("loaded", &self.loaded_models())
            .finish()
    }
}

impl BarkPipeline {
    /// Create a pipeline; no model is loaded until first use.
    pub fn new(
        config: &PipelineConfig,
        device: Device,
        loaders: ModelLoaders,
        metrics: BarkMetrics,
    ) -> Self {
        info!(
            device = crate::device::device_name(&device),
            offload_cpu = config.offload_cpu,
            "Creating Bark pipeline"
        );
        Self {
            text_encoder: ModelSlot::new("text_encoder", loaders.text_encoder),
            semantic: ModelSlot::new("semantic", loaders.semantic),
            coarse: ModelSlot::new("coarse", loaders.coarse),
            fine: ModelSlot::new("fine", loaders.fine),
            codec: ModelSlot::new("codec", loaders.codec),
            registry: PresetRegistry::from_config(config),
            ctx: ExecutionContext::new(device, config.offload_cpu),
            generation: config.generation.clone(),
            sampler: Sampler::seeded(config.generation.seed),
            metrics,
        }
    }

    /// CPU pipeline over the mock models.
    pub fn new_mock(config: &PipelineConfig) -> Self {
        Self::new(
            config,
            Device::Cpu,
            ModelLoaders::mock(config),
            BarkMetrics::init_noop(),
        )
    }

    pub fn registry(&self) -> &PresetRegistry {
        &self.registry
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn generation(&self) -> &GenerationConfig {
        &self.generation
    }

    /// Per-stage options used by subsequent calls.
    pub fn generation_mut(&mut self) -> &mut GenerationConfig {
        &mut self.generation
    }

    /// Restart the sampler RNG.
    pub fn reseed(&mut self, seed: Option<u64>) {
        self.generation.seed = seed;
        self.sampler = Sampler::seeded(seed);
    }

    fn slot_loaded(&self, kind: ModelKind) -> bool {
        match kind {
            ModelKind::TextEncoder => self.text_encoder.is_loaded(),
            ModelKind::Semantic => self.semantic.is_loaded(),
            ModelKind::Coarse => self.coarse.is_loaded(),
            ModelKind::Fine => self.fine.is_loaded(),
            ModelKind::Codec => self.codec.is_loaded(),
        }
    }

    /// Models currently resident.
    pub fn loaded_models(&self) -> Vec<ModelKind> {
        ModelKind::ALL
            .into_iter()
            .filter(|&kind| self.slot_loaded(kind))
            .collect()
    }

    /// Load the given models ahead of the first call.
    pub fn preload(&mut self, kinds: &[ModelKind]) -> BarkResult<()> {
        for &kind in kinds {
            match kind {
                ModelKind::TextEncoder => self.text_encoder.load()?,
                ModelKind::Semantic => self.semantic.load()?,
                ModelKind::Coarse => self.coarse.load()?,
                ModelKind::Fine => self.fine.load()?,
                ModelKind::Codec => self.codec.load()?,
            }
        }
        self.metrics.set_models_loaded(self.loaded_models().len());
        Ok(())
    }

    /// Release one model. Returns whether it was loaded.
    pub fn unload(&mut self, kind: ModelKind) -> bool {
        let was_loaded = match kind {
            ModelKind::TextEncoder => self.text_encoder.unload(),
            ModelKind::Semantic => self.semantic.unload(),
            ModelKind::Coarse => self.coarse.unload(),
            ModelKind::Fine => self.fine.unload(),
            ModelKind::Codec => self.codec.unload(),
        };
        self.metrics.set_models_loaded(self.loaded_models().len());
        was_loaded
    }

    /// Release every model.
    pub fn unload_all(&mut self) {
        for kind in ModelKind::ALL {
            self.unload(kind);
        }
    }

    fn resolve(&self, history: Option<&HistoryRef>) -> BarkResult<Option<HistoryPrompt>> {
        match history {
            Some(reference) => self.registry.resolve(reference),
            None => Ok(None),
        }
    }

    fn track<T>(&self, result: BarkResult<T>) -> BarkResult<T> {
        if result.is_err() {
            self.metrics.request_failed();
        }
        result
    }

    /// Text to semantic tokens.
    #[instrument(skip_all, fields(text_len = text.len()))]
    pub fn generate_semantic(
        &mut self,
        text: &str,
        history: Option<&HistoryRef>,
    ) -> BarkResult<SemanticTokens> {
        self.metrics.request_received();
        let result = self
            .resolve(history)
            .and_then(|h| self.semantic_stage(text, h.as_ref()));
        self.track(result)
    }

    /// Semantic tokens to the two coarse codebooks.
    #[instrument(skip_all, fields(len = semantic.len()))]
    pub fn generate_coarse(
        &mut self,
        semantic: &SemanticTokens,
        history: Option<&HistoryRef>,
    ) -> BarkResult<CodebookMatrix> {
        self.metrics.request_received();
        let result = self
            .resolve(history)
            .and_then(|h| self.coarse_stage(semantic, h.as_ref()));
        self.track(result)
    }

    /// Coarse codebooks to all eight.
    #[instrument(skip_all, fields(frames = coarse.frames()))]
    pub fn generate_fine(
        &mut self,
        coarse: &CodebookMatrix,
        history: Option<&HistoryRef>,
    ) -> BarkResult<CodebookMatrix> {
        self.metrics.request_received();
        let result = self
            .resolve(history)
            .and_then(|h| self.fine_stage(coarse, h.as_ref()));
        self.track(result)
    }

    /// Codebook matrix to audio.
    #[instrument(skip_all, fields(frames = fine.frames()))]
    pub fn codec_decode(
        &mut self,
        fine: &CodebookMatrix,
        decode_on_cpu: bool,
    ) -> BarkResult<Waveform> {
        self.metrics.request_received();
        let result = self.codec_stage(fine, decode_on_cpu);
        self.track(result)
    }

    /// Semantic tokens to audio through the coarse, fine and codec stages.
    ///
    /// `decode_on_cpu` moves only the codec to the CPU, as in [`Self::codec_decode`].
    #[instrument(
        skip_all,
        fields(len = semantic.len(), output_full = output_full, decode_on_cpu = decode_on_cpu)
    )]
    pub fn semantic_to_waveform(
        &mut self,
        semantic: &SemanticTokens,
        history: Option<&HistoryRef>,
        output_full: bool,
        decode_on_cpu: bool,
    ) -> BarkResult<SpeechOutput> {
        self.metrics.request_received();
        let start = Instant::now();
        let result = self.resolve(history).and_then(|h| {
            self.acoustic_stages(semantic.clone(), h.as_ref(), output_full, decode_on_cpu)
        });
        let result = self.track(result)?;
        self.metrics
            .record_audio(result.audio.duration_secs() as f64, elapsed_ms(start));
        Ok(result)
    }

    /// Text to audio through all four stages.
    ///
    /// The history is resolved once and conditions every stage.
    #[instrument(skip_all, fields(text_len = text.len(), output_full = output_full))]
    pub fn text_to_speech(
        &mut self,
        text: &str,
        history: Option<&HistoryRef>,
        output_full: bool,
    ) -> BarkResult<SpeechOutput> {
        self.metrics.request_received();
        let start = Instant::now();
        let result = self.resolve(history).and_then(|h| {
            let semantic = self.semantic_stage(text, h.as_ref())?;
            self.acoustic_stages(semantic, h.as_ref(), output_full, false)
        });
        let result = self.track(result)?;
        self.metrics
            .record_audio(result.audio.duration_secs() as f64, elapsed_ms(start));
        info!(
            duration_secs = result.audio.duration_secs(),
            elapsed_ms = elapsed_ms(start),
            "Speech generated"
        );
        Ok(result)
    }

    /// Audio to a history prompt with `coarse_prompt` and `fine_prompt`.
    ///
    /// There is no audio-to-semantic model, so the prompt carries no
    /// `semantic_prompt` and conditions only the coarse and fine stages.
    #[instrument(skip_all, fields(samples = audio.num_samples()))]
    pub fn encode_prompt(&mut self, audio: &Waveform) -> BarkResult<HistoryPrompt> {
        self.metrics.request_received();
        let result = self.encode_stage(audio);
        self.track(result)
    }

    /// Store a full generation as a reusable custom speaker.
    pub fn save_speaker(&self, name: &str, full: &FullGeneration) -> BarkResult<std::path::PathBuf> {
        self.registry
            .save_custom_speaker(name, &HistoryPrompt::from(full.clone()))
    }

    fn acoustic_stages(
        &mut self,
        semantic: SemanticTokens,
        history: Option<&HistoryPrompt>,
        output_full: bool,
        decode_on_cpu: bool,
    ) -> BarkResult<SpeechOutput> {
        let coarse = self.coarse_stage(&semantic, history)?;
        let fine = self.fine_stage(&coarse, history)?;
        let audio = self.codec_stage(&fine, decode_on_cpu)?;
        let full = output_full.then(|| FullGeneration {
            semantic,
            coarse,
            fine,
        });
        Ok(SpeechOutput { audio, full })
    }

    fn semantic_stage(
        &mut self,
        text: &str,
        history: Option<&HistoryPrompt>,
    ) -> BarkResult<SemanticTokens> {
        let start = Instant::now();
        let encoder = self.text_encoder.get()?;
        let model = self.semantic.get()?;
        let tokens = bark_generation::generate_semantic(
            model,
            encoder,
            text,
            history,
            &self.generation.semantic,
            &mut self.sampler,
            &self.ctx,
        )?;
        self.metrics
            .record_stage(Stage::Semantic, tokens.len(), elapsed_ms(start));
        debug!(tokens = tokens.len(), "Semantic stage done");
        Ok(tokens)
    }

    fn coarse_stage(
        &mut self,
        semantic: &SemanticTokens,
        history: Option<&HistoryPrompt>,
    ) -> BarkResult<CodebookMatrix> {
        let start = Instant::now();
        let model = self.coarse.get()?;
        let coarse = bark_generation::generate_coarse(
            model,
            semantic,
            history,
            &self.generation.coarse,
            &mut self.sampler,
            &self.ctx,
        )?;
        self.metrics
            .record_stage(Stage::Coarse, coarse.rows() * coarse.frames(), elapsed_ms(start));
        Ok(coarse)
    }

    fn fine_stage(
        &mut self,
        coarse: &CodebookMatrix,
        history: Option<&HistoryPrompt>,
    ) -> BarkResult<CodebookMatrix> {
        let start = Instant::now();
        let model = self.fine.get()?;
        let fine = bark_generation::generate_fine(
            model,
            coarse,
            history,
            &self.generation.fine,
            &mut self.sampler,
            &self.ctx,
        )?;
        self.metrics
            .record_stage(Stage::Fine, fine.rows() * fine.frames(), elapsed_ms(start));
        Ok(fine)
    }

    fn codec_stage(&mut self, fine: &CodebookMatrix, decode_on_cpu: bool) -> BarkResult<Waveform> {
        let start = Instant::now();
        let model = self.codec.get()?;
        let audio = audio_codec::codec_decode(model, fine, &self.ctx, decode_on_cpu)?;
        self.metrics
            .record_stage(Stage::Codec, audio.num_samples(), elapsed_ms(start));
        Ok(audio)
    }
}

impl BarkPipeline {
    fn encode_stage(&mut self, audio: &Waveform) -> BarkResult<HistoryPrompt> {
        let model = self.codec.get()?;
        let fine = audio_codec::codec_encode(model, audio, &self.ctx)?;
        let coarse = CodebookMatrix::from_rows(
            (0..N_COARSE_CODEBOOKS).map(|r| fine.row(r).to_vec()).collect(),
        )?;
        debug!(frames = fine.frames(), "Audio encoded to prompt");
        let prompt = HistoryPrompt {
            semantic: None,
            coarse: Some(coarse),
            fine: Some(fine),
        };
        prompt.validate()?;
        Ok(prompt)
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
