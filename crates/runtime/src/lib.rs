//! # runtime
//!
//! Runtime orchestration for the Bark generation pipeline.
//!
//! This crate provides:
//! - The `BarkPipeline` orchestrator over lazily loaded model slots
//! - Transcription and voice conversion chains around external models
//! - Structured logging and metrics
//! - Device management (CPU/GPU selection)

pub mod conversion;
pub mod device;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod slot;
pub mod transcribe;

pub use conversion::{
    ConversionFlags, ConversionInput, ConversionOutput, ConversionParams, ConverterModels,
    Denoiser, PitchExtractor, SourceSeparator, SpeechSynthesizer, VoiceConversion,
    VoiceConverter,
};
pub use device::select_device;
pub use metrics::BarkMetrics;
pub use pipeline::{BarkPipeline, ModelKind, ModelLoaders, SpeechOutput};
pub use slot::{ModelSlot, NamedSlot};
pub use transcribe::{MockTranscriber, TranscriptionService, WHISPER_MODELS};
