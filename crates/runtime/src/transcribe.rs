//! Speech-to-text over a swappable recognition model.

use std::fmt;

use tracing::{info, instrument, warn};

use audio_codec::{flatten_audio, resample, PcmBuffer};
use bark_core::{BarkError, BarkResult, Transcriber};

/// Sample rate the recognition models expect.
pub const TRANSCRIBE_SAMPLE_RATE: u32 = 16_000;

/// Model sizes the recognition back end ships.
pub const WHISPER_MODELS: [&str; 10] = [
    "tiny.en", "small.en", "base.en", "medium.en", "tiny", "small", "base", "medium", "large",
    "large-v2",
];

/// Builds a transcriber for a model name.
pub type TranscriberFactory = Box<dyn Fn(&str) -> BarkResult<Box<dyn Transcriber>> + Send + Sync>;

/// Holds at most one loaded recognition model.
pub struct TranscriptionService {
    factory: TranscriberFactory,
    model: Option<Box<dyn Transcriber>>,
    loaded: Option<String>,
}

impl fmt::Debug for TranscriptionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriptionService")
            .field("loaded", &self.loaded)
            .finish()
    }
}

impl TranscriptionService {
    pub fn new(factory: TranscriberFactory) -> Self {
        Self {
            factory,
            model: None,
            loaded: None,
        }
    }

    /// Service backed by [`MockTranscriber`] for the known model names.
    pub fn mock() -> Self {
        Self::new(Box::new(|name: &str| {
            if WHISPER_MODELS.iter().any(|m| *m == name) {
                Ok(Box::new(MockTranscriber::default()) as Box<dyn Transcriber>)
            } else {
                Err(BarkError::model_load(name, "unknown model name"))
            }
        }))
    }

    /// Name of the loaded model, if any.
    pub fn loaded_model(&self) -> Option<&str> {
        self.loaded.as_deref()
    }

    /// Load `name`, replacing any other model.
    ///
    /// Loading the model that is already resident is a no-op. On failure
    /// nothing stays loaded.
    pub fn load(&mut self, name: &str) -> BarkResult<()> {
        if self.loaded.as_deref() == Some(name) {
            return Ok(());
        }
        self.unload();
        match (self.factory)(name) {
            Ok(model) => {
                self.model = Some(model);
                self.loaded = Some(name.to_string());
                info!(model = name, "Transcription model loaded");
                Ok(())
            }
            Err(e) => {
                self.unload();
                warn!(model = name, error = %e, "Transcription model failed to load");
                Err(match e {
                    e @ BarkError::ModelLoad { .. } => e,
                    other => BarkError::model_load(name, other.to_string()),
                })
            }
        }
    }

    /// Drop the loaded model. Returns whether one was loaded.
    pub fn unload(&mut self) -> bool {
        self.loaded = None;
        self.model.take().is_some()
    }

    /// Transcribe interleaved audio.
    ///
    /// The audio is scaled to floats, averaged to mono and resampled to
    /// 16 kHz before recognition. The transcript is trimmed.
    #[instrument(skip(self, pcm), fields(samples = pcm.len(), encoding = pcm.dtype_name()))]
    pub fn transcribe(
        &mut self,
        sample_rate: u32,
        channels: u16,
        pcm: &PcmBuffer,
    ) -> BarkResult<String> {
        let model = self
            .model
            .as_deref_mut()
            .ok_or_else(|| BarkError::NoModelLoaded("transcription".to_string()))?;

        let mono = flatten_audio(pcm, channels);
        let samples = resample(&mono, sample_rate, TRANSCRIBE_SAMPLE_RATE)?;
        let text = model.transcribe(&samples)?;
        Ok(text.trim().to_string())
    }
}

/// Energy-based stand-in that reports voiced regions instead of words.
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    /// RMS below which a 20 ms window counts as silence.
    pub threshold: f32,
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self { threshold: 0.02 }
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&mut self, samples: &[f32]) -> BarkResult<String> {
        let window = (TRANSCRIBE_SAMPLE_RATE / 50) as usize;
        let secs = |w: usize| (w * window) as f32 / TRANSCRIBE_SAMPLE_RATE as f32;

        let voiced: Vec<bool> = samples
            .chunks(window)
            .map(|chunk| {
                let energy = chunk.iter().map(|s| s * s).sum::<f32>() / chunk.len() as f32;
                energy.sqrt() >= self.threshold
            })
            .collect();

        let mut segments = Vec::new();
        let mut start = None;
        for (i, &v) in voiced.iter().chain(std::iter::once(&false)).enumerate() {
            match (v, start) {
                (true, None) => start = Some(i),
                (false, Some(s)) => {
                    segments.push(format!("[speech {:.2}-{:.2}s]", secs(s), secs(i)));
                    start = None;
                }
                _ => {}
            }
        }
        Ok(format!(" {} ", segments.join(" ")))
    }
}
