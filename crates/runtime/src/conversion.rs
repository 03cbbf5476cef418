//! Voice conversion chain around external separation, denoising, TTS and
//! conversion models.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info, instrument};

use audio_codec::{flatten_audio, merge_and_match, PcmBuffer};
use bark_core::{BarkError, BarkResult, Waveform};

use crate::slot::NamedSlot;

/// Where installed conversion models live unless configured otherwise.
pub const DEFAULT_CONVERTER_DIR: &str = "data/models/rvc";

/// Text-to-speech model used when no input audio is given.
pub trait SpeechSynthesizer: Send {
    fn synthesize(&mut self, text: &str) -> BarkResult<Waveform>;
}

/// Splits a mix into voice and background stems.
pub trait SourceSeparator: Send {
    /// Returns `(foreground, background)` at the rate of the returned waveforms.
    fn separate(&mut self, audio: &Waveform) -> BarkResult<(Waveform, Waveform)>;
}

/// Noise reduction.
pub trait Denoiser: Send {
    fn denoise(&mut self, audio: &Waveform) -> BarkResult<Waveform>;
}

/// Timbre conversion to a target speaker.
pub trait VoiceConverter: Send {
    /// Number of speakers the model holds; 0 or 1 for single-speaker models.
    fn speakers(&self) -> u32;

    fn convert(&mut self, audio: &Waveform, params: &ConversionParams) -> BarkResult<Waveform>;
}

/// F0 estimation method used by the converter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PitchExtractor {
    #[default]
    Dio,
    Pm,
    Harvest,
    PyworldHarvest,
    Torchcrepe,
    TorchcrepeTiny,
}

impl PitchExtractor {
    pub const ALL: [Self; 6] = [
        Self::Dio,
        Self::Pm,
        Self::Harvest,
        Self::PyworldHarvest,
        Self::Torchcrepe,
        Self::TorchcrepeTiny,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dio => "dio",
            Self::Pm => "pm",
            Self::Harvest => "harvest",
            Self::PyworldHarvest => "pyworld harvest",
            Self::Torchcrepe => "torchcrepe",
            Self::TorchcrepeTiny => "torchcrepe tiny",
        }
    }

    /// Whether `crepe_hop_length` applies.
    pub fn is_crepe(self) -> bool {
        matches!(self, Self::Torchcrepe | Self::TorchcrepeTiny)
    }
}

impl fmt::Display for PitchExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PitchExtractor {
    type Err = BarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace(['-', '_'], " ");
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| {
                BarkError::invalid_input(format!(
                    "unknown pitch extractor '{s}', expected one of {:?}",
                    Self::ALL.map(Self::as_str)
                ))
            })
    }
}

/// Per-call settings handed to the converter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversionParams {
    /// Target speaker of a multi-speaker model.
    pub speaker_id: u32,
    /// Pitch shift in semitones.
    pub up_key: i32,
    pub pitch_extract: PitchExtractor,
    /// Weight of retrieved index features, 0 to 1.
    pub index_rate: f32,
    /// Median filter radius applied to the pitch track, 0 to 7.
    pub filter_radius: u32,
    /// Protection of unvoiced consonants, 0 to 0.5.
    pub protect: f32,
    /// Hop of the crepe extractors, 64 to 512 in steps of 64.
    pub crepe_hop_length: u32,
}

impl Default for ConversionParams {
    fn default() -> Self {
        Self {
            speaker_id: 0,
            up_key: 0,
            pitch_extract: PitchExtractor::Dio,
            index_rate: 0.88,
            filter_radius: 3,
            protect: 0.33,
            crepe_hop_length: 128,
        }
    }
}

impl ConversionParams {
    pub fn validate(&self) -> BarkResult<()> {
        if !(0.0..=1.0).contains(&self.index_rate) {
            return Err(BarkError::invalid_input(format!(
                "index_rate must be within [0, 1], got {}",
                self.index_rate
            )));
        }
        if self.filter_radius > 7 {
            return Err(BarkError::invalid_input(format!(
                "filter_radius must be at most 7, got {}",
                self.filter_radius
            )));
        }
        if !(0.0..=0.5).contains(&self.protect) {
            return Err(BarkError::invalid_input(format!(
                "protect must be within [0, 0.5], got {}",
                self.protect
            )));
        }
        if !(64..=512).contains(&self.crepe_hop_length) || self.crepe_hop_length % 64 != 0 {
            return Err(BarkError::invalid_input(format!(
                "crepe_hop_length must be a multiple of 64 in [64, 512], got {}",
                self.crepe_hop_length
            )));
        }
        Ok(())
    }
}

/// Constructor for a conversion model from its install directory.
pub type ConverterLoader = Box<dyn Fn(&Path) -> BarkResult<Box<dyn VoiceConverter>> + Send + Sync>;

/// Installed conversion models, one resident at a time.
#[derive(Debug)]
pub struct ConverterModels {
    dir: PathBuf,
    slot: NamedSlot<dyn VoiceConverter>,
}

impl ConverterModels {
    /// Models are subdirectories of `dir`; `loader` receives the chosen one.
    pub fn new(dir: impl Into<PathBuf>, loader: ConverterLoader) -> Self {
        let dir = dir.into();
        let root = dir.clone();
        Self {
            dir,
            slot: NamedSlot::new(
                "voice converter",
                Box::new(move |name: &str| loader(&root.join(name))),
            ),
        }
    }

    /// No loader; listing still works.
    pub fn unavailable(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            slot: NamedSlot::unavailable("voice converter"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of the installed models, sorted. A missing directory has none.
    pub fn list_installed(&self) -> BarkResult<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Make `name` the resident model and return its speaker count.
    pub fn load(&mut self, name: &str) -> BarkResult<u32> {
        Ok(self.get(name)?.speakers())
    }

    /// Drop the resident model. Returns whether one was loaded.
    pub fn unload(&mut self) -> bool {
        self.slot.unload()
    }

    pub fn loaded(&self) -> Option<&str> {
        self.slot.loaded_name()
    }

    fn get(&mut self, name: &str) -> BarkResult<&mut dyn VoiceConverter> {
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            return Err(BarkError::invalid_input(format!(
                "invalid conversion model name {name:?}"
            )));
        }
        if self.loaded() != Some(name) && !self.dir.join(name).is_dir() {
            return Err(BarkError::invalid_input(format!(
                "conversion model '{name}' is not installed in {}",
                self.dir.display()
            )));
        }
        self.slot.get(name)
    }
}

/// Optional processing steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionFlags {
    pub denoise: bool,
    pub denoise_output: bool,
    pub separate_background: bool,
    pub recombine_background: bool,
}

impl ConversionFlags {
    pub const NAMES: [&'static str; 4] = [
        "denoise",
        "denoise output",
        "separate background",
        "recombine background",
    ];

    /// Build flags from their display names.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> BarkResult<Self> {
        let mut flags = Self::default();
        for name in names {
            match name.parse::<ConversionFlag>()? {
                ConversionFlag::Denoise => flags.denoise = true,
                ConversionFlag::DenoiseOutput => flags.denoise_output = true,
                ConversionFlag::SeparateBackground => flags.separate_background = true,
                ConversionFlag::RecombineBackground => flags.recombine_background = true,
            }
        }
        Ok(flags)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConversionFlag {
    Denoise,
    DenoiseOutput,
    SeparateBackground,
    RecombineBackground,
}

impl FromStr for ConversionFlag {
    type Err = BarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', '_'], " ").as_str() {
            "denoise" => Ok(Self::Denoise),
            "denoise output" => Ok(Self::DenoiseOutput),
            "separate background" => Ok(Self::SeparateBackground),
            "recombine background" => Ok(Self::RecombineBackground),
            other => Err(BarkError::invalid_input(format!(
                "unknown conversion flag '{other}', expected one of {:?}",
                ConversionFlags::NAMES
            ))),
        }
    }
}

/// Source of the voice to convert.
#[derive(Debug, Clone)]
pub enum ConversionInput {
    /// Interleaved recorded audio.
    Audio {
        sample_rate: u32,
        channels: u16,
        pcm: PcmBuffer,
    },
    /// Text rendered first by the named synthesizer.
    Text { text: String, model: String },
}

/// Result of a conversion run.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    /// Final audio.
    pub audio: Waveform,
    /// Separated background stem, when separation ran.
    pub background: Option<Waveform>,
    /// Voice before it was mixed back with the background.
    pub vocals: Option<Waveform>,
}

/// Chains the optional external models around voice conversion.
pub struct VoiceConversion {
    /// Text-to-speech models, reused while the same name is asked for.
    pub synthesizers: NamedSlot<dyn SpeechSynthesizer>,
    pub separator: Option<Box<dyn SourceSeparator>>,
    pub denoiser: Option<Box<dyn Denoiser>>,
    pub converters: ConverterModels,
}

impl Default for VoiceConversion {
    fn default() -> Self {
        Self {
            synthesizers: NamedSlot::unavailable("speech synthesizer"),
            separator: None,
            denoiser: None,
            converters: ConverterModels::unavailable(DEFAULT_CONVERTER_DIR),
        }
    }
}

impl fmt::Debug for VoiceConversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceConversion")
            .field("synthesizer", &self.synthesizers.loaded_name())
            .field("separator", &self.separator.is_some())
            .field("denoiser", &self.denoiser.is_some())
            .field("converter", &self.converters.loaded())
            .finish()
    }
}

fn require<'a, T: ?Sized>(slot: &'a mut Option<Box<T>>, what: &str) -> BarkResult<&'a mut T> {
    slot.as_deref_mut()
        .ok_or_else(|| BarkError::NoModelLoaded(what.to_string()))
}

impl VoiceConversion {
    /// Run the chain.
    ///
    /// Order: input → separation → denoise → conversion → recombination →
    /// output denoise. A step whose flag is set but whose model is missing
    /// fails with `NoModelLoaded`. Conversion runs only when `converter`
    /// names an installed model.
    #[instrument(skip_all, fields(flags = ?flags, converter = converter))]
    pub fn run(
        &mut self,
        input: ConversionInput,
        flags: ConversionFlags,
        converter: Option<&str>,
        params: &ConversionParams,
    ) -> BarkResult<ConversionOutput> {
        params.validate()?;
        let mut audio = match input {
            ConversionInput::Audio {
                sample_rate,
                channels,
                pcm,
            } => Waveform::new(flatten_audio(&pcm, channels), sample_rate),
            ConversionInput::Text { text, model } => {
                self.synthesizers.get(&model)?.synthesize(&text)?
            }
        };
        debug!(samples = audio.num_samples(), sample_rate = audio.sample_rate, "Input ready");

        let mut background = None;
        if flags.separate_background {
            let (fg, bg) = require(&mut self.separator, "source separator")?.separate(&audio)?;
            audio = fg;
            background = Some(bg);
        }

        if flags.denoise {
            audio = require(&mut self.denoiser, "denoiser")?.denoise(&audio)?;
        }

        if let Some(name) = converter.filter(|n| !n.is_empty()) {
            let model = self.converters.get(name)?;
            let speakers = model.speakers().max(1);
            if params.speaker_id >= speakers {
                return Err(BarkError::invalid_input(format!(
                    "speaker {} out of range, '{name}' has {speakers}",
                    params.speaker_id
                )));
            }
            debug!(
                model = name,
                pitch = %params.pitch_extract,
                up_key = params.up_key,
                crepe_hop = params.pitch_extract.is_crepe().then_some(params.crepe_hop_length),
                "Converting voice"
            );
            audio = model.convert(&audio, params)?;
        }

        let mut vocals = None;
        if let (Some(bg), true) = (&background, flags.recombine_background) {
            let merged = merge_and_match(&audio.samples, &bg.samples)?;
            vocals = Some(audio.clone());
            audio = Waveform::new(merged, audio.sample_rate);
        }

        if flags.denoise_output {
            audio = require(&mut self.denoiser, "denoiser")?.denoise(&audio)?;
        }

        info!(
            duration_secs = audio.duration_secs(),
            background = background.is_some(),
            "Voice conversion finished"
        );
        Ok(ConversionOutput {
            audio,
            background,
            vocals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    struct Tone;

    impl SpeechSynthesizer for Tone {
        fn synthesize(&mut self, text: &str) -> BarkResult<Waveform> {
            let n = text.len() * 100;
            Ok(Waveform::new(
                (0..n).map(|i| (i as f32 * 0.05).sin() * 0.5).collect(),
                22_050,
            ))
        }
    }

    struct HalfSplit;

    impl SourceSeparator for HalfSplit {
        fn separate(&mut self, audio: &Waveform) -> BarkResult<(Waveform, Waveform)> {
            let half: Vec<f32> = audio.samples.iter().map(|s| s * 0.5).collect();
            Ok((
                Waveform::new(half.clone(), audio.sample_rate),
                Waveform::new(half, audio.sample_rate),
            ))
        }
    }

    struct Gate;

    impl Denoiser for Gate {
        fn denoise(&mut self, audio: &Waveform) -> BarkResult<Waveform> {
            let samples = audio
                .samples
                .iter()
                .map(|&s| if s.abs() < 0.1 { 0.0 } else { s })
                .collect();
            Ok(Waveform::new(samples, audio.sample_rate))
        }
    }

    /// Inverts the signal and remembers the settings of every call.
    struct Invert {
        speakers: u32,
        seen: Arc<Mutex<Vec<ConversionParams>>>,
    }

    impl VoiceConverter for Invert {
        fn speakers(&self) -> u32 {
            self.speakers
        }

        fn convert(&mut self, audio: &Waveform, params: &ConversionParams) -> BarkResult<Waveform> {
            self.seen.lock().unwrap().push(*params);
            Ok(Waveform::new(
                audio.samples.iter().map(|s| -s).collect(),
                audio.sample_rate,
            ))
        }
    }

    struct Installed {
        _dir: TempDir,
        models: ConverterModels,
        loads: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<ConversionParams>>>,
    }

    /// `alto` has two speakers, `bass` one.
    fn installed() -> Installed {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("alto")).unwrap();
        fs::create_dir(dir.path().join("bass")).unwrap();
        fs::write(dir.path().join("notes.txt"), "not a model").unwrap();

        let loads = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (counter, log) = (Arc::clone(&loads), Arc::clone(&seen));
        let models = ConverterModels::new(
            dir.path(),
            Box::new(move |path: &Path| {
                counter.fetch_add(1, Ordering::SeqCst);
                let speakers = if path.ends_with("alto") { 2 } else { 1 };
                Ok(Box::new(Invert {
                    speakers,
                    seen: Arc::clone(&log),
                }) as Box<dyn VoiceConverter>)
            }),
        );
        Installed {
            _dir: dir,
            models,
            loads,
            seen,
        }
    }

    fn tone_synthesizers(loads: Arc<AtomicUsize>) -> NamedSlot<dyn SpeechSynthesizer> {
        NamedSlot::new(
            "speech synthesizer",
            Box::new(move |_: &str| {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(Tone) as Box<dyn SpeechSynthesizer>)
            }),
        )
    }

    fn text(text: &str, model: &str) -> ConversionInput {
        ConversionInput::Text {
            text: text.into(),
            model: model.into(),
        }
    }

    #[test]
    fn test_flag_names() {
        let flags = ConversionFlags::from_names(["denoise", "Recombine-Background"]).unwrap();
        assert!(flags.denoise);
        assert!(flags.recombine_background);
        assert!(!flags.separate_background);
        assert!(ConversionFlags::from_names(["louder"]).is_err());
    }

    #[test]
    fn test_pitch_extractor_names_and_param_ranges() {
        assert_eq!(
            "pyworld_harvest".parse::<PitchExtractor>().unwrap(),
            PitchExtractor::PyworldHarvest
        );
        assert!("Torchcrepe Tiny".parse::<PitchExtractor>().unwrap().is_crepe());
        assert!("yin".parse::<PitchExtractor>().is_err());

        assert!(ConversionParams::default().validate().is_ok());
        let bad = [
            ConversionParams { index_rate: 1.5, ..Default::default() },
            ConversionParams { filter_radius: 8, ..Default::default() },
            ConversionParams { protect: 0.6, ..Default::default() },
            ConversionParams { crepe_hop_length: 100, ..Default::default() },
        ];
        for params in bad {
            assert!(params.validate().is_err(), "{params:?}");
        }
    }

    #[test]
    fn test_audio_input_is_flattened_and_converted() {
        let Installed { _dir, models, seen, .. } = installed();
        let mut chain = VoiceConversion {
            converters: models,
            ..Default::default()
        };
        let input = ConversionInput::Audio {
            sample_rate: 16_000,
            channels: 2,
            pcm: PcmBuffer::I16(vec![32_767, 32_767, -32_767, 32_767]),
        };
        let out = chain
            .run(input, ConversionFlags::default(), Some("bass"), &ConversionParams::default())
            .unwrap();
        assert_eq!(out.audio.samples, vec![-1.0, -0.0]);
        assert_eq!(out.audio.sample_rate, 16_000);
        assert!(out.background.is_none());
        assert!(out.vocals.is_none());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_params_reach_converter() {
        let Installed { _dir, models, seen, .. } = installed();
        let mut chain = VoiceConversion {
            synthesizers: tone_synthesizers(Arc::new(AtomicUsize::new(0))),
            converters: models,
            ..Default::default()
        };
        let params = ConversionParams {
            speaker_id: 1,
            up_key: -3,
            pitch_extract: PitchExtractor::Torchcrepe,
            index_rate: 0.5,
            filter_radius: 5,
            protect: 0.2,
            crepe_hop_length: 256,
        };
        chain
            .run(text("hi", "tts"), ConversionFlags::default(), Some("alto"), &params)
            .unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), &[params]);

        let out_of_range = ConversionParams { speaker_id: 2, ..params };
        let err = chain
            .run(text("hi", "tts"), ConversionFlags::default(), Some("alto"), &out_of_range)
            .unwrap_err();
        assert!(matches!(err, BarkError::InvalidInput(_)));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_converter_models_list_load_unload() {
        let Installed {
            _dir,
            mut models,
            loads,
            ..
        } = installed();
        assert_eq!(models.list_installed().unwrap(), vec!["alto", "bass"]);

        assert_eq!(models.load("alto").unwrap(), 2);
        assert_eq!(models.load("alto").unwrap(), 2);
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        assert_eq!(models.load("bass").unwrap(), 1);
        assert_eq!(models.loaded(), Some("bass"));
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        assert!(models.unload());
        assert!(!models.unload());
        assert!(matches!(models.load("tenor"), Err(BarkError::InvalidInput(_))));
        assert!(matches!(models.load("../alto"), Err(BarkError::InvalidInput(_))));

        let nowhere = ConverterModels::unavailable("/nonexistent/rvc");
        assert!(nowhere.list_installed().unwrap().is_empty());
    }

    #[test]
    fn test_synthesizer_reused_by_name() {
        let loads = Arc::new(AtomicUsize::new(0));
        let mut chain = VoiceConversion {
            synthesizers: tone_synthesizers(Arc::clone(&loads)),
            ..Default::default()
        };
        let params = ConversionParams::default();
        for model in ["vits", "vits", "tacotron"] {
            chain
                .run(text("hey", model), ConversionFlags::default(), None, &params)
                .unwrap();
        }
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(chain.synthesizers.loaded_name(), Some("tacotron"));
    }

    #[test]
    fn test_text_input_requires_synthesizer() {
        let mut chain = VoiceConversion::default();
        let err = chain
            .run(
                text("hi", "tts"),
                ConversionFlags::default(),
                None,
                &ConversionParams::default(),
            )
            .unwrap_err();
        assert!(matches!(err, BarkError::NoModelLoaded(_)));
    }

    #[test]
    fn test_separate_and_recombine() {
        let Installed { _dir, models, .. } = installed();
        let mut chain = VoiceConversion {
            synthesizers: tone_synthesizers(Arc::new(AtomicUsize::new(0))),
            separator: Some(Box::new(HalfSplit)),
            denoiser: Some(Box::new(Gate)),
            converters: models,
        };
        let flags = ConversionFlags {
            denoise: true,
            denoise_output: true,
            separate_background: true,
            recombine_background: true,
        };
        let out = chain
            .run(
                text("hello world", "tts"),
                flags,
                Some("bass"),
                &ConversionParams::default(),
            )
            .unwrap();

        let n = "hello world".len() * 100;
        assert_eq!(out.audio.num_samples(), n);
        assert_eq!(out.background.as_ref().unwrap().num_samples(), n);
        assert_eq!(out.vocals.as_ref().unwrap().num_samples(), n);
        assert_eq!(out.audio.sample_rate, 22_050);
    }

    #[test]
    fn test_separation_without_recombine_keeps_background_apart() {
        let mut chain = VoiceConversion {
            separator: Some(Box::new(HalfSplit)),
            ..Default::default()
        };
        let flags = ConversionFlags {
            separate_background: true,
            ..Default::default()
        };
        let input = ConversionInput::Audio {
            sample_rate: 8_000,
            channels: 1,
            pcm: PcmBuffer::F32(vec![0.4, -0.4]),
        };
        let out = chain
            .run(input, flags, None, &ConversionParams::default())
            .unwrap();
        assert_eq!(out.audio.samples, vec![0.2, -0.2]);
        assert!(out.background.is_some());
        assert!(out.vocals.is_none());
    }
}
