//! Named speaker presets and history reference resolution.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use bark_core::{BarkError, BarkResult, HistoryPrompt, PipelineConfig};

use crate::npz::{load_history_npz, save_history_npz};

/// Languages with built-in speaker presets.
pub const SUPPORTED_LANGS: [&str; 13] = [
    "en", "de", "es", "fr", "hi", "it", "ja", "ko", "pl", "pt", "ru", "tr", "zh",
];

const SPEAKERS_PER_LANG: usize = 10;

/// Every preset name shipped with the model, in a stable order.
pub fn allowed_prompts() -> Vec<String> {
    let mut names = vec!["announcer".to_string()];
    for lang in SUPPORTED_LANGS {
        for prefix in ["", "v2/"] {
            for n in 0..SPEAKERS_PER_LANG {
                names.push(format!("{prefix}{lang}_speaker_{n}"));
            }
        }
    }
    for n in 0..SPEAKERS_PER_LANG {
        names.push(format!("speaker_{n}"));
    }
    names
}

/// Check whether `name` is on the built-in allow-list.
pub fn is_builtin_prompt(name: &str) -> bool {
    let is_digit = |n: &str| n.len() == 1 && n.as_bytes()[0].is_ascii_digit();
    if name == "announcer" {
        return true;
    }
    // `speaker_N` has no v2 variant
    if let Some(n) = name.strip_prefix("speaker_") {
        return is_digit(n);
    }
    let name = name.strip_prefix("v2/").unwrap_or(name);
    match name.split_once("_speaker_") {
        Some((lang, n)) => SUPPORTED_LANGS.contains(&lang) && is_digit(n),
        None => false,
    }
}

/// How the caller refers to a history prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryRef {
    /// Arrays supplied directly.
    Inline(HistoryPrompt),
    /// Explicit path to an `.npz` archive.
    File(PathBuf),
    /// Built-in preset or saved custom speaker.
    Preset(String),
}

impl HistoryRef {
    /// Interpret a user-supplied string: `*.npz` is a file, anything else a preset name.
    pub fn parse(s: &str) -> Self {
        if s.ends_with(".npz") {
            Self::File(PathBuf::from(s))
        } else {
            Self::Preset(s.to_string())
        }
    }
}

impl From<HistoryPrompt> for HistoryRef {
    fn from(history: HistoryPrompt) -> Self {
        Self::Inline(history)
    }
}

/// Lookup of built-in presets and user-saved speakers.
#[derive(Debug, Clone)]
pub struct PresetRegistry {
    builtin_dir: PathBuf,
    custom_dir: PathBuf,
}

impl PresetRegistry {
    /// Create a registry over the two prompt directories.
    pub fn new(builtin_dir: impl Into<PathBuf>, custom_dir: impl Into<PathBuf>) -> Self {
        Self {
            builtin_dir: builtin_dir.into(),
            custom_dir: custom_dir.into(),
        }
    }

    /// Create a registry from the pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.builtin_prompt_dir, &config.custom_speaker_dir)
    }

    pub fn builtin_dir(&self) -> &Path {
        &self.builtin_dir
    }

    pub fn custom_dir(&self) -> &Path {
        &self.custom_dir
    }

    /// Path a preset name maps to, or `None` when it names nothing.
    pub fn preset_path(&self, name: &str) -> Option<PathBuf> {
        if is_builtin_prompt(name) {
            return Some(self.builtin_dir.join(format!("{name}.npz")));
        }
        if !is_valid_custom_name(name) {
            return None;
        }
        let path = self.custom_dir.join(format!("{name}.npz"));
        path.is_file().then_some(path)
    }

    /// Resolve a reference into arrays.
    ///
    /// Preset names that map to nothing yield `Ok(None)`, so generation runs
    /// unconditioned. Files that exist but fail to load are errors.
    pub fn resolve(&self, reference: &HistoryRef) -> BarkResult<Option<HistoryPrompt>> {
        match reference {
            HistoryRef::Inline(history) => {
                history.validate()?;
                Ok(Some(history.clone()))
            }
            HistoryRef::File(path) => load_history_npz(path).map(Some),
            HistoryRef::Preset(name) => match self.preset_path(name) {
                Some(path) => {
                    debug!(preset = %name, path = %path.display(), "Loading history preset");
                    load_history_npz(&path).map(Some)
                }
                None => {
                    warn!(preset = %name, "Unknown history prompt, generating without history");
                    Ok(None)
                }
            },
        }
    }

    /// Resolve an optional string reference.
    pub fn resolve_str(&self, reference: Option<&str>) -> BarkResult<Option<HistoryPrompt>> {
        match reference {
            Some(s) if !s.is_empty() => self.resolve(&HistoryRef::parse(s)),
            _ => Ok(None),
        }
    }

    /// Built-in presets whose archive is present in the built-in directory.
    pub fn list_builtin(&self) -> Vec<String> {
        allowed_prompts()
            .into_iter()
            .filter(|name| self.builtin_dir.join(format!("{name}.npz")).is_file())
            .collect()
    }

    /// Names of saved custom speakers, sorted.
    pub fn list_custom_speakers(&self) -> BarkResult<Vec<String>> {
        let entries = match fs::read_dir(&self.custom_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("npz") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Save `history` as a custom speaker and return the written path.
    pub fn save_custom_speaker(&self, name: &str, history: &HistoryPrompt) -> BarkResult<PathBuf> {
        if !is_valid_custom_name(name) {
            return Err(BarkError::invalid_input(format!(
                "invalid speaker name {name:?}"
            )));
        }
        if is_builtin_prompt(name) {
            return Err(BarkError::invalid_input(format!(
                "{name} is a built-in preset name"
            )));
        }
        history.validate()?;
        fs::create_dir_all(&self.custom_dir)?;
        let path = self.custom_dir.join(format!("{name}.npz"));
        save_history_npz(&path, history)?;
        info!(speaker = %name, path = %path.display(), "Saved custom speaker");
        Ok(path)
    }
}

fn is_valid_custom_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.ends_with(".npz")
}
