//! # history-prompt
//!
//! Resolution of history prompts and I/O of token artifacts.
//!
//! A history prompt conditions generation on an existing voice. It can be
//! handed over inline, as a path to an `.npz` archive, or by name: built-in
//! presets come from a fixed allow-list, anything else is looked up among the
//! user's saved speakers. A name that resolves nowhere means "no history".
//!
//! # Example
//!
//! ```ignore
//! use history_prompt::{HistoryRef, PresetRegistry};
//!
//! let registry = PresetRegistry::new("assets/prompts", "data/bark_custom_speakers");
//! let history = registry.resolve(&HistoryRef::parse("v2/en_speaker_6"))?;
//! ```

pub mod bundle;
pub mod npy;
pub mod npz;
pub mod presets;

pub use bundle::{read_semantic_bundle, write_bundle};
pub use npz::{
    inspect_archive, load_fine_prompt, load_history_npz, load_semantic_file, read_codebooks_npy,
    save_history_npz, write_codebooks_npy, write_semantic_npy, ArrayInfo,
};
pub use presets::{allowed_prompts, is_builtin_prompt, HistoryRef, PresetRegistry, SUPPORTED_LANGS};
