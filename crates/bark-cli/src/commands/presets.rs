//! Presets command implementation.

use anyhow::Result;

use bark_core::PipelineConfig;
use history_prompt::{allowed_prompts, PresetRegistry};

/// List built-in presets and saved custom speakers.
pub fn run(config: &PipelineConfig, all: bool) -> Result<()> {
    let registry = PresetRegistry::from_config(config);

    let builtin = if all {
        allowed_prompts()
    } else {
        registry.list_builtin()
    };
    println!(
        "Built-in presets ({}, {}):",
        builtin.len(),
        registry.builtin_dir().display()
    );
    for name in &builtin {
        println!("  {name}");
    }

    let custom = registry.list_custom_speakers()?;
    println!();
    println!(
        "Custom speakers ({}, {}):",
        custom.len(),
        registry.custom_dir().display()
    );
    for name in &custom {
        println!("  {name}");
    }
    Ok(())
}
