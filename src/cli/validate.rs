//! Manifest and settings validation command handlers.

use std::path::Path;

use anyhow::{bail, Context, Result};

use hubupdate::config::validate::{validate_config, validate_raw, Diagnostic, DiagnosticLevel};
use hubupdate::manifest::validate::validate_manifest;
use hubupdate::{Manifest, UpdaterConfig};

use super::ConfigAction;

fn print_summary(diagnostics: &[Diagnostic]) -> usize {
    for diag in diagnostics {
        println!("{}", diag);
    }
    let errors = diagnostics
        .iter()
        .filter(|d| d.level == DiagnosticLevel::Error)
        .count();
    let warnings = diagnostics
        .iter()
        .filter(|d| d.level == DiagnosticLevel::Warn)
        .count();
    if errors > 0 || warnings > 0 {
        println!("\nFound {} error(s), {} warning(s)", errors, warnings);
    }
    errors
}

/// Schema-check a local manifest.
pub(crate) fn cmd_validate(file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let raw: serde_yaml::Value = match serde_yaml::from_str(&content) {
        Ok(v) => v,
        Err(e) => bail!("[ERROR] Invalid YAML/JSON: {}", e),
    };

    println!("Manifest: {}", file.display());
    if print_summary(&validate_manifest(&raw)) > 0 {
        bail!("manifest is invalid");
    }

    let manifest = Manifest::parse(content.as_bytes())?;
    println!();
    println!("Version {} with {} step(s):", manifest.version, manifest.steps.len());
    if let Some(required) = &manifest.requires {
        println!("  requires {}", required);
    }
    for (i, step) in manifest.steps.iter().enumerate() {
        println!("  {}. [{}] {}", i + 1, step.type_name(), step.describe());
    }
    Ok(())
}

/// Validate or print the settings file.
pub(crate) fn cmd_config(action: ConfigAction, path: &Path) -> Result<()> {
    match action {
        ConfigAction::Check => {
            println!("Settings file: {}", path.display());
            let mut diagnostics = Vec::new();
            if path.exists() {
                let content = std::fs::read_to_string(path)
                    .context("Failed to read settings file")?;
                match serde_yaml::from_str::<serde_yaml::Value>(&content) {
                    Ok(raw) => diagnostics.extend(validate_raw(&raw)),
                    Err(e) => bail!("[ERROR] Invalid YAML: {}", e),
                }
            } else {
                println!("[OK] No settings file found (using defaults)");
            }

            let config = UpdaterConfig::load_from_path(path)?;
            diagnostics.extend(validate_config(&config));
            if print_summary(&diagnostics) > 0 {
                bail!("settings are invalid");
            }
            println!("\nSettings look good!");
        }
        ConfigAction::Show => {
            let config = UpdaterConfig::load_from_path(path)?;
            print!("{}", serde_yaml::to_string(&config)?);
        }
    }
    Ok(())
}
