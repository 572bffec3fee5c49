//! SillyTavern preset conversion
//!
//! Turns the `prompts` array of a SillyTavern JSON preset into a preset YAML
//! file. Each prompt becomes a `- role: content` leaf preceded by a
//! `# name (identifier)` comment. Marker prompts only leave their comment
//! behind. Sampling parameters are not carried over; they belong in the
//! request's `generation` block.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Deserialize)]
struct TavernPreset {
    #[serde(default)]
    prompts: Vec<TavernPrompt>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TavernPrompt {
    name: Option<String>,
    identifier: Option<String>,
    role: Option<String>,
    content: Option<String>,
    marker: bool,
}

impl TavernPrompt {
    fn comment(&self) -> String {
        let mut parts = Vec::new();
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            parts.push(name.replace(['\r', '\n'], " "));
        }
        if let Some(id) = self.identifier.as_deref().filter(|i| !i.is_empty()) {
            parts.push(format!("({})", id));
        }
        if self.marker {
            parts.push("- marker".to_string());
        }
        parts.join(" ")
    }
}

/// YAML scalar for `content`, as it appears after `- role: `
fn yaml_scalar(content: &str) -> String {
    if content.is_empty() {
        return "''".to_string();
    }
    let multi_line = content.contains('\n');
    if content.starts_with(' ') {
        // block scalars cannot keep leading spaces on their first line
        return serde_json::to_string(content).unwrap_or_else(|_| "''".to_string());
    }
    if multi_line || content.ends_with(' ') {
        let mut block = String::from("|");
        for line in content.split('\n') {
            block.push_str("\n    ");
            block.push_str(line);
        }
        return block;
    }
    format!("'{}'", content.replace('\'', "''"))
}

/// Convert one SillyTavern JSON preset into preset YAML text
pub fn convert_tavern_preset(json: &str) -> Result<String> {
    let preset: TavernPreset =
        serde_json::from_str(json).map_err(|e| Error::validation(format!("invalid SillyTavern preset: {}", e)))?;
    if preset.prompts.is_empty() {
        return Err(Error::invalid_field("prompts", "preset contains no prompts"));
    }

    let mut out = String::new();
    for prompt in &preset.prompts {
        let comment = prompt.comment();
        if prompt.marker {
            out.push_str(&format!("# {}\n\n", comment));
            continue;
        }

        let role = prompt.role.as_deref().unwrap_or_default();
        if !matches!(role, "system" | "user" | "assistant") {
            debug!(role, prompt = %comment, "Skipping prompt with unknown role");
            continue;
        }
        let content = prompt.content.as_deref().unwrap_or_default();
        if role != "system" && content.trim().is_empty() {
            debug!(role, prompt = %comment, "Skipping empty prompt");
            continue;
        }

        if !comment.is_empty() {
            out.push_str(&format!("# {}\n", comment));
        }
        out.push_str(&format!("- {}: {}\n", role, yaml_scalar(content)));
    }
    Ok(out)
}

/// Outcome of a [`batch_convert`] run, by JSON file name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionStats {
    pub total: usize,
    pub success: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
}

/// Convert every `*.json` file in `json_dir` into `<preset_dir>/<stem>.yaml`
pub fn batch_convert(json_dir: &Path, preset_dir: &Path, overwrite: bool) -> Result<ConversionStats> {
    fs::create_dir_all(preset_dir)
        .map_err(|e| Error::config_with_source(format!("cannot create {}", preset_dir.display()), e))?;

    let files: Vec<_> = WalkDir::new(json_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().and_then(|e| e.to_str()) == Some("json"))
        .map(|entry| entry.into_path())
        .collect();

    let mut stats = ConversionStats {
        total: files.len(),
        ..Default::default()
    };
    if files.is_empty() {
        warn!(dir = %json_dir.display(), "No JSON presets found");
        return Ok(stats);
    }
    info!(count = files.len(), dir = %json_dir.display(), "Converting SillyTavern presets");

    for path in files {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = preset_dir.join(format!("{}.yaml", stem));

        if target.exists() && !overwrite {
            info!(file = %file_name, "Skipping, preset already exists");
            stats.skipped.push(file_name);
            continue;
        }

        let converted = fs::read_to_string(&path)
            .map_err(|e| Error::config_with_source(format!("cannot read {}", path.display()), e))
            .and_then(|json| convert_tavern_preset(&json))
            .and_then(|yaml| {
                fs::write(&target, yaml)
                    .map_err(|e| Error::config_with_source(format!("cannot write {}", target.display()), e))
            });
        match converted {
            Ok(()) => {
                info!(file = %file_name, target = %target.display(), "Converted");
                stats.success.push(file_name);
            }
            Err(e) => {
                error!(file = %file_name, error = %e, "Conversion failed");
                stats.failed.push(file_name);
            }
        }
    }

    info!(
        success = stats.success.len(),
        failed = stats.failed.len(),
        skipped = stats.skipped.len(),
        "Conversion finished"
    );
    Ok(stats)
}
