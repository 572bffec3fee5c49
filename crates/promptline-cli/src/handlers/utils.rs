//! Shared utilities for command handlers

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::error::{Error, Result};
use promptline_core::{
    ComposedMessage, ComposedRequest, Composer, ComposerConfig, ContentBlock, MessageContent, PresetLibrary,
    PresetLoader, RequestParser,
};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Characters of message content shown in tables
pub const SUMMARY_WIDTH: usize = 60;

/// Read a request document, reporting a missing file distinctly
pub fn read_request(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(Error::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let content = fs::read_to_string(path)?;
    debug!(path = %path.display(), bytes = content.len(), "Request document read");
    Ok(content)
}

/// Preset library rooted at the configured preset root
pub fn preset_library(config: &Config) -> PresetLibrary {
    let root = config.preset_root();
    debug!(root = %root.display(), "Using preset root");
    PresetLibrary::from_root(root)
}

/// Parse and compose `yaml` without contacting a provider
pub fn compose_request(yaml: &str, library: &PresetLibrary, default_model: Option<String>) -> Result<ComposedRequest> {
    let loader: &dyn PresetLoader = library;
    let parsed = RequestParser::new(Some(loader)).parse(yaml)?;
    let composer_config = ComposerConfig { default_model };
    Ok(Composer::new(&composer_config, Some(loader)).build(parsed)?)
}

/// Render a result for a file written with `--save-to`
pub fn render_for_file(value: &Value, format: OutputFormat) -> Result<String> {
    match (format, value) {
        (OutputFormat::Human, Value::String(text)) => Ok(text.clone()),
        (OutputFormat::Yaml, _) => Ok(serde_yaml::to_string(value)?),
        (OutputFormat::Json, _) => Ok(serde_json::to_string(value)?),
        _ => Ok(serde_json::to_string_pretty(value)?),
    }
}

/// Write `content` to `path`, creating parent directories
pub fn save_to(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    debug!(path = %path.display(), "Output written");
    Ok(())
}

/// One-line summary of message content for tables
pub fn summarize_content(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => truncate(text, SUMMARY_WIDTH),
        MessageContent::Blocks(blocks) => {
            let text = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    ContentBlock::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(" ");
            let images = blocks.iter().filter(|b| matches!(b, ContentBlock::Image { .. })).count();
            format!("{} [+{} image(s)]", truncate(&text, SUMMARY_WIDTH), images)
        }
    }
}

/// Table rows for a list of composed messages
pub fn message_rows(messages: &[ComposedMessage]) -> Vec<Vec<String>> {
    messages
        .iter()
        .map(|m| vec![m.role.as_str().to_string(), summarize_content(&m.content)])
        .collect()
}

/// Collapse whitespace and cut to `max` characters
pub fn truncate(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut)
}
