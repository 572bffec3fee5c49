//! Configuration management for the CLI
//!
//! Settings come from, in increasing precedence:
//! - Default values
//! - A configuration file (YAML/JSON)
//! - Environment variables read by promptline-core
//! - Command-line arguments

use crate::cli::ProviderArg;
use crate::error::{Error, Result};
use promptline_core::Provider;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provider used when `--provider` is not given
    pub default_provider: Option<String>,

    /// Model used when neither the request nor `--model` names one
    pub default_model: Option<String>,

    /// Output settings
    pub output: OutputConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Path settings
    pub paths: PathConfig,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Use colored output by default
    pub color: bool,

    /// Show progress spinners
    pub progress: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter, overriding the verbosity default
    pub level: Option<String>,

    /// Log format (compact, full, json)
    pub format: Option<String>,
}

/// Path configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Preset root holding `preset/` and `groups/`
    pub preset_root: Option<PathBuf>,

    /// `.env` file loaded before reading provider settings
    pub env_file: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            color: true,
            progress: true,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;

        let config = if is_yaml(path) {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };

        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        for path in &Self::default_config_paths() {
            if path.exists() {
                match Self::from_file(path) {
                    Ok(config) => {
                        tracing::debug!(path = %path.display(), "Loaded configuration file");
                        return Ok(config);
                    }
                    Err(e) => {
                        eprintln!("Warning: Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file or default locations
    pub fn load_with_file(file: Option<&Path>) -> Result<Self> {
        if let Some(path) = file {
            Self::from_file(path)
        } else {
            Self::load()
        }
    }

    fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from(".promptline.yaml"),
            PathBuf::from(".promptline.json"),
            PathBuf::from("promptline.yaml"),
            PathBuf::from("promptline.json"),
        ];

        if let Some(config_dir) = dirs::config_dir() {
            let dir = config_dir.join("promptline");
            paths.push(dir.join("config.yaml"));
            paths.push(dir.join("config.json"));
        }

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".promptline.yaml"));
            paths.push(home_dir.join(".promptline.json"));
        }

        paths
    }

    /// Provider from the command line, else the configured default
    pub fn provider(&self, arg: Option<ProviderArg>) -> Result<Provider> {
        if let Some(arg) = arg {
            return Ok(arg.into());
        }
        match &self.default_provider {
            Some(name) => name.parse().map_err(|_| Error::ProviderNotFound { name: name.clone() }),
            None => Err(Error::invalid_args(
                "no provider given; pass --provider or set default_provider in the config file",
            )),
        }
    }

    /// Model from the command line, else the configured default
    pub fn model(&self, arg: Option<&str>) -> Option<String> {
        arg.map(str::to_string).or_else(|| self.default_model.clone())
    }

    /// Preset root from the config file, else the environment
    pub fn preset_root(&self) -> PathBuf {
        self.paths
            .preset_root
            .clone()
            .unwrap_or_else(promptline_core::config::preset_root_from_env)
    }

    /// Apply command-line overrides that live in the config structure
    pub fn apply_overrides(&mut self, preset_root: Option<&Path>) {
        if let Some(root) = preset_root {
            self.paths.preset_root = Some(root.to_path_buf());
        }
    }

    /// `.env` file to load, defaulting to `./.env`
    pub fn env_file(&self) -> PathBuf {
        self.paths.env_file.clone().unwrap_or_else(|| PathBuf::from(".env"))
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(path.extension().and_then(|s| s.to_str()), Some("yaml") | Some("yml"))
}
