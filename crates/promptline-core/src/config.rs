//! Runtime configuration read from the environment
//!
//! Each provider has its own config struct with a `from_env` constructor.
//! The `from_vars` variants take a lookup closure so tests never touch the
//! process environment.

use crate::error::{Error, Result};
use crate::http::retry::RetryPolicy;
use crate::types::Provider;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default Gemini REST endpoint
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Default directory for generated images
pub const DEFAULT_IMAGE_OUTPUT: &str = "temp/output/image";

/// Default preset root, holding `preset/` and `groups/`
pub const DEFAULT_PRESET_ROOT: &str = "presets";

/// Load variables from a `.env` file without overriding existing ones.
///
/// A missing file is not an error.
pub fn load_env_file(path: impl AsRef<Path>) {
    let path = path.as_ref();
    if !path.exists() {
        return;
    }
    match dotenv::from_path(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Loaded environment file"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to load environment file"),
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, key).ok_or_else(|| Error::config(format!("missing environment variable: {}", key)))
}

fn optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an http(s) base URL, dropping any trailing slash
fn base_url(key: &str, raw: String) -> Result<String> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| Error::config_with_source(format!("{} is not a valid URL: {}", key, raw), e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::config(format!("{} must use http or https: {}", key, raw)));
    }
    Ok(raw.trim().trim_end_matches('/').to_string())
}

fn timeout<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    match optional(lookup, key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(|secs| Some(Duration::from_secs_f64(secs)))
            .ok_or_else(|| Error::config(format!("{} must be a positive number of seconds, got '{}'", key, raw))),
    }
}

fn flag<F>(lookup: &F, key: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Settings for OpenAI-compatible endpoints
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    /// Base URL up to (not including) `/chat/completions`
    pub api_base: String,
    pub default_model: Option<String>,
    pub timeout: Option<Duration>,
    pub organization: Option<String>,
    pub usage_db: PathBuf,
    pub retry: RetryPolicy,
}

impl OpenAiConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            api_key: required(&lookup, "LLM_API_KEY")?,
            api_base: base_url("LLM_API_BASE", required(&lookup, "LLM_API_BASE")?)?,
            default_model: optional(&lookup, "LLM_MODEL"),
            timeout: timeout(&lookup, "LLM_TIMEOUT")?,
            organization: optional(&lookup, "LLM_ORG"),
            usage_db: optional(&lookup, "LLM_USAGE_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("usage_log.db")),
            retry: RetryPolicy::default(),
        })
    }
}

/// Settings for the Gemini generateContent API
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub api_base: String,
    pub default_model: Option<String>,
    pub timeout: Option<Duration>,
    pub usage_db: PathBuf,
    /// Root directory for generated images
    pub image_output: PathBuf,
    /// Hand generated images to the configured image host
    pub upload_images: bool,
    pub retry: RetryPolicy,
}

impl GeminiConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            api_key: required(&lookup, "GEMINI_API_KEY")?,
            api_base: base_url(
                "GEMINI_API_BASE",
                optional(&lookup, "GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
            )?,
            default_model: optional(&lookup, "GEMINI_MODEL"),
            timeout: timeout(&lookup, "GEMINI_TIMEOUT")?,
            usage_db: optional(&lookup, "GEMINI_USAGE_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("gemini_usage_log.db")),
            image_output: optional(&lookup, "GEMINI_IMAGE_OUTPUT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_OUTPUT)),
            upload_images: flag(&lookup, "GEMINI_IMAGE_UPLOAD"),
            retry: RetryPolicy::default(),
        })
    }
}

/// Settings for the OpenList image host
#[derive(Debug, Clone)]
pub struct OpenListConfig {
    pub url: String,
    pub account: String,
    pub password: String,
    /// Remote directory receiving uploads, e.g. `/temp/images`
    pub temp_upload_path: String,
    pub otp_code: Option<String>,
}

impl OpenListConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            url: base_url("OPENLIST_URL", required(&lookup, "OPENLIST_URL")?)?,
            account: required(&lookup, "OPENLIST_ACCOUNT")?,
            password: required(&lookup, "OPENLIST_PASSWORD")?,
            temp_upload_path: required(&lookup, "OPENLIST_TEMP_UPLOAD_PATH")?,
            otp_code: optional(&lookup, "OPENLIST_OTP_CODE"),
        })
    }
}

/// Preset root directory from `PROMPTLINE_PRESET_ROOT`
pub fn preset_root_from_env() -> PathBuf {
    optional(&env_lookup, "PROMPTLINE_PRESET_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PRESET_ROOT))
}

/// Default model for `provider` from `LLM_MODEL` or `GEMINI_MODEL`.
///
/// Reads no credentials.
pub fn default_model_from_env(provider: Provider) -> Option<String> {
    default_model_from_vars(provider, env_lookup)
}

fn default_model_from_vars<F>(provider: Provider, lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let key = match provider {
        Provider::OpenAi => "LLM_MODEL",
        Provider::Gemini => "GEMINI_MODEL",
    };
    optional(&lookup, key)
}
