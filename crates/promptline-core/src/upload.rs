//! File upload collaborators used by the adapters for image blocks
//!
//! - [`GeminiFileUploader`] pushes local files through the Gemini Files API
//! - [`InlineImageUploader`] turns images into base64 data URIs
//! - [`PreviewUploader`] performs no I/O and is used for dry runs
//!
//! Uploaders cache handles per path, so a file referenced twice in one
//! conversation is only sent once.

use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Handle for a file the provider can reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFile {
    pub uri: String,
    pub mime_type: String,
}

/// Turns an image path or URL into a provider-usable handle
#[async_trait]
pub trait FileUploader: Send + Sync {
    async fn upload(&self, path: &str) -> Result<UploadedFile>;
}

/// MIME type guessed from the file extension
pub fn guess_mime_type(path: &str) -> &'static str {
    let trimmed = path.split(['?', '#']).next().unwrap_or(path);
    let ext = Path::new(trimmed)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        Some("bmp") => "image/bmp",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// True for paths that name a remote resource rather than a local file
pub fn is_remote(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("gs://")
}

fn is_local_file(path: &str) -> bool {
    !is_remote(path) && Path::new(path).exists()
}

fn http_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| Error::config_with_source("failed to create HTTP client", e))
}

async fn canonical_local(path: &str) -> Result<PathBuf> {
    let resolved = tokio::fs::canonicalize(path)
        .await
        .map_err(|e| Error::invalid_field("images", format!("cannot resolve image '{}': {}", path, e)))?;
    if !resolved.is_file() {
        return Err(Error::invalid_field("images", format!("image path is not a file: {}", path)));
    }
    Ok(resolved)
}

/// Gemini Files API uploader
pub struct GeminiFileUploader {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    cache: Mutex<HashMap<String, UploadedFile>>,
}

impl GeminiFileUploader {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    async fn upload_local(&self, path: &Path, mime_type: &str) -> Result<UploadedFile> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::invalid_field("images", format!("failed to read {}: {}", path.display(), e)))?;
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let start = self
            .client
            .post(format!("{}/upload/v1beta/files", self.api_base))
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({"file": {"display_name": display_name}}))
            .send()
            .await?;
        if !start.status().is_success() {
            let status = start.status().as_u16();
            let body = start.text().await.unwrap_or_default();
            return Err(Error::http_status(status, format!("file upload start failed: {}", body)));
        }
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::transport("file upload start returned no upload URL"))?;

        let finish = self
            .client
            .post(upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await?;
        if !finish.status().is_success() {
            let status = finish.status().as_u16();
            let body = finish.text().await.unwrap_or_default();
            return Err(Error::http_status(status, format!("file upload failed: {}", body)));
        }

        let info: Value = finish
            .json()
            .await
            .map_err(|e| Error::transport(format!("invalid file upload response: {}", e)))?;
        let file = info.get("file").unwrap_or(&info);
        let uri = file
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::transport("file upload response has no uri"))?;
        let mime = file
            .get("mimeType")
            .or_else(|| file.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or(mime_type);

        Ok(UploadedFile {
            uri: uri.to_string(),
            mime_type: mime.to_string(),
        })
    }
}

#[async_trait]
impl FileUploader for GeminiFileUploader {
    async fn upload(&self, path: &str) -> Result<UploadedFile> {
        if !is_local_file(path) {
            let mut cache = self.cache.lock().await;
            let handle = cache
                .entry(path.to_string())
                .or_insert_with(|| UploadedFile {
                    uri: path.to_string(),
                    mime_type: guess_mime_type(path).to_string(),
                })
                .clone();
            debug!(uri = %handle.uri, mime_type = %handle.mime_type, "Using remote file URI");
            return Ok(handle);
        }

        let resolved = canonical_local(path).await?;
        let key = resolved.to_string_lossy().into_owned();
        if let Some(hit) = self.cache.lock().await.get(&key) {
            debug!(path = %path, "Using cached upload");
            return Ok(hit.clone());
        }

        debug!(path = %path, "Uploading file to Files API");
        let uploaded = self.upload_local(&resolved, guess_mime_type(path)).await?;
        debug!(path = %path, uri = %uploaded.uri, "File uploaded");
        self.cache.lock().await.insert(key, uploaded.clone());
        Ok(uploaded)
    }
}

/// Encodes images as `data:` URIs, downloading remote ones first
pub struct InlineImageUploader {
    client: reqwest::Client,
    cache: Mutex<HashMap<String, UploadedFile>>,
}

impl InlineImageUploader {
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            cache: Mutex::new(HashMap::new()),
        })
    }

    async fn fetch(&self, path: &str) -> Result<(Vec<u8>, String)> {
        if is_remote(path) {
            let response = self.client.get(path).send().await?;
            if !response.status().is_success() {
                return Err(Error::http_status(
                    response.status().as_u16(),
                    format!("failed to download image {}", path),
                ));
            }
            let mime = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
                .filter(|v| v.starts_with("image/"))
                .unwrap_or_else(|| guess_mime_type(path).to_string());
            let bytes = response.bytes().await?;
            Ok((bytes.to_vec(), mime))
        } else {
            let resolved = canonical_local(path).await?;
            let bytes = tokio::fs::read(&resolved)
                .await
                .map_err(|e| Error::invalid_field("images", format!("failed to read {}: {}", path, e)))?;
            Ok((bytes, guess_mime_type(path).to_string()))
        }
    }
}

/// `data:<mime>;base64,<payload>` for the given bytes
pub fn data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

#[async_trait]
impl FileUploader for InlineImageUploader {
    async fn upload(&self, path: &str) -> Result<UploadedFile> {
        let key = if is_remote(path) {
            path.to_string()
        } else {
            canonical_local(path).await?.to_string_lossy().into_owned()
        };
        if let Some(hit) = self.cache.lock().await.get(&key) {
            return Ok(hit.clone());
        }

        let (bytes, mime_type) = self.fetch(path).await?;
        debug!(path = %path, bytes = bytes.len(), "Encoded image as data URI");
        let uploaded = UploadedFile {
            uri: data_uri(&mime_type, &bytes),
            mime_type,
        };
        self.cache.lock().await.insert(key, uploaded.clone());
        Ok(uploaded)
    }
}

/// Uploader for previews: echoes the path back without touching disk or network
#[derive(Debug, Default, Clone, Copy)]
pub struct PreviewUploader;

#[async_trait]
impl FileUploader for PreviewUploader {
    async fn upload(&self, path: &str) -> Result<UploadedFile> {
        Ok(UploadedFile {
            uri: path.to_string(),
            mime_type: guess_mime_type(path).to_string(),
        })
    }
}
