//! Generated image persistence
//!
//! Images returned by the model are written below the output directory as
//! `<out>/<YYYY>/<YYYYMMDD>/<timestamp>.png` and optionally handed to an
//! [`ImageHost`] that returns a shareable URL.

pub mod openlist;

pub use openlist::OpenListClient;

use crate::error::{Error, Result};
use crate::response::ImagePart;
use async_trait::async_trait;
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of persisting one generated image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageResult {
    pub local_path: Option<String>,
    pub online_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Remote storage that turns a local image into a public link
#[async_trait]
pub trait ImageHost: Send + Sync {
    async fn upload_image(&self, local_path: &Path) -> Result<String>;
}

/// Writes generated images to disk and forwards them to an optional host
#[derive(Clone)]
pub struct ImageStore {
    output_dir: PathBuf,
    host: Option<Arc<dyn ImageHost>>,
}

impl std::fmt::Debug for ImageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageStore")
            .field("output_dir", &self.output_dir)
            .field("host", &self.host.is_some())
            .finish()
    }
}

impl ImageStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            host: None,
        }
    }

    pub fn with_host(mut self, host: Arc<dyn ImageHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write `data` to a fresh timestamped file and return its path
    pub async fn save(&self, data: &[u8]) -> Result<PathBuf> {
        let now = Local::now();
        let dir = self
            .output_dir
            .join(now.format("%Y").to_string())
            .join(now.format("%Y%m%d").to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::config_with_source(format!("cannot create {}", dir.display()), e))?;

        let path = dir.join(format!("{}.png", now.format("%Y%m%d_%H%M%S_%6f")));
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| Error::config_with_source(format!("cannot write {}", path.display()), e))?;
        Ok(path)
    }

    /// Save and optionally host one image; failures end up in the result
    pub async fn persist(&self, image: &ImagePart) -> ImageResult {
        let path = match self.save(&image.data).await {
            Ok(path) => path,
            Err(e) => {
                error!(error = %e, "Failed to save generated image");
                return ImageResult::failed(e.to_string());
            }
        };
        info!(path = %path.display(), bytes = image.data.len(), "Saved generated image");

        let mut result = ImageResult {
            local_path: Some(path.to_string_lossy().into_owned()),
            mime_type: image.mime_type.clone(),
            ..Default::default()
        };

        if let Some(host) = &self.host {
            match host.upload_image(&path).await {
                Ok(url) => {
                    info!(url = %url, "Uploaded generated image");
                    result.online_url = Some(url);
                }
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "Image upload failed, keeping local copy");
                    result.error = Some(e.to_string());
                }
            }
        }
        result
    }
}
