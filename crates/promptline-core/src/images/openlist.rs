//! OpenList (Alist-compatible) image host
//!
//! Uploads land in `<temp_upload_path>/<YYYY>/<MM>/<file>` and are published
//! through a share link `<url>/sd/<id>`.

use super::ImageHost;
use crate::config::OpenListConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate};
use reqwest::RequestBuilder;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Pause between upload and share creation so the server can index the file
const INDEX_DELAY: Duration = Duration::from_millis(500);

/// Remote path for `filename` uploaded on `date`
pub fn dated_remote_path(base: &str, filename: &str, date: NaiveDate) -> String {
    let base = base.trim_end_matches('/');
    let base = if base.starts_with('/') {
        base.to_string()
    } else {
        format!("/{}", base)
    };
    format!("{}/{:04}/{:02}/{}", base.trim_end_matches('/'), date.year(), date.month(), filename)
}

/// Every ancestor directory of `path`, root first, excluding `/`
pub fn parent_dirs(path: &str) -> Vec<String> {
    let mut dirs: Vec<String> = Path::new(path)
        .ancestors()
        .skip(1)
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|p| !p.is_empty() && p != "/" && p != ".")
        .collect();
    dirs.reverse();
    dirs
}

pub struct OpenListClient {
    config: OpenListConfig,
    client: reqwest::Client,
    token: Mutex<Option<String>>,
    index_delay: Duration,
}

impl OpenListClient {
    pub fn new(config: OpenListConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::config_with_source("failed to create HTTP client", e))?;
        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
            index_delay: INDEX_DELAY,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(OpenListConfig::from_env()?)
    }

    pub fn with_index_delay(mut self, delay: Duration) -> Self {
        self.index_delay = delay;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.url, path)
    }

    /// Send a request and unwrap the `{code, message, data}` envelope
    async fn call(&self, request: RequestBuilder, action: &str) -> Result<Value> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::http_status(status.as_u16(), format!("{} failed: {}", action, body)));
        }
        let envelope: Value = response
            .json()
            .await
            .map_err(|e| Error::transport(format!("{} returned invalid JSON: {}", action, e)))?;
        debug!(action, response = %envelope, "OpenList response");
        Ok(envelope)
    }

    fn check(envelope: &Value, action: &str) -> Result<()> {
        match envelope.get("code").and_then(Value::as_i64) {
            Some(200) => Ok(()),
            code => {
                let message = envelope.get("message").and_then(Value::as_str).unwrap_or("unknown error");
                Err(Error::Transport {
                    message: format!("{} failed: {}", action, message),
                    status_code: code.and_then(|c| u16::try_from(c).ok()),
                    source: None,
                })
            }
        }
    }

    /// Log in and cache the session token
    pub async fn login(&self) -> Result<String> {
        let mut payload = json!({
            "username": self.config.account,
            "password": self.config.password,
        });
        if let Some(otp) = &self.config.otp_code {
            payload["otp_code"] = json!(otp);
        }

        let envelope = self
            .call(self.client.post(self.endpoint("/api/auth/login")).json(&payload), "login")
            .await?;
        Self::check(&envelope, "login").map_err(|e| Error::config(e.to_string()))?;
        let token = envelope
            .pointer("/data/token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::config("login response contains no token"))?
            .to_string();

        info!(url = %self.config.url, "Logged in to OpenList");
        *self.token.lock().await = Some(token.clone());
        Ok(token)
    }

    async fn token(&self) -> Result<String> {
        if let Some(token) = self.token.lock().await.clone() {
            return Ok(token);
        }
        self.login().await
    }

    /// Create a directory; an existing directory is not an error
    pub async fn create_directory(&self, path: &str) -> Result<()> {
        let token = self.token().await?;
        let request = self
            .client
            .post(self.endpoint("/api/fs/mkdir"))
            .header("Authorization", token)
            .json(&json!({"path": path}));
        let envelope = self.call(request, "mkdir").await?;
        if envelope.get("code").and_then(Value::as_i64) == Some(400) {
            debug!(path, "Directory probably exists");
            return Ok(());
        }
        Self::check(&envelope, "mkdir")?;
        debug!(path, "Directory created");
        Ok(())
    }

    /// PUT a local file to `remote_path`, creating parent directories first
    pub async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        if !local_path.is_file() {
            return Err(Error::validation(format!("not a file: {}", local_path.display())));
        }
        let token = self.token().await?;
        for dir in parent_dirs(remote_path) {
            self.create_directory(&dir).await?;
        }

        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| Error::config_with_source(format!("cannot read {}", local_path.display()), e))?;
        let request = self
            .client
            .put(self.endpoint("/api/fs/put"))
            .header("Authorization", token)
            .header("Content-Type", "application/octet-stream")
            .header("File-Path", urlencoding::encode(remote_path).into_owned())
            .header("As-Task", "false")
            .body(bytes);
        let envelope = self.call(request, "upload").await?;
        Self::check(&envelope, "upload")?;
        info!(remote_path, "File uploaded to OpenList");
        Ok(())
    }

    /// Share `paths` and return `(share_id, share_url)`
    pub async fn create_share(&self, paths: &[String]) -> Result<(String, String)> {
        let token = self.token().await?;
        let files: Vec<String> = paths
            .iter()
            .map(|p| if p.starts_with("//") { p.clone() } else { format!("/{}", p) })
            .collect();
        let payload = json!({
            "files": files,
            "expires": null,
            "pwd": "",
            "extract_folder": "",
            "header": "",
            "max_accessed": 0,
            "order_by": "",
            "order_direction": "",
            "readme": "",
            "remark": "",
        });
        let request = self
            .client
            .post(self.endpoint("/api/share/create"))
            .header("Authorization", token)
            .json(&payload);
        let envelope = self.call(request, "share").await?;
        Self::check(&envelope, "share")?;

        let id = envelope
            .pointer("/data/id")
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| Error::transport("share response contains no id"))?;
        let url = format!("{}/sd/{}", self.config.url, id);
        info!(share_url = %url, "Share created");
        Ok((id, url))
    }
}

#[async_trait]
impl ImageHost for OpenListClient {
    async fn upload_image(&self, local_path: &Path) -> Result<String> {
        let filename = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::validation(format!("not a file: {}", local_path.display())))?;
        let remote = dated_remote_path(&self.config.temp_upload_path, &filename, Local::now().date_naive());

        info!(local = %local_path.display(), remote = %remote, "Uploading image");
        self.upload_file(local_path, &remote).await?;
        if !self.index_delay.is_zero() {
            tokio::time::sleep(self.index_delay).await;
        }
        let (_, url) = self.create_share(&[remote]).await?;
        Ok(url)
    }
}
