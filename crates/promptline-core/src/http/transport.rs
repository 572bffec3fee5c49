//! Provider transports
//!
//! A transport performs exactly one HTTP attempt; retries are layered on top
//! by the client.

use crate::config::{GeminiConfig, OpenAiConfig};
use crate::error::{Error, Result};
use crate::types::JsonMap;
use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, RequestBuilder};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Sends an adapted payload and returns the provider's JSON response
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, payload: &Value) -> Result<Value>;
}

fn build_client(timeout: Option<Duration>) -> Result<ReqwestClient> {
    let mut builder = ReqwestClient::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| Error::config_with_source("failed to create HTTP client", e))
}

/// Provider error text out of a failed response body
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            let error = v.get("error")?;
            error
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| error.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

async fn post_json(request: RequestBuilder) -> Result<Value> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::http_status(
            status.as_u16(),
            format!("provider returned {}: {}", status, error_message(&body)),
        ));
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| Error::transport(format!("failed to parse response as JSON: {}", e)))
}

/// `POST <base>/chat/completions` with bearer auth
pub struct OpenAiTransport {
    client: ReqwestClient,
    api_base: String,
    api_key: String,
    organization: Option<String>,
}

impl OpenAiTransport {
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout)?,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            organization: config.organization.clone(),
        })
    }

    /// Wire body: the payload with one level of `extra_body` merged in
    pub fn request_body(payload: &Value) -> Value {
        let Value::Object(map) = payload else {
            return payload.clone();
        };
        let mut body = JsonMap::new();
        let mut extra = None;
        for (key, value) in map {
            if key == "extra_body" {
                extra = value.as_object().cloned();
            } else {
                body.insert(key.clone(), value.clone());
            }
        }
        if let Some(extra) = extra {
            body.extend(extra);
        }
        Value::Object(body)
    }
}

#[async_trait]
impl ChatTransport for OpenAiTransport {
    async fn send(&self, payload: &Value) -> Result<Value> {
        let url = format!("{}/chat/completions", self.api_base);
        debug!(url = %url, "Sending chat completion");
        let mut request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&Self::request_body(payload));
        if let Some(org) = &self.organization {
            request = request.header("OpenAI-Organization", org);
        }
        post_json(request).await
    }
}

/// `POST <base>/v1beta/models/<model>:generateContent`
pub struct GeminiTransport {
    client: ReqwestClient,
    api_base: String,
    api_key: String,
}

impl GeminiTransport {
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout)?,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self, model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/v1beta/models/{}:generateContent", self.api_base, model)
    }

    /// Model name and REST body for an adapted Gemini payload
    pub fn request_body(payload: &Value) -> Result<(String, Value)> {
        let model = payload
            .get("model")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::config("payload has no model"))?
            .to_string();
        let current = payload
            .get("current_message")
            .cloned()
            .ok_or_else(|| Error::invalid_field("messages", "payload has no current message"))?;

        let mut contents = payload
            .get("history")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        contents.push(current);

        let mut body = JsonMap::new();
        body.insert("contents".into(), Value::Array(contents));
        if let Some(system) = payload.get("system_instruction").and_then(Value::as_str) {
            body.insert("system_instruction".into(), json!({"parts": [{"text": system}]}));
        }
        if let Some(config) = payload.get("generation_config") {
            let mut config = config.clone();
            if let Some(Value::Array(modalities)) = config.get_mut("response_modalities") {
                for modality in modalities.iter_mut() {
                    if let Value::String(m) = modality {
                        *m = m.to_ascii_uppercase();
                    }
                }
            }
            body.insert("generation_config".into(), config);
        }
        if let Some(tools) = payload.get("tools") {
            body.insert("tools".into(), tools.clone());
        }
        Ok((model, Value::Object(body)))
    }
}

#[async_trait]
impl ChatTransport for GeminiTransport {
    async fn send(&self, payload: &Value) -> Result<Value> {
        let (model, body) = Self::request_body(payload)?;
        let url = self.endpoint(&model);
        debug!(url = %url, "Sending generateContent");
        let request = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        post_json(request).await
    }
}
