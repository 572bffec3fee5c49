//! Provider adapters
//!
//! An adapter turns a [`ComposedRequest`] into the JSON body one provider
//! expects. Image blocks are resolved through the [`FileUploader`] handed in by
//! the caller, which lets previews render payloads without uploading anything.

pub mod gemini;
pub mod openai;

pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;

use crate::error::{Error, Result};
use crate::types::{ComposedRequest, Provider, Role};
use crate::upload::FileUploader;
use async_trait::async_trait;
use serde_json::Value;

/// Provider payload plus flags the response extractor needs
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptedPayload {
    pub body: Value,
    /// Splice grounding citations into the answer text
    pub inline_citations: bool,
}

impl AdaptedPayload {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            inline_citations: false,
        }
    }

    /// Body as shown in dry runs and debug envelopes
    pub fn preview(&self) -> Value {
        let mut preview = self.body.clone();
        if self.inline_citations {
            if let Value::Object(map) = &mut preview {
                map.insert("inline_citations".to_string(), Value::Bool(true));
            }
        }
        preview
    }
}

/// Converts composed requests into a provider wire format
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    async fn adapt(&self, request: &ComposedRequest, uploader: &dyn FileUploader) -> Result<AdaptedPayload>;
}

/// Adapter for `provider`
pub fn adapter_for(provider: Provider) -> Box<dyn ProviderAdapter> {
    match provider {
        Provider::OpenAi => Box::new(OpenAiAdapter::new()),
        Provider::Gemini => Box::new(GeminiAdapter::new()),
    }
}

/// Checks shared by every adapter; returns the model name
pub(crate) fn validate_structure(request: &ComposedRequest) -> Result<&str> {
    let model = request
        .model()
        .ok_or_else(|| Error::config("request has no model"))?;

    let messages = request.messages();
    let last = messages
        .last()
        .ok_or_else(|| Error::invalid_field("messages", "message list must not be empty"))?;
    if last.role != Role::User {
        return Err(Error::invalid_field(
            "messages",
            format!("last message must be from the user, got {}", last.role),
        ));
    }
    if let Some(idx) = messages.iter().skip(1).position(|m| m.role == Role::System) {
        return Err(Error::invalid_field(
            "messages",
            format!("system message found at position {}, only the first message may be system", idx + 1),
        ));
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ComposedMessage, JsonMap};
    use serde_json::json;

    fn request(messages: Vec<ComposedMessage>, model: Option<&str>) -> ComposedRequest {
        let mut generation = JsonMap::new();
        if let Some(model) = model {
            generation.insert("model".into(), json!(model));
        }
        ComposedRequest::new(messages, generation, JsonMap::new(), JsonMap::new(), None)
    }

    #[test]
    fn test_validate_structure() {
        let ok = request(
            vec![ComposedMessage::new(Role::System, "s"), ComposedMessage::new(Role::User, "u")],
            Some("m"),
        );
        assert_eq!(validate_structure(&ok).unwrap(), "m");

        let no_model = request(vec![ComposedMessage::new(Role::User, "u")], None);
        assert_eq!(validate_structure(&no_model).unwrap_err().kind(), crate::error::ErrorKind::Config);

        assert!(validate_structure(&request(vec![], Some("m"))).is_err());

        let ends_with_assistant = request(
            vec![ComposedMessage::new(Role::User, "u"), ComposedMessage::new(Role::Assistant, "a")],
            Some("m"),
        );
        assert!(validate_structure(&ends_with_assistant).unwrap_err().to_string().contains("last message"));

        let late_system = request(
            vec![ComposedMessage::new(Role::User, "u"), ComposedMessage::new(Role::System, "s"), ComposedMessage::new(Role::User, "u")],
            Some("m"),
        );
        assert!(validate_structure(&late_system).unwrap_err().to_string().contains("position 1"));
    }

    #[test]
    fn test_preview_marks_inline_citations() {
        let mut payload = AdaptedPayload::new(json!({"model": "m"}));
        assert_eq!(payload.preview(), json!({"model": "m"}));
        payload.inline_citations = true;
        assert_eq!(payload.preview(), json!({"model": "m", "inline_citations": true}));
    }

    #[test]
    fn test_adapter_for() {
        assert_eq!(adapter_for(Provider::OpenAi).provider(), Provider::OpenAi);
        assert_eq!(adapter_for(Provider::Gemini).provider(), Provider::Gemini);
    }
}
