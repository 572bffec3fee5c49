//! OpenAI-compatible chat completions payloads

use super::{validate_structure, AdaptedPayload, ProviderAdapter};
use crate::error::Result;
use crate::format::FormatHandler;
use crate::types::{ComposedRequest, ContentBlock, JsonMap, MessageContent, Provider};
use crate::upload::FileUploader;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Builds `/chat/completions` bodies
#[derive(Debug, Default, Clone)]
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self
    }
}

/// `think` is forwarded in the Gemini OpenAI-compatibility shape:
/// `extra_body.extra_body.google.thinking_config`
fn thinking_extra_body(think: &Value) -> Value {
    let mut thinking = JsonMap::new();
    thinking.insert("thinkingBudget".into(), think.clone());
    if think.as_i64() == Some(-1) {
        thinking.insert("includeThoughts".into(), Value::Bool(true));
    }
    json!({"extra_body": {"google": {"thinking_config": thinking}}})
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    async fn adapt(&self, request: &ComposedRequest, uploader: &dyn FileUploader) -> Result<AdaptedPayload> {
        let model = validate_structure(request)?;

        let mut messages = Vec::with_capacity(request.messages().len());
        for message in request.messages() {
            let content = match &message.content {
                MessageContent::Text(text) => Value::String(text.clone()),
                MessageContent::Blocks(blocks) => {
                    let mut parts = Vec::with_capacity(blocks.len());
                    for block in blocks {
                        match block {
                            ContentBlock::Text { text } => parts.push(json!({"type": "text", "text": text})),
                            ContentBlock::Image { path } => {
                                let uploaded = uploader.upload(path).await?;
                                parts.push(json!({"type": "image_url", "image_url": {"url": uploaded.uri}}));
                            }
                        }
                    }
                    Value::Array(parts)
                }
            };
            messages.push(json!({"role": message.role.as_str(), "content": content}));
        }

        let mut body = JsonMap::new();
        body.insert("model".into(), Value::String(model.to_string()));
        body.insert("messages".into(), Value::Array(messages));

        for (key, value) in request.generation() {
            match key.as_str() {
                "model" => {}
                "max_output_tokens" => {
                    body.insert("max_tokens".into(), value.clone());
                }
                "think" => {
                    body.insert("extra_body".into(), thinking_extra_body(value));
                }
                _ => {
                    body.insert(key.clone(), value.clone());
                }
            }
        }

        if let Some(response_format) = FormatHandler::openai_response_format(request.format()) {
            body.insert("response_format".into(), response_format);
        }

        Ok(AdaptedPayload::new(Value::Object(body)))
    }
}
