//! Gemini generateContent payloads
//!
//! The payload keeps the conversation split the Gemini API works with:
//!
//! ```text
//! { model, system_instruction?, history: [Content], current_message: Content,
//!   generation_config?, tools? }
//! ```
//!
//! where `Content = {role, parts: [{text} | {file_data: {file_uri, mime_type}}]}`.

use super::{validate_structure, AdaptedPayload, ProviderAdapter};
use crate::error::{Error, Result};
use crate::format::{FormatHandler, SchemaCache};
use crate::types::{ComposedMessage, ComposedRequest, ContentBlock, JsonMap, MessageContent, Provider, Role};
use crate::upload::FileUploader;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;
use tracing::{debug, info};

const GENERATION_KEYS: &[&str] = &["max_output_tokens", "temperature", "top_p", "top_k"];
const DEFAULT_ASPECT_RATIO: &str = "1:1";

/// Requested output modalities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Text,
    Image,
    Both,
}

impl ResponseMode {
    fn from_generation(generation: &JsonMap) -> Result<Self> {
        match generation.get("response") {
            None | Some(Value::Null) => Ok(ResponseMode::Text),
            Some(Value::String(mode)) => match mode.trim().to_lowercase().as_str() {
                "text" => Ok(ResponseMode::Text),
                "image" => Ok(ResponseMode::Image),
                "both" => Ok(ResponseMode::Both),
                other => Err(Error::invalid_field(
                    "response",
                    format!("response must be text, image or both, got '{}'", other),
                )),
            },
            Some(other) => Err(Error::invalid_field(
                "response",
                format!("response must be a string, got {}", other),
            )),
        }
    }

    fn modalities(&self) -> Option<Value> {
        match self {
            ResponseMode::Text => None,
            ResponseMode::Image => Some(json!(["Image"])),
            ResponseMode::Both => Some(json!(["Text", "Image"])),
        }
    }
}

/// Tool declarations derived from `generation.tools`
#[derive(Debug, Default, PartialEq)]
struct ToolSet {
    declarations: Vec<Value>,
    inline_citations: bool,
    context_urls: Vec<String>,
}

fn tool_declaration(name: &str, options: Option<&Value>) -> Result<Value> {
    match name {
        "search" | "google_search" => Ok(json!({"google_search": {}})),
        "google_search_retrieval" | "search_retrieval" => {
            let config = match options {
                Some(Value::Object(opts)) if !opts.is_empty() => json!({"dynamic_retrieval_config": opts}),
                _ => json!({}),
            };
            Ok(json!({"google_search_retrieval": config}))
        }
        "url_context" | "url" => Ok(json!({"url_context": {}})),
        other => Err(Error::invalid_field("tools", format!("unknown tool '{}'", other))),
    }
}

fn parse_tools(raw: Option<&Value>) -> Result<ToolSet> {
    let items: Vec<&Value> = match raw {
        None | Some(Value::Null) => return Ok(ToolSet::default()),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ (Value::String(_) | Value::Object(_))) => vec![single],
        Some(other) => {
            return Err(Error::invalid_field("tools", format!("tools must be a list, got {}", other)));
        }
    };

    let mut tools = ToolSet::default();
    for item in items {
        match item {
            Value::String(spec) => {
                let spec = spec.trim().to_lowercase();
                let (name, inline) = match spec.strip_suffix(":inline") {
                    Some(name) => (name.trim().to_string(), true),
                    None => (spec, false),
                };
                tools.declarations.push(tool_declaration(&name, None)?);
                tools.inline_citations |= inline;
            }
            Value::Object(map) => {
                let name = map
                    .get("type")
                    .and_then(Value::as_str)
                    .map(|s| s.trim().to_lowercase())
                    .ok_or_else(|| Error::invalid_field("tools", "tool mappings need a string 'type'"))?;
                let declaration = tool_declaration(&name, map.get("options"))?;
                if declaration.get("url_context").is_some() {
                    match map.get("urls") {
                        None | Some(Value::Null) => {}
                        Some(Value::Array(urls)) => {
                            for url in urls {
                                let url = url
                                    .as_str()
                                    .ok_or_else(|| Error::invalid_field("tools", "url_context urls must be strings"))?;
                                tools.context_urls.push(url.to_string());
                            }
                        }
                        Some(Value::String(url)) => tools.context_urls.push(url.clone()),
                        Some(_) => return Err(Error::invalid_field("tools", "url_context urls must be a list")),
                    }
                }
                if map.get("inline_citations").and_then(Value::as_bool) == Some(true) {
                    tools.inline_citations = true;
                }
                tools.declarations.push(declaration);
            }
            other => {
                return Err(Error::invalid_field("tools", format!("invalid tool entry {}", other)));
            }
        }
    }
    Ok(tools)
}

fn aspect_ratio(generation: &JsonMap) -> String {
    match generation.get("image").and_then(|image| image.get("ratio")) {
        None | Some(Value::Null) => DEFAULT_ASPECT_RATIO.to_string(),
        Some(Value::String(ratio)) => ratio.clone(),
        Some(other) => other.to_string(),
    }
}

/// Append `suffix` to the last text part, if any
fn append_to_last_text(parts: &mut [Value], suffix: &str) -> bool {
    for part in parts.iter_mut().rev() {
        if let Some(Value::String(text)) = part.get_mut("text") {
            text.push_str(suffix);
            return true;
        }
    }
    false
}

/// Builds Gemini payloads; converted response schemas are cached per instance
#[derive(Debug, Default)]
pub struct GeminiAdapter {
    schemas: Mutex<SchemaCache>,
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    async fn parts(message: &ComposedMessage, uploader: &dyn FileUploader, current: bool) -> Result<Vec<Value>> {
        match &message.content {
            MessageContent::Text(text) => Ok(vec![json!({"text": text})]),
            MessageContent::Blocks(blocks) => {
                let mut parts = Vec::with_capacity(blocks.len());
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => parts.push(json!({"text": text})),
                        ContentBlock::Image { path } => {
                            if current {
                                info!(path = %path, "Uploading image for current message");
                            } else {
                                debug!(path = %path, "Uploading image for history message");
                            }
                            let uploaded = uploader.upload(path).await?;
                            parts.push(json!({
                                "file_data": {"file_uri": uploaded.uri, "mime_type": uploaded.mime_type}
                            }));
                        }
                    }
                }
                Ok(parts)
            }
        }
    }

    fn format_hints(&self, request: &ComposedRequest) -> Result<Option<JsonMap>> {
        let mut cache = self
            .schemas
            .lock()
            .map_err(|_| Error::validation("schema cache lock poisoned"))?;
        cache.gemini_generation_hints(request.format())
    }

    /// Number of distinct response schemas converted so far
    pub fn cached_schemas(&self) -> usize {
        self.schemas.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn adapt(&self, request: &ComposedRequest, uploader: &dyn FileUploader) -> Result<AdaptedPayload> {
        let model = validate_structure(request)?;
        let generation = request.generation();

        // validate everything local before any upload happens
        let mode = ResponseMode::from_generation(generation)?;
        let tools = parse_tools(generation.get("tools"))?;
        let format_hints = self.format_hints(request)?;

        let messages = request.messages();
        let (system_instruction, rest) = match messages.split_first() {
            Some((first, rest)) if first.role == Role::System => {
                let text = first
                    .content
                    .as_text()
                    .ok_or_else(|| Error::invalid_field("messages", "system message must be plain text"))?;
                (Some(text.to_string()), rest)
            }
            _ => (None, messages),
        };
        let Some((current, history_messages)) = rest.split_last() else {
            return Err(Error::invalid_field("messages", "at least one non-system message is required"));
        };

        let mut history = Vec::with_capacity(history_messages.len());
        for message in history_messages {
            let role = match message.role {
                Role::Assistant => "model",
                other => other.as_str(),
            };
            let parts = Self::parts(message, uploader, false).await?;
            history.push(json!({"role": role, "parts": parts}));
        }

        let mut current_parts = Self::parts(current, uploader, true).await?;
        if !tools.context_urls.is_empty() {
            let listing = format!("\n{}", tools.context_urls.join("\n"));
            if !append_to_last_text(&mut current_parts, &listing) {
                current_parts.push(json!({"text": tools.context_urls.join("\n")}));
            }
        }
        if let Some(suffix) = FormatHandler::prompt_suffix(request.format()) {
            append_to_last_text(&mut current_parts, suffix);
        }

        let mut config = JsonMap::new();
        for key in GENERATION_KEYS {
            if let Some(value) = generation.get(*key) {
                config.insert((*key).to_string(), value.clone());
            }
        }
        if let Some(think) = generation.get("think").filter(|v| !v.is_null()) {
            if mode == ResponseMode::Text {
                let mut thinking = JsonMap::new();
                thinking.insert("thinking_budget".into(), think.clone());
                if think.as_i64() == Some(-1) {
                    thinking.insert("include_thoughts".into(), Value::Bool(true));
                }
                config.insert("thinking_config".into(), Value::Object(thinking));
            } else {
                debug!("Ignoring think for image response mode");
            }
        }
        if let Some(modalities) = mode.modalities() {
            config.insert("response_modalities".into(), modalities);
            config.insert("image_config".into(), json!({"aspect_ratio": aspect_ratio(generation)}));
        }
        if let Some(hints) = format_hints {
            config.extend(hints);
        }

        let mut body = JsonMap::new();
        body.insert("model".into(), Value::String(model.to_string()));
        if let Some(system) = system_instruction.filter(|s| !s.is_empty()) {
            body.insert("system_instruction".into(), Value::String(system));
        }
        body.insert("history".into(), Value::Array(history));
        body.insert("current_message".into(), json!({"role": "user", "parts": current_parts}));
        if !config.is_empty() {
            body.insert("generation_config".into(), Value::Object(config));
        }
        if !tools.declarations.is_empty() {
            body.insert("tools".into(), Value::Array(tools.declarations));
        }

        Ok(AdaptedPayload {
            body: Value::Object(body),
            inline_citations: tools.inline_citations,
        })
    }
}
