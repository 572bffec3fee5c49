//! Core types shared by the parser, composer and provider adapters
//!
//! The pipeline moves through three shapes: [`MessageEntry`] lists produced
//! by parsing and preset expansion, the provider-agnostic
//! [`ComposedRequest`], and finally a provider payload built by an adapter.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// JSON object type used for generation, routing and meta sections
pub type JsonMap = Map<String, Value>;

/// Conversation role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Normalize a role token as written by prompt authors.
    ///
    /// Tokens are trimmed and lower-cased, and an ordering prefix such as
    /// `"1."` is stripped, so `"1.User"` reads as [`Role::User`].
    pub fn from_token(raw: &str) -> Option<Role> {
        let token = raw.trim();
        let token = match token.split_once('.') {
            Some((prefix, rest)) if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) => rest,
            _ => token,
        };
        match token.trim().to_lowercase().as_str() {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Role::from_token(s).ok_or_else(|| Error::invalid_field("role", format!("unknown role '{}'", s.trim())))
    }
}

/// Where a message entry came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySource {
    /// Written directly in the request document
    Custom,
    /// Loaded from the named preset file
    Preset(String),
}

impl fmt::Display for EntrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntrySource::Custom => f.write_str("custom"),
            EntrySource::Preset(name) => write!(f, "preset:{}", name),
        }
    }
}

impl Serialize for EntrySource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Image references attached to an entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageRefs {
    /// Local paths or remote URLs
    #[serde(default)]
    pub urls: Vec<String>,

    /// Pre-encoded image contents, carried through untouched
    #[serde(default)]
    pub contents: Vec<Value>,
}

impl ImageRefs {
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty() && self.contents.is_empty()
    }
}

/// A role-tagged message before composition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageEntry {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<ImageRefs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<EntrySource>,
}

impl MessageEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: None,
            source: None,
        }
    }

    pub fn with_source(mut self, source: EntrySource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_images(mut self, images: ImageRefs) -> Self {
        self.images = Some(images);
        self
    }

    /// Preset name when the entry was loaded from a preset file
    pub fn preset_name(&self) -> Option<&str> {
        match &self.source {
            Some(EntrySource::Preset(name)) => Some(name),
            _ => None,
        }
    }

    /// Image paths attached to this entry, empty when none
    pub fn image_urls(&self) -> &[String] {
        self.images.as_ref().map(|i| i.urls.as_slice()).unwrap_or(&[])
    }
}

/// One block of a multimodal message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    /// Raw local path or URL; resolved to an uploaded handle by the adapter
    Image { path: String },
}

/// Message content: plain text or a list of blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Text of a plain message, `None` for block content
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Blocks(_) => None,
        }
    }

    pub fn has_images(&self) -> bool {
        match self {
            MessageContent::Text(_) => false,
            MessageContent::Blocks(blocks) => blocks.iter().any(|b| matches!(b, ContentBlock::Image { .. })),
        }
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

/// Provider-agnostic message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ComposedMessage {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Declared output format of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormatDescriptor {
    Text,
    Markdown,
    Json,
    JsonSchema { name: String, schema: Value },
}

impl FormatDescriptor {
    pub fn type_name(&self) -> &'static str {
        match self {
            FormatDescriptor::Text => "text",
            FormatDescriptor::Markdown => "markdown",
            FormatDescriptor::Json => "json",
            FormatDescriptor::JsonSchema { .. } => "json_schema",
        }
    }

    /// `json` and `json_schema` responses are structured data
    pub fn is_json_like(&self) -> bool {
        matches!(self, FormatDescriptor::Json | FormatDescriptor::JsonSchema { .. })
    }
}

/// A fully composed, provider-agnostic request.
///
/// Built once per invocation by the composer and then only read.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedRequest {
    messages: Vec<ComposedMessage>,
    generation: JsonMap,
    routing: JsonMap,
    meta: JsonMap,
    format: Option<FormatDescriptor>,
}

impl ComposedRequest {
    pub fn new(
        messages: Vec<ComposedMessage>,
        generation: JsonMap,
        routing: JsonMap,
        meta: JsonMap,
        format: Option<FormatDescriptor>,
    ) -> Self {
        Self {
            messages,
            generation,
            routing,
            meta,
            format,
        }
    }

    pub fn messages(&self) -> &[ComposedMessage] {
        &self.messages
    }

    pub fn generation(&self) -> &JsonMap {
        &self.generation
    }

    pub fn routing(&self) -> &JsonMap {
        &self.routing
    }

    pub fn meta(&self) -> &JsonMap {
        &self.meta
    }

    pub fn format(&self) -> Option<&FormatDescriptor> {
        self.format.as_ref()
    }

    /// Model name from the generation section
    pub fn model(&self) -> Option<&str> {
        self.generation
            .get("model")
            .and_then(Value::as_str)
            .filter(|m| !m.trim().is_empty())
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.meta.get("trace_id").and_then(Value::as_str)
    }

    /// Serialize to the plain `{messages, generation, routing, meta, format}` form
    pub fn to_payload(&self) -> Value {
        let messages = self
            .messages
            .iter()
            .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
            .collect();
        let format = self
            .format
            .as_ref()
            .and_then(|f| serde_json::to_value(f).ok())
            .unwrap_or(Value::Null);

        let mut payload = JsonMap::new();
        payload.insert("messages".to_string(), Value::Array(messages));
        payload.insert("generation".to_string(), Value::Object(self.generation.clone()));
        payload.insert("routing".to_string(), Value::Object(self.routing.clone()));
        payload.insert("meta".to_string(), Value::Object(self.meta.clone()));
        payload.insert("format".to_string(), format);
        Value::Object(payload)
    }

    /// Rebuild a request from [`ComposedRequest::to_payload`] output
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let obj = payload
            .as_object()
            .ok_or_else(|| Error::validation("request payload must be an object"))?;

        let messages: Vec<ComposedMessage> = match obj.get("messages") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| Error::invalid_field("messages", format!("invalid messages: {}", e)))?,
            None => return Err(Error::invalid_field("messages", "messages is required")),
        };

        let section = |key: &str| -> Result<JsonMap> {
            match obj.get(key) {
                None | Some(Value::Null) => Ok(JsonMap::new()),
                Some(Value::Object(map)) => Ok(map.clone()),
                Some(_) => Err(Error::invalid_field(key, format!("{} must be an object", key))),
            }
        };

        let format = match obj.get("format") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                serde_json::from_value(value.clone())
                    .map_err(|e| Error::invalid_field("format", format!("invalid format: {}", e)))?,
            ),
        };

        Ok(Self::new(messages, section("generation")?, section("routing")?, section("meta")?, format))
    }
}

/// Supported wire providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Gemini,
}

impl Provider {
    /// Key of the provider payload in dry-run and debug envelopes
    pub fn payload_key(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai_payload",
            Provider::Gemini => "gemini_payload",
        }
    }

    /// Label wrapped around reasoning text in text results
    pub fn thinking_label(&self) -> &'static str {
        match self {
            Provider::OpenAi => "LLM_THINKING",
            Provider::Gemini => "GEMINI_THINKING",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::OpenAi => write!(f, "openai"),
            Provider::Gemini => write!(f, "gemini"),
        }
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "oai" => Ok(Provider::OpenAi),
            "gemini" | "google" => Ok(Provider::Gemini),
            other => Err(Error::config(format!("unknown provider '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_tokens() {
        assert_eq!(Role::from_token("user"), Some(Role::User));
        assert_eq!(Role::from_token(" 1.User "), Some(Role::User));
        assert_eq!(Role::from_token("12.assistant"), Some(Role::Assistant));
        assert_eq!(Role::from_token("SYSTEM"), Some(Role::System));
        assert_eq!(Role::from_token("narrator"), None);
        assert_eq!(Role::from_token("a.user"), None);
        assert!("tool".parse::<Role>().is_err());
    }

    #[test]
    fn test_entry_source_display() {
        assert_eq!(EntrySource::Custom.to_string(), "custom");
        assert_eq!(EntrySource::Preset("persona".into()).to_string(), "preset:persona");

        let entry = MessageEntry::new(Role::System, "S").with_source(EntrySource::Preset("p".into()));
        assert_eq!(entry.preset_name(), Some("p"));
        assert_eq!(serde_json::to_value(&entry).unwrap()["source"], "preset:p");
    }

    #[test]
    fn test_content_block_serialization() {
        let msg = ComposedMessage::new(
            Role::User,
            MessageContent::Blocks(vec![
                ContentBlock::Text { text: "look".into() },
                ContentBlock::Image { path: "a.png".into() },
            ]),
        );
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"role": "user", "content": [
                {"type": "text", "text": "look"},
                {"type": "image", "path": "a.png"}
            ]})
        );
        assert!(msg.content.has_images());
    }

    #[test]
    fn test_unknown_block_kind_is_rejected() {
        let raw = json!({"role": "user", "content": [{"type": "audio", "path": "a.wav"}]});
        assert!(serde_json::from_value::<ComposedMessage>(raw).is_err());
    }

    #[test]
    fn test_format_descriptor_shape() {
        let fmt = FormatDescriptor::JsonSchema {
            name: "answer".into(),
            schema: json!({"type": "object"}),
        };
        assert_eq!(
            serde_json::to_value(&fmt).unwrap(),
            json!({"type": "json_schema", "name": "answer", "schema": {"type": "object"}})
        );
        assert!(fmt.is_json_like());
        assert!(!FormatDescriptor::Markdown.is_json_like());
    }

    #[test]
    fn test_payload_round_trip() {
        let mut generation = JsonMap::new();
        generation.insert("model".into(), json!("gpt-4o"));
        let mut meta = JsonMap::new();
        meta.insert("trace_id".into(), json!("t-1"));

        let request = ComposedRequest::new(
            vec![
                ComposedMessage::new(Role::System, "{\"custom\":[\"be brief\"]}"),
                ComposedMessage::new(Role::User, "hi"),
            ],
            generation,
            JsonMap::new(),
            meta,
            Some(FormatDescriptor::Json),
        );

        let payload = request.to_payload();
        assert_eq!(payload["messages"][1], json!({"role": "user", "content": "hi"}));
        assert_eq!(payload["format"], json!({"type": "json"}));

        let rebuilt = ComposedRequest::from_payload(&payload).unwrap();
        assert_eq!(rebuilt, request);
        assert_eq!(rebuilt.model(), Some("gpt-4o"));
        assert_eq!(rebuilt.trace_id(), Some("t-1"));
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!("gemini".parse::<Provider>().unwrap(), Provider::Gemini);
        assert!("claude".parse::<Provider>().is_err());
        assert_eq!(Provider::Gemini.payload_key(), "gemini_payload");
    }
}
