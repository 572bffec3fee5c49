//! Provider responses and result extraction
//!
//! Wire responses are parsed once into [`ProviderResponse`]. The
//! [`ResponseExtractor`] then splices citations, persists generated images,
//! labels reasoning text and applies the declared output format.

use crate::error::{Error, Result};
use crate::format::FormatHandler;
use crate::images::ImageStore;
use crate::types::{FormatDescriptor, Provider};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{info, warn};

pub use crate::images::ImageResult;

static THOUGHT_REGEX: OnceLock<Option<Regex>> = OnceLock::new();

fn thought_regex() -> Option<&'static Regex> {
    THOUGHT_REGEX
        .get_or_init(|| Regex::new(r"(?s)<thought>(.*?)</thought>").ok())
        .as_ref()
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    /// Reasoning tokens, when the provider reports them
    pub thinking_tokens: Option<i64>,
}

impl Usage {
    pub fn is_empty(&self) -> bool {
        self.prompt_tokens.is_none()
            && self.completion_tokens.is_none()
            && self.total_tokens.is_none()
            && self.thinking_tokens.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPart {
    pub text: String,
    /// Index of the part within the candidate, used by grounding supports
    pub part_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePart {
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundingSupport {
    pub part_index: usize,
    /// Byte offset in the part text where the supported segment ends
    pub end_index: usize,
    pub chunk_indices: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grounding {
    /// Source URI per grounding chunk
    pub chunks: Vec<Option<String>>,
    pub supports: Vec<GroundingSupport>,
}

/// Provider-independent view of a chat response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderResponse {
    pub model: Option<String>,
    pub response_id: Option<String>,
    pub text_parts: Vec<TextPart>,
    pub thought_parts: Vec<String>,
    pub image_parts: Vec<ImagePart>,
    pub grounding: Option<Grounding>,
    pub url_metadata: Vec<String>,
    pub usage: Option<Usage>,
}

/// Look up a key written either in camelCase or snake_case
fn field<'a>(value: &'a Value, camel: &str, snake: &str) -> Option<&'a Value> {
    value.get(camel).or_else(|| value.get(snake))
}

fn int(value: Option<&Value>) -> Option<i64> {
    value.and_then(Value::as_i64)
}

fn string(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

impl ProviderResponse {
    /// Parse an OpenAI chat completion body
    pub fn from_openai(body: &Value) -> Result<Self> {
        let choice = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .ok_or_else(|| Error::transport("response contains no choices"))?;
        let message = choice
            .get("message")
            .ok_or_else(|| Error::transport("response choice has no message"))?;

        let mut response = ProviderResponse {
            model: string(body.get("model")),
            response_id: string(body.get("id")),
            ..Default::default()
        };

        if let Some(reasoning) = message.get("reasoning_content").and_then(Value::as_str) {
            if !reasoning.trim().is_empty() {
                response.thought_parts.push(reasoning.trim().to_string());
            }
        }

        match message.get("content") {
            Some(Value::String(content)) => {
                let (thoughts, answer) = split_thought_tags(content);
                response.thought_parts.extend(thoughts);
                if !answer.is_empty() {
                    response.text_parts.push(TextPart {
                        text: answer,
                        part_index: 0,
                    });
                }
            }
            Some(Value::Array(parts)) => {
                for (idx, part) in parts.iter().enumerate() {
                    match part.get("type").and_then(Value::as_str) {
                        Some("thought") => {
                            let text = part.get("thought").or_else(|| part.get("text")).and_then(Value::as_str);
                            if let Some(text) = text.filter(|t| !t.is_empty()) {
                                response.thought_parts.push(text.to_string());
                            }
                        }
                        Some("text") => {
                            if let Some(text) = part.get("text").and_then(Value::as_str).filter(|t| !t.is_empty()) {
                                response.text_parts.push(TextPart {
                                    text: text.to_string(),
                                    part_index: idx,
                                });
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }

        if let Some(usage) = body.get("usage").filter(|u| u.is_object()) {
            response.usage = Some(Usage {
                prompt_tokens: int(usage.get("prompt_tokens")),
                completion_tokens: int(usage.get("completion_tokens")),
                total_tokens: int(usage.get("total_tokens")),
                thinking_tokens: int(usage.get("completion_tokens_details").and_then(|d| d.get("reasoning_tokens"))),
            });
        }

        Ok(response)
    }

    /// Parse a Gemini generateContent body
    pub fn from_gemini(body: &Value) -> Result<Self> {
        let candidate = body
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .ok_or_else(|| {
                let reason = field(body, "promptFeedback", "prompt_feedback")
                    .and_then(|f| field(f, "blockReason", "block_reason"))
                    .and_then(Value::as_str)
                    .unwrap_or("none");
                Error::transport(format!("response contains no candidates (block reason: {})", reason))
            })?;
        let parts = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
            .ok_or_else(|| {
                let finish = field(candidate, "finishReason", "finish_reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                Error::transport(format!("candidate has no content parts (finish reason: {})", finish))
            })?;

        let mut response = ProviderResponse {
            model: string(field(body, "modelVersion", "model_version")),
            response_id: string(field(body, "responseId", "response_id")),
            ..Default::default()
        };

        for (idx, part) in parts.iter().enumerate() {
            if let Some(inline) = field(part, "inlineData", "inline_data") {
                let encoded = inline.get("data").and_then(Value::as_str).unwrap_or_default();
                let data = STANDARD
                    .decode(encoded)
                    .map_err(|e| Error::transport(format!("invalid inline image data: {}", e)))?;
                response.image_parts.push(ImagePart {
                    mime_type: string(field(inline, "mimeType", "mime_type")),
                    data,
                });
                continue;
            }

            let text = part.get("text").and_then(Value::as_str).filter(|t| !t.is_empty());
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                if let Some(text) = text {
                    response.thought_parts.push(text.to_string());
                }
                continue;
            }
            if let Some(text) = text {
                response.text_parts.push(TextPart {
                    text: text.to_string(),
                    part_index: idx,
                });
            }
        }

        if let Some(metadata) = field(candidate, "groundingMetadata", "grounding_metadata") {
            response.grounding = Some(parse_grounding(metadata));
        }
        response.url_metadata = parse_url_metadata(field(candidate, "urlContextMetadata", "url_context_metadata"));

        if let Some(usage) = field(body, "usageMetadata", "usage_metadata") {
            response.usage = Some(Usage {
                prompt_tokens: int(field(usage, "promptTokenCount", "prompt_token_count")),
                completion_tokens: int(field(usage, "candidatesTokenCount", "candidates_token_count")),
                total_tokens: int(field(usage, "totalTokenCount", "total_token_count")),
                thinking_tokens: int(field(usage, "thoughtsTokenCount", "thoughts_token_count")),
            });
        }

        Ok(response)
    }

    /// Answer text: all text parts concatenated
    pub fn answer_text(&self) -> String {
        self.text_parts.iter().map(|p| p.text.as_str()).collect()
    }
}

/// Separate `<thought>...</thought>` spans from the answer text
fn split_thought_tags(content: &str) -> (Vec<String>, String) {
    let Some(re) = thought_regex() else {
        return (Vec::new(), content.to_string());
    };
    let thoughts: Vec<String> = re
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect();
    if thoughts.is_empty() {
        return (thoughts, content.to_string());
    }
    let answer = re.replace_all(content, "").trim().to_string();
    (thoughts, answer)
}

fn parse_grounding(metadata: &Value) -> Grounding {
    let chunks = field(metadata, "groundingChunks", "grounding_chunks")
        .and_then(Value::as_array)
        .map(|chunks| {
            chunks
                .iter()
                .map(|chunk| {
                    chunk
                        .get("web")
                        .and_then(|w| w.get("uri"))
                        .or_else(|| field(chunk, "retrievedContext", "retrieved_context").and_then(|r| r.get("uri")))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default();

    let supports = field(metadata, "groundingSupports", "grounding_supports")
        .and_then(Value::as_array)
        .map(|supports| {
            supports
                .iter()
                .filter_map(|support| {
                    let segment = support.get("segment")?;
                    let end_index = field(segment, "endIndex", "end_index")?.as_u64()? as usize;
                    let part_index = field(segment, "partIndex", "part_index")
                        .and_then(Value::as_u64)
                        .unwrap_or(0) as usize;
                    let chunk_indices = field(support, "groundingChunkIndices", "grounding_chunk_indices")
                        .and_then(Value::as_array)
                        .map(|ids| ids.iter().filter_map(Value::as_u64).map(|i| i as usize).collect())
                        .unwrap_or_default();
                    Some(GroundingSupport {
                        part_index,
                        end_index,
                        chunk_indices,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Grounding { chunks, supports }
}

fn parse_url_metadata(metadata: Option<&Value>) -> Vec<String> {
    let blocks: Vec<&Value> = match metadata {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(obj @ Value::Object(_)) => vec![obj],
        _ => return Vec::new(),
    };
    blocks
        .into_iter()
        .filter_map(|block| field(block, "urlMetadata", "url_metadata").and_then(Value::as_array))
        .flatten()
        .filter_map(|meta| field(meta, "retrievedUrl", "retrieved_url").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

/// Insert `[n](uri)` citations into text parts at the end of each supported segment
pub fn splice_citations(parts: &mut [TextPart], grounding: &Grounding) {
    let mut by_part: BTreeMap<usize, Vec<&GroundingSupport>> = BTreeMap::new();
    for support in &grounding.supports {
        by_part.entry(support.part_index).or_default().push(support);
    }

    for part in parts.iter_mut() {
        let Some(supports) = by_part.get_mut(&part.part_index) else {
            continue;
        };
        if part.text.is_empty() {
            continue;
        }
        supports.sort_by(|a, b| b.end_index.cmp(&a.end_index));

        for support in supports.iter() {
            let links: Vec<String> = support
                .chunk_indices
                .iter()
                .filter_map(|&idx| {
                    let uri = grounding.chunks.get(idx)?.as_deref()?;
                    Some(format!("[{}]({})", idx + 1, uri))
                })
                .collect();
            if links.is_empty() {
                continue;
            }

            let mut end = support.end_index.min(part.text.len());
            while !part.text.is_char_boundary(end) {
                end -= 1;
            }
            let mut insertion = links.join(" ");
            let needs_space = part.text[..end].chars().next_back().is_some_and(|c| !c.is_whitespace());
            if needs_space {
                insertion.insert(0, ' ');
            }
            part.text.insert_str(end, &insertion);
        }
    }
}

/// Final value of an invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InvokeOutput {
    Text(String),
    Structured(Value),
    Image(ImageResult),
    Images(Vec<ImageResult>),
    Mixed {
        text: Value,
        images: Vec<ImageResult>,
        #[serde(skip_serializing_if = "Option::is_none")]
        url_metadata: Option<Vec<String>>,
    },
}

impl InvokeOutput {
    fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => InvokeOutput::Text(text),
            other => InvokeOutput::Structured(other),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Text of a text result
    pub fn as_text(&self) -> Option<&str> {
        match self {
            InvokeOutput::Text(text) => Some(text),
            _ => None,
        }
    }

    fn with_url_metadata(self, urls: &[String]) -> Self {
        if urls.is_empty() {
            return self;
        }
        match self {
            InvokeOutput::Mixed { text, images, .. } => InvokeOutput::Mixed {
                text,
                images,
                url_metadata: Some(urls.to_vec()),
            },
            InvokeOutput::Structured(Value::Object(mut map)) => {
                map.insert("url_metadata".to_string(), urls.iter().cloned().map(Value::String).collect());
                InvokeOutput::Structured(Value::Object(map))
            }
            other => other,
        }
    }
}

/// Turns a [`ProviderResponse`] into an [`InvokeOutput`]
pub struct ResponseExtractor<'a> {
    provider: Provider,
    images: Option<&'a ImageStore>,
}

impl<'a> ResponseExtractor<'a> {
    pub fn new(provider: Provider) -> Self {
        Self { provider, images: None }
    }

    /// Persist generated images through `store`
    pub fn with_image_store(mut self, store: &'a ImageStore) -> Self {
        self.images = Some(store);
        self
    }

    fn label(&self, thoughts: &str, answer: &str) -> String {
        let label = self.provider.thinking_label();
        format!("<{label}>\n{thoughts}\n</{label}>\n\n{answer}")
    }

    pub async fn extract(
        &self,
        response: &ProviderResponse,
        format: Option<&FormatDescriptor>,
        inline_citations: bool,
    ) -> Result<InvokeOutput> {
        let mut text_parts = response.text_parts.clone();
        let json_like = format.is_some_and(FormatDescriptor::is_json_like);
        if inline_citations && !json_like {
            if let Some(grounding) = &response.grounding {
                splice_citations(&mut text_parts, grounding);
            }
        }

        let output = if !response.image_parts.is_empty() {
            self.extract_images(response, &text_parts, format).await?
        } else if !response.thought_parts.is_empty() {
            let thoughts = response.thought_parts.join("\n\n");
            let answer: String = text_parts.iter().map(|p| p.text.as_str()).collect();
            match FormatHandler::process(Value::String(answer), format)? {
                Value::String(answer) => InvokeOutput::Text(self.label(&thoughts, &answer)),
                structured => {
                    info!(chars = thoughts.len(), "Dropping reasoning text from structured result");
                    InvokeOutput::Structured(structured)
                }
            }
        } else {
            let answer: String = text_parts.iter().map(|p| p.text.as_str()).collect();
            InvokeOutput::from_value(FormatHandler::process(Value::String(answer), format)?)
        };

        Ok(if inline_citations {
            output.with_url_metadata(&response.url_metadata)
        } else {
            output
        })
    }

    async fn extract_images(
        &self,
        response: &ProviderResponse,
        text_parts: &[TextPart],
        format: Option<&FormatDescriptor>,
    ) -> Result<InvokeOutput> {
        let mut images = Vec::with_capacity(response.image_parts.len());
        for part in &response.image_parts {
            let result = match self.images {
                Some(store) => store.persist(part).await,
                None => {
                    warn!("Generated image dropped, no image store configured");
                    ImageResult::failed("no image store configured")
                }
            };
            images.push(result);
        }

        if text_parts.is_empty() {
            return Ok(match images.len() {
                1 => InvokeOutput::Image(images.remove(0)),
                _ => InvokeOutput::Images(images),
            });
        }

        let mut text = text_parts.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join("\n");
        if !response.thought_parts.is_empty() {
            text = self.label(&response.thought_parts.join("\n\n"), &text);
        }
        Ok(InvokeOutput::Mixed {
            text: FormatHandler::process(Value::String(text), format)?,
            images,
            url_metadata: None,
        })
    }
}
