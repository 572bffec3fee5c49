//! Output format handling
//!
//! [`FormatHandler`] produces the per-provider format hints and validates
//! model output against the declared [`FormatDescriptor`]. [`SchemaCache`]
//! converts JSON Schema documents into the schema subset Gemini accepts.

use crate::error::{Error, Result};
use crate::types::{FormatDescriptor, JsonMap};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

/// Appended to the last text part of the current message for Markdown output
pub const MARKDOWN_NUDGE: &str =
    "\n\nPlease structure the response with Markdown headings or lists rather than plain text.";

/// Format hints and response validation
pub struct FormatHandler;

impl FormatHandler {
    /// OpenAI `response_format` value, `None` for text and Markdown
    pub fn openai_response_format(format: Option<&FormatDescriptor>) -> Option<Value> {
        match format? {
            FormatDescriptor::Json => Some(json!({"type": "json_object"})),
            FormatDescriptor::JsonSchema { name, schema } => Some(json!({
                "type": "json_schema",
                "json_schema": {"name": name, "schema": schema}
            })),
            FormatDescriptor::Text | FormatDescriptor::Markdown => None,
        }
    }

    /// Prompt suffix for formats that are requested through the prompt itself
    pub fn prompt_suffix(format: Option<&FormatDescriptor>) -> Option<&'static str> {
        match format? {
            FormatDescriptor::Markdown => Some(MARKDOWN_NUDGE),
            _ => None,
        }
    }

    /// Validate and convert a model answer according to `format`
    pub fn process(value: Value, format: Option<&FormatDescriptor>) -> Result<Value> {
        let Some(format) = format else {
            return Ok(value);
        };

        match format {
            FormatDescriptor::Json => to_json(value),
            FormatDescriptor::JsonSchema { schema, .. } => {
                let data = to_json(value)?;
                check_required(&data, schema)?;
                Ok(data)
            }
            FormatDescriptor::Markdown => {
                let text = require_text(&value)?;
                Ok(Value::String(text.trim().to_string()))
            }
            FormatDescriptor::Text => {
                require_text(&value)?;
                Ok(value)
            }
        }
    }
}

fn to_json(value: Value) -> Result<Value> {
    match value {
        Value::String(text) => serde_json::from_str(&text)
            .map_err(|e| Error::validation(format!("response is not valid JSON: {}", e))),
        data @ (Value::Object(_) | Value::Array(_)) => Ok(data),
        other => Err(Error::validation(format!("response is not JSON: {}", other))),
    }
}

fn check_required(data: &Value, schema: &Value) -> Result<()> {
    let Value::Object(object) = data else {
        return Ok(());
    };
    let missing: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .filter(|field| !object.contains_key(*field))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::validation(format!("missing required fields: {}", missing.join(", "))))
    }
}

fn require_text(value: &Value) -> Result<&str> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Ok(text),
        Value::String(_) => Err(Error::validation("response is empty")),
        Value::Null => Err(Error::validation("response has no content")),
        other => Err(Error::validation(format!("expected a text response, got {}", other))),
    }
}

/// Cache of JSON Schema documents converted for Gemini, keyed by canonical JSON
#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: HashMap<String, Value>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Gemini schema for `schema`, converting at most once per distinct schema
    pub fn normalize(&mut self, schema: &Value) -> Result<Value> {
        let key = canonical_json(schema);
        if let Some(hit) = self.entries.get(&key) {
            return Ok(hit.clone());
        }

        let converted = normalize_schema(schema)
            .map_err(|e| Error::invalid_field("format", format!("json_schema conversion failed: {}", e)))?;
        debug!(cached = self.entries.len() + 1, "Converted JSON schema for Gemini");
        self.entries.insert(key, converted.clone());
        Ok(converted)
    }

    /// `generation_config` entries for `format` on Gemini
    pub fn gemini_generation_hints(&mut self, format: Option<&FormatDescriptor>) -> Result<Option<JsonMap>> {
        let mut hints = JsonMap::new();
        match format {
            Some(FormatDescriptor::Json) => {
                hints.insert("response_mime_type".into(), json!("application/json"));
            }
            Some(FormatDescriptor::JsonSchema { schema, .. }) => {
                hints.insert("response_mime_type".into(), json!("application/json"));
                hints.insert("response_schema".into(), self.normalize(schema)?);
            }
            _ => return Ok(None),
        }
        Ok(Some(hints))
    }
}

/// Serialization with object keys sorted at every level
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                Value::Object(keys.into_iter().map(|k| (k.clone(), sorted(&map[k]))).collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

const COPIED_KEYS: &[(&str, &str)] = &[
    ("description", "description"),
    ("title", "title"),
    ("format", "format"),
    ("enum", "enum"),
    ("minItems", "min_items"),
    ("maxItems", "max_items"),
    ("minimum", "minimum"),
    ("maximum", "maximum"),
    ("minLength", "min_length"),
    ("maxLength", "max_length"),
    ("minProperties", "min_properties"),
    ("maxProperties", "max_properties"),
    ("pattern", "pattern"),
    ("default", "default"),
    ("example", "example"),
    ("propertyOrdering", "property_ordering"),
];

fn gemini_type(name: &str) -> std::result::Result<&'static str, String> {
    match name {
        "string" => Ok("STRING"),
        "number" => Ok("NUMBER"),
        "integer" => Ok("INTEGER"),
        "boolean" => Ok("BOOLEAN"),
        "array" => Ok("ARRAY"),
        "object" => Ok("OBJECT"),
        other => Err(format!("unsupported type '{}'", other)),
    }
}

fn is_null_schema(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str) == Some("null")
}

/// Convert a JSON Schema node into Gemini's schema representation
fn normalize_schema(schema: &Value) -> std::result::Result<Value, String> {
    let object = schema.as_object().ok_or("schema nodes must be objects")?;
    let mut out = JsonMap::new();

    match object.get("type") {
        None => {}
        Some(Value::String(name)) if name == "null" => {
            out.insert("nullable".into(), Value::Bool(true));
        }
        Some(Value::String(name)) => {
            out.insert("type".into(), json!(gemini_type(name)?));
        }
        Some(Value::Array(names)) => {
            let names: Vec<&str> = names.iter().filter_map(Value::as_str).collect();
            let concrete: Vec<&str> = names.iter().copied().filter(|n| *n != "null").collect();
            if concrete.len() < names.len() {
                out.insert("nullable".into(), Value::Bool(true));
            }
            match concrete.as_slice() {
                [] => {}
                [single] => {
                    out.insert("type".into(), json!(gemini_type(single)?));
                }
                many => {
                    let variants = many
                        .iter()
                        .map(|n| gemini_type(n).map(|t| json!({"type": t})))
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    out.insert("any_of".into(), Value::Array(variants));
                }
            }
        }
        Some(other) => return Err(format!("type must be a string or list, got {}", other)),
    }

    for (source, target) in COPIED_KEYS {
        if let Some(value) = object.get(*source) {
            out.insert((*target).to_string(), value.clone());
        }
    }

    if let Some(Value::Object(properties)) = object.get("properties") {
        let mut converted = JsonMap::new();
        for (name, child) in properties {
            converted.insert(name.clone(), normalize_schema(child)?);
        }
        out.insert("properties".into(), Value::Object(converted));
    }

    if let Some(required) = object.get("required") {
        out.insert("required".into(), required.clone());
    }

    if let Some(items) = object.get("items") {
        out.insert("items".into(), normalize_schema(items)?);
    }

    if let Some(Value::Array(variants)) = object.get("anyOf").or_else(|| object.get("any_of")) {
        let (nulls, concrete): (Vec<&Value>, Vec<&Value>) = variants.iter().partition(|v| is_null_schema(v));
        if !nulls.is_empty() {
            out.insert("nullable".into(), Value::Bool(true));
        }
        if let [single] = concrete.as_slice() {
            if let Value::Object(inner) = normalize_schema(single)? {
                for (k, v) in inner {
                    out.entry(k).or_insert(v);
                }
            }
        } else if !concrete.is_empty() {
            let converted = concrete
                .into_iter()
                .map(normalize_schema)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            out.insert("any_of".into(), Value::Array(converted));
        }
    }

    Ok(Value::Object(out))
}
