//! YAML request parsing
//!
//! Turns a request document into role-tagged [`MessageEntry`] values plus the
//! `generation`, `routing` and `meta` sections. Preset references are expanded
//! here through the injected [`PresetLoader`].

use crate::error::{Error, Result};
use crate::presets::PresetLoader;
use crate::types::{EntrySource, FormatDescriptor, ImageRefs, JsonMap, MessageEntry, Role};
use serde_json::Value;
use tracing::debug;

const FORMAT_TYPES: &[&str] = &["json", "json_schema", "markdown", "text"];

/// Messages as written in the mapping form, in mapping order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LegacyMessages {
    pub entries: Vec<MessageEntry>,
}

/// Parsed `messages` section
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedMessages {
    /// List form, presets already expanded
    Entries(Vec<MessageEntry>),
    /// Mapping form `{system: .., user: .., assistant: ..}`
    Legacy(LegacyMessages),
}

impl ParsedMessages {
    pub fn entries(&self) -> &[MessageEntry] {
        match self {
            ParsedMessages::Entries(entries) => entries,
            ParsedMessages::Legacy(legacy) => &legacy.entries,
        }
    }
}

/// Output of [`RequestParser::parse`]
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRequest {
    pub messages: ParsedMessages,
    /// Generation parameters without `format`
    pub generation: JsonMap,
    pub routing: JsonMap,
    pub meta: JsonMap,
    pub format: Option<FormatDescriptor>,
}

/// Parser for YAML request documents
pub struct RequestParser<'a> {
    loader: Option<&'a dyn PresetLoader>,
}

impl<'a> RequestParser<'a> {
    pub fn new(loader: Option<&'a dyn PresetLoader>) -> Self {
        Self { loader }
    }

    /// Parse a request document
    pub fn parse(&self, raw: &str) -> Result<ParsedRequest> {
        let data: Value = serde_yaml::from_str(raw)
            .map_err(|e| Error::validation(format!("failed to parse YAML: {}", e)))?;

        let top = match data {
            Value::Object(map) if map.contains_key("messages") => map,
            _ => return Err(Error::validation("top level must be a mapping containing 'messages'")),
        };

        let messages = match &top["messages"] {
            Value::Array(items) => ParsedMessages::Entries(self.parse_list(items)?),
            Value::Object(map) => ParsedMessages::Legacy(parse_legacy(map)?),
            _ => {
                return Err(Error::invalid_field("messages", "messages must be a list or a mapping"));
            }
        };

        if !messages.entries().iter().any(|e| e.role == Role::User) {
            return Err(Error::invalid_field("messages", "at least one user message is required"));
        }

        let raw_generation = match top.get("generation") {
            None | Some(Value::Null) => JsonMap::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(Error::invalid_field("generation", "generation must be a mapping")),
        };

        let format = match raw_generation.get("format") {
            None | Some(Value::Null) => None,
            Some(raw_format) => Some(parse_format(raw_format)?),
        };
        // rebuilt rather than removed so key order survives
        let generation: JsonMap = raw_generation.into_iter().filter(|(k, _)| k != "format").collect();

        let section = |key: &str| match top.get(key) {
            Some(Value::Object(map)) if !map.is_empty() => map.clone(),
            _ => JsonMap::new(),
        };

        let parsed = ParsedRequest {
            messages,
            generation,
            routing: section("routing"),
            meta: section("meta"),
            format,
        };
        debug!(
            messages = parsed.messages.entries().len(),
            format = parsed.format.as_ref().map(|f| f.type_name()).unwrap_or("none"),
            "Parsed request"
        );
        Ok(parsed)
    }

    fn parse_list(&self, items: &[Value]) -> Result<Vec<MessageEntry>> {
        let mut entries = Vec::new();
        for (idx, item) in items.iter().enumerate() {
            let map = item
                .as_object()
                .ok_or_else(|| Error::invalid_field("messages", format!("message {} must be a mapping", idx + 1)))?;

            if let Some(reference) = map.get("preset") {
                let name = self.reference(reference, "preset")?;
                entries.extend(self.require_loader()?.load_preset(name)?);
            } else if let Some(reference) = map.get("preset-group") {
                let name = self.reference(reference, "preset-group")?;
                entries.extend(self.require_loader()?.load_preset_group(name)?);
            } else if map.contains_key("images") {
                entries.push(parse_image_item(map)?);
            } else {
                entries.push(parse_role_item(map)?);
            }
        }
        Ok(entries)
    }

    fn reference<'v>(&self, value: &'v Value, key: &str) -> Result<&'v str> {
        value
            .as_str()
            .map(str::trim)
            .ok_or_else(|| Error::invalid_field(key, format!("{} value must be a string", key)))
    }

    fn require_loader(&self) -> Result<&'a dyn PresetLoader> {
        self.loader
            .ok_or_else(|| Error::validation("preset references need a preset loader, none was configured"))
    }
}

/// Parse a `generation.format` value into a descriptor
pub fn parse_format(raw: &Value) -> Result<FormatDescriptor> {
    let (type_name, map) = match raw {
        Value::String(s) => {
            let name = s.trim().to_lowercase();
            if name.is_empty() {
                return Err(Error::invalid_field("format", "format string must not be empty"));
            }
            (name, None)
        }
        Value::Object(map) => {
            let name = match map.get("type") {
                None | Some(Value::Null) => "text".to_string(),
                Some(Value::String(s)) if s.trim().is_empty() => "text".to_string(),
                Some(Value::String(s)) => s.trim().to_lowercase(),
                Some(_) => return Err(Error::invalid_field("format", "format.type must be a string")),
            };
            (name, Some(map))
        }
        _ => return Err(Error::invalid_field("format", "format must be a string or a mapping")),
    };

    match type_name.as_str() {
        "text" => Ok(FormatDescriptor::Text),
        "markdown" => Ok(FormatDescriptor::Markdown),
        "json" => Ok(FormatDescriptor::Json),
        "json_schema" => {
            let map = map.ok_or_else(|| {
                Error::invalid_field("format", "json_schema needs a mapping with name and schema")
            })?;
            let name = map
                .get("name")
                .or_else(|| map.get("schema_name"))
                .and_then(Value::as_str)
                .filter(|n| !n.trim().is_empty())
                .ok_or_else(|| Error::invalid_field("format", "json_schema requires a string name"))?;
            let schema = match map.get("schema") {
                Some(schema @ Value::Object(_)) => schema.clone(),
                _ => return Err(Error::invalid_field("format", "json_schema requires a schema mapping")),
            };
            Ok(FormatDescriptor::JsonSchema {
                name: name.to_string(),
                schema,
            })
        }
        other => Err(Error::invalid_field(
            "format",
            format!("unsupported format '{}', expected one of: {}", other, FORMAT_TYPES.join(", ")),
        )),
    }
}

fn parse_role(raw: &str) -> Result<Role> {
    Role::from_token(raw).ok_or_else(|| {
        Error::invalid_field(
            "role",
            format!("unsupported role '{}', expected system, user or assistant", raw.trim()),
        )
    })
}

/// Build an entry from a role and raw content, applying the emptiness rules
fn text_entry(role: Role, content: &Value) -> Result<MessageEntry> {
    let text = content
        .as_str()
        .ok_or_else(|| Error::invalid_field("content", format!("{} content must be a string", role)))?
        .trim();

    if role != Role::System && text.is_empty() {
        return Err(Error::invalid_field("content", format!("{} message must not be empty", role)));
    }

    let entry = MessageEntry::new(role, text);
    Ok(if role == Role::System {
        entry.with_source(EntrySource::Custom)
    } else {
        entry
    })
}

fn parse_role_item(map: &JsonMap) -> Result<MessageEntry> {
    if let (Some(role), Some(content)) = (map.get("role"), map.get("content")) {
        let role = match role {
            Value::String(s) => parse_role(s)?,
            other => parse_role(&other.to_string())?,
        };
        return text_entry(role, content);
    }

    if map.len() == 1 {
        if let Some((raw_role, content)) = map.iter().next() {
            return text_entry(parse_role(raw_role)?, content);
        }
    }

    Err(Error::invalid_field(
        "messages",
        "message items need role/content, a single role key, or images",
    ))
}

fn parse_image_item(map: &JsonMap) -> Result<MessageEntry> {
    let mut role = Role::User;
    let mut text = String::new();

    let role_key = map
        .keys()
        .filter(|k| !matches!(k.as_str(), "images" | "urls" | "contents"))
        .find_map(|k| Role::from_token(k).map(|r| (k, r)));
    if let Some((key, found)) = role_key {
        role = found;
        text = map[key]
            .as_str()
            .ok_or_else(|| Error::invalid_field("content", format!("{} content must be a string", found)))?
            .trim()
            .to_string();
    }

    let (urls, contents) = match &map["images"] {
        Value::Array(items) => {
            let urls = items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| Error::invalid_field("images", "images list must contain only path strings"))?;
            (urls, Vec::new())
        }
        Value::Object(inner) => (string_list(inner.get("urls"))?, value_list(inner.get("contents"))?),
        Value::Null if map.contains_key("urls") || map.contains_key("contents") => {
            (string_list(map.get("urls"))?, value_list(map.get("contents"))?)
        }
        _ => {
            return Err(Error::invalid_field(
                "images",
                "images must be a list, a mapping, or null with sibling urls/contents",
            ));
        }
    };

    Ok(MessageEntry::new(role, text).with_images(ImageRefs { urls, contents }))
}

fn string_list(value: Option<&Value>) -> Result<Vec<String>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::invalid_field("urls", "urls must contain only strings")),
        Some(_) => Err(Error::invalid_field("urls", "urls must be a list")),
    }
}

fn value_list(value: Option<&Value>) -> Result<Vec<Value>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(Error::invalid_field("contents", "contents must be a list")),
    }
}

fn parse_legacy(map: &JsonMap) -> Result<LegacyMessages> {
    let mut entries = Vec::new();
    for (raw_role, raw_value) in map {
        let role = parse_role(raw_role)?;
        let values: Vec<&Value> = match raw_value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        for value in values {
            if value.as_str().is_none() {
                return Err(Error::invalid_field(
                    "messages",
                    format!("messages.{} must be a string or a list of strings", raw_role),
                ));
            }
            if role == Role::System && value.as_str().is_some_and(|s| s.trim().is_empty()) {
                continue;
            }
            entries.push(text_entry(role, value)?);
        }
    }
    Ok(LegacyMessages { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    struct StaticLoader(HashMap<&'static str, Vec<MessageEntry>>);

    impl PresetLoader for StaticLoader {
        fn load_preset(&self, name: &str) -> Result<Vec<MessageEntry>> {
            self.0
                .get(name)
                .cloned()
                .ok_or_else(|| Error::validation(format!("preset '{}' not found", name)))
        }

        fn load_preset_group(&self, name: &str) -> Result<Vec<MessageEntry>> {
            Err(Error::validation(format!("preset group '{}' not found", name)))
        }
    }

    fn parse(raw: &str) -> Result<ParsedRequest> {
        RequestParser::new(None).parse(raw)
    }

    #[test]
    fn test_minimal_list_request() {
        let parsed = parse("messages:\n  - user: '  hi  '\ngeneration:\n  model: m\n").unwrap();
        let entries = parsed.messages.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[0].content, "hi");
        assert_eq!(entries[0].source, None);
        assert_eq!(parsed.generation.get("model"), Some(&json!("m")));
        assert!(parsed.format.is_none());
    }

    #[test]
    fn test_role_content_and_prefixed_roles() {
        let parsed = parse(
            "messages:\n  - role: System\n    content: rules\n  - 1.user: question\n  - 2.Assistant: answer\n  - user: again\n",
        )
        .unwrap();
        let roles: Vec<Role> = parsed.messages.entries().iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(parsed.messages.entries()[0].source, Some(EntrySource::Custom));
    }

    #[test]
    fn test_blank_system_kept_blank_user_rejected() {
        let parsed = parse("messages:\n  - system: '  '\n  - user: hi\n").unwrap();
        assert_eq!(parsed.messages.entries()[0].content, "");

        let err = parse("messages:\n  - user: '   '\n").unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn test_structural_errors() {
        assert!(parse("messages: [unclosed").is_err());
        assert!(parse("- a\n- b\n").unwrap_err().to_string().contains("'messages'"));
        assert!(parse("generation: {}\n").is_err());
        assert!(parse("messages: hello\n").unwrap_err().to_string().contains("list or a mapping"));
        assert!(parse("messages:\n  - system: only\n").unwrap_err().to_string().contains("user"));
        assert!(parse("messages:\n  - narrator: hi\n").unwrap_err().to_string().contains("narrator"));
        assert!(parse("messages:\n  - user: [1, 2]\n").is_err());
        assert!(parse("messages:\n  - user: a\n    assistant: b\n").is_err());
        assert!(parse("messages:\n  - just text\n").is_err());
    }

    #[test]
    fn test_image_items() {
        let parsed = parse(
            "messages:\n  - user: ' look '\n    images: [a.png, b.png]\n  - images:\n      urls: [c.png]\n      contents: [{b64: x}]\n  - images: null\n    urls: [d.png]\n",
        )
        .unwrap();
        let entries = parsed.messages.entries();
        assert_eq!(entries[0].content, "look");
        assert_eq!(entries[0].image_urls(), &["a.png".to_string(), "b.png".to_string()]);
        assert_eq!(entries[1].role, Role::User);
        assert_eq!(entries[1].content, "");
        assert_eq!(entries[1].images.as_ref().unwrap().contents, vec![json!({"b64": "x"})]);
        assert_eq!(entries[2].image_urls(), &["d.png".to_string()]);
    }

    #[test]
    fn test_malformed_images() {
        assert!(parse("messages:\n  - images: [1]\n").is_err());
        assert!(parse("messages:\n  - images: {urls: a.png}\n").is_err());
        assert!(parse("messages:\n  - images: a.png\n").is_err());
        assert!(parse("messages:\n  - images: null\n").is_err());
        assert!(parse("messages:\n  - user: 5\n    images: [a.png]\n").is_err());
    }

    #[test]
    fn test_legacy_mapping() {
        let parsed = parse("messages:\n  system: ['  ', be kind]\n  user: hi\n  assistant: [hello]\n").unwrap();
        let ParsedMessages::Legacy(legacy) = &parsed.messages else {
            panic!("expected legacy messages");
        };
        let pairs: Vec<(Role, &str)> = legacy.entries.iter().map(|e| (e.role, e.content.as_str())).collect();
        assert_eq!(pairs, vec![(Role::System, "be kind"), (Role::User, "hi"), (Role::Assistant, "hello")]);

        assert!(parse("messages:\n  user: ''\n").is_err());
        assert!(parse("messages:\n  user: [1]\n").is_err());
    }

    #[test]
    fn test_preset_references() {
        let mut presets = HashMap::new();
        presets.insert(
            "p",
            vec![MessageEntry::new(Role::System, "S").with_source(EntrySource::Preset("p".into()))],
        );
        let loader = StaticLoader(presets);
        let parser = RequestParser::new(Some(&loader));

        let parsed = parser.parse("messages:\n  - preset: ' p '\n  - user: hi\n").unwrap();
        assert_eq!(parsed.messages.entries()[0].preset_name(), Some("p"));

        assert!(parser.parse("messages:\n  - preset: 3\n  - user: hi\n").is_err());
        assert!(parser.parse("messages:\n  - preset: nope\n  - user: hi\n").is_err());

        let err = parse("messages:\n  - preset: p\n  - user: hi\n").unwrap_err();
        assert!(err.to_string().contains("preset loader"));
    }

    #[test]
    fn test_sections() {
        let parsed = parse(
            "messages: [{user: hi}]\ngeneration:\n  model: m\n  format: JSON\nrouting: {}\nmeta:\n  trace_id: t\n",
        )
        .unwrap();
        assert_eq!(parsed.format, Some(FormatDescriptor::Json));
        assert!(!parsed.generation.contains_key("format"));
        assert!(parsed.routing.is_empty());
        assert_eq!(parsed.meta.get("trace_id"), Some(&json!("t")));

        assert!(parse("messages: [{user: hi}]\ngeneration: 3\n").is_err());
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(parse_format(&json!("markdown")).unwrap(), FormatDescriptor::Markdown);
        assert_eq!(parse_format(&json!({})).unwrap(), FormatDescriptor::Text);
        assert_eq!(parse_format(&json!({"type": " "})).unwrap(), FormatDescriptor::Text);
        assert!(parse_format(&json!("  ")).is_err());
        assert!(parse_format(&json!("xml")).is_err());
        assert!(parse_format(&json!({"type": 1})).is_err());
        assert!(parse_format(&json!(42)).is_err());
        assert!(parse_format(&json!("json_schema")).is_err());

        let schema = parse_format(&json!({
            "type": "json_schema",
            "schema_name": "answer",
            "schema": {"type": "object", "required": ["a"]}
        }))
        .unwrap();
        assert_eq!(schema.type_name(), "json_schema");

        assert!(parse_format(&json!({"type": "json_schema", "name": "a", "schema": []})).is_err());
        assert!(parse_format(&json!({"type": "json_schema", "schema": {}})).is_err());
    }
}
