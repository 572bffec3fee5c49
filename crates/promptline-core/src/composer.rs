//! Message composition
//!
//! Builds the provider-agnostic [`ComposedRequest`] from a [`ParsedRequest`].
//! All system text is merged into one leading system message. For the list
//! form that message is a JSON object keyed by preset name, with author-written
//! text under `custom`:
//!
//! ```text
//! {"persona": "You are terse.", "custom": ["Answer in French."]}
//! ```

use crate::error::{Error, Result};
use crate::macros;
use crate::parser::{LegacyMessages, ParsedMessages, ParsedRequest};
use crate::presets::PresetLoader;
use crate::types::{
    ComposedMessage, ComposedRequest, ContentBlock, EntrySource, JsonMap, MessageContent, MessageEntry, Role,
};
use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::Value;
use std::io;
use tracing::{debug, warn};
use uuid::Uuid;

/// Settings the composer falls back on
#[derive(Debug, Clone, Default)]
pub struct ComposerConfig {
    /// Model used when the request names none
    pub default_model: Option<String>,
}

impl ComposerConfig {
    pub fn with_default_model(model: impl Into<String>) -> Self {
        Self {
            default_model: Some(model.into()),
        }
    }
}

/// Builds composed requests
pub struct Composer<'a> {
    config: ComposerConfig,
    loader: Option<&'a dyn PresetLoader>,
}

impl<'a> Composer<'a> {
    pub fn new(config: &ComposerConfig, loader: Option<&'a dyn PresetLoader>) -> Self {
        Self {
            config: config.clone(),
            loader,
        }
    }

    pub fn build(&self, parsed: ParsedRequest) -> Result<ComposedRequest> {
        let messages = match &parsed.messages {
            ParsedMessages::Entries(entries) => self.compose_entries(entries)?,
            ParsedMessages::Legacy(legacy) => compose_legacy(legacy)?,
        };

        let mut generation = parsed.generation;
        let model = generation
            .get("model")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .or_else(|| self.config.default_model.clone())
            .ok_or_else(|| Error::config("no model given in the request or the configuration"))?;
        generation.insert("model".to_string(), Value::String(model));

        let mut meta = parsed.meta;
        if !meta.contains_key("trace_id") {
            meta.insert("trace_id".to_string(), Value::String(Uuid::new_v4().to_string()));
        }

        let request = ComposedRequest::new(messages, generation, parsed.routing, meta, parsed.format);
        debug!(
            messages = request.messages().len(),
            model = request.model().unwrap_or_default(),
            trace_id = request.trace_id().unwrap_or_default(),
            "Composed request"
        );
        Ok(request)
    }

    fn compose_entries(&self, entries: &[MessageEntry]) -> Result<Vec<ComposedMessage>> {
        let mut preset_sections: JsonMap = JsonMap::new();
        let mut custom: Vec<Value> = Vec::new();
        let mut others = Vec::new();

        for entry in entries {
            if entry.role != Role::System {
                others.push(compose_entry(entry));
                continue;
            }
            if entry.content.is_empty() {
                continue;
            }

            match &entry.source {
                Some(EntrySource::Preset(name)) => {
                    if preset_sections.contains_key(name) {
                        continue;
                    }
                    match self.preset_system_text(name) {
                        Ok(text) => {
                            preset_sections.insert(name.clone(), Value::String(text));
                        }
                        Err(e) => {
                            warn!(preset = %name, error = %e, "Could not re-read preset system text, keeping entry as custom");
                            custom.push(Value::String(macros::render(&entry.content)));
                        }
                    }
                }
                _ => custom.push(Value::String(macros::render(&entry.content))),
            }
        }

        let mut messages = Vec::with_capacity(others.len() + 1);
        if !preset_sections.is_empty() || !custom.is_empty() {
            let mut merged = preset_sections;
            if !custom.is_empty() {
                let key = custom_key(&merged);
                merged.insert(key, Value::Array(custom));
            }
            messages.push(ComposedMessage::new(Role::System, to_spaced_json(&Value::Object(merged))?));
        }
        messages.extend(others);
        Ok(messages)
    }

    fn preset_system_text(&self, name: &str) -> Result<String> {
        let loader = self
            .loader
            .ok_or_else(|| Error::validation("no preset loader configured"))?;
        let raw = loader.preset_system_content(name)?;
        Ok(macros::render(&raw))
    }
}

/// `custom`, or `custom_2`, `custom_3`, ... when a preset already uses the name
fn custom_key(sections: &JsonMap) -> String {
    if !sections.contains_key("custom") {
        return "custom".to_string();
    }
    (2..)
        .map(|n| format!("custom_{}", n))
        .find(|key| !sections.contains_key(key))
        .unwrap_or_default()
}

fn compose_entry(entry: &MessageEntry) -> ComposedMessage {
    let text = macros::render(&entry.content);
    let urls = entry.image_urls();
    if urls.is_empty() {
        return ComposedMessage::new(entry.role, text);
    }

    let mut blocks = Vec::with_capacity(urls.len() + 1);
    if !text.is_empty() {
        blocks.push(ContentBlock::Text { text });
    }
    blocks.extend(urls.iter().map(|path| ContentBlock::Image { path: path.clone() }));
    ComposedMessage::new(entry.role, MessageContent::Blocks(blocks))
}

fn compose_legacy(legacy: &LegacyMessages) -> Result<Vec<ComposedMessage>> {
    let system: Vec<String> = legacy
        .entries
        .iter()
        .filter(|e| e.role == Role::System)
        .map(|e| e.content.trim())
        .filter(|s| !s.is_empty())
        .map(macros::render)
        .collect();

    let mut messages = Vec::new();
    if !system.is_empty() {
        messages.push(ComposedMessage::new(Role::System, system.join("\n\n")));
    }

    for entry in legacy.entries.iter().filter(|e| e.role != Role::System) {
        let text = entry.content.trim();
        if text.is_empty() {
            return Err(Error::validation(format!("{} message must not be empty", entry.role)));
        }
        messages.push(ComposedMessage::new(entry.role, macros::render(text)));
    }

    if !messages.iter().any(|m| m.role == Role::User) {
        return Err(Error::invalid_field("messages", "a non-empty user message is required"));
    }
    Ok(messages)
}

/// JSON with `", "` and `": "` separators and non-ASCII text left unescaped
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

fn to_spaced_json(value: &Value) -> Result<String> {
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| Error::validation(format!("failed to serialize system message: {}", e)))?;
    String::from_utf8(buf).map_err(|e| Error::validation(format!("system message is not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::RequestParser;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapLoader {
        presets: HashMap<&'static str, Vec<MessageEntry>>,
    }

    impl MapLoader {
        fn with(mut self, name: &'static str, entries: &[(Role, &str)]) -> Self {
            let entries = entries
                .iter()
                .map(|(role, text)| MessageEntry::new(*role, *text).with_source(EntrySource::Preset(name.to_string())))
                .collect();
            self.presets.insert(name, entries);
            self
        }
    }

    impl PresetLoader for MapLoader {
        fn load_preset(&self, name: &str) -> Result<Vec<MessageEntry>> {
            self.presets
                .get(name)
                .cloned()
                .ok_or_else(|| Error::validation(format!("preset '{}' not found", name)))
        }

        fn load_preset_group(&self, name: &str) -> Result<Vec<MessageEntry>> {
            Err(Error::validation(format!("group '{}' not found", name)))
        }
    }

    fn compose(yaml: &str, loader: Option<&dyn PresetLoader>) -> Result<ComposedRequest> {
        let parsed = RequestParser::new(loader).parse(yaml)?;
        Composer::new(&ComposerConfig::with_default_model("default-model"), loader).build(parsed)
    }

    #[test]
    fn test_minimal_request() {
        let request = compose("messages: [{user: hi}]\ngeneration: {model: m}\n", None).unwrap();
        assert_eq!(request.messages(), &[ComposedMessage::new(Role::User, "hi")]);
        assert_eq!(request.model(), Some("m"));
        assert!(Uuid::parse_str(request.trace_id().unwrap()).is_ok());
    }

    #[test]
    fn test_model_defaults_and_missing_model() {
        let request = compose("messages: [{user: hi}]\n", None).unwrap();
        assert_eq!(request.model(), Some("default-model"));

        let parsed = RequestParser::new(None).parse("messages: [{user: hi}]\n").unwrap();
        let err = Composer::new(&ComposerConfig::default(), None).build(parsed).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn test_existing_trace_id_kept() {
        let request = compose("messages: [{user: hi}]\nmeta: {trace_id: abc}\n", None).unwrap();
        assert_eq!(request.trace_id(), Some("abc"));
    }

    #[test]
    fn test_preset_system_merge() {
        let loader = MapLoader::default().with("p", &[(Role::System, "S")]);
        let request = compose("messages:\n  - preset: p\n  - user: hi\n", Some(&loader)).unwrap();

        assert_eq!(request.messages().len(), 2);
        assert_eq!(request.messages()[0], ComposedMessage::new(Role::System, "{\"p\": \"S\"}"));
        assert_eq!(request.messages()[1], ComposedMessage::new(Role::User, "hi"));
    }

    #[test]
    fn test_merge_order_and_custom_bucket() {
        let loader = MapLoader::default()
            .with("b", &[(Role::System, "B1"), (Role::System, "B2"), (Role::User, "from b")])
            .with("a", &[(Role::System, "A")]);
        let request = compose(
            "messages:\n  - system: first\n  - preset: b\n  - preset: a\n  - system: 中文\n  - preset: b\n  - user: hi\n",
            Some(&loader),
        )
        .unwrap();

        let system = request.messages()[0].content.as_text().unwrap();
        assert_eq!(system, "{\"b\": \"B1\\n\\nB2\", \"a\": \"A\", \"custom\": [\"first\", \"中文\"]}");

        let rest: Vec<_> = request.messages()[1..].iter().map(|m| m.role).collect();
        assert_eq!(rest, vec![Role::User, Role::User, Role::User]);
        assert_eq!(request.messages().iter().filter(|m| m.role == Role::System).count(), 1);
    }

    #[test]
    fn test_preset_named_custom_keeps_its_text() {
        let loader = MapLoader::default()
            .with("custom", &[(Role::System, "from preset")])
            .with("custom_2", &[(Role::System, "also preset")]);
        let request = compose(
            "messages:\n  - preset: custom\n  - preset: custom_2\n  - system: mine\n  - user: hi\n",
            Some(&loader),
        )
        .unwrap();

        let system = request.messages()[0].content.as_text().unwrap();
        assert_eq!(
            system,
            "{\"custom\": \"from preset\", \"custom_2\": \"also preset\", \"custom_3\": [\"mine\"]}"
        );
    }

    #[test]
    fn test_failed_rederivation_falls_back_to_custom() {
        let parsed = ParsedRequest {
            messages: ParsedMessages::Entries(vec![
                MessageEntry::new(Role::System, "orphan").with_source(EntrySource::Preset("gone".into())),
                MessageEntry::new(Role::User, "hi"),
            ]),
            generation: JsonMap::new(),
            routing: JsonMap::new(),
            meta: JsonMap::new(),
            format: None,
        };
        let loader = MapLoader::default();
        let request = Composer::new(&ComposerConfig::with_default_model("m"), Some(&loader))
            .build(parsed)
            .unwrap();
        let system: Value = serde_json::from_str(request.messages()[0].content.as_text().unwrap()).unwrap();
        assert_eq!(system, json!({"custom": ["orphan"]}));
    }

    #[test]
    fn test_empty_system_entries_dropped() {
        let request = compose("messages:\n  - system: ''\n  - user: hi\n", None).unwrap();
        assert_eq!(request.messages().len(), 1);
    }

    #[test]
    fn test_image_entries_become_blocks() {
        let request = compose(
            "messages:\n  - user: describe\n    images: [a.png, https://x/b.jpg]\n  - images: [c.png]\n",
            None,
        )
        .unwrap();

        assert_eq!(
            request.messages()[0].content,
            MessageContent::Blocks(vec![
                ContentBlock::Text { text: "describe".into() },
                ContentBlock::Image { path: "a.png".into() },
                ContentBlock::Image { path: "https://x/b.jpg".into() },
            ])
        );
        assert_eq!(
            request.messages()[1].content,
            MessageContent::Blocks(vec![ContentBlock::Image { path: "c.png".into() }])
        );
    }

    #[test]
    fn test_macros_rendered() {
        let request = compose("messages:\n  - system: 'd{{roll1d1}}'\n  - user: 'n={{random::x}}'\n", None).unwrap();
        assert_eq!(request.messages()[0].content.as_text(), Some("{\"custom\": [\"d1\"]}"));
        assert_eq!(request.messages()[1].content.as_text(), Some("n=x"));
    }

    #[test]
    fn test_legacy_path() {
        let request = compose(
            "messages:\n  system: [rule one, rule two]\n  user: hi\n  assistant: hello\n",
            None,
        )
        .unwrap();
        assert_eq!(
            request.messages(),
            &[
                ComposedMessage::new(Role::System, "rule one\n\nrule two"),
                ComposedMessage::new(Role::User, "hi"),
                ComposedMessage::new(Role::Assistant, "hello"),
            ]
        );
    }

    #[test]
    fn test_spaced_json() {
        let value = json!({"k": [1, "é"], "n": null});
        assert_eq!(to_spaced_json(&value).unwrap(), "{\"k\": [1, \"é\"], \"n\": null}");
    }
}
