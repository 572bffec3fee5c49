//! End-to-end tests for parse → compose → adapt → extract without a network
//!
//! Preset trees are written to temporary directories and loaded through
//! `PresetLibrary`, the same way the client does.

use pretty_assertions::assert_eq;
use promptline_core::adapters::{GeminiAdapter, OpenAiAdapter};
use promptline_core::upload::PreviewUploader;
use promptline_core::{
    ComposedMessage, ComposedRequest, Composer, ComposerConfig, ErrorKind, FormatDescriptor, InvokeOutput, JsonMap,
    PresetLibrary, PresetLoader, Provider, ProviderAdapter, ProviderResponse, RequestParser, ResponseExtractor, Role,
};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn compose(yaml: &str, loader: Option<&dyn PresetLoader>) -> promptline_core::Result<ComposedRequest> {
    let parsed = RequestParser::new(loader).parse(yaml)?;
    Composer::new(&ComposerConfig::default(), loader).build(parsed)
}

#[tokio::test]
async fn test_openai_minimal_payload() {
    let request = compose("messages:\n  - user: hi\ngeneration:\n  model: m\n", None).unwrap();
    let payload = OpenAiAdapter::new().adapt(&request, &PreviewUploader).await.unwrap();

    assert_eq!(
        payload.body,
        json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]})
    );
    assert!(payload.body.get("response_format").is_none());
}

#[tokio::test]
async fn test_json_format_processing() {
    let request = compose("messages:\n  - user: give json\ngeneration:\n  model: m\n  format: json\n", None).unwrap();
    assert_eq!(request.format(), Some(&FormatDescriptor::Json));
    let extractor = ResponseExtractor::new(Provider::OpenAi);

    let reply = |content: &str| {
        ProviderResponse::from_openai(&json!({"choices": [{"message": {"content": content}}]})).unwrap()
    };

    let out = extractor.extract(&reply("{\"a\": 1}"), request.format(), false).await.unwrap();
    assert_eq!(out, InvokeOutput::Structured(json!({"a": 1})));

    let err = extractor.extract(&reply("not json"), request.format(), false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_preset_system_merge() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "preset/p.yaml", "- system: S\n");
    let library = PresetLibrary::from_root(dir.path());

    let request = compose(
        "messages:\n  - preset: p\n  - user: hi\ngeneration:\n  model: m\n",
        Some(&library),
    )
    .unwrap();

    let messages = request.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[0].content.as_text(), Some("{\"p\": \"S\"}"));
    assert_eq!(messages[1].content.as_text(), Some("hi"));
}

#[tokio::test]
async fn test_gemini_history_split() {
    let request = ComposedRequest::new(
        vec![
            ComposedMessage::new(Role::System, "sys"),
            ComposedMessage::new(Role::User, "u1"),
            ComposedMessage::new(Role::Assistant, "a1"),
            ComposedMessage::new(Role::User, "u2"),
        ],
        json!({"model": "gemini-2.5-flash"}).as_object().cloned().unwrap(),
        JsonMap::new(),
        JsonMap::new(),
        None,
    );
    let body = GeminiAdapter::new().adapt(&request, &PreviewUploader).await.unwrap().body;

    assert_eq!(body["system_instruction"], json!("sys"));
    assert_eq!(
        body["history"],
        json!([
            {"role": "user", "parts": [{"text": "u1"}]},
            {"role": "model", "parts": [{"text": "a1"}]}
        ])
    );
    assert_eq!(body["current_message"], json!({"role": "user", "parts": [{"text": "u2"}]}));
}

#[test]
fn test_composed_shape_invariants() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "preset/persona.yaml", "- system: You are terse.\n- assistant: Understood.\n");
    write(dir.path(), "preset/rules.yaml", "- system: No lists.\n- preset: persona\n");
    write(dir.path(), "groups/all.yaml", "- preset: rules\n- preset: persona\n");
    let library = PresetLibrary::from_root(dir.path());

    let inputs = [
        "messages:\n  - user: hi\n",
        "messages:\n  - system: be nice\n  - user: hi\n  - assistant: hello\n  - user: again\n",
        "messages:\n  - preset-group: all\n  - system: extra\n  - user: go\n",
        "messages:\n  system: legacy\n  user: hi\n",
    ];
    for yaml in inputs {
        let full = format!("{}generation:\n  model: m\n", yaml);
        let request = compose(&full, Some(&library)).unwrap();
        let messages = request.messages();
        assert_eq!(messages.last().unwrap().role, Role::User, "input: {}", yaml);
        let systems: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == Role::System)
            .map(|(i, _)| i)
            .collect();
        assert!(systems.is_empty() || systems == vec![0], "input: {}", yaml);
    }
}

#[test]
fn test_preset_cycle_names_chain() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "preset/a.yaml", "- preset: b\n");
    write(dir.path(), "preset/b.yaml", "- preset: a\n");
    let library = PresetLibrary::from_root(dir.path());

    let err = compose("messages:\n  - preset: a\n  - user: hi\ngeneration:\n  model: m\n", Some(&library)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("a -> b -> a"), "{}", err);
}

#[test]
fn test_repeated_presets_resolve_identically() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "preset/plain.yaml", "- system: fixed\n- user: question\n");
    let library = PresetLibrary::from_root(dir.path());

    let first = library.load_preset("plain").unwrap();
    let second = library.load_preset("plain").unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_payload_round_trip() {
    let request = compose(
        "messages:\n  - system: s\n  - user: hi\ngeneration:\n  model: m\n  temperature: 0.3\nmeta:\n  trace_id: t-1\n",
        None,
    )
    .unwrap();
    let payload: Value = request.to_payload();
    let rebuilt = ComposedRequest::from_payload(&payload).unwrap();

    assert_eq!(rebuilt.messages(), request.messages());
    assert_eq!(rebuilt.trace_id(), Some("t-1"));
    assert_eq!(rebuilt.generation(), request.generation());
}
