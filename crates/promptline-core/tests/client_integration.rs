//! Client tests against mocked provider endpoints

use promptline_core::http::RetryPolicy;
use promptline_core::{GeminiConfig, InvokeOptions, InvokeOutput, LlmClient, OpenAiConfig};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(1)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(2))
        .with_jitter(false)
}

fn openai_config(base: String, dir: &TempDir) -> OpenAiConfig {
    OpenAiConfig {
        api_key: "sk-test".into(),
        api_base: base,
        default_model: Some("gpt-test".into()),
        timeout: Some(Duration::from_secs(5)),
        organization: None,
        usage_db: dir.path().join("usage.db"),
        retry: fast_retry(),
    }
}

fn gemini_config(base: String, dir: &TempDir) -> GeminiConfig {
    GeminiConfig {
        api_key: "g-key".into(),
        api_base: base,
        default_model: Some("gemini-test".into()),
        timeout: Some(Duration::from_secs(5)),
        usage_db: dir.path().join("gemini.db"),
        image_output: dir.path().join("images"),
        upload_images: false,
        retry: fast_retry(),
    }
}

#[tokio::test]
async fn test_openai_round_trip_with_thinking() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-test",
            "max_tokens": 64,
            "extra_body": {"google": {"thinking_config": {"thinkingBudget": -1, "includeThoughts": true}}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chat-1",
            "choices": [{"message": {"content": "<thought>consider</thought>Paris"}}],
            "usage": {"prompt_tokens": 4, "completion_tokens": 2, "total_tokens": 6}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = LlmClient::from_openai_config(&openai_config(server.uri(), &dir)).unwrap();
    let yaml = "messages:\n  - user: Capital of France?\ngeneration:\n  max_output_tokens: 64\n  think: -1\n";
    let result = client.invoke_from_yaml(yaml, InvokeOptions::default()).await.unwrap();

    assert_eq!(
        result.output(),
        Some(&InvokeOutput::Text("<LLM_THINKING>\nconsider\n</LLM_THINKING>\n\nParis".into()))
    );
}

#[tokio::test]
async fn test_transport_errors_retried_then_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = LlmClient::from_openai_config(&openai_config(server.uri(), &dir)).unwrap();
    let err = client
        .invoke_from_yaml("messages:\n  - user: hi\n", InvokeOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(500));
}

#[tokio::test]
async fn test_gemini_grounded_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:generateContent"))
        .and(header("x-goog-api-key", "g-key"))
        .and(body_partial_json(json!({
            "system_instruction": {"parts": [{"text": "Be brief."}]},
            "tools": [{"google_search": {}}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responseId": "g-1",
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Rust 1.0 shipped in 2015."}]},
                "groundingMetadata": {
                    "groundingChunks": [{"web": {"uri": "https://blog.rust-lang.org"}}],
                    "groundingSupports": [{"segment": {"endIndex": 25}, "groundingChunkIndices": [0]}]
                }
            }],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 7, "totalTokenCount": 12}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = LlmClient::from_gemini_config(&gemini_config(server.uri(), &dir)).unwrap();
    let yaml = "messages:\n  - system: Be brief.\n  - user: When did Rust 1.0 ship?\ngeneration:\n  tools: ['search:inline']\n";
    let result = client.invoke_from_yaml(yaml, InvokeOptions::default()).await.unwrap();

    assert_eq!(
        result.output().and_then(InvokeOutput::as_text),
        Some("Rust 1.0 shipped in 2015. [1](https://blog.rust-lang.org)")
    );
}

#[tokio::test]
async fn test_gemini_generated_image_saved() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:generateContent"))
        .and(body_partial_json(json!({
            "generation_config": {"response_modalities": ["IMAGE"], "image_config": {"aspect_ratio": "16:9"}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"inlineData": {"mimeType": "image/png", "data": "iVBORw0K"}}]}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = LlmClient::from_gemini_config(&gemini_config(server.uri(), &dir)).unwrap();
    let yaml = "messages:\n  - user: draw a fox\ngeneration:\n  response: image\n  image:\n    ratio: '16:9'\n";
    let result = client.invoke_from_yaml(yaml, InvokeOptions::default()).await.unwrap();

    let Some(InvokeOutput::Image(image)) = result.output() else {
        panic!("expected an image result, got {:?}", result);
    };
    let local = image.local_path.as_deref().unwrap();
    assert!(local.starts_with(dir.path().join("images").to_str().unwrap()));
    assert!(std::path::Path::new(local).is_file());
    assert!(image.online_url.is_none());
}

#[tokio::test]
async fn test_dry_run_never_contacts_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

    let dir = TempDir::new().unwrap();
    let client = LlmClient::from_gemini_config(&gemini_config(server.uri(), &dir)).unwrap();
    let yaml = "messages:\n  - user: describe\n    images: [missing/photo.png]\n";
    let preview = client
        .invoke_from_yaml(
            yaml,
            InvokeOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .to_value();

    assert_eq!(
        preview["gemini_payload"]["current_message"]["parts"][1],
        json!({"file_data": {"file_uri": "missing/photo.png", "mime_type": "image/png"}})
    );
    assert_eq!(preview["ics_request"]["generation"]["model"], json!("gemini-test"));
}
