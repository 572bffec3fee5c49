//! High-level client
//!
//! [`LlmClient`] runs the whole pipeline for one provider:
//! parse → compose → adapt → send (with retry) → record usage → extract.

use crate::adapters::{adapter_for, ProviderAdapter};
use crate::composer::{Composer, ComposerConfig};
use crate::config::{preset_root_from_env, GeminiConfig, OpenAiConfig};
use crate::error::Result;
use crate::http::{execute_with_retry, ChatTransport, GeminiTransport, OpenAiTransport, RetryPolicy};
use crate::images::{ImageStore, OpenListClient};
use crate::parser::RequestParser;
use crate::presets::{PresetLibrary, PresetLoader};
use crate::recorder::UsageRecorder;
use crate::response::{InvokeOutput, ProviderResponse, ResponseExtractor};
use crate::types::{ComposedRequest, JsonMap, Provider};
use crate::upload::{FileUploader, GeminiFileUploader, InlineImageUploader, PreviewUploader};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Per-call switches for [`LlmClient::invoke_from_yaml`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvokeOptions {
    /// Build the payload but do not send it
    pub dry_run: bool,
    /// Wrap the result together with the composed request and payload
    pub include_debug: bool,
    /// Return the provider response without extraction
    pub raw_response: bool,
}

/// What an invocation produced
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Output(InvokeOutput),
    /// Dry run: `{ics_request, <provider>_payload}`
    Preview(Value),
    /// `{result, ics_request, <provider>_payload}`
    Debug(Value),
    /// Unprocessed provider response
    Raw(Value),
}

impl Invocation {
    pub fn to_value(&self) -> Value {
        match self {
            Invocation::Output(output) => output.to_value(),
            Invocation::Preview(value) | Invocation::Debug(value) | Invocation::Raw(value) => value.clone(),
        }
    }

    pub fn output(&self) -> Option<&InvokeOutput> {
        match self {
            Invocation::Output(output) => Some(output),
            _ => None,
        }
    }
}

pub struct LlmClient {
    provider: Provider,
    composer: ComposerConfig,
    presets: Option<Arc<dyn PresetLoader>>,
    adapter: Box<dyn ProviderAdapter>,
    transport: Box<dyn ChatTransport>,
    uploader: Box<dyn FileUploader>,
    images: Option<ImageStore>,
    recorder: Option<UsageRecorder>,
    retry: RetryPolicy,
}

fn open_recorder(path: &Path) -> Option<UsageRecorder> {
    match UsageRecorder::open(path) {
        Ok(recorder) => Some(recorder),
        Err(e) => {
            warn!(error = %e, "Usage logging disabled");
            None
        }
    }
}

impl LlmClient {
    /// Bare client: no presets, preview uploads, no usage log, default retry
    pub fn new(provider: Provider, transport: Box<dyn ChatTransport>) -> Self {
        Self {
            provider,
            composer: ComposerConfig::default(),
            presets: None,
            adapter: adapter_for(provider),
            transport,
            uploader: Box::new(PreviewUploader),
            images: None,
            recorder: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.composer = ComposerConfig::with_default_model(model);
        self
    }

    pub fn with_presets(mut self, loader: Arc<dyn PresetLoader>) -> Self {
        self.presets = Some(loader);
        self
    }

    pub fn with_uploader(mut self, uploader: Box<dyn FileUploader>) -> Self {
        self.uploader = uploader;
        self
    }

    pub fn with_image_store(mut self, store: ImageStore) -> Self {
        self.images = Some(store);
        self
    }

    pub fn with_recorder(mut self, recorder: UsageRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// OpenAI-compatible client from `LLM_*` settings
    pub fn from_openai_config(config: &OpenAiConfig) -> Result<Self> {
        let mut client = Self::new(Provider::OpenAi, Box::new(OpenAiTransport::new(config)?))
            .with_uploader(Box::new(InlineImageUploader::new(config.timeout)?))
            .with_presets(Arc::new(PresetLibrary::from_root(preset_root_from_env())))
            .with_retry(config.retry.clone());
        if let Some(model) = &config.default_model {
            client = client.with_default_model(model.clone());
        }
        client.recorder = open_recorder(&config.usage_db);
        Ok(client)
    }

    /// Gemini client from `GEMINI_*` settings
    pub fn from_gemini_config(config: &GeminiConfig) -> Result<Self> {
        let uploader = GeminiFileUploader::new(&config.api_base, &config.api_key, config.timeout)?;
        let mut images = ImageStore::new(&config.image_output);
        if config.upload_images {
            match OpenListClient::from_env() {
                Ok(host) => images = images.with_host(Arc::new(host)),
                Err(e) => warn!(error = %e, "Image upload enabled but OpenList is not configured"),
            }
        }

        let mut client = Self::new(Provider::Gemini, Box::new(GeminiTransport::new(config)?))
            .with_uploader(Box::new(uploader))
            .with_presets(Arc::new(PresetLibrary::from_root(preset_root_from_env())))
            .with_image_store(images)
            .with_retry(config.retry.clone());
        if let Some(model) = &config.default_model {
            client = client.with_default_model(model.clone());
        }
        client.recorder = open_recorder(&config.usage_db);
        Ok(client)
    }

    /// Client for `provider` configured from the environment
    pub fn from_env(provider: Provider) -> Result<Self> {
        match provider {
            Provider::OpenAi => Self::from_openai_config(&OpenAiConfig::from_env()?),
            Provider::Gemini => Self::from_gemini_config(&GeminiConfig::from_env()?),
        }
    }

    /// Parse and compose without touching the network
    pub fn compose(&self, yaml: &str) -> Result<ComposedRequest> {
        let loader = self.presets.as_deref();
        let parsed = RequestParser::new(loader).parse(yaml)?;
        Composer::new(&self.composer, loader).build(parsed)
    }

    fn envelope(&self, ics: Value, payload: Value, result: Option<Value>) -> Value {
        let mut map = JsonMap::new();
        if let Some(result) = result {
            map.insert("result".into(), result);
        }
        map.insert("ics_request".into(), ics);
        map.insert(self.provider.payload_key().into(), payload);
        Value::Object(map)
    }

    fn parse_response(&self, body: &Value) -> Result<ProviderResponse> {
        match self.provider {
            Provider::OpenAi => ProviderResponse::from_openai(body),
            Provider::Gemini => ProviderResponse::from_gemini(body),
        }
    }

    #[instrument(skip(self, yaml), fields(provider = %self.provider))]
    pub async fn invoke_from_yaml(&self, yaml: &str, options: InvokeOptions) -> Result<Invocation> {
        let request = self.compose(yaml)?;
        let trace_id = request.trace_id().map(str::to_string);
        debug!(trace_id = ?trace_id, messages = request.messages().len(), "Request composed");

        if options.dry_run {
            let payload = self.adapter.adapt(&request, &PreviewUploader).await?;
            return Ok(Invocation::Preview(self.envelope(request.to_payload(), payload.preview(), None)));
        }

        let payload = self.adapter.adapt(&request, self.uploader.as_ref()).await?;
        let transport = self.transport.as_ref();
        let body = &payload.body;
        let raw = execute_with_retry(|| transport.send(body), &self.retry).await?;

        let response = self.parse_response(&raw)?;
        if let Some(recorder) = &self.recorder {
            let model = response.model.as_deref().or(request.model());
            recorder.record(model, response.response_id.as_deref(), trace_id.as_deref(), response.usage.as_ref());
        }
        info!(
            trace_id = ?trace_id,
            response_id = ?response.response_id,
            total_tokens = ?response.usage.as_ref().and_then(|u| u.total_tokens),
            "Response received"
        );

        let result = if options.raw_response {
            raw
        } else {
            let mut extractor = ResponseExtractor::new(self.provider);
            if let Some(store) = &self.images {
                extractor = extractor.with_image_store(store);
            }
            let output = extractor
                .extract(&response, request.format(), payload.inline_citations)
                .await?;
            if !options.include_debug {
                return Ok(Invocation::Output(output));
            }
            output.to_value()
        };

        if options.include_debug {
            Ok(Invocation::Debug(self.envelope(request.to_payload(), payload.preview(), Some(result))))
        } else {
            Ok(Invocation::Raw(result))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replays canned responses and remembers what it was sent
    struct ScriptedTransport {
        responses: Mutex<Vec<Result<Value>>>,
        sent: Arc<Mutex<Vec<Value>>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<Value>>) -> (Self, Arc<Mutex<Vec<Value>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            let transport = Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                sent: sent.clone(),
            };
            (transport, sent)
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn send(&self, payload: &Value) -> Result<Value> {
            self.sent.lock().unwrap().push(payload.clone());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(Error::transport("no scripted response left")))
        }
    }

    fn openai_reply(content: &str) -> Value {
        json!({
            "id": "c1",
            "model": "m",
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 2, "completion_tokens": 3, "total_tokens": 5}
        })
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(2)
            .with_initial_delay(std::time::Duration::from_millis(1))
            .with_jitter(false)
    }

    #[tokio::test]
    async fn test_dry_run_sends_nothing() {
        let (transport, sent) = ScriptedTransport::new(vec![]);
        let client = LlmClient::new(Provider::OpenAi, Box::new(transport)).with_default_model("m");
        let options = InvokeOptions {
            dry_run: true,
            ..Default::default()
        };
        let result = client.invoke_from_yaml("messages:\n  - user: hi\n", options).await.unwrap();

        let Invocation::Preview(preview) = result else {
            panic!("expected a preview");
        };
        assert_eq!(
            preview["openai_payload"],
            json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]})
        );
        assert!(preview["ics_request"]["meta"]["trace_id"].is_string());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invoke_retries_then_extracts() {
        let (transport, sent) = ScriptedTransport::new(vec![
            Err(Error::http_status(503, "busy")),
            Ok(openai_reply("{\"ok\": true}")),
        ]);
        let client = LlmClient::new(Provider::OpenAi, Box::new(transport))
            .with_default_model("m")
            .with_retry(fast_retry());
        let yaml = "messages:\n  - user: hi\ngeneration:\n  format: json\n";
        let result = client.invoke_from_yaml(yaml, InvokeOptions::default()).await.unwrap();

        assert_eq!(result, Invocation::Output(InvokeOutput::Structured(json!({"ok": true}))));
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_validation_errors_are_not_retried() {
        let (transport, sent) = ScriptedTransport::new(vec![]);
        let client = LlmClient::new(Provider::OpenAi, Box::new(transport)).with_retry(fast_retry());
        let err = client
            .invoke_from_yaml("messages:\n  - user: hi\n", InvokeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_debug_envelope_and_raw() {
        let (transport, _) = ScriptedTransport::new(vec![Ok(openai_reply("hello")), Ok(openai_reply("again"))]);
        let client = LlmClient::new(Provider::OpenAi, Box::new(transport)).with_default_model("m");
        let yaml = "messages:\n  - user: hi\n";

        let debug = client
            .invoke_from_yaml(
                yaml,
                InvokeOptions {
                    include_debug: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .to_value();
        assert_eq!(debug["result"], json!("hello"));
        assert_eq!(debug["openai_payload"]["model"], json!("m"));
        assert_eq!(debug["ics_request"]["messages"][0]["content"], json!("hi"));

        let raw = client
            .invoke_from_yaml(
                yaml,
                InvokeOptions {
                    raw_response: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(raw, Invocation::Raw(openai_reply("again")));
    }

    #[tokio::test]
    async fn test_usage_is_recorded() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = dir.path().join("usage.db");
        let (transport, _) = ScriptedTransport::new(vec![Ok(openai_reply("x"))]);
        let client = LlmClient::new(Provider::OpenAi, Box::new(transport))
            .with_default_model("m")
            .with_recorder(UsageRecorder::open(&db).unwrap());
        client
            .invoke_from_yaml("messages:\n  - user: hi\n", InvokeOptions::default())
            .await
            .unwrap();
        drop(client);

        let rows: i64 = rusqlite::Connection::open(&db)
            .unwrap()
            .query_row("SELECT COUNT(*) FROM usage_log WHERE request_id = 'c1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
