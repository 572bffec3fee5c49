//! Promptline Core - YAML prompt composition for chat-completion APIs
//!
//! This crate turns a YAML request document into an OpenAI-compatible or
//! Gemini-native payload, sends it with retry, and normalizes the answer
//! according to the declared output format.
//!
//! # Main Components
//!
//! - **Parsing**: [`parser`] reads request YAML, expanding preset references
//! - **Presets**: [`presets`] resolves preset and group files with cycle detection
//! - **Composition**: [`composer`] merges system text and builds multimodal blocks
//! - **Adapters**: [`adapters`] produce provider wire payloads
//! - **Responses**: [`response`] parses replies and extracts the final result
//! - **Client**: [`client::LlmClient`] runs the whole pipeline
//!
//! # Example
//!
//! ```no_run
//! use promptline_core::{InvokeOptions, LlmClient, Provider, Result};
//!
//! async fn example() -> Result<()> {
//!     let client = LlmClient::from_env(Provider::Gemini)?;
//!     let yaml = "messages:\n  - user: Say hello\n";
//!     let result = client.invoke_from_yaml(yaml, InvokeOptions::default()).await?;
//!     println!("{}", result.to_value());
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod client;
pub mod composer;
pub mod config;
pub mod error;
pub mod format;
pub mod http;
pub mod images;
pub mod macros;
pub mod parser;
pub mod presets;
pub mod recorder;
pub mod response;
pub mod tavern;
pub mod types;
pub mod upload;

// Re-export main types for convenience
pub use error::{Error, ErrorKind, Result};
pub use types::{
    // Parsed entries
    EntrySource, ImageRefs, MessageEntry, Role,

    // Composed request
    ComposedMessage, ComposedRequest, ContentBlock, FormatDescriptor, JsonMap, MessageContent,

    // Providers
    Provider,
};

pub use adapters::{adapter_for, AdaptedPayload, ProviderAdapter};
pub use client::{Invocation, InvokeOptions, LlmClient};
pub use composer::{Composer, ComposerConfig};
pub use config::{GeminiConfig, OpenAiConfig, OpenListConfig};
pub use format::FormatHandler;
pub use parser::{ParsedRequest, RequestParser};
pub use presets::{PresetLibrary, PresetLoader};
pub use response::{InvokeOutput, ProviderResponse, ResponseExtractor, Usage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
