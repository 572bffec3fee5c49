//! HTTP plumbing: provider transports and retry handling

pub mod retry;
pub mod transport;

pub use retry::{execute_with_retry, RetryDecision, RetryHandler, RetryPolicy};
pub use transport::{ChatTransport, GeminiTransport, OpenAiTransport};
