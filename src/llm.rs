//! Completion provider interface and shared request/response types.

pub mod anthropic;
pub mod retry;
pub mod usage;

pub use anthropic::AnthropicClient;
pub use retry::complete_with_retry;
pub use usage::{CallType, UsageTracker};

use crate::error::LlmError;

/// A single non-streaming completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Provider model identifier.
    pub model: String,
    /// Maximum output tokens.
    pub max_tokens: u32,
    /// Optional system instructions.
    pub system: Option<String>,
    /// The single user message.
    pub message: String,
}

/// A completed response with token accounting.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Text of the first text content block.
    pub text: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// A completion service the engine can call. Implemented by
/// [`AnthropicClient`] in production and by scripted mocks in tests.
pub trait CompletionBackend: Send + Sync {
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<CompletionResponse, LlmError>> + Send;
}
