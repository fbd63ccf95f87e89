//! Rate-limit retry wrapper for completion calls.

use crate::error::LlmError;
use crate::llm::{CompletionBackend, CompletionRequest, CompletionResponse};
use std::time::Duration;

/// Default retry count shared by every call site.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Base backoff for user-facing calls. Background batch work passes a
/// longer base since nobody is waiting on it.
pub const INTERACTIVE_BASE_DELAY: Duration = Duration::from_secs(10);

/// Run a completion with automatic retry on rate-limit failures.
///
/// Sleeps `base_delay * 2^attempt` between attempts, for up to
/// `max_retries + 1` total attempts. Non-rate-limit errors propagate
/// immediately; masking an auth or request-shape problem behind retries
/// would only delay the real failure.
pub async fn complete_with_retry<C: CompletionBackend>(
    backend: &C,
    request: &CompletionRequest,
    label: &str,
    max_retries: u32,
    base_delay: Duration,
) -> Result<CompletionResponse, LlmError> {
    let mut attempt = 0;
    loop {
        match backend.complete(request).await {
            Ok(response) => return Ok(response),
            Err(error) => {
                if !error.is_rate_limit() || attempt >= max_retries {
                    return Err(error);
                }
                let wait = base_delay * 2u32.pow(attempt);
                tracing::warn!(
                    label,
                    attempt = attempt + 1,
                    total = max_retries + 1,
                    wait_ms = wait.as_millis() as u64,
                    "rate limited, retrying after backoff"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}
