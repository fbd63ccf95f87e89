//! Top-level error types for Nubbybot.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),
}

/// Database connection and migration errors.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("failed to connect to SQLite: {0}")]
    SqliteConnect(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(String),
}

/// Completion provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("provider request failed: {0}")]
    Request(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LlmError {
    /// Whether this error is a rate limit (429-class) failure, as opposed
    /// to an auth, request-shape, or server problem. Only rate limits are
    /// worth retrying with backoff.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            LlmError::RateLimited(_) => true,
            LlmError::Api { status, .. } => *status == 429,
            LlmError::Request(message) | LlmError::MalformedResponse(message) => {
                let lower = message.to_lowercase();
                lower.contains("429") || lower.contains("rate_limit") || lower.contains("rate limit")
            }
            LlmError::Other(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LlmError;

    #[test]
    fn rate_limit_detection() {
        assert!(LlmError::RateLimited("overloaded".into()).is_rate_limit());
        assert!(LlmError::Api { status: 429, message: "slow down".into() }.is_rate_limit());
        assert!(!LlmError::Api { status: 401, message: "bad key".into() }.is_rate_limit());
        assert!(LlmError::Request("HTTP 429 from upstream".into()).is_rate_limit());
        assert!(LlmError::Request("error code rate_limit_error".into()).is_rate_limit());
        assert!(!LlmError::Request("connection reset".into()).is_rate_limit());
    }
}
