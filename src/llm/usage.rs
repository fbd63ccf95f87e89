//! Per-call token usage accounting (SQLite).

use sqlx::SqlitePool;

/// What kind of model call generated the usage.
///
/// `Query`, `Summarize`, and the follow-up variants are recorded by this
/// crate. `LinkAnalysis` and `Profile` belong to the link-summarization
/// and profile-analysis pipelines that consume [`UsageTracker`] alongside
/// the archive stores; they share the taxonomy so the `api_calls` table
/// stays queryable by one `call_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    Query,
    Summarize,
    FollowUpCheck,
    FollowUpResponse,
    LinkAnalysis,
    Profile,
}

impl CallType {
    pub fn as_str(self) -> &'static str {
        match self {
            CallType::Query => "query",
            CallType::Summarize => "summarize",
            CallType::FollowUpCheck => "followup_check",
            CallType::FollowUpResponse => "followup_response",
            CallType::LinkAnalysis => "link_analysis",
            CallType::Profile => "profile",
        }
    }
}

impl std::fmt::Display for CallType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Approximate pricing per million tokens: (input, output) USD.
const PRICING: &[(&str, f64, f64)] = &[
    ("claude-sonnet-4-5-20250929", 3.0, 15.0),
    ("claude-haiku-4-5-20251001", 0.80, 4.0),
];

/// Records token usage rows. Writes are fire-and-forget: a failed insert
/// must never fail the user-facing answer that produced it.
#[derive(Debug, Clone)]
pub struct UsageTracker {
    pool: SqlitePool,
}

impl UsageTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record one call's usage. Fire-and-forget.
    pub fn track(&self, call_type: CallType, model: &str, input_tokens: i64, output_tokens: i64) {
        tracing::debug!(
            call_type = %call_type,
            input_tokens,
            output_tokens,
            cost_usd = Self::cost_estimate(model, input_tokens, output_tokens),
            "model call usage"
        );

        let pool = self.pool.clone();
        let model = model.to_string();

        tokio::spawn(async move {
            if let Err(error) = sqlx::query(
                "INSERT INTO api_calls (call_type, model, input_tokens, output_tokens) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(call_type.as_str())
            .bind(&model)
            .bind(input_tokens)
            .bind(output_tokens)
            .execute(&pool)
            .await
            {
                tracing::warn!(%error, call_type = %call_type, "failed to record API usage");
            }
        });
    }

    /// Estimate the cost of a call in USD. Unknown models are priced as
    /// the default query model.
    pub fn cost_estimate(model: &str, input_tokens: i64, output_tokens: i64) -> f64 {
        let (_, input_rate, output_rate) = PRICING
            .iter()
            .find(|(name, _, _)| *name == model)
            .unwrap_or(&PRICING[0]);

        (input_tokens as f64 / 1_000_000.0) * input_rate
            + (output_tokens as f64 / 1_000_000.0) * output_rate
    }
}
