//! Answered-question audit log (SQLite).

use crate::error::Result;
use anyhow::Context as _;
use sqlx::SqlitePool;

/// One answered question, for the admin dashboard's history view.
#[derive(Debug, Clone)]
pub struct NewQueryLog {
    pub guild_id: String,
    pub channel_id: String,
    pub asking_user_id: String,
    pub question: String,
    pub answer: String,
    pub context_tokens_used: Option<i64>,
    pub response_tokens_used: Option<i64>,
    pub model_used: String,
    pub response_time_ms: i64,
}

/// Query-log repository.
#[derive(Debug, Clone)]
pub struct QueryLogStore {
    pool: SqlitePool,
}

impl QueryLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record an answered question.
    pub async fn insert(&self, entry: &NewQueryLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO bot_queries \
                (guild_id, channel_id, asking_user_id, question, answer, \
                 context_tokens_used, response_tokens_used, model_used, response_time_ms) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.guild_id)
        .bind(&entry.channel_id)
        .bind(&entry.asking_user_id)
        .bind(&entry.question)
        .bind(&entry.answer)
        .bind(entry.context_tokens_used)
        .bind(entry.response_tokens_used)
        .bind(&entry.model_used)
        .bind(entry.response_time_ms)
        .execute(&self.pool)
        .await
        .with_context(|| "failed to record query log entry")?;

        Ok(())
    }
}
