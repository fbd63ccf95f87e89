//! Shared-link analysis storage (SQLite).
//!
//! The link pipeline fetches and summarizes URLs posted to the archive;
//! this store persists the results and serves the lexical lookups the
//! context pipeline makes.

use crate::error::Result;
use anyhow::Context as _;
use sqlx::{Row as _, SqlitePool};

/// A stored link analysis row.
#[derive(Debug, Clone)]
pub struct LinkAnalysis {
    pub id: i64,
    pub message_id: String,
    pub guild_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub url: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub status: String,
    pub created_at: String,
}

/// Link-analysis repository.
#[derive(Debug, Clone)]
pub struct LinkStore {
    pool: SqlitePool,
}

impl LinkStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a newly seen link, pending analysis. Returns the row id.
    pub async fn insert(
        &self,
        message_id: &str,
        guild_id: &str,
        channel_id: &str,
        author_id: &str,
        url: &str,
        domain: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO link_analyses (message_id, guild_id, channel_id, author_id, url, domain) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(guild_id)
        .bind(channel_id)
        .bind(author_id)
        .bind(url)
        .bind(domain)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert link analysis for {url}"))?;

        Ok(result.last_insert_rowid())
    }

    /// Mark a link as analyzed with its title and summary.
    pub async fn mark_analyzed(&self, id: i64, title: Option<&str>, summary: &str) -> Result<()> {
        sqlx::query(
            "UPDATE link_analyses SET title = ?, summary = ?, status = 'analyzed', \
             analyzed_at = datetime('now') WHERE id = ?",
        )
        .bind(title)
        .bind(summary)
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to mark link {id} analyzed"))?;

        Ok(())
    }

    /// Mark a link as failed with the reason.
    pub async fn mark_error(&self, id: i64, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE link_analyses SET status = 'error', error_reason = ?, \
             analyzed_at = datetime('now') WHERE id = ?",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to mark link {id} errored"))?;

        Ok(())
    }

    /// Look up an already-analyzed link by URL.
    pub async fn find_analyzed_by_url(&self, url: &str) -> Result<Option<LinkAnalysis>> {
        let row = sqlx::query(
            "SELECT id, message_id, guild_id, channel_id, author_id, url, title, summary, status, created_at \
             FROM link_analyses WHERE url = ? AND status = 'analyzed' LIMIT 1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to look up link {url}"))?;

        Ok(row.map(link_analysis))
    }

    /// Lexical search over analyzed links in one guild. The question is
    /// stripped of punctuation and split into terms longer than two
    /// characters; a link matches when any term appears in its title,
    /// summary, or URL.
    pub async fn search_by_guild(&self, guild_id: &str, query: &str, limit: i64) -> Result<Vec<LinkAnalysis>> {
        let sanitized: String = query
            .chars()
            .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
            .collect();
        let terms: Vec<String> = sanitized
            .split_whitespace()
            .filter(|t| t.len() > 2)
            .map(|t| format!("%{t}%"))
            .collect();

        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let conditions = terms
            .iter()
            .map(|_| "(title LIKE ? OR summary LIKE ? OR url LIKE ?)")
            .collect::<Vec<_>>()
            .join(" OR ");

        let sql = format!(
            "SELECT id, message_id, guild_id, channel_id, author_id, url, title, summary, status, created_at \
             FROM link_analyses \
             WHERE guild_id = ? AND status = 'analyzed' AND ({conditions}) \
             ORDER BY created_at DESC LIMIT ?",
        );

        let mut builder = sqlx::query(&sql).bind(guild_id);
        for term in &terms {
            builder = builder.bind(term).bind(term).bind(term);
        }
        let rows = builder
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .with_context(|| "link search failed")?;

        Ok(rows.into_iter().map(link_analysis).collect())
    }
}

fn link_analysis(row: sqlx::sqlite::SqliteRow) -> LinkAnalysis {
    LinkAnalysis {
        id: row.get("id"),
        message_id: row.get("message_id"),
        guild_id: row.get("guild_id"),
        channel_id: row.get("channel_id"),
        author_id: row.get("author_id"),
        url: row.get("url"),
        title: row.get("title"),
        summary: row.get("summary"),
        status: row.get("status"),
        created_at: row.get("created_at"),
    }
}
