//! Archived message storage and full-text search (SQLite).

use crate::error::Result;
use anyhow::Context as _;
use sqlx::{Row as _, SqlitePool};

/// A message as archived from the platform gateway.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: String,
    pub guild_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub content: String,
    pub clean_content: Option<String>,
    /// RFC 3339 timestamp of the original platform message.
    pub message_created_at: String,
}

/// A full-text search hit, in backend rank order.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub channel_id: String,
    pub author_id: String,
    pub content: String,
    pub message_created_at: String,
}

/// A recent channel message joined with its author's names.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub author_id: String,
    pub username: String,
    pub global_display_name: Option<String>,
    pub content: String,
    pub message_created_at: String,
}

/// A message from one user's history.
#[derive(Debug, Clone)]
pub struct UserMessage {
    pub channel_id: String,
    pub content: String,
    pub message_created_at: String,
}

/// A message within a summarize timeframe, joined with author and channel names.
#[derive(Debug, Clone)]
pub struct TimeframeMessage {
    pub username: String,
    pub global_display_name: Option<String>,
    pub channel_name: Option<String>,
    pub content: String,
    pub message_created_at: String,
}

/// Archive-wide aggregate counts for one guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildStats {
    pub total_messages: i64,
    pub earliest_date: Option<String>,
    pub latest_date: Option<String>,
    pub unique_authors: i64,
}

/// Message repository.
#[derive(Debug, Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update an archived message. Edits replace content; the
    /// FTS index follows via triggers.
    pub async fn upsert(&self, message: &NewMessage) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages (id, guild_id, channel_id, author_id, content, clean_content, message_created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                content = excluded.content, \
                clean_content = excluded.clean_content, \
                edited_at = datetime('now')",
        )
        .bind(&message.id)
        .bind(&message.guild_id)
        .bind(&message.channel_id)
        .bind(&message.author_id)
        .bind(&message.content)
        .bind(&message.clean_content)
        .bind(&message.message_created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert message {}", message.id))?;

        Ok(())
    }

    /// Full-text search over one guild's archive, ordered by FTS rank.
    /// `author_id` restricts results to a single author.
    pub async fn search(
        &self,
        guild_id: &str,
        query: &str,
        limit: i64,
        author_id: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let rows = if let Some(author_id) = author_id {
            sqlx::query(
                "SELECT m.channel_id, m.author_id, m.content, m.message_created_at \
                 FROM messages_fts fts \
                 JOIN messages m ON m.rowid = fts.rowid \
                 WHERE messages_fts MATCH ? AND m.guild_id = ? AND m.author_id = ? \
                 ORDER BY rank \
                 LIMIT ?",
            )
            .bind(query)
            .bind(guild_id)
            .bind(author_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                "SELECT m.channel_id, m.author_id, m.content, m.message_created_at \
                 FROM messages_fts fts \
                 JOIN messages m ON m.rowid = fts.rowid \
                 WHERE messages_fts MATCH ? AND m.guild_id = ? \
                 ORDER BY rank \
                 LIMIT ?",
            )
            .bind(query)
            .bind(guild_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .with_context(|| "message search failed")?;

        Ok(rows
            .into_iter()
            .map(|row| SearchHit {
                channel_id: row.get("channel_id"),
                author_id: row.get("author_id"),
                content: row.get("content"),
                message_created_at: row.get("message_created_at"),
            })
            .collect())
    }

    /// Most recent messages in a channel, newest first.
    pub async fn recent_by_channel(&self, channel_id: &str, limit: i64) -> Result<Vec<ChannelMessage>> {
        let rows = sqlx::query(
            "SELECT m.author_id, m.content, m.message_created_at, u.username, u.global_display_name \
             FROM messages m \
             JOIN users u ON u.id = m.author_id \
             WHERE m.channel_id = ? AND m.content != '' \
             ORDER BY m.message_created_at DESC \
             LIMIT ?",
        )
        .bind(channel_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to fetch recent messages for channel {channel_id}"))?;

        Ok(rows
            .into_iter()
            .map(|row| ChannelMessage {
                author_id: row.get("author_id"),
                username: row.get("username"),
                global_display_name: row.get("global_display_name"),
                content: row.get("content"),
                message_created_at: row.get("message_created_at"),
            })
            .collect())
    }

    /// Most recent non-empty messages from one user in a guild, newest first.
    pub async fn recent_by_user(&self, user_id: &str, guild_id: &str, limit: i64) -> Result<Vec<UserMessage>> {
        let rows = sqlx::query(
            "SELECT channel_id, content, message_created_at \
             FROM messages \
             WHERE author_id = ? AND guild_id = ? AND content != '' \
             ORDER BY message_created_at DESC \
             LIMIT ?",
        )
        .bind(user_id)
        .bind(guild_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to fetch messages for user {user_id}"))?;

        Ok(rows
            .into_iter()
            .map(|row| UserMessage {
                channel_id: row.get("channel_id"),
                content: row.get("content"),
                message_created_at: row.get("message_created_at"),
            })
            .collect())
    }

    /// Messages in one channel since an RFC 3339 timestamp, oldest first.
    pub async fn by_channel_since(&self, channel_id: &str, since: &str, limit: i64) -> Result<Vec<TimeframeMessage>> {
        let rows = sqlx::query(
            "SELECT m.content, m.message_created_at, u.username, u.global_display_name, c.name AS channel_name \
             FROM messages m \
             JOIN users u ON u.id = m.author_id \
             LEFT JOIN channels c ON c.id = m.channel_id \
             WHERE m.channel_id = ? AND m.message_created_at >= ? AND m.content != '' \
             ORDER BY m.message_created_at ASC \
             LIMIT ?",
        )
        .bind(channel_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to fetch channel {channel_id} since {since}"))?;

        Ok(rows.into_iter().map(timeframe_message).collect())
    }

    /// Messages across a guild since an RFC 3339 timestamp, oldest first.
    pub async fn by_guild_since(&self, guild_id: &str, since: &str, limit: i64) -> Result<Vec<TimeframeMessage>> {
        let rows = sqlx::query(
            "SELECT m.content, m.message_created_at, u.username, u.global_display_name, c.name AS channel_name \
             FROM messages m \
             JOIN users u ON u.id = m.author_id \
             LEFT JOIN channels c ON c.id = m.channel_id \
             WHERE m.guild_id = ? AND m.message_created_at >= ? AND m.content != '' \
             ORDER BY m.message_created_at ASC \
             LIMIT ?",
        )
        .bind(guild_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to fetch guild {guild_id} since {since}"))?;

        Ok(rows.into_iter().map(timeframe_message).collect())
    }

    /// Archive-wide counts and date range for one guild.
    pub async fn guild_stats(&self, guild_id: &str) -> Result<GuildStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total_messages, \
                    MIN(message_created_at) AS earliest_date, \
                    MAX(message_created_at) AS latest_date, \
                    COUNT(DISTINCT author_id) AS unique_authors \
             FROM messages WHERE guild_id = ?",
        )
        .bind(guild_id)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to compute stats for guild {guild_id}"))?;

        Ok(GuildStats {
            total_messages: row.get("total_messages"),
            earliest_date: row.get("earliest_date"),
            latest_date: row.get("latest_date"),
            unique_authors: row.get("unique_authors"),
        })
    }
}

fn timeframe_message(row: sqlx::sqlite::SqliteRow) -> TimeframeMessage {
    TimeframeMessage {
        username: row.get("username"),
        global_display_name: row.get("global_display_name"),
        channel_name: row.get("channel_name"),
        content: row.get("content"),
        message_created_at: row.get("message_created_at"),
    }
}
