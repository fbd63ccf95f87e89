//! Channel storage (SQLite).

use crate::error::Result;
use anyhow::Context as _;
use sqlx::{Row as _, SqlitePool};

/// A stored channel record.
#[derive(Debug, Clone)]
pub struct ChannelRecord {
    pub id: String,
    pub guild_id: String,
    pub name: String,
}

/// Channel repository.
#[derive(Debug, Clone)]
pub struct ChannelStore {
    pool: SqlitePool,
}

impl ChannelStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or rename a channel.
    pub async fn upsert(&self, id: &str, guild_id: &str, name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO channels (id, guild_id, name) VALUES (?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, updated_at = datetime('now')",
        )
        .bind(id)
        .bind(guild_id)
        .bind(name)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert channel {id}"))?;

        Ok(())
    }

    /// Look up a channel by id.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<ChannelRecord>> {
        let row = sqlx::query("SELECT id, guild_id, name FROM channels WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to look up channel {id}"))?;

        Ok(row.map(|row| ChannelRecord {
            id: row.get("id"),
            guild_id: row.get("guild_id"),
            name: row.get("name"),
        }))
    }
}
