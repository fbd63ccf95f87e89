//! Computed user personality profiles (SQLite).
//!
//! Profiles are produced by a background analysis pipeline; this store
//! handles persistence and lookup. JSON-array columns are parsed leniently:
//! a corrupt column degrades to an empty list rather than failing a query.

use crate::error::Result;
use anyhow::Context as _;
use sqlx::{Row as _, SqlitePool};

/// A stored personality profile for one user in one guild.
#[derive(Debug, Clone)]
pub struct ProfileRecord {
    pub user_id: String,
    pub guild_id: String,
    pub summary: Option<String>,
    pub personality_traits: Vec<String>,
    pub favorite_games: Vec<String>,
    pub favorite_topics: Vec<String>,
    pub communication_style: Option<String>,
    pub notable_quotes: Vec<String>,
}

/// Profile repository.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    pool: SqlitePool,
}

impl ProfileStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a profile for (user, guild).
    pub async fn upsert(&self, profile: &ProfileRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_profiles \
                (user_id, guild_id, summary, personality_traits, favorite_games, favorite_topics, \
                 communication_style, notable_quotes, analyzed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now')) \
             ON CONFLICT(user_id, guild_id) DO UPDATE SET \
                summary = excluded.summary, \
                personality_traits = excluded.personality_traits, \
                favorite_games = excluded.favorite_games, \
                favorite_topics = excluded.favorite_topics, \
                communication_style = excluded.communication_style, \
                notable_quotes = excluded.notable_quotes, \
                analyzed_at = datetime('now')",
        )
        .bind(&profile.user_id)
        .bind(&profile.guild_id)
        .bind(&profile.summary)
        .bind(serde_json::to_string(&profile.personality_traits).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&profile.favorite_games).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&profile.favorite_topics).unwrap_or_else(|_| "[]".into()))
        .bind(&profile.communication_style)
        .bind(serde_json::to_string(&profile.notable_quotes).unwrap_or_else(|_| "[]".into()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert profile for user {}", profile.user_id))?;

        Ok(())
    }

    /// Look up the profile for (user, guild).
    pub async fn find_by_user_and_guild(&self, user_id: &str, guild_id: &str) -> Result<Option<ProfileRecord>> {
        let row = sqlx::query(
            "SELECT user_id, guild_id, summary, personality_traits, favorite_games, \
                    favorite_topics, communication_style, notable_quotes \
             FROM user_profiles WHERE user_id = ? AND guild_id = ?",
        )
        .bind(user_id)
        .bind(guild_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to look up profile for user {user_id}"))?;

        Ok(row.map(|row| ProfileRecord {
            user_id: row.get("user_id"),
            guild_id: row.get("guild_id"),
            summary: row.get("summary"),
            personality_traits: parse_string_list(row.get("personality_traits")),
            favorite_games: parse_string_list(row.get("favorite_games")),
            favorite_topics: parse_string_list(row.get("favorite_topics")),
            communication_style: row.get("communication_style"),
            notable_quotes: parse_string_list(row.get("notable_quotes")),
        }))
    }
}

fn parse_string_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default()
}
