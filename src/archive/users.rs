//! User and nickname storage (SQLite).

use crate::error::Result;
use anyhow::Context as _;
use sqlx::{Row as _, SqlitePool};
use std::collections::HashMap;

/// A user as seen by the platform gateway.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: String,
    pub username: String,
    pub global_display_name: Option<String>,
    pub bot: bool,
}

/// A stored user record.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub global_display_name: Option<String>,
    pub bot: bool,
}

impl UserRecord {
    /// Preferred display name: global display name, falling back to username.
    pub fn display_name(&self) -> &str {
        self.global_display_name.as_deref().unwrap_or(&self.username)
    }
}

/// A non-bot user with every name they are known by in one guild.
#[derive(Debug, Clone)]
pub struct UserWithNicknames {
    pub id: String,
    pub username: String,
    pub global_display_name: Option<String>,
    pub nicknames: Vec<String>,
}

/// User repository.
#[derive(Debug, Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update a user record.
    pub async fn upsert(&self, user: &NewUser) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, username, global_display_name, bot) VALUES (?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                username = excluded.username, \
                global_display_name = excluded.global_display_name, \
                last_seen_at = datetime('now')",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.global_display_name)
        .bind(user.bot)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert user {}", user.id))?;

        Ok(())
    }

    /// Record a guild nickname or server display name for a user.
    pub async fn add_nickname(
        &self,
        user_id: &str,
        guild_id: &str,
        nickname: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_nicknames (user_id, guild_id, nickname, display_name) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(guild_id)
        .bind(nickname)
        .bind(display_name)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to record nickname for user {user_id}"))?;

        Ok(())
    }

    /// Look up a user by id.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query(
            "SELECT id, username, global_display_name, bot FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to look up user {id}"))?;

        Ok(row.map(|row| UserRecord {
            id: row.get("id"),
            username: row.get("username"),
            global_display_name: row.get("global_display_name"),
            bot: row.get("bot"),
        }))
    }

    /// All non-bot users with their nicknames in one guild. Two queries
    /// joined in memory rather than a row-per-nickname join.
    pub async fn all_with_nicknames(&self, guild_id: &str) -> Result<Vec<UserWithNicknames>> {
        let users = sqlx::query(
            "SELECT id, username, global_display_name FROM users WHERE bot = 0",
        )
        .fetch_all(&self.pool)
        .await
        .with_context(|| "failed to list users")?;

        let nickname_rows = sqlx::query(
            "SELECT user_id, nickname, display_name FROM user_nicknames WHERE guild_id = ?",
        )
        .bind(guild_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to list nicknames for guild {guild_id}"))?;

        let mut nickname_map: HashMap<String, Vec<String>> = HashMap::new();
        for row in nickname_rows {
            let user_id: String = row.get("user_id");
            let entry = nickname_map.entry(user_id).or_default();
            if let Some(nickname) = row.get::<Option<String>, _>("nickname") {
                entry.push(nickname);
            }
            if let Some(display_name) = row.get::<Option<String>, _>("display_name") {
                entry.push(display_name);
            }
        }

        Ok(users
            .into_iter()
            .map(|row| {
                let id: String = row.get("id");
                let nicknames = nickname_map.remove(&id).unwrap_or_default();
                UserWithNicknames {
                    id,
                    username: row.get("username"),
                    global_display_name: row.get("global_display_name"),
                    nicknames,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_memory_pool, run_migrations};

    async fn store() -> UserStore {
        let pool = open_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        UserStore::new(pool)
    }

    #[tokio::test]
    async fn nicknames_are_collected_per_guild() {
        let store = store().await;

        store
            .upsert(&NewUser {
                id: "u1".into(),
                username: "alice".into(),
                global_display_name: Some("Alice".into()),
                bot: false,
            })
            .await
            .unwrap();
        store
            .upsert(&NewUser {
                id: "b1".into(),
                username: "archiver".into(),
                global_display_name: None,
                bot: true,
            })
            .await
            .unwrap();

        store.add_nickname("u1", "g1", Some("al"), Some("Big Al")).await.unwrap();
        store.add_nickname("u1", "g2", Some("other-guild-nick"), None).await.unwrap();

        let listed = store.all_with_nicknames("g1").await.unwrap();
        // Bot accounts are excluded from name resolution.
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].username, "alice");
        assert_eq!(listed[0].nicknames, vec!["al".to_string(), "Big Al".to_string()]);
    }

    #[tokio::test]
    async fn display_name_falls_back_to_username() {
        let store = store().await;
        store
            .upsert(&NewUser {
                id: "u1".into(),
                username: "bob".into(),
                global_display_name: None,
                bot: false,
            })
            .await
            .unwrap();

        let user = store.find_by_id("u1").await.unwrap().unwrap();
        assert_eq!(user.display_name(), "bob");
        assert!(store.find_by_id("missing").await.unwrap().is_none());
    }
}
