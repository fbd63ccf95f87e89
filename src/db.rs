//! SQLite pool setup and schema migration.

use crate::error::{DbError, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr as _;

/// Open (or create) the SQLite database at the given path.
pub async fn open_pool(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .map_err(DbError::SqliteConnect)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(DbError::SqliteConnect)?;

    Ok(pool)
}

/// Open an in-memory database. Used by tests.
pub async fn open_memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(DbError::SqliteConnect)?
        .foreign_keys(true);

    // sqlx gives each `:memory:` pool one shared-cache database with a
    // unique name, so every connection in the pool sees the same data.
    //
    // Some tests run under tokio's paused clock. If `acquire()` ever has
    // to wait, the runtime parks with only the acquire-timeout timer
    // registered and the paused clock auto-advances straight to it,
    // producing spurious `PoolTimedOut` errors and huge time jumps. So:
    // no background pool timers, and every connection opened up front and
    // returned inline, leaving acquire to pop an idle connection without
    // awaiting.
    const POOL_SIZE: u32 = 5;

    let pool = SqlitePoolOptions::new()
        .max_connections(POOL_SIZE)
        .test_before_acquire(false)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(DbError::SqliteConnect)?;

    let mut warm = Vec::new();
    for _ in 0..POOL_SIZE {
        warm.push(pool.acquire().await.map_err(DbError::SqliteConnect)?);
    }
    for mut conn in warm {
        conn.return_to_pool().await;
    }

    Ok(pool)
}

/// Create the archive tables if they don't exist.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    tracing::info!("running database migrations");

    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS channels (
            id TEXT PRIMARY KEY,
            guild_id TEXT NOT NULL,
            name TEXT NOT NULL,
            topic TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_channels_guild_id ON channels(guild_id)",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            global_display_name TEXT,
            bot INTEGER DEFAULT 0,
            first_seen_at TEXT DEFAULT (datetime('now')),
            last_seen_at TEXT DEFAULT (datetime('now'))
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS user_nicknames (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            guild_id TEXT NOT NULL,
            nickname TEXT,
            display_name TEXT,
            changed_at TEXT DEFAULT (datetime('now'))
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_user_nicknames_user_guild ON user_nicknames(user_id, guild_id)",
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            guild_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            author_id TEXT NOT NULL,
            content TEXT NOT NULL,
            clean_content TEXT,
            edited_at TEXT,
            message_created_at TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now'))
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_messages_guild_created ON messages(guild_id, message_created_at)",
        "CREATE INDEX IF NOT EXISTS idx_messages_channel_created ON messages(channel_id, message_created_at)",
        "CREATE INDEX IF NOT EXISTS idx_messages_author_guild ON messages(author_id, guild_id)",
        r#"
        CREATE TABLE IF NOT EXISTS user_profiles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            guild_id TEXT NOT NULL,
            summary TEXT,
            personality_traits TEXT DEFAULT '[]',
            favorite_games TEXT DEFAULT '[]',
            favorite_topics TEXT DEFAULT '[]',
            communication_style TEXT,
            activity_level TEXT,
            notable_quotes TEXT DEFAULT '[]',
            confidence_score REAL DEFAULT 0,
            analyzed_at TEXT DEFAULT (datetime('now')),
            UNIQUE(user_id, guild_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS link_analyses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id TEXT NOT NULL,
            guild_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            author_id TEXT NOT NULL,
            url TEXT NOT NULL,
            domain TEXT,
            title TEXT,
            summary TEXT,
            status TEXT DEFAULT 'pending',
            error_reason TEXT,
            analyzed_at TEXT,
            created_at TEXT DEFAULT (datetime('now'))
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_link_analyses_guild_id ON link_analyses(guild_id)",
        "CREATE INDEX IF NOT EXISTS idx_link_analyses_url ON link_analyses(url)",
        r#"
        CREATE TABLE IF NOT EXISTS bot_queries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guild_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            asking_user_id TEXT NOT NULL,
            question TEXT NOT NULL,
            answer TEXT,
            context_tokens_used INTEGER,
            response_tokens_used INTEGER,
            model_used TEXT,
            response_time_ms INTEGER,
            created_at TEXT DEFAULT (datetime('now'))
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_bot_queries_guild_created ON bot_queries(guild_id, created_at)",
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now'))
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS api_calls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            call_type TEXT NOT NULL,
            model TEXT NOT NULL,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            created_at TEXT DEFAULT (datetime('now'))
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_api_calls_type_created ON api_calls(call_type, created_at)",
        // Full-text index over message content, kept in sync by triggers.
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
            content,
            clean_content,
            content='messages',
            content_rowid='rowid'
        )
        "#,
        r#"
        CREATE TRIGGER IF NOT EXISTS messages_ai AFTER INSERT ON messages BEGIN
            INSERT INTO messages_fts(rowid, content, clean_content)
            VALUES (NEW.rowid, NEW.content, NEW.clean_content);
        END
        "#,
        r#"
        CREATE TRIGGER IF NOT EXISTS messages_ad AFTER DELETE ON messages BEGIN
            INSERT INTO messages_fts(messages_fts, rowid, content, clean_content)
            VALUES ('delete', OLD.rowid, OLD.content, OLD.clean_content);
        END
        "#,
        r#"
        CREATE TRIGGER IF NOT EXISTS messages_au AFTER UPDATE ON messages BEGIN
            INSERT INTO messages_fts(messages_fts, rowid, content, clean_content)
            VALUES ('delete', OLD.rowid, OLD.content, OLD.clean_content);
            INSERT INTO messages_fts(rowid, content, clean_content)
            VALUES (NEW.rowid, NEW.content, NEW.clean_content);
        END
        "#,
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;
    }

    tracing::info!("database migrations complete");
    Ok(())
}
