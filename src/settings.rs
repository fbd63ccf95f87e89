//! Key-value settings storage (SQLite).
//!
//! Operator-tunable knobs live here so they can change without a restart:
//! follow-up window behavior and system prompt overrides.

use crate::error::Result;
use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use sqlx::{Row as _, SqlitePool};

/// Settings key for the follow-up enabled flag.
pub const FOLLOWUP_ENABLED: &str = "followup:enabled";
/// Settings key for the follow-up window TTL in seconds.
pub const FOLLOWUP_WINDOW_SECONDS: &str = "followup:window_seconds";
/// Settings key for the per-window follow-up cap.
pub const FOLLOWUP_MAX_FOLLOWUPS: &str = "followup:max_followups";
/// Settings key holding the JSON list of operator training instructions.
pub const CUSTOM_INSTRUCTIONS: &str = "custom_instructions";

/// Where an operator instruction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstructionSource {
    Dm,
    Admin,
}

/// One operator-authored instruction appended to the query system prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomInstruction {
    pub text: String,
    pub added_at: String,
    pub source: InstructionSource,
}

/// String key-value settings store.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    pool: SqlitePool,
}

impl SettingsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a setting value, or `None` if unset.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read setting {key}"))?;

        Ok(row.map(|r| r.get("value")))
    }

    /// Set a setting value, replacing any previous value.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, datetime('now')) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write setting {key}"))?;

        Ok(())
    }

    /// Delete a setting. Returns whether a row was removed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete setting {key}"))?;

        Ok(result.rows_affected() > 0)
    }

    /// List all settings, ordered by key.
    pub async fn get_all(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT key, value FROM settings ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .with_context(|| "failed to list settings")?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("key"), r.get("value")))
            .collect())
    }

    /// Load the follow-up configuration, falling back to defaults for
    /// unset or malformed values. Read per call so operators can change
    /// these without a restart.
    pub async fn follow_up_settings(&self) -> FollowUpSettings {
        let defaults = FollowUpSettings::default();

        let enabled = match self.get(FOLLOWUP_ENABLED).await {
            Ok(Some(value)) => value == "true",
            Ok(None) => defaults.enabled,
            Err(error) => {
                tracing::warn!(%error, "failed to read follow-up settings, using defaults");
                return defaults;
            }
        };

        let window_seconds = self
            .get_parsed(FOLLOWUP_WINDOW_SECONDS, defaults.window_seconds)
            .await;
        let max_followups = self
            .get_parsed(FOLLOWUP_MAX_FOLLOWUPS, defaults.max_followups)
            .await;

        FollowUpSettings { enabled, window_seconds, max_followups }
    }

    async fn get_parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        match self.get(key).await {
            Ok(Some(value)) => value.parse().unwrap_or(default),
            _ => default,
        }
    }

    /// The operator's training instructions, oldest first. Unset or
    /// corrupt storage reads as no instructions.
    pub async fn custom_instructions(&self) -> Vec<CustomInstruction> {
        match self.get(CUSTOM_INSTRUCTIONS).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(error) => {
                tracing::warn!(%error, "failed to read custom instructions");
                Vec::new()
            }
        }
    }

    /// Append a training instruction. Returns the updated list.
    pub async fn add_custom_instruction(
        &self,
        text: &str,
        source: InstructionSource,
    ) -> Result<Vec<CustomInstruction>> {
        let mut instructions = self.custom_instructions().await;
        instructions.push(CustomInstruction {
            text: text.trim().to_string(),
            added_at: chrono::Utc::now().to_rfc3339(),
            source,
        });
        self.save_custom_instructions(&instructions).await?;
        tracing::info!(total = instructions.len(), "training instruction added");
        Ok(instructions)
    }

    /// Remove the instruction at `index` (zero-based). Returns the updated
    /// list, or `None` if the index is out of range.
    pub async fn remove_custom_instruction(&self, index: usize) -> Result<Option<Vec<CustomInstruction>>> {
        let mut instructions = self.custom_instructions().await;
        if index >= instructions.len() {
            return Ok(None);
        }
        instructions.remove(index);
        self.save_custom_instructions(&instructions).await?;
        Ok(Some(instructions))
    }

    /// Drop every training instruction.
    pub async fn clear_custom_instructions(&self) -> Result<()> {
        self.delete(CUSTOM_INSTRUCTIONS).await?;
        Ok(())
    }

    async fn save_custom_instructions(&self, instructions: &[CustomInstruction]) -> Result<()> {
        let raw = serde_json::to_string(instructions)
            .with_context(|| "failed to serialize custom instructions")?;
        self.set(CUSTOM_INSTRUCTIONS, &raw).await
    }
}

/// Follow-up window configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowUpSettings {
    pub enabled: bool,
    pub window_seconds: u64,
    pub max_followups: u32,
}

impl Default for FollowUpSettings {
    fn default() -> Self {
        Self { enabled: true, window_seconds: 120, max_followups: 3 }
    }
}
