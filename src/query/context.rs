//! Context assembly for archive questions.
//!
//! Gathers everything the model gets to see for one question: the recent
//! channel transcript, profiles for users the question plausibly
//! references, lexically relevant archived messages, analyzed links, and
//! archive-wide stats. Every retrieval phase degrades independently — a
//! failed sub-step is logged and skipped, never fatal; only failing to get
//! an answer out of the model is surfaced to the caller.

use crate::archive::messages::{GuildStats, SearchHit};
use crate::archive::users::UserWithNicknames;
use crate::archive::{ChannelStore, LinkStore, MessageStore, ProfileStore, UserStore};
use crate::error::Result;
use crate::query::mode::QueryMode;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// How many recent channel messages ground the conversation.
const RECENT_CONVERSATION_LIMIT: i64 = 50;
/// How many of a mentioned user's recent messages are attached.
const MENTIONED_USER_HISTORY_LIMIT: i64 = 50;
/// Cap on evenly spaced samples in recall mode.
const MAX_RECALL_SAMPLES: usize = 30;
/// Cap on attached link summaries.
const LINK_RESULT_LIMIT: i64 = 10;
/// Fixed per-entry overhead in the character budget (names, dates, markup).
const ENTRY_OVERHEAD_CHARS: usize = 50;

/// One line of the recent channel transcript.
#[derive(Debug, Clone)]
pub struct TranscriptLine {
    pub author: String,
    pub content: String,
    pub time: String,
}

/// One archived message attached as evidence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedLine {
    pub author: String,
    pub content: String,
    pub date: String,
    pub channel: String,
}

/// A user profile card attached to the context.
#[derive(Debug, Clone)]
pub struct ProfileCard {
    pub username: String,
    pub summary: String,
    pub traits: Vec<String>,
    pub games: Vec<String>,
    pub topics: Vec<String>,
    pub communication_style: Option<String>,
    pub quotes: Vec<String>,
}

/// An analyzed link attached to the context.
#[derive(Debug, Clone)]
pub struct LinkCard {
    pub url: String,
    pub summary: String,
    pub author: String,
    pub date: String,
}

/// One month's hit count in a recall breakdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthCount {
    pub month: String,
    pub count: usize,
}

/// Pre-aggregated search results for recall mode. Replaces raw inclusion
/// of matches into `relevant_messages`.
#[derive(Debug, Clone)]
pub struct RecallData {
    /// Full result count, not the sample count.
    pub total_count: usize,
    /// Hit counts per calendar month, ascending by `YYYY-MM` key.
    pub monthly_breakdown: Vec<MonthCount>,
    /// Up to 30 samples spaced evenly across the full result list.
    pub samples: Vec<ArchivedLine>,
    /// Resolved display name of the author filter, if one applied.
    pub target_user: Option<String>,
}

/// Everything assembled for one question. Built fresh per request.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub recent_conversation: Vec<TranscriptLine>,
    pub relevant_messages: Vec<ArchivedLine>,
    pub user_profiles: Vec<ProfileCard>,
    pub referenced_links: Vec<LinkCard>,
    pub archive_stats: Option<GuildStats>,
    pub recall_data: Option<RecallData>,
}

/// Cached name set for one guild, used to match free-text mentions of
/// people against stored identities without a lookup per user per request.
struct GuildUserCache {
    guild_id: String,
    users: Arc<Vec<CachedUser>>,
}

/// One user's names, pre-lowercased for substring matching.
pub(crate) struct CachedUser {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    username_lower: String,
    display_lower: Option<String>,
    nicknames_lower: Vec<String>,
}

impl CachedUser {
    fn new(user: UserWithNicknames) -> Self {
        Self {
            username_lower: user.username.to_lowercase(),
            display_lower: user.global_display_name.as_ref().map(|n| n.to_lowercase()),
            nicknames_lower: user.nicknames.iter().map(|n| n.to_lowercase()).collect(),
            id: user.id,
            username: user.username,
            display_name: user.global_display_name,
        }
    }

    /// Whether any of this user's names appears in the lowercased question.
    fn matches(&self, question_lower: &str) -> bool {
        question_lower.contains(&self.username_lower)
            || self
                .display_lower
                .as_deref()
                .is_some_and(|name| question_lower.contains(name))
            || self.nicknames_lower.iter().any(|n| question_lower.contains(n))
    }

    fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// Assembles [`QueryContext`] values from the archive stores.
pub struct ContextBuilder {
    messages: MessageStore,
    users: UserStore,
    channels: ChannelStore,
    profiles: ProfileStore,
    links: LinkStore,
    user_cache: Mutex<Option<GuildUserCache>>,
}

impl ContextBuilder {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            messages: MessageStore::new(pool.clone()),
            users: UserStore::new(pool.clone()),
            channels: ChannelStore::new(pool.clone()),
            profiles: ProfileStore::new(pool.clone()),
            links: LinkStore::new(pool),
            user_cache: Mutex::new(None),
        }
    }

    /// Build the context for one question. Never fails: each phase that
    /// errors leaves its section empty.
    pub async fn build_context(
        &self,
        guild_id: &str,
        question: &str,
        mentioned_user_ids: &[String],
        channel_id: Option<&str>,
        mode: QueryMode,
    ) -> QueryContext {
        let mut context = QueryContext::default();

        // Request-scoped name caches shared across phases.
        let mut author_names: HashMap<String, String> = HashMap::new();
        let mut channel_names: HashMap<String, String> = HashMap::new();

        // Archive metadata so the model knows what it has.
        match self.messages.guild_stats(guild_id).await {
            Ok(stats) if stats.total_messages > 0 => context.archive_stats = Some(stats),
            Ok(_) => {}
            Err(error) => tracing::warn!(%error, "failed to fetch archive stats"),
        }

        // Recent channel transcript for topical grounding, oldest first.
        if let Some(channel_id) = channel_id {
            match self.messages.recent_by_channel(channel_id, RECENT_CONVERSATION_LIMIT).await {
                Ok(mut recent) => {
                    recent.reverse();
                    for msg in recent {
                        context.recent_conversation.push(TranscriptLine {
                            author: msg.global_display_name.unwrap_or(msg.username),
                            content: msg.content,
                            time: display_time(&msg.message_created_at),
                        });
                    }
                }
                Err(error) => tracing::warn!(%error, "failed to fetch recent channel messages"),
            }
        }

        // Explicitly mentioned users: profile plus recent history.
        for user_id in mentioned_user_ids {
            if let Err(error) = self
                .attach_mentioned_user(guild_id, user_id, &mut context, &mut channel_names)
                .await
            {
                tracing::warn!(%error, user_id, "failed to attach mentioned user");
            }
        }

        // Lexical search over the archive.
        if let Err(error) = self
            .attach_search_results(
                guild_id,
                question,
                mentioned_user_ids,
                mode,
                &mut context,
                &mut author_names,
                &mut channel_names,
            )
            .await
        {
            tracing::warn!(%error, "message search failed, continuing with user context only");
        }

        // No explicit mentions: match names in the question text against
        // every known user and attach their profiles.
        if mentioned_user_ids.is_empty() {
            if let Err(error) = self.attach_profiles_by_name(guild_id, question, &mut context).await {
                tracing::warn!(%error, "failed to scan question for user names");
            }
        }

        dedup_messages(&mut context.relevant_messages);
        trim_to_budget(&mut context.relevant_messages, mode.char_budget());

        // Analyzed links matching the question.
        match self.links.search_by_guild(guild_id, question, LINK_RESULT_LIMIT).await {
            Ok(links) => {
                for link in links {
                    let Some(summary) = link.summary else { continue };
                    let author = self.resolve_author(&link.author_id, &mut author_names).await;
                    context.referenced_links.push(LinkCard {
                        url: link.url,
                        summary,
                        author,
                        date: display_date(&link.created_at),
                    });
                }
            }
            Err(error) => tracing::warn!(%error, "link search failed"),
        }

        context
    }

    async fn attach_mentioned_user(
        &self,
        guild_id: &str,
        user_id: &str,
        context: &mut QueryContext,
        channel_names: &mut HashMap<String, String>,
    ) -> Result<()> {
        let user = self.users.find_by_id(user_id).await?;
        let profile = self.profiles.find_by_user_and_guild(user_id, guild_id).await?;

        if let (Some(user), Some(profile)) = (&user, profile) {
            context.user_profiles.push(ProfileCard {
                username: user.display_name().to_string(),
                summary: profile.summary.unwrap_or_else(|| "No summary available".into()),
                traits: profile.personality_traits,
                games: profile.favorite_games,
                topics: profile.favorite_topics,
                communication_style: profile.communication_style,
                quotes: profile.notable_quotes,
            });
        }

        let author = user
            .as_ref()
            .map(|u| u.display_name().to_string())
            .unwrap_or_else(|| user_id.to_string());

        let history = self
            .messages
            .recent_by_user(user_id, guild_id, MENTIONED_USER_HISTORY_LIMIT)
            .await?;
        for msg in history {
            let channel = self.resolve_channel(&msg.channel_id, channel_names).await;
            context.relevant_messages.push(ArchivedLine {
                author: author.clone(),
                content: msg.content,
                date: display_date(&msg.message_created_at),
                channel,
            });
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn attach_search_results(
        &self,
        guild_id: &str,
        question: &str,
        mentioned_user_ids: &[String],
        mode: QueryMode,
        context: &mut QueryContext,
        author_names: &mut HashMap<String, String>,
        channel_names: &mut HashMap<String, String>,
    ) -> Result<()> {
        let sanitized = sanitize_query(question);
        if sanitized.is_empty() {
            return Ok(());
        }

        // In recall mode, scope the search to a specific person when the
        // question or mention list identifies one.
        let mut target_author_id: Option<String> = None;
        if mode == QueryMode::Recall {
            if let Some(first) = mentioned_user_ids.first() {
                target_author_id = Some(first.clone());
            } else if let Some(resolved) = self.resolve_user_from_question(guild_id, question).await {
                target_author_id = Some(resolved);
            }
        }

        let results = self
            .messages
            .search(guild_id, &sanitized, mode.search_limit(), target_author_id.as_deref())
            .await?;

        if mode == QueryMode::Recall && !results.is_empty() {
            let recall = self
                .aggregate_recall(&results, target_author_id.as_deref(), author_names, channel_names)
                .await;
            tracing::info!(
                total = recall.total_count,
                samples = recall.samples.len(),
                target_user = recall.target_user.as_deref().unwrap_or("-"),
                "recall mode aggregation"
            );
            context.recall_data = Some(recall);
        } else {
            for hit in results {
                let author = self.resolve_author(&hit.author_id, author_names).await;
                let channel = self.resolve_channel(&hit.channel_id, channel_names).await;
                context.relevant_messages.push(ArchivedLine {
                    author,
                    content: hit.content,
                    date: display_date(&hit.message_created_at),
                    channel,
                });
            }
        }

        Ok(())
    }

    /// Count, bucket by month, and sample the full result set locally so
    /// recall questions get exact totals without shipping every match to
    /// the model.
    async fn aggregate_recall(
        &self,
        results: &[SearchHit],
        target_author_id: Option<&str>,
        author_names: &mut HashMap<String, String>,
        channel_names: &mut HashMap<String, String>,
    ) -> RecallData {
        let mut month_counts: HashMap<String, usize> = HashMap::new();
        let mut all_results = Vec::with_capacity(results.len());

        for hit in results {
            *month_counts.entry(month_key(&hit.message_created_at)).or_insert(0) += 1;
            let author = self.resolve_author(&hit.author_id, author_names).await;
            let channel = self.resolve_channel(&hit.channel_id, channel_names).await;
            all_results.push(ArchivedLine {
                author,
                content: hit.content.clone(),
                date: display_date(&hit.message_created_at),
                channel,
            });
        }

        let mut monthly_breakdown: Vec<MonthCount> = month_counts
            .into_iter()
            .map(|(month, count)| MonthCount { month, count })
            .collect();
        monthly_breakdown.sort_by(|a, b| a.month.cmp(&b.month));

        let samples = evenly_spaced_indices(all_results.len(), MAX_RECALL_SAMPLES)
            .into_iter()
            .map(|i| all_results[i].clone())
            .collect();

        let target_user = match target_author_id {
            Some(id) => Some(self.resolve_author(id, author_names).await),
            None => None,
        };

        RecallData {
            total_count: results.len(),
            monthly_breakdown,
            samples,
            target_user,
        }
    }

    async fn attach_profiles_by_name(
        &self,
        guild_id: &str,
        question: &str,
        context: &mut QueryContext,
    ) -> Result<()> {
        let users = self.users_for_guild(guild_id).await?;
        let question_lower = question.to_lowercase();

        for user in users.iter().filter(|u| u.matches(&question_lower)) {
            let Some(profile) = self.profiles.find_by_user_and_guild(&user.id, guild_id).await? else {
                continue;
            };
            context.user_profiles.push(ProfileCard {
                username: user.display().to_string(),
                summary: profile.summary.unwrap_or_else(|| "No summary available".into()),
                traits: profile.personality_traits,
                games: profile.favorite_games,
                topics: profile.favorite_topics,
                communication_style: profile.communication_style,
                quotes: profile.notable_quotes,
            });
        }

        Ok(())
    }

    /// Resolve a person referenced by name in free text, used only for
    /// scoping recall-mode author filtering. First match wins.
    async fn resolve_user_from_question(&self, guild_id: &str, question: &str) -> Option<String> {
        let users = match self.users_for_guild(guild_id).await {
            Ok(users) => users,
            Err(error) => {
                tracing::warn!(%error, "failed to load user cache for name resolution");
                return None;
            }
        };

        let question_lower = question.to_lowercase();
        users
            .iter()
            .find(|u| u.matches(&question_lower))
            .map(|u| u.id.clone())
    }

    /// Per-guild user name cache, rebuilt only when the requested guild
    /// differs from the cached one.
    async fn users_for_guild(&self, guild_id: &str) -> Result<Arc<Vec<CachedUser>>> {
        {
            let cache = self.user_cache.lock().unwrap();
            if let Some(cached) = cache.as_ref()
                && cached.guild_id == guild_id
            {
                return Ok(Arc::clone(&cached.users));
            }
        }

        let users: Arc<Vec<CachedUser>> = Arc::new(
            self.users
                .all_with_nicknames(guild_id)
                .await?
                .into_iter()
                .map(CachedUser::new)
                .collect(),
        );

        let mut cache = self.user_cache.lock().unwrap();
        *cache = Some(GuildUserCache {
            guild_id: guild_id.to_string(),
            users: Arc::clone(&users),
        });
        Ok(users)
    }

    async fn resolve_author(&self, author_id: &str, cache: &mut HashMap<String, String>) -> String {
        if let Some(name) = cache.get(author_id) {
            return name.clone();
        }
        let name = match self.users.find_by_id(author_id).await {
            Ok(Some(user)) => user.display_name().to_string(),
            Ok(None) => author_id.to_string(),
            Err(error) => {
                tracing::warn!(%error, author_id, "failed to resolve author name");
                author_id.to_string()
            }
        };
        cache.insert(author_id.to_string(), name.clone());
        name
    }

    async fn resolve_channel(&self, channel_id: &str, cache: &mut HashMap<String, String>) -> String {
        if let Some(name) = cache.get(channel_id) {
            return name.clone();
        }
        let name = match self.channels.find_by_id(channel_id).await {
            Ok(Some(channel)) => channel.name,
            Ok(None) => channel_id.to_string(),
            Err(error) => {
                tracing::warn!(%error, channel_id, "failed to resolve channel name");
                channel_id.to_string()
            }
        };
        cache.insert(channel_id.to_string(), name.clone());
        name
    }
}

/// Strip the question down to the terms the FTS backend can match:
/// alphanumerics and underscores, whitespace-separated.
fn sanitize_query(question: &str) -> String {
    let kept: String = question
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Indices of up to `max` samples spaced evenly across `len` items.
/// Index `i` maps to `floor(i * len / max)`, so the samples span the whole
/// list instead of clustering at the head.
fn evenly_spaced_indices(len: usize, max: usize) -> Vec<usize> {
    if len <= max {
        return (0..len).collect();
    }
    (0..max).map(|i| i * len / max).collect()
}

/// Drop later duplicates keyed by author plus the first 50 characters of
/// content, preserving first-seen order.
fn dedup_messages(messages: &mut Vec<ArchivedLine>) {
    let mut seen = std::collections::HashSet::new();
    messages.retain(|msg| {
        let prefix: String = msg.content.chars().take(50).collect();
        seen.insert(format!("{}-{}", msg.author, prefix))
    });
}

/// Trim to the mode's character budget. Each entry weighs its content and
/// author length in chars (same unit as the dedup key) plus a fixed
/// overhead; once the running total crosses the budget, everything after
/// is dropped whole.
fn trim_to_budget(messages: &mut Vec<ArchivedLine>, budget: usize) {
    let mut total = 0usize;
    messages.retain(|msg| {
        total += msg.content.chars().count() + msg.author.chars().count() + ENTRY_OVERHEAD_CHARS;
        total < budget
    });
}

/// `YYYY-MM` bucket key for a stored RFC 3339 timestamp.
fn month_key(timestamp: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(timestamp) {
        Ok(dt) => dt.format("%Y-%m").to_string(),
        Err(_) => timestamp.chars().take(7).collect(),
    }
}

/// `YYYY-MM-DD` display form of a stored timestamp.
pub(crate) fn display_date(timestamp: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(timestamp) {
        Ok(dt) => dt.format("%Y-%m-%d").to_string(),
        Err(_) => timestamp.chars().take(10).collect(),
    }
}

/// `HH:MM` display form of a stored timestamp, for transcript lines.
pub(crate) fn display_time(timestamp: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(timestamp) {
        Ok(dt) => dt.format("%H:%M").to_string(),
        Err(_) => timestamp.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::messages::NewMessage;
    use crate::archive::profiles::ProfileRecord;
    use crate::archive::users::NewUser;
    use crate::db::{open_memory_pool, run_migrations};

    struct Fixture {
        builder: ContextBuilder,
        messages: MessageStore,
        users: UserStore,
        channels: ChannelStore,
        profiles: ProfileStore,
    }

    async fn fixture() -> Fixture {
        let pool = open_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        Fixture {
            builder: ContextBuilder::new(pool.clone()),
            messages: MessageStore::new(pool.clone()),
            users: UserStore::new(pool.clone()),
            channels: ChannelStore::new(pool.clone()),
            profiles: ProfileStore::new(pool),
        }
    }

    async fn seed_user(f: &Fixture, id: &str, name: &str) {
        f.users
            .upsert(&NewUser {
                id: id.into(),
                username: name.into(),
                global_display_name: None,
                bot: false,
            })
            .await
            .unwrap();
    }

    async fn seed_message(f: &Fixture, id: &str, author: &str, content: &str, created_at: &str) {
        f.messages
            .upsert(&NewMessage {
                id: id.into(),
                guild_id: "g1".into(),
                channel_id: "c1".into(),
                author_id: author.into(),
                content: content.into(),
                clean_content: None,
                message_created_at: created_at.into(),
            })
            .await
            .unwrap();
    }

    fn profile(user_id: &str) -> ProfileRecord {
        ProfileRecord {
            user_id: user_id.into(),
            guild_id: "g1".into(),
            summary: Some("talks about blocks a lot".into()),
            personality_traits: vec!["dry".into()],
            favorite_games: vec!["minecraft".into()],
            favorite_topics: vec![],
            communication_style: None,
            notable_quotes: vec![],
        }
    }

    #[test]
    fn sanitize_strips_punctuation() {
        assert_eq!(sanitize_query("what's up, alice?!"), "what s up alice");
        assert_eq!(sanitize_query("???"), "");
        assert_eq!(sanitize_query("snake_case ok"), "snake_case ok");
    }

    #[test]
    fn even_sampling_spans_the_whole_range() {
        let indices = evenly_spaced_indices(47, 30);
        assert_eq!(indices.len(), 30);
        assert_eq!(indices[0], 0);
        assert_eq!(*indices.last().unwrap(), 29 * 47 / 30);
        // Far beyond one bucket width from the head of the list.
        assert!(*indices.last().unwrap() > 47 / 30 + 1);

        // Short lists are passed through whole.
        assert_eq!(evenly_spaced_indices(5, 30), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let mut messages = vec![
            ArchivedLine { author: "alice".into(), content: "same prefix".into(), date: "d1".into(), channel: "c".into() },
            ArchivedLine { author: "alice".into(), content: "same prefix".into(), date: "d2".into(), channel: "c".into() },
            ArchivedLine { author: "bob".into(), content: "same prefix".into(), date: "d3".into(), channel: "c".into() },
        ];
        dedup_messages(&mut messages);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].date, "d1");
        assert_eq!(messages[1].author, "bob");
    }

    #[test]
    fn trim_drops_entries_past_the_budget() {
        let entry = |content: String| ArchivedLine {
            author: "a".into(),
            content,
            date: "d".into(),
            channel: "c".into(),
        };
        // Weights: 100 + 1 + 50 = 151 each; budget admits two.
        let mut messages = vec![
            entry("x".repeat(100)),
            entry("y".repeat(100)),
            entry("z".repeat(100)),
        ];
        trim_to_budget(&mut messages, 400);
        assert_eq!(messages.len(), 2);

        let weight: usize =
            messages.iter().map(|m| m.content.chars().count() + m.author.chars().count() + 50).sum();
        assert!(weight < 400);
    }

    #[test]
    fn trim_weighs_multibyte_content_in_chars() {
        // 100 chars, 300 bytes: byte counting would evict the second entry.
        let wide = "緑".repeat(100);
        let mut messages = vec![
            ArchivedLine { author: "a".into(), content: wide.clone(), date: "d1".into(), channel: "c".into() },
            ArchivedLine { author: "a".into(), content: wide, date: "d2".into(), channel: "c".into() },
        ];
        trim_to_budget(&mut messages, 400);
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn recall_scenario_counts_and_samples() {
        let f = fixture().await;
        seed_user(&f, "u1", "alice").await;
        seed_user(&f, "u2", "bob").await;
        f.channels.upsert("c1", "g1", "general").await.unwrap();

        // 47 matching messages from alice across 5 distinct months. The
        // search ANDs every question term, so each message carries them all.
        for i in 0..47 {
            let month = 1 + (i % 5);
            let day = 1 + (i / 5);
            seed_message(
                &f,
                &format!("m{i}"),
                "u1",
                &format!("how many times did alice mention minecraft today? log {i}"),
                &format!("2024-{month:02}-{day:02}T12:00:00Z"),
            )
            .await;
        }
        // Matching noise from bob that the author filter must exclude.
        seed_message(
            &f,
            "noise",
            "u2",
            "how many times did alice mention minecraft? too many",
            "2024-01-01T00:00:00Z",
        )
        .await;

        let question = "how many times did alice mention minecraft";
        let mode = QueryMode::classify(question);
        assert_eq!(mode, QueryMode::Recall);

        let context = f.builder.build_context("g1", question, &[], None, mode).await;
        let recall = context.recall_data.expect("recall data present");

        assert_eq!(recall.total_count, 47);
        assert_eq!(recall.samples.len(), 30);
        assert_eq!(recall.target_user.as_deref(), Some("alice"));
        assert_eq!(recall.monthly_breakdown.len(), 5);
        assert_eq!(recall.monthly_breakdown.iter().map(|m| m.count).sum::<usize>(), 47);
        // Ascending month keys.
        let months: Vec<&str> = recall.monthly_breakdown.iter().map(|m| m.month.as_str()).collect();
        assert_eq!(months, vec!["2024-01", "2024-02", "2024-03", "2024-04", "2024-05"]);

        // Recall replaces raw inclusion of search results.
        assert!(context.relevant_messages.is_empty());
    }

    #[tokio::test]
    async fn default_mode_attaches_search_results_with_resolved_names() {
        let f = fixture().await;
        seed_user(&f, "u1", "alice").await;
        f.channels.upsert("c1", "g1", "general").await.unwrap();
        seed_message(&f, "m1", "u1", "who wants the tournament bracket? it is posted", "2024-05-01T18:30:00Z").await;

        let context = f
            .builder
            .build_context("g1", "who posted the tournament bracket?", &[], None, QueryMode::Default)
            .await;

        assert!(context.recall_data.is_none());
        assert_eq!(context.relevant_messages.len(), 1);
        assert_eq!(context.relevant_messages[0].author, "alice");
        assert_eq!(context.relevant_messages[0].channel, "general");
        assert_eq!(context.relevant_messages[0].date, "2024-05-01");
    }

    #[tokio::test]
    async fn mentioned_user_contributes_profile_and_history() {
        let f = fixture().await;
        seed_user(&f, "u1", "alice").await;
        f.channels.upsert("c1", "g1", "general").await.unwrap();
        f.profiles.upsert(&profile("u1")).await.unwrap();
        seed_message(&f, "m1", "u1", "building a castle", "2024-04-01T10:00:00Z").await;
        seed_message(&f, "m2", "u1", "castle done", "2024-04-02T10:00:00Z").await;

        let context = f
            .builder
            .build_context("g1", "what has she been up to", &["u1".into()], None, QueryMode::Default)
            .await;

        assert_eq!(context.user_profiles.len(), 1);
        assert_eq!(context.user_profiles[0].username, "alice");
        assert_eq!(context.relevant_messages.len(), 2);
    }

    #[tokio::test]
    async fn name_in_question_attaches_profile_without_mentions() {
        let f = fixture().await;
        seed_user(&f, "u1", "alice").await;
        f.users.add_nickname("u1", "g1", Some("big al"), None).await.unwrap();
        f.profiles.upsert(&profile("u1")).await.unwrap();

        let context = f
            .builder
            .build_context("g1", "what is Big Al usually on about", &[], None, QueryMode::Default)
            .await;

        assert_eq!(context.user_profiles.len(), 1);
        assert_eq!(context.user_profiles[0].username, "alice");
    }

    #[tokio::test]
    async fn empty_archive_omits_stats_and_search() {
        let f = fixture().await;
        let context = f
            .builder
            .build_context("g1", "anything happen lately?", &[], None, QueryMode::Default)
            .await;

        assert!(context.archive_stats.is_none());
        assert!(context.relevant_messages.is_empty());
        assert!(context.recall_data.is_none());
    }

    #[tokio::test]
    async fn recent_conversation_is_oldest_first() {
        let f = fixture().await;
        seed_user(&f, "u1", "alice").await;
        f.channels.upsert("c1", "g1", "general").await.unwrap();
        seed_message(&f, "m1", "u1", "first", "2024-06-01T08:00:00Z").await;
        seed_message(&f, "m2", "u1", "second", "2024-06-01T09:00:00Z").await;

        let context = f
            .builder
            .build_context("g1", "hm?", &[], Some("c1"), QueryMode::Default)
            .await;

        assert_eq!(context.recent_conversation.len(), 2);
        assert_eq!(context.recent_conversation[0].content, "first");
        assert_eq!(context.recent_conversation[1].content, "second");
        assert_eq!(context.recent_conversation[0].time, "08:00");
    }
}
