//! Question orchestration: classify, assemble context, call the model,
//! account for usage, log the exchange, and open a follow-up window.

use crate::archive::{MessageStore, QueryLogStore};
use crate::archive::query_log::NewQueryLog;
use crate::error::Result;
use crate::llm::retry::{DEFAULT_MAX_RETRIES, INTERACTIVE_BASE_DELAY, complete_with_retry};
use crate::llm::{CallType, CompletionBackend, CompletionRequest, UsageTracker};
use crate::query::context::{ContextBuilder, display_time};
use crate::query::followup::{FollowUpMatch, FollowUpTracker};
use crate::query::mode::QueryMode;
use crate::query::prompts::{
    PromptName, SummaryLine, build_follow_up_prefix, build_query_user_prompt,
    build_summarize_prompt, system_prompt,
};
use crate::settings::SettingsStore;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, Utc};
use regex::Regex;
use sqlx::SqlitePool;
use std::sync::{Arc, LazyLock};

/// Output cap for summaries; summaries are meant to be terse.
const SUMMARIZE_MAX_TOKENS: u32 = 500;
/// Most messages fed into one summary.
const SUMMARIZE_FETCH_LIMIT: i64 = 500;

static SUMMARIZE_REQUEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(summarize|tl;?dr)\b").unwrap());
static SERVER_SCOPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)server|all\s+channels").unwrap());
static LAST_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)last\s+(\d+)\s+(hour|day|week|month)s?").unwrap());
static TODAY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)today").unwrap());
static YESTERDAY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)yesterday").unwrap());
static THIS_WEEK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)this\s+week|the\s+week").unwrap());

/// Whether a question is asking for a summary rather than an answer.
pub fn is_summarize_request(question: &str) -> bool {
    SUMMARIZE_REQUEST.is_match(question)
}

/// A parsed summarize timeframe: inclusive lower bound plus the label
/// echoed back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeframe {
    pub since: String,
    pub label: String,
}

/// Extract the timeframe from a summarize request. Bare "summarize" and
/// "tldr" default to today; anything else unparseable is `None`.
pub fn parse_summarize_timeframe(question: &str, now: DateTime<Utc>) -> Option<Timeframe> {
    let midnight = |dt: DateTime<Utc>| dt.date_naive().and_time(NaiveTime::MIN).and_utc();
    let stamp = |dt: DateTime<Utc>| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string();

    if TODAY.is_match(question) {
        return Some(Timeframe { since: stamp(midnight(now)), label: "today".into() });
    }
    if YESTERDAY.is_match(question) {
        let start = midnight(now - ChronoDuration::days(1));
        return Some(Timeframe { since: stamp(start), label: "yesterday".into() });
    }
    if THIS_WEEK.is_match(question) {
        let days = now.weekday().num_days_from_sunday() as i64;
        let start = midnight(now - ChronoDuration::days(days));
        return Some(Timeframe { since: stamp(start), label: "this week".into() });
    }

    if let Some(captures) = LAST_RANGE.captures(question) {
        let amount: u32 = captures[1].parse().ok()?;
        let unit = captures[2].to_lowercase();
        let start = match unit.as_str() {
            "hour" => now - ChronoDuration::hours(amount as i64),
            "day" => now - ChronoDuration::days(amount as i64),
            "week" => now - ChronoDuration::days(amount as i64 * 7),
            "month" => now.checked_sub_months(chrono::Months::new(amount)).unwrap_or(now),
            _ => return None,
        };
        return Some(Timeframe {
            since: stamp(start),
            label: format!("the last {amount} {unit}(s)"),
        });
    }

    if is_summarize_request(question) {
        return Some(Timeframe { since: stamp(midnight(now)), label: "today".into() });
    }

    None
}

/// Front door for answering questions against the archive.
pub struct QueryHandler<C: CompletionBackend> {
    backend: Arc<C>,
    followups: Arc<FollowUpTracker<C>>,
    context: ContextBuilder,
    settings: SettingsStore,
    usage: UsageTracker,
    query_log: QueryLogStore,
    messages: MessageStore,
    query_model: String,
}

impl<C: CompletionBackend> QueryHandler<C> {
    pub fn new(
        pool: SqlitePool,
        backend: Arc<C>,
        followups: Arc<FollowUpTracker<C>>,
        query_model: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            followups,
            context: ContextBuilder::new(pool.clone()),
            settings: SettingsStore::new(pool.clone()),
            usage: UsageTracker::new(pool.clone()),
            query_log: QueryLogStore::new(pool.clone()),
            messages: MessageStore::new(pool),
            query_model: query_model.into(),
        }
    }

    /// Route a question: summaries go to the summarizer, everything else
    /// gets the full context pipeline.
    pub async fn handle_question(
        &self,
        guild_id: &str,
        channel_id: &str,
        asking_user_id: &str,
        question: &str,
        mentioned_user_ids: &[String],
    ) -> Result<String> {
        if is_summarize_request(question) {
            self.summarize(guild_id, channel_id, asking_user_id, question).await
        } else {
            self.answer_question(guild_id, channel_id, asking_user_id, question, mentioned_user_ids)
                .await
        }
    }

    /// Answer one question end to end.
    pub async fn answer_question(
        &self,
        guild_id: &str,
        channel_id: &str,
        asking_user_id: &str,
        question: &str,
        mentioned_user_ids: &[String],
    ) -> Result<String> {
        let started = std::time::Instant::now();

        let mode = QueryMode::classify(question);
        let context = self
            .context
            .build_context(guild_id, question, mentioned_user_ids, Some(channel_id), mode)
            .await;
        tracing::info!(
            %mode,
            messages = context.relevant_messages.len(),
            profiles = context.user_profiles.len(),
            "assembled query context"
        );

        let request = CompletionRequest {
            model: self.query_model.clone(),
            max_tokens: mode.max_answer_tokens(),
            system: Some(system_prompt(&self.settings, PromptName::Query).await),
            message: build_query_user_prompt(question, &context),
        };
        let response =
            complete_with_retry(&*self.backend, &request, "query", DEFAULT_MAX_RETRIES, INTERACTIVE_BASE_DELAY)
                .await?;

        self.usage
            .track(CallType::Query, &self.query_model, response.input_tokens, response.output_tokens);
        self.log_query(
            guild_id,
            channel_id,
            asking_user_id,
            question,
            &response.text,
            Some(response.input_tokens),
            Some(response.output_tokens),
            started,
        )
        .await;
        self.followups
            .register_window(channel_id, asking_user_id, question, &response.text)
            .await;

        Ok(response.text)
    }

    /// Answer a confirmed follow-up. The matched window's turns are
    /// prepended so the model continues the exchange instead of starting
    /// over.
    pub async fn answer_follow_up(
        &self,
        guild_id: &str,
        channel_id: &str,
        user_id: &str,
        message: &str,
        matched: &FollowUpMatch,
    ) -> Result<String> {
        let started = std::time::Instant::now();

        let mode = QueryMode::classify(message);
        let context = self
            .context
            .build_context(guild_id, message, &[], Some(channel_id), mode)
            .await;

        let prompt =
            build_follow_up_prefix(&matched.history) + &build_query_user_prompt(message, &context);
        let request = CompletionRequest {
            model: self.query_model.clone(),
            max_tokens: mode.max_answer_tokens(),
            system: Some(system_prompt(&self.settings, PromptName::Query).await),
            message: prompt,
        };
        let response =
            complete_with_retry(&*self.backend, &request, "followup", DEFAULT_MAX_RETRIES, INTERACTIVE_BASE_DELAY)
                .await?;

        self.usage.track(
            CallType::FollowUpResponse,
            &self.query_model,
            response.input_tokens,
            response.output_tokens,
        );
        self.followups.record_follow_up_response(channel_id, user_id, &response.text);
        self.log_query(
            guild_id,
            channel_id,
            user_id,
            &format!("[follow-up] {message}"),
            &response.text,
            Some(response.input_tokens),
            Some(response.output_tokens),
            started,
        )
        .await;

        Ok(response.text)
    }

    /// Summarize recent activity. Scope is the current channel unless the
    /// question asks about the whole server.
    pub async fn summarize(
        &self,
        guild_id: &str,
        channel_id: &str,
        asking_user_id: &str,
        question: &str,
    ) -> Result<String> {
        let started = std::time::Instant::now();

        let Some(timeframe) = parse_summarize_timeframe(question, Utc::now()) else {
            return Ok("I couldn't figure out the timeframe. Try `summarize today`, \
                       `summarize this week`, or `summarize last 3 hours`."
                .into());
        };

        let channel_specific = !SERVER_SCOPE.is_match(question);
        let fetched = if channel_specific {
            self.messages
                .by_channel_since(channel_id, &timeframe.since, SUMMARIZE_FETCH_LIMIT)
                .await?
        } else {
            self.messages
                .by_guild_since(guild_id, &timeframe.since, SUMMARIZE_FETCH_LIMIT)
                .await?
        };

        if fetched.is_empty() {
            return Ok(format!(
                "No messages found for {}. Either nothing was said or I haven't archived \
                 those messages yet.",
                timeframe.label
            ));
        }

        let count = fetched.len();
        let lines: Vec<SummaryLine> = fetched
            .into_iter()
            .map(|m| SummaryLine {
                author: m.global_display_name.unwrap_or(m.username),
                content: m.content,
                time: display_time(&m.message_created_at),
                channel: m.channel_name.unwrap_or_else(|| "this channel".into()),
            })
            .collect();

        let request = CompletionRequest {
            model: self.query_model.clone(),
            max_tokens: SUMMARIZE_MAX_TOKENS,
            system: Some(system_prompt(&self.settings, PromptName::Summarize).await),
            message: build_summarize_prompt(&lines, &timeframe.label),
        };
        let response =
            complete_with_retry(&*self.backend, &request, "summarize", DEFAULT_MAX_RETRIES, INTERACTIVE_BASE_DELAY)
                .await?;

        self.usage
            .track(CallType::Summarize, &self.query_model, response.input_tokens, response.output_tokens);

        let answer = format!(
            "**TL;DR for {}** ({count} messages):\n{}",
            timeframe.label, response.text
        );
        self.log_query(
            guild_id,
            channel_id,
            asking_user_id,
            question,
            &answer,
            Some(response.input_tokens),
            Some(response.output_tokens),
            started,
        )
        .await;

        Ok(answer)
    }

    /// Shared follow-up window tracker, for callers that route candidate
    /// messages through [`FollowUpTracker::check_follow_up`] first.
    pub fn follow_ups(&self) -> &Arc<FollowUpTracker<C>> {
        &self.followups
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_query(
        &self,
        guild_id: &str,
        channel_id: &str,
        asking_user_id: &str,
        question: &str,
        answer: &str,
        input_tokens: Option<i64>,
        output_tokens: Option<i64>,
        started: std::time::Instant,
    ) {
        let entry = NewQueryLog {
            guild_id: guild_id.to_string(),
            channel_id: channel_id.to_string(),
            asking_user_id: asking_user_id.to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            context_tokens_used: input_tokens,
            response_tokens_used: output_tokens,
            model_used: self.query_model.clone(),
            response_time_ms: started.elapsed().as_millis() as i64,
        };
        if let Err(error) = self.query_log.insert(&entry).await {
            tracing::error!(%error, "failed to record query log entry");
        }
    }
}
