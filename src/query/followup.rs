//! Follow-up conversation windows.
//!
//! After the bot answers a question, the asker gets a short window in
//! which plain messages in the same channel may continue the exchange
//! without re-invoking the bot. A cheap classifier call decides whether
//! a candidate message is actually a follow-up; everything here fails
//! closed, since treating an unrelated message as a follow-up is worse
//! than missing one.

use crate::llm::{CallType, CompletionBackend, CompletionRequest, UsageTracker};
use crate::settings::SettingsStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Most windows tracked at once before the least recently used is evicted.
pub const DEFAULT_WINDOW_CAPACITY: usize = 500;
/// Minimum gap between classifier calls for one window. Rapid-fire
/// messages inside the gap are ignored rather than queued.
const CLASSIFY_COOLDOWN: Duration = Duration::from_secs(5);
/// How many trailing turns the classifier sees.
const CLASSIFY_TURN_CONTEXT: usize = 4;
/// Output cap for the yes/no classification call.
const CLASSIFY_MAX_TOKENS: u32 = 5;
/// Sweep interval for the background expiry task.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const CLASSIFY_SYSTEM_PROMPT: &str = "You judge whether a new chat message continues a recent \
    conversation with an assistant. Reply with exactly one word: \"yes\" if the message is a \
    follow-up to the exchange shown, or \"no\" if it is unrelated or addressed to someone else.";

/// Who said a turn in a window's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

/// One exchange turn inside a window.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
}

/// A confirmed follow-up, ready for answering. `history` ends with the
/// new user message.
#[derive(Debug, Clone)]
pub struct FollowUpMatch {
    pub original_question: String,
    pub history: Vec<Turn>,
    pub follow_up_count: u32,
}

struct ConversationWindow {
    original_question: String,
    history: Vec<Turn>,
    last_activity: Instant,
    last_classified: Option<Instant>,
    follow_up_count: u32,
}

/// Tracks open follow-up windows keyed by `(channel, user)`.
///
/// The window map sits behind a plain mutex that is never held across an
/// await; the classifier call happens between two lock scopes, with the
/// cooldown stamped before the first is released so concurrent messages
/// cannot trigger duplicate classifications.
pub struct FollowUpTracker<C: CompletionBackend> {
    windows: Mutex<HashMap<(String, String), ConversationWindow>>,
    backend: Arc<C>,
    settings: SettingsStore,
    usage: UsageTracker,
    classifier_model: String,
    capacity: usize,
}

impl<C: CompletionBackend> FollowUpTracker<C> {
    pub fn new(
        backend: Arc<C>,
        settings: SettingsStore,
        usage: UsageTracker,
        classifier_model: impl Into<String>,
    ) -> Self {
        Self::with_capacity(backend, settings, usage, classifier_model, DEFAULT_WINDOW_CAPACITY)
    }

    pub fn with_capacity(
        backend: Arc<C>,
        settings: SettingsStore,
        usage: UsageTracker,
        classifier_model: impl Into<String>,
        capacity: usize,
    ) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            backend,
            settings,
            usage,
            classifier_model: classifier_model.into(),
            capacity,
        }
    }

    /// Open (or replace) a window after an answered question. No-op when
    /// follow-ups are disabled.
    pub async fn register_window(&self, channel_id: &str, user_id: &str, question: &str, answer: &str) {
        let settings = self.settings.follow_up_settings().await;
        if !settings.enabled {
            return;
        }

        let key = (channel_id.to_string(), user_id.to_string());
        let now = Instant::now();

        let mut windows = self.windows.lock().unwrap();
        if !windows.contains_key(&key) && windows.len() >= self.capacity {
            if let Some(oldest) = windows
                .iter()
                .min_by_key(|(_, w)| w.last_activity)
                .map(|(k, _)| k.clone())
            {
                tracing::debug!(channel_id = %oldest.0, user_id = %oldest.1, "evicting LRU follow-up window");
                windows.remove(&oldest);
            }
        }

        windows.insert(
            key,
            ConversationWindow {
                original_question: question.to_string(),
                history: vec![
                    Turn { role: TurnRole::User, content: question.to_string() },
                    Turn { role: TurnRole::Assistant, content: answer.to_string() },
                ],
                last_activity: now,
                last_classified: None,
                follow_up_count: 0,
            },
        );
    }

    /// Decide whether `message` continues this user's open window in this
    /// channel. Returns the window state for answering when it does.
    pub async fn check_follow_up(
        &self,
        channel_id: &str,
        user_id: &str,
        message: &str,
    ) -> Option<FollowUpMatch> {
        let settings = self.settings.follow_up_settings().await;
        if !settings.enabled {
            return None;
        }

        let ttl = Duration::from_secs(settings.window_seconds);
        let key = (channel_id.to_string(), user_id.to_string());
        let now = Instant::now();

        // First lock scope: gate checks, then stamp the cooldown before
        // releasing so no second message sneaks in a classifier call.
        let classify_context = {
            let mut windows = self.windows.lock().unwrap();
            let Some(window) = windows.get_mut(&key) else {
                return None;
            };

            if now.duration_since(window.last_activity) > ttl {
                windows.remove(&key);
                return None;
            }
            if window.follow_up_count >= settings.max_followups {
                tracing::debug!(channel_id, user_id, "follow-up window exhausted");
                windows.remove(&key);
                return None;
            }
            if let Some(last) = window.last_classified
                && now.duration_since(last) < CLASSIFY_COOLDOWN
            {
                return None;
            }

            window.last_classified = Some(now);
            let tail = window
                .history
                .iter()
                .rev()
                .take(CLASSIFY_TURN_CONTEXT)
                .rev()
                .cloned()
                .collect::<Vec<_>>();
            (window.original_question.clone(), tail)
        };

        if !self.classify(&classify_context.0, &classify_context.1, message).await {
            return None;
        }

        // Second lock scope: the window may have expired or been evicted
        // while the classifier ran.
        let mut windows = self.windows.lock().unwrap();
        let window = windows.get_mut(&key)?;
        window.follow_up_count += 1;
        window.last_activity = Instant::now();
        window.history.push(Turn { role: TurnRole::User, content: message.to_string() });

        Some(FollowUpMatch {
            original_question: window.original_question.clone(),
            history: window.history.clone(),
            follow_up_count: window.follow_up_count,
        })
    }

    /// Append the bot's answer to a matched follow-up so later turns see it.
    pub fn record_follow_up_response(&self, channel_id: &str, user_id: &str, answer: &str) {
        let key = (channel_id.to_string(), user_id.to_string());
        let mut windows = self.windows.lock().unwrap();
        if let Some(window) = windows.get_mut(&key) {
            window.history.push(Turn { role: TurnRole::Assistant, content: answer.to_string() });
            window.last_activity = Instant::now();
        }
    }

    /// Drop every window idle past the TTL. Returns how many were removed.
    pub async fn evict_expired(&self) -> usize {
        let ttl = Duration::from_secs(self.settings.follow_up_settings().await.window_seconds);
        let now = Instant::now();

        let mut windows = self.windows.lock().unwrap();
        let before = windows.len();
        windows.retain(|_, w| now.duration_since(w.last_activity) <= ttl);
        before - windows.len()
    }

    pub fn active_window_count(&self) -> usize {
        self.windows.lock().unwrap().len()
    }

    /// Background sweep so abandoned windows do not pin memory between
    /// messages.
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()>
    where
        C: 'static,
    {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let evicted = self.evict_expired().await;
                if evicted > 0 {
                    tracing::debug!(evicted, "swept expired follow-up windows");
                }
            }
        })
    }

    /// Ask the cheap classifier model whether `message` is a follow-up.
    /// Any failure or unexpected output counts as "no".
    async fn classify(&self, original_question: &str, tail: &[Turn], message: &str) -> bool {
        let mut prompt = format!("Original question: {original_question}\n\nRecent exchange:\n");
        for turn in tail {
            prompt.push_str(&format!("{}: {}\n", turn.role.as_str(), turn.content));
        }
        prompt.push_str(&format!("\nNew message from the same user: {message}\n\nIs this a follow-up?"));

        let request = CompletionRequest {
            model: self.classifier_model.clone(),
            max_tokens: CLASSIFY_MAX_TOKENS,
            system: Some(CLASSIFY_SYSTEM_PROMPT.to_string()),
            message: prompt,
        };

        match self.backend.complete(&request).await {
            Ok(response) => {
                self.usage.track(
                    CallType::FollowUpCheck,
                    &self.classifier_model,
                    response.input_tokens,
                    response.output_tokens,
                );
                response.text.trim().to_lowercase().starts_with("yes")
            }
            Err(error) => {
                tracing::warn!(%error, "follow-up classification failed, treating as unrelated");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_memory_pool, run_migrations};
    use crate::error::LlmError;
    use crate::llm::CompletionResponse;
    use crate::settings::FOLLOWUP_ENABLED;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend that always answers with a fixed verdict.
    struct VerdictBackend {
        verdict: &'static str,
        calls: AtomicU32,
    }

    impl VerdictBackend {
        fn new(verdict: &'static str) -> Arc<Self> {
            Arc::new(Self { verdict, calls: AtomicU32::new(0) })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CompletionBackend for VerdictBackend {
        async fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse {
                text: self.verdict.into(),
                input_tokens: 10,
                output_tokens: 1,
            })
        }
    }

    async fn tracker(backend: Arc<VerdictBackend>, capacity: usize) -> (FollowUpTracker<VerdictBackend>, SettingsStore) {
        // The tests run with a paused clock, but sqlx connects on a blocking
        // thread; auto-advance would fire the pool's acquire timeout before
        // the connection lands. Resume real time for the setup only.
        tokio::time::resume();
        let pool = open_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        tokio::time::pause();
        let settings = SettingsStore::new(pool.clone());
        let tracker = FollowUpTracker::with_capacity(
            backend,
            settings.clone(),
            UsageTracker::new(pool),
            "classifier-model",
            capacity,
        );
        (tracker, settings)
    }

    #[tokio::test(start_paused = true)]
    async fn follow_up_matched_within_window() {
        let backend = VerdictBackend::new("yes");
        let (tracker, _) = tracker(Arc::clone(&backend), 10).await;

        tracker.register_window("c1", "u1", "what is speedrunning?", "going fast").await;
        assert_eq!(tracker.active_window_count(), 1);

        let matched = tracker.check_follow_up("c1", "u1", "what about tool-assisted?").await.unwrap();
        assert_eq!(matched.original_question, "what is speedrunning?");
        assert_eq!(matched.follow_up_count, 1);
        // Question, answer, and the new message.
        assert_eq!(matched.history.len(), 3);
        assert_eq!(matched.history[2].content, "what about tool-assisted?");

        tracker.record_follow_up_response("c1", "u1", "that too");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_verdict_leaves_window_untouched() {
        let backend = VerdictBackend::new("no");
        let (tracker, _) = tracker(Arc::clone(&backend), 10).await;

        tracker.register_window("c1", "u1", "q", "a").await;
        assert!(tracker.check_follow_up("c1", "u1", "unrelated spam").await.is_none());
        assert_eq!(tracker.active_window_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_window_is_deleted_on_check() {
        let backend = VerdictBackend::new("yes");
        let (tracker, _) = tracker(Arc::clone(&backend), 10).await;

        tracker.register_window("c1", "u1", "q", "a").await;
        tokio::time::advance(Duration::from_secs(121)).await;

        assert!(tracker.check_follow_up("c1", "u1", "still there?").await.is_none());
        assert_eq!(tracker.active_window_count(), 0);
        // Expiry short-circuits before any classifier call.
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_window_is_deleted() {
        let backend = VerdictBackend::new("yes");
        let (tracker, _) = tracker(Arc::clone(&backend), 10).await;

        tracker.register_window("c1", "u1", "q", "a").await;
        for i in 0..3 {
            tokio::time::advance(Duration::from_secs(6)).await;
            let matched = tracker.check_follow_up("c1", "u1", "more?").await.unwrap();
            assert_eq!(matched.follow_up_count, i + 1);
            tracker.record_follow_up_response("c1", "u1", "sure");
        }

        // Fourth attempt hits the cap and closes the window.
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(tracker.check_follow_up("c1", "u1", "one more?").await.is_none());
        assert_eq!(tracker.active_window_count(), 0);
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_skips_rapid_second_check() {
        let backend = VerdictBackend::new("yes");
        let (tracker, _) = tracker(Arc::clone(&backend), 10).await;

        tracker.register_window("c1", "u1", "q", "a").await;
        assert!(tracker.check_follow_up("c1", "u1", "first").await.is_some());

        // Inside the cooldown the classifier is not consulted at all.
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(tracker.check_follow_up("c1", "u1", "second").await.is_none());
        assert_eq!(backend.calls(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(tracker.check_follow_up("c1", "u1", "third").await.is_some());
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_evicts_least_recently_used() {
        let backend = VerdictBackend::new("yes");
        let (tracker, _) = tracker(Arc::clone(&backend), 2).await;

        tracker.register_window("c1", "u1", "q1", "a1").await;
        tokio::time::advance(Duration::from_secs(1)).await;
        tracker.register_window("c1", "u2", "q2", "a2").await;
        tokio::time::advance(Duration::from_secs(1)).await;
        tracker.register_window("c1", "u3", "q3", "a3").await;

        assert_eq!(tracker.active_window_count(), 2);
        // u1 was least recently used and is gone; u2 and u3 survive.
        assert!(tracker.check_follow_up("c1", "u1", "hello?").await.is_none());
        assert!(tracker.check_follow_up("c1", "u2", "hello?").await.is_some());
        assert!(tracker.check_follow_up("c1", "u3", "hello?").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_setting_makes_everything_a_no_op() {
        let backend = VerdictBackend::new("yes");
        let (tracker, settings) = tracker(Arc::clone(&backend), 10).await;
        settings.set(FOLLOWUP_ENABLED, "false").await.unwrap();

        tracker.register_window("c1", "u1", "q", "a").await;
        assert_eq!(tracker.active_window_count(), 0);
        assert!(tracker.check_follow_up("c1", "u1", "anything").await.is_none());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn evict_expired_sweeps_idle_windows() {
        let backend = VerdictBackend::new("yes");
        let (tracker, _) = tracker(backend, 10).await;

        tracker.register_window("c1", "u1", "q", "a").await;
        tokio::time::advance(Duration::from_secs(60)).await;
        tracker.register_window("c1", "u2", "q", "a").await;
        tokio::time::advance(Duration::from_secs(90)).await;

        // u1 is 150s idle, u2 only 90s.
        assert_eq!(tracker.evict_expired().await, 1);
        assert_eq!(tracker.active_window_count(), 1);
    }
}
