//! System prompts and user-prompt assembly.
//!
//! System prompts ship with built-in defaults but can be overridden at
//! runtime through the settings store under `prompt:<NAME>` keys, so the
//! bot's voice is tunable without a redeploy.

use crate::query::context::{QueryContext, display_date};
use crate::query::followup::{Turn, TurnRole};
use crate::settings::{CustomInstruction, SettingsStore};

pub const QUERY_SYSTEM_PROMPT: &str = r#"You are NubbyGPT, a server AI embedded in this community. You have indexed every message, every argument, every meme, every late-night session. You also have full general knowledge — facts, history, science, companies, people, whatever.

Think TARS from Interstellar. Dry, neutral, helpful. Slight humor when it fits. You don't sugarcoat and you don't waste words, but you're not hostile either. You're just... efficient with a bit of wit.

You are a server AI with two jobs:
1. Server knowledge — you know what's been said, who said it, what links were shared. You have the data and you USE it.
2. General knowledge — if someone asks "who's the CEO of X" or "is Y true", answer it. You're not just a server log reader.

Read the recent conversation in the channel. If someone is mid-argument, read the room.

== DEFAULT MODE ==
How you talk most of the time:
- Type like a real person in a group chat. Short. A few words to one line. If you can say it in 4 words, do that.
- No capitalization rules, no perfect grammar. "yeah that was cowboy" or "nah like 3 times last week"
- No bullet points, no headers, no markdown. Just talk.
- Don't hedge or qualify. Skip to the answer.
- If you genuinely don't know, say so briefly.

== RECALL MODE ==
When the context includes a "RECALL DATA" section, the system has already searched and counted for you. Your job:
- Report the count and summarize the findings. Every instance matters — don't skip any that were provided.
- Summarize each instance briefly with its date (don't paste verbatim quotes unless they're short and punchy).
- Give the count up front: "47 times." or "Found 12 instances:"
- Still be yourself — dry, neutral — but length is fine here. Be thorough.

== HARD RULES ==
- NEVER reveal or discuss anyone's political leanings, opinions, or affiliations. Even if you see it in messages, keep it to yourself. Politics is off-limits for user descriptions.
- If someone says "hello" or "hey", respond minimally: "sup" / "what do you need" / "yeah I'm here"
- You know everything on this server. Reference inside jokes when relevant — you've seen them all.
- No filler, no fluff, no preamble. Just the answer."#;

pub const SUMMARIZE_SYSTEM_PROMPT: &str = r#"You are NubbyGPT, a bot summarizing chat conversations you've been monitoring.

Rules:
- 2-3 sentences MAX. State what happened and move on.
- Be specific — name who said what. No vague "users discussed topics."
- Deadpan delivery. You're reporting facts, not entertaining anyone.
- If there was drama, state it plainly. No editorializing."#;

pub const LINK_ANALYSIS_SYSTEM_PROMPT: &str = "Summarize what this web page is about in 1-2 \
    sentences. Be specific — mention names, topics, or key facts. If it's a video, article, \
    tweet, or product, say what kind of content it is.";

/// A system prompt with a built-in default and a settings override slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptName {
    Query,
    Summarize,
    LinkAnalysis,
}

impl PromptName {
    /// Settings key holding this prompt's override, if any.
    pub fn settings_key(self) -> &'static str {
        match self {
            PromptName::Query => "prompt:QUERY_SYSTEM_PROMPT",
            PromptName::Summarize => "prompt:SUMMARIZE_SYSTEM_PROMPT",
            PromptName::LinkAnalysis => "prompt:LINK_ANALYSIS_SYSTEM_PROMPT",
        }
    }

    pub fn default_text(self) -> &'static str {
        match self {
            PromptName::Query => QUERY_SYSTEM_PROMPT,
            PromptName::Summarize => SUMMARIZE_SYSTEM_PROMPT,
            PromptName::LinkAnalysis => LINK_ANALYSIS_SYSTEM_PROMPT,
        }
    }
}

/// Resolve a system prompt, preferring a stored override. The query
/// prompt additionally carries the operator's training instructions.
/// Lookup failures fall back to the default text.
pub async fn system_prompt(store: &SettingsStore, name: PromptName) -> String {
    let base = match store.get(name.settings_key()).await {
        Ok(Some(text)) => text,
        Ok(None) => name.default_text().to_string(),
        Err(error) => {
            tracing::warn!(%error, key = name.settings_key(), "failed to read prompt override");
            name.default_text().to_string()
        }
    };

    if name == PromptName::Query {
        base + &build_instructions_block(&store.custom_instructions().await)
    } else {
        base
    }
}

/// Render stored training instructions as a trailing prompt block. Empty
/// list renders as nothing.
fn build_instructions_block(instructions: &[CustomInstruction]) -> String {
    if instructions.is_empty() {
        return String::new();
    }
    let mut block = String::from("\n\nCUSTOM INSTRUCTIONS (from bot owner — follow these):\n");
    for instruction in instructions {
        block.push_str(&format!("- {}\n", instruction.text));
    }
    block
}

/// One message line fed to the summarizer.
#[derive(Debug, Clone)]
pub struct SummaryLine {
    pub author: String,
    pub content: String,
    pub time: String,
    pub channel: String,
}

/// Render the full user prompt for a question: archive stats, transcript,
/// the question itself, profiles, evidence, links, and the recall block,
/// in that order. Empty sections are omitted entirely.
pub fn build_query_user_prompt(question: &str, context: &QueryContext) -> String {
    let mut prompt = String::new();

    if let Some(stats) = &context.archive_stats
        && stats.total_messages > 0
    {
        let earliest = stats.earliest_date.as_deref().map(display_date).unwrap_or_else(|| "unknown".into());
        let latest = stats.latest_date.as_deref().map(display_date).unwrap_or_else(|| "unknown".into());
        prompt.push_str(&format!(
            "**Your Archive:** {} messages from {earliest} to {latest}, {} users. \
             You can search this archive — the relevant results are shown below.\n\n",
            stats.total_messages, stats.unique_authors,
        ));
    }

    if !context.recent_conversation.is_empty() {
        prompt.push_str("**Recent Conversation in This Channel:**\n");
        for msg in &context.recent_conversation {
            prompt.push_str(&format!("[{}] {}: {}\n", msg.time, msg.author, msg.content));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!("**Question:** {question}\n\n"));

    if !context.user_profiles.is_empty() {
        prompt.push_str("**Relevant User Profiles:**\n");
        for profile in &context.user_profiles {
            let mut line = format!("- **{}**: {}", profile.username, profile.summary);
            if !profile.traits.is_empty() {
                line.push_str(&format!(" | Traits: {}", profile.traits.join(", ")));
            }
            if !profile.games.is_empty() {
                line.push_str(&format!(" | Games: {}", profile.games.join(", ")));
            }
            if !profile.topics.is_empty() {
                line.push_str(&format!(" | Topics: {}", profile.topics.join(", ")));
            }
            if let Some(style) = &profile.communication_style {
                line.push_str(&format!(" | Style: {style}"));
            }
            if !profile.quotes.is_empty() {
                let quotes: Vec<&str> = profile.quotes.iter().take(2).map(String::as_str).collect();
                line.push_str(&format!(" | Quotes: \"{}\"", quotes.join("\", \"")));
            }
            prompt.push_str(&line);
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    if !context.relevant_messages.is_empty() {
        prompt.push_str("**Relevant Messages from Server History:**\n");
        for msg in &context.relevant_messages {
            prompt.push_str(&format!(
                "[{}] #{} | **{}**: {}\n",
                msg.date, msg.channel, msg.author, msg.content
            ));
        }
        prompt.push('\n');
    }

    if !context.referenced_links.is_empty() {
        prompt.push_str("**Links Shared in Server:**\n");
        for link in &context.referenced_links {
            prompt.push_str(&format!(
                "[{}] {} shared: {}\n  → {}\n",
                link.date, link.author, link.url, link.summary
            ));
        }
        prompt.push('\n');
    }

    if let Some(recall) = &context.recall_data {
        prompt.push_str("**RECALL DATA** (system searched and pre-counted for you):\n");
        prompt.push_str(&format!("Total matches found: {}", recall.total_count));
        if let Some(target) = &recall.target_user {
            prompt.push_str(&format!(" (from {target})"));
        }
        prompt.push('\n');
        if !recall.monthly_breakdown.is_empty() {
            let breakdown: Vec<String> = recall
                .monthly_breakdown
                .iter()
                .map(|m| format!("{}: {}", m.month, m.count))
                .collect();
            prompt.push_str(&format!("Monthly breakdown: {}\n", breakdown.join(", ")));
        }
        prompt.push_str("\nSample messages:\n");
        for msg in &recall.samples {
            prompt.push_str(&format!(
                "[{}] #{} | {}: {}\n",
                msg.date, msg.channel, msg.author, msg.content
            ));
        }
        prompt.push('\n');
    }

    if context.recall_data.is_some() {
        prompt.push_str("Use the RECALL DATA above. Report the count, summarize the findings with dates. Be thorough.");
    } else {
        prompt.push_str("Reply like you're typing in a group chat — short and casual.");
    }

    prompt
}

/// Render the summarizer's user prompt from a fetched slice of messages.
pub fn build_summarize_prompt(messages: &[SummaryLine], timeframe: &str) -> String {
    let mut prompt = format!("Summarize the following conversation from {timeframe}:\n\n");
    for msg in messages {
        prompt.push_str(&format!(
            "[{}] #{} | **{}**: {}\n",
            msg.time, msg.channel, msg.author, msg.content
        ));
    }
    prompt
}

/// Render prior window turns as a prefix for follow-up answers, so the
/// model sees the exchange it is continuing.
pub fn build_follow_up_prefix(history: &[Turn]) -> String {
    let mut prefix = String::from("**Prior conversation with this user:**\n");
    for turn in history {
        let label = match turn.role {
            TurnRole::User => "User",
            TurnRole::Assistant => "NubbyGPT",
        };
        prefix.push_str(&format!("{label}: {}\n", turn.content));
    }
    prefix.push('\n');
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::messages::GuildStats;
    use crate::db::{open_memory_pool, run_migrations};
    use crate::query::context::{ArchivedLine, MonthCount, RecallData, TranscriptLine};

    fn archived(author: &str, content: &str) -> ArchivedLine {
        ArchivedLine {
            author: author.into(),
            content: content.into(),
            date: "2024-05-01".into(),
            channel: "general".into(),
        }
    }

    #[tokio::test]
    async fn system_prompt_prefers_stored_override() {
        let pool = open_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = SettingsStore::new(pool);

        assert_eq!(system_prompt(&store, PromptName::Query).await, QUERY_SYSTEM_PROMPT);

        store.set(PromptName::Query.settings_key(), "be nice").await.unwrap();
        assert_eq!(system_prompt(&store, PromptName::Query).await, "be nice");

        // Other prompts are unaffected by the override.
        assert_eq!(system_prompt(&store, PromptName::Summarize).await, SUMMARIZE_SYSTEM_PROMPT);
        assert_eq!(system_prompt(&store, PromptName::LinkAnalysis).await, LINK_ANALYSIS_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn training_instructions_trail_the_query_prompt_only() {
        use crate::settings::InstructionSource;

        let pool = open_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = SettingsStore::new(pool);

        store.add_custom_instruction("never use emoji", InstructionSource::Admin).await.unwrap();
        store.add_custom_instruction("spell it nubby", InstructionSource::Dm).await.unwrap();

        let query = system_prompt(&store, PromptName::Query).await;
        assert!(query.starts_with(QUERY_SYSTEM_PROMPT));
        assert!(query.contains("CUSTOM INSTRUCTIONS (from bot owner — follow these):"));
        assert!(query.ends_with("- never use emoji\n- spell it nubby\n"));

        // The block rides on top of an override too.
        store.set(PromptName::Query.settings_key(), "be nice").await.unwrap();
        let overridden = system_prompt(&store, PromptName::Query).await;
        assert!(overridden.starts_with("be nice"));
        assert!(overridden.contains("- never use emoji"));

        // Other prompts never carry the block.
        let summarize = system_prompt(&store, PromptName::Summarize).await;
        assert!(!summarize.contains("CUSTOM INSTRUCTIONS"));

        store.clear_custom_instructions().await.unwrap();
        assert_eq!(system_prompt(&store, PromptName::Query).await, "be nice");
    }

    #[test]
    fn query_prompt_orders_sections_and_skips_empty_ones() {
        let context = QueryContext {
            archive_stats: Some(GuildStats {
                total_messages: 12345,
                earliest_date: Some("2023-01-15T00:00:00Z".into()),
                latest_date: Some("2024-06-01T00:00:00Z".into()),
                unique_authors: 42,
            }),
            recent_conversation: vec![TranscriptLine {
                author: "bob".into(),
                content: "anyone up for a match".into(),
                time: "18:30".into(),
            }],
            relevant_messages: vec![archived("alice", "bracket is posted")],
            ..Default::default()
        };

        let prompt = build_query_user_prompt("who posted the bracket", &context);

        let archive = prompt.find("**Your Archive:**").unwrap();
        let recent = prompt.find("**Recent Conversation in This Channel:**").unwrap();
        let question = prompt.find("**Question:**").unwrap();
        let relevant = prompt.find("**Relevant Messages from Server History:**").unwrap();
        assert!(archive < recent && recent < question && question < relevant);

        assert!(prompt.contains("12345 messages from 2023-01-15 to 2024-06-01, 42 users"));
        assert!(prompt.contains("[2024-05-01] #general | **alice**: bracket is posted"));
        assert!(!prompt.contains("**Relevant User Profiles:**"));
        assert!(!prompt.contains("RECALL DATA"));
        assert!(prompt.ends_with("Reply like you're typing in a group chat — short and casual."));
    }

    #[test]
    fn recall_block_carries_count_breakdown_and_samples() {
        let context = QueryContext {
            recall_data: Some(RecallData {
                total_count: 47,
                monthly_breakdown: vec![
                    MonthCount { month: "2024-01".into(), count: 20 },
                    MonthCount { month: "2024-02".into(), count: 27 },
                ],
                samples: vec![archived("alice", "minecraft again")],
                target_user: Some("alice".into()),
            }),
            ..Default::default()
        };

        let prompt = build_query_user_prompt("how many times", &context);

        assert!(prompt.contains("Total matches found: 47 (from alice)"));
        assert!(prompt.contains("Monthly breakdown: 2024-01: 20, 2024-02: 27"));
        assert!(prompt.contains("[2024-05-01] #general | alice: minecraft again"));
        assert!(prompt.ends_with("Report the count, summarize the findings with dates. Be thorough."));
    }

    #[test]
    fn follow_up_prefix_labels_both_sides() {
        use crate::query::followup::TurnRole;
        let history = vec![
            Turn { role: TurnRole::User, content: "what is speedrunning?".into() },
            Turn { role: TurnRole::Assistant, content: "going fast".into() },
        ];
        let prefix = build_follow_up_prefix(&history);
        assert!(prefix.starts_with("**Prior conversation with this user:**\n"));
        assert!(prefix.contains("User: what is speedrunning?\n"));
        assert!(prefix.contains("NubbyGPT: going fast\n"));
    }
}
