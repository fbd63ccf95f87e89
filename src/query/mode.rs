//! Query mode classification.
//!
//! Exhaustive-enumeration questions ("how many times did…") get recall
//! mode: a wider search cap, a bigger context budget, and a pre-counted
//! aggregate instead of raw search results.

use regex::Regex;
use std::sync::LazyLock;

static RECALL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)every\s+time",
        r"(?i)all\s+the\s+times",
        r"(?i)how\s+many\s+times",
        r"(?i)list\s+every",
        r"(?i)show\s+me\s+all",
        r"(?i)give\s+me\s+(all|every)",
        r"(?i)list\s+all",
        r"(?i)how\s+often",
        r"(?i)find\s+(every|all)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// How a question should be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Conversational answer over a handful of relevant messages.
    Default,
    /// Exhaustive tally: count + monthly histogram + evenly spaced samples.
    Recall,
}

impl QueryMode {
    /// Classify a question. Stateless; no match means default mode.
    pub fn classify(question: &str) -> Self {
        if RECALL_PATTERNS.iter().any(|p| p.is_match(question)) {
            QueryMode::Recall
        } else {
            QueryMode::Default
        }
    }

    /// Full-text search result cap for this mode.
    pub fn search_limit(self) -> i64 {
        match self {
            QueryMode::Default => 30,
            QueryMode::Recall => 200,
        }
    }

    /// Character budget for the relevant-messages section.
    pub fn char_budget(self) -> usize {
        match self {
            QueryMode::Default => 80_000,
            QueryMode::Recall => 120_000,
        }
    }

    /// Output token ceiling for the answer call.
    pub fn max_answer_tokens(self) -> u32 {
        match self {
            QueryMode::Default => 1_500,
            QueryMode::Recall => 4_000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryMode::Default => "default",
            QueryMode::Recall => "recall",
        }
    }
}

impl std::fmt::Display for QueryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
