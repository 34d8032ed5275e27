//! History compaction for cross-provider context handoff.
//!
//! When a session moves to a provider that has no native continuation state,
//! its prior turns are injected as a `<context>` block: verbatim when they
//! fit the target token limit, summarized through a fast model otherwise.

use async_trait::async_trait;
use tracing::debug;

use crate::types::{ChatMessage, Content};

/// Approximate context limits per handoff target, in tokens.
const HANDOFF_LIMITS: &[(&str, usize)] = &[
    ("gpt-4.1", 1_000_000),
    ("gemini", 1_000_000),
    ("grok", 128_000),
];

const DEFAULT_LIMIT: usize = 100_000;

/// Fallback length when summarization is unavailable or fails.
const TRUNCATE_FALLBACK_CHARS: usize = 4000;

/// A provider-agnostic conversation turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: String,
    pub content: String,
}

/// Summarizes oversized transcripts via a fast model. `None` on failure lets
/// the compactor fall back to truncation.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str, task_context: &str) -> Option<String>;
}

pub fn handoff_limit(target: &str) -> usize {
    HANDOFF_LIMITS
        .iter()
        .find(|(name, _)| target.contains(name))
        .map(|(_, limit)| *limit)
        .unwrap_or(DEFAULT_LIMIT)
}

/// Rough estimate: 4 characters per token.
pub fn estimate_tokens(turns: &[Turn]) -> usize {
    turns.iter().map(|t| t.content.len()).sum::<usize>() / 4
}

pub fn turns_from_chat(history: &[ChatMessage]) -> Vec<Turn> {
    history
        .iter()
        .filter(|m| m.role != "tool")
        .filter_map(|m| {
            m.content.as_ref().map(|c| Turn {
                role: m.role.clone(),
                content: c.clone(),
            })
        })
        .filter(|t| !t.content.is_empty())
        .collect()
}

pub fn turns_from_contents(history: &[Content]) -> Vec<Turn> {
    history
        .iter()
        .map(|c| Turn {
            role: if c.role == "model" {
                "assistant".to_string()
            } else {
                c.role.clone()
            },
            content: c.joined_text(),
        })
        .filter(|t| !t.content.is_empty())
        .collect()
}

/// Format turns as readable text: `[ROLE]: content`, blank-line separated.
pub fn format_history(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("[{}]: {}", t.role.to_uppercase(), t.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Compact `turns` into a `<context>` block that fits `max_tokens`.
///
/// Verbatim when it fits; otherwise summarized (or truncated when no
/// summarizer is available). Empty history yields an empty string.
pub async fn compact_for_handoff(
    turns: &[Turn],
    max_tokens: usize,
    summarizer: Option<&dyn Summarizer>,
) -> String {
    if turns.is_empty() {
        return String::new();
    }

    let formatted = format_history(turns);
    let estimated = estimate_tokens(turns);
    if estimated <= max_tokens {
        return format!("<context>\n{formatted}\n</context>");
    }

    debug!(estimated, max_tokens, "history over handoff limit, summarizing");
    let body = match summarizer {
        Some(s) => s
            .summarize(
                &formatted,
                "Prior conversation history being carried across providers",
            )
            .await
            .unwrap_or_else(|| truncate(&formatted)),
        None => truncate(&formatted),
    };
    format!("<context>\n{body}\n</context>")
}

fn truncate(text: &str) -> String {
    if text.len() <= TRUNCATE_FALLBACK_CHARS {
        return text.to_string();
    }
    let mut cut = TRUNCATE_FALLBACK_CHARS;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSummarizer(&'static str);

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, _transcript: &str, _ctx: &str) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    fn turn(role: &str, content: &str) -> Turn {
        Turn {
            role: role.into(),
            content: content.into(),
        }
    }

    #[tokio::test]
    async fn small_history_is_formatted_verbatim() {
        let turns = vec![turn("user", "hello"), turn("assistant", "hi there")];
        let out = compact_for_handoff(&turns, 1000, None).await;
        assert!(out.starts_with("<context>\n"));
        assert!(out.contains("[USER]: hello"));
        assert!(out.contains("[ASSISTANT]: hi there"));
        assert!(out.ends_with("\n</context>"));
    }

    #[tokio::test]
    async fn oversized_history_goes_through_summarizer() {
        let turns = vec![turn("user", &"x".repeat(10_000))];
        let out = compact_for_handoff(&turns, 10, Some(&FixedSummarizer("summary"))).await;
        assert_eq!(out, "<context>\nsummary\n</context>");
    }

    #[tokio::test]
    async fn empty_history_is_empty() {
        assert_eq!(compact_for_handoff(&[], 1000, None).await, "");
    }

    #[test]
    fn chat_turns_skip_tool_messages() {
        let history = vec![
            ChatMessage::user("q"),
            ChatMessage::tool("call_1", "tool output"),
            ChatMessage::assistant(Some("a".into()), None),
        ];
        let turns = turns_from_chat(&history);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, "user");
        assert_eq!(turns[1].role, "assistant");
    }

    #[test]
    fn content_turns_map_model_to_assistant() {
        let history = vec![Content::user_text("q"), Content::model_text("a")];
        let turns = turns_from_contents(&history);
        assert_eq!(turns[1].role, "assistant");
    }

    #[test]
    fn limits_resolve_by_substring() {
        assert_eq!(handoff_limit("gemini-2.5-pro"), 1_000_000);
        assert_eq!(handoff_limit("grok-4"), 128_000);
        assert_eq!(handoff_limit("something-else"), DEFAULT_LIMIT);
    }
}
