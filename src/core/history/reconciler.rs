//! History reconciler.
//!
//! Turns the provider's raw history into the ordered list of display messages.
//! The list is rebuilt from scratch on every call; only two pieces of state
//! survive between calls:
//!
//! - the processed-message set, which guarantees that tool events for a given
//!   message are dispatched at most once no matter how often the history is
//!   recomputed while tokens stream in;
//! - the first-seen timestamp of every message, so `created_at` is stable.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::filter::is_meaningful_user_text;
use super::items::HistoryItem;
use crate::core::protocol::{ToolEvent, decode};

/// Speaker of a display message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatRole::User => write!(f, "user"),
            ChatRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// One display message. The text is already protocol-stripped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub text: String,
    #[serde(rename = "createdAt", with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Output of one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// Full message list in provider history order.
    pub messages: Vec<ChatMessage>,
    /// Tool events not dispatched before, in history and document order.
    ///
    /// The caller must deliver these; their message IDs are already recorded
    /// as processed.
    pub events: Vec<ToolEvent>,
}

/// Stateful history-to-messages reconciler. One per session controller.
#[derive(Debug, Default)]
pub struct HistoryReconciler {
    processed: HashSet<String>,
    first_seen: HashMap<String, OffsetDateTime>,
}

impl HistoryReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the message list from `history`.
    pub fn reconcile(&mut self, history: &[HistoryItem]) -> Reconciliation {
        let mut result = Reconciliation::default();

        for (index, item) in history.iter().enumerate() {
            if !item.is_message() {
                continue;
            }

            let role = if item.is_assistant() {
                ChatRole::Assistant
            } else {
                ChatRole::User
            };
            let id = item
                .item_id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("{role}-{index}"));
            let raw = item.flat_text();

            let text = match role {
                ChatRole::Assistant => {
                    let decoded = decode(&raw);
                    if !decoded.commands.is_empty() && !self.processed.contains(&id) {
                        tracing::debug!(
                            "Dispatching {} tool event(s) from message {}",
                            decoded.commands.len(),
                            id
                        );
                        result.events.extend(
                            decoded
                                .commands
                                .into_iter()
                                .map(|command| ToolEvent::new(id.clone(), command)),
                        );
                        self.processed.insert(id.clone());
                    }
                    decoded.clean_text
                }
                ChatRole::User => {
                    if is_meaningful_user_text(&raw) {
                        raw
                    } else {
                        if !raw.is_empty() {
                            tracing::trace!("Dropping noisy user transcript: {:?}", raw);
                        }
                        String::new()
                    }
                }
            };

            if text.is_empty() {
                continue;
            }

            let created_at = *self
                .first_seen
                .entry(id.clone())
                .or_insert_with(OffsetDateTime::now_utc);

            result.messages.push(ChatMessage {
                id,
                role,
                text,
                created_at,
            });
        }

        result
    }

    /// Whether tool events for `message_id` were already dispatched.
    pub fn is_processed(&self, message_id: &str) -> bool {
        self.processed.contains(message_id)
    }

    /// Number of messages that have dispatched tool events.
    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::history::items::HistoryContent;
    use crate::core::protocol::{NavigatePayload, ToolCommand};

    fn assistant(id: &str, text: &str) -> HistoryItem {
        HistoryItem::message(id, "assistant", vec![HistoryContent::text("output_text", text)])
    }

    fn user(id: &str, transcript: &str) -> HistoryItem {
        HistoryItem::message(
            id,
            "user",
            vec![HistoryContent::audio("input_audio", Some(transcript.to_string()))],
        )
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut reconciler = HistoryReconciler::new();
        let history = vec![
            user("u1", "quiero agendar una demo"),
            assistant("a1", r#"Claro [TOOL_UPDATE]{"name":"Demo"}[/TOOL_UPDATE]"#),
        ];

        let first = reconciler.reconcile(&history);
        let second = reconciler.reconcile(&history);

        assert_eq!(first.messages, second.messages);
        assert_eq!(first.events.len(), 1);
        assert!(second.events.is_empty());
        assert!(reconciler.is_processed("a1"));
    }

    #[test]
    fn test_user_noise_is_omitted() {
        let mut reconciler = HistoryReconciler::new();
        let history = vec![
            user("u1", "ok"),
            user("u2", "mmm"),
            user("u3", "..."),
            user("u4", ""),
            user("u5", "quiero agendar una demo"),
        ];

        let result = reconciler.reconcile(&history);
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].id, "u5");
        assert_eq!(result.messages[0].text, "quiero agendar una demo");
    }

    #[test]
    fn test_non_message_items_and_empty_assistant_turns_are_skipped() {
        let mut reconciler = HistoryReconciler::new();
        let call = HistoryItem {
            item_type: "function_call".to_string(),
            ..Default::default()
        };
        let history = vec![
            call,
            assistant("a1", r#"[TOOL_NAVIGATE]{"path":"/x"}[/TOOL_NAVIGATE]"#),
        ];

        let result = reconciler.reconcile(&history);
        assert!(result.messages.is_empty());
        assert_eq!(result.events.len(), 1);
    }

    #[test]
    fn test_streaming_dispatches_once_block_completes() {
        let mut reconciler = HistoryReconciler::new();

        let partial = vec![assistant("a1", r#"Listo [TOOL_NAVIGATE]{"pa"#)];
        let result = reconciler.reconcile(&partial);
        assert_eq!(result.messages[0].text, "Listo");
        assert!(result.events.is_empty());
        assert!(!reconciler.is_processed("a1"));

        let complete = vec![assistant(
            "a1",
            r#"Listo [TOOL_NAVIGATE]{"path":"/campaigns"}[/TOOL_NAVIGATE]"#,
        )];
        let result = reconciler.reconcile(&complete);
        assert_eq!(
            result.events,
            vec![ToolEvent::new(
                "a1",
                ToolCommand::Navigate(NavigatePayload {
                    path: "/campaigns".to_string()
                })
            )]
        );

        let result = reconciler.reconcile(&complete);
        assert!(result.events.is_empty());
    }

    #[test]
    fn test_created_at_is_stable_and_ids_synthesized() {
        let mut reconciler = HistoryReconciler::new();
        let mut anonymous = assistant("", "Hola");
        anonymous.item_id = None;
        let history = vec![anonymous];

        let first = reconciler.reconcile(&history);
        let second = reconciler.reconcile(&history);
        assert_eq!(first.messages[0].id, "assistant-0");
        assert_eq!(first.messages[0].created_at, second.messages[0].created_at);
    }

    #[test]
    fn test_order_follows_history() {
        let mut reconciler = HistoryReconciler::new();
        let history = vec![
            assistant("a1", "Hola, ¿en qué te ayudo?"),
            user("u1", "quiero crear una campaña"),
            assistant("a2", "Perfecto"),
        ];
        let ids: Vec<_> = reconciler
            .reconcile(&history)
            .messages
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["a1", "u1", "a2"]);
    }
}
