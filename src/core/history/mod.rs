//! Conversation history module.
//!
//! Converts the provider's turn-by-turn history into display messages:
//! assistant turns go through the tool protocol codec, user turns through a
//! noise filter, and turns without displayable text are omitted.

mod filter;
mod items;
mod reconciler;

pub use filter::is_meaningful_user_text;
pub use items::{HistoryContent, HistoryItem, MESSAGE_ITEM_TYPE};
pub use reconciler::{ChatMessage, ChatRole, HistoryReconciler, Reconciliation};
