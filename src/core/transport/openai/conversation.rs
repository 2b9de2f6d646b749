//! Local mirror of the provider conversation.
//!
//! The Realtime API never sends the whole conversation; it sends item
//! creations and per-part deltas. This mirror applies those events in order so
//! the transport can hand the complete history to subscribers after every
//! change.

use crate::core::history::{HistoryContent, HistoryItem};

use super::messages::{ContentPart, ConversationItem, ServerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartField {
    Text,
    Transcript,
}

/// Ordered conversation items, keyed by item ID.
#[derive(Debug, Default)]
pub struct Conversation {
    items: Vec<HistoryItem>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current history snapshot.
    pub fn history(&self) -> Vec<HistoryItem> {
        self.items.clone()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Apply a server event. Returns whether the history changed.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::ConversationItemCreated {
                previous_item_id,
                item,
            } => self.insert_after(previous_item_id.as_deref(), item.clone()),
            ServerEvent::OutputItemAdded { item } | ServerEvent::OutputItemDone { item } => {
                self.upsert(item.clone())
            }
            ServerEvent::ConversationItemDeleted { item_id } => {
                let before = self.items.len();
                self.items
                    .retain(|item| item.item_id.as_deref() != Some(item_id.as_str()));
                self.items.len() != before
            }
            ServerEvent::ContentPartAdded {
                item_id,
                content_index,
                part,
            } => {
                let Some(item) = self.find_mut(item_id) else {
                    return false;
                };
                let Some(slot) = part_slot(item, *content_index) else {
                    return false;
                };
                *slot = HistoryContent::from(part.clone());
                true
            }
            ServerEvent::TextDelta {
                item_id,
                content_index,
                delta,
            } => self.append(item_id, *content_index, PartField::Text, "text", delta),
            ServerEvent::AudioTranscriptDelta {
                item_id,
                content_index,
                delta,
            } => self.append(
                item_id,
                *content_index,
                PartField::Transcript,
                "audio",
                delta,
            ),
            ServerEvent::TextDone {
                item_id,
                content_index,
                text,
            } => self.set(item_id, *content_index, PartField::Text, "text", text),
            ServerEvent::AudioTranscriptDone {
                item_id,
                content_index,
                transcript,
            } => self.set(
                item_id,
                *content_index,
                PartField::Transcript,
                "audio",
                transcript,
            ),
            ServerEvent::TranscriptionCompleted {
                item_id,
                content_index,
                transcript,
            } => self.set(
                item_id,
                *content_index,
                PartField::Transcript,
                "input_audio",
                transcript,
            ),
            _ => false,
        }
    }

    fn find_mut(&mut self, item_id: &str) -> Option<&mut HistoryItem> {
        self.items
            .iter_mut()
            .find(|item| item.item_id.as_deref() == Some(item_id))
    }

    fn position(&self, item_id: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.item_id.as_deref() == Some(item_id))
    }

    fn insert_after(&mut self, previous: Option<&str>, item: ConversationItem) -> bool {
        let known = item
            .id
            .as_deref()
            .is_some_and(|id| self.position(id).is_some());
        if known {
            return self.upsert(item);
        }

        let index = previous
            .and_then(|prev| self.position(prev))
            .map(|pos| pos + 1)
            .unwrap_or(self.items.len());
        self.items.insert(index, HistoryItem::from(item));
        true
    }

    /// Replace an existing item, keeping content the update does not carry.
    fn upsert(&mut self, item: ConversationItem) -> bool {
        let incoming = HistoryItem::from(item);
        let existing = incoming
            .item_id
            .as_deref()
            .and_then(|id| self.position(id));

        match existing {
            Some(pos) => {
                let current = &mut self.items[pos];
                if incoming.content.is_empty() {
                    let content = std::mem::take(&mut current.content);
                    *current = HistoryItem {
                        content,
                        ..incoming
                    };
                } else {
                    *current = incoming;
                }
            }
            None => self.items.push(incoming),
        }
        true
    }

    fn append(
        &mut self,
        item_id: &str,
        index: usize,
        field: PartField,
        part_type: &str,
        delta: &str,
    ) -> bool {
        let Some(item) = self.find_mut(item_id) else {
            tracing::trace!("Delta for unknown item {}", item_id);
            return false;
        };
        let Some(slot) = part_slot(item, index) else {
            return false;
        };
        if slot.part_type.is_empty() {
            slot.part_type = part_type.to_string();
        }
        let target = match field {
            PartField::Text => &mut slot.text,
            PartField::Transcript => &mut slot.transcript,
        };
        target.get_or_insert_with(String::new).push_str(delta);
        true
    }

    fn set(
        &mut self,
        item_id: &str,
        index: usize,
        field: PartField,
        part_type: &str,
        value: &str,
    ) -> bool {
        let Some(item) = self.find_mut(item_id) else {
            return false;
        };
        let Some(slot) = part_slot(item, index) else {
            return false;
        };
        if slot.part_type.is_empty() {
            slot.part_type = part_type.to_string();
        }
        let target = match field {
            PartField::Text => &mut slot.text,
            PartField::Transcript => &mut slot.transcript,
        };
        *target = Some(value.to_string());
        true
    }
}

/// Content part at `index`, appending one empty part when `index` is the next
/// slot. Indexes further out are dropped.
fn part_slot(item: &mut HistoryItem, index: usize) -> Option<&mut HistoryContent> {
    if index > item.content.len() {
        tracing::warn!(
            "Ignoring content index {} for item with {} parts",
            index,
            item.content.len()
        );
        return None;
    }
    if index == item.content.len() {
        item.content
            .push(HistoryContent::from(ContentPart::default()));
    }
    item.content.get_mut(index)
}
