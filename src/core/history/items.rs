//! Provider conversation history wire types.
//!
//! History items come from the realtime provider and are treated as
//! semi-trusted: every field is optional and unknown fields are ignored, so a
//! malformed item degrades to "no displayable text" instead of failing.

use serde::{Deserialize, Serialize};

/// Item kind that carries conversational text.
pub const MESSAGE_ITEM_TYPE: &str = "message";

/// One entry of the provider conversation history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Provider-assigned item ID
    #[serde(
        default,
        rename = "itemId",
        alias = "item_id",
        alias = "id",
        skip_serializing_if = "Option::is_none"
    )]
    pub item_id: Option<String>,

    /// Item kind ("message", "function_call", ...)
    #[serde(rename = "type", default)]
    pub item_type: String,

    /// Speaker role ("user", "assistant", "system")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Item status ("in_progress", "completed", "incomplete")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Content parts
    #[serde(default)]
    pub content: Vec<HistoryContent>,
}

/// One content part of a history item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryContent {
    /// Part kind ("input_text", "output_text", "input_audio", "output_audio", ...)
    #[serde(rename = "type", default)]
    pub part_type: String,

    /// Text for text parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Transcript for audio parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl HistoryContent {
    /// Create a text part.
    pub fn text(part_type: &str, text: impl Into<String>) -> Self {
        Self {
            part_type: part_type.to_string(),
            text: Some(text.into()),
            transcript: None,
        }
    }

    /// Create an audio part carrying a transcript.
    pub fn audio(part_type: &str, transcript: Option<String>) -> Self {
        Self {
            part_type: part_type.to_string(),
            text: None,
            transcript,
        }
    }

    fn is_audio(&self) -> bool {
        self.part_type.ends_with("audio")
    }

    /// Displayable text of this part, if any.
    ///
    /// Audio parts contribute their transcript in place of raw audio.
    pub fn display_text(&self) -> Option<&str> {
        let text = if self.is_audio() {
            self.transcript.as_deref()
        } else {
            self.text.as_deref().or(self.transcript.as_deref())
        };
        text.filter(|t| !t.trim().is_empty())
    }
}

impl HistoryItem {
    /// Create a message item.
    pub fn message(item_id: impl Into<String>, role: &str, content: Vec<HistoryContent>) -> Self {
        Self {
            item_id: Some(item_id.into()),
            item_type: MESSAGE_ITEM_TYPE.to_string(),
            role: Some(role.to_string()),
            status: None,
            content,
        }
    }

    /// Whether this item is a conversational message.
    pub fn is_message(&self) -> bool {
        self.item_type == MESSAGE_ITEM_TYPE
    }

    /// Whether this item was produced by the assistant.
    ///
    /// Anything that is not explicitly the assistant counts as the user.
    pub fn is_assistant(&self) -> bool {
        self.role.as_deref() == Some("assistant")
    }

    /// Flatten the content parts into one string.
    ///
    /// Parts are joined with single spaces and the result is trimmed.
    pub fn flat_text(&self) -> String {
        self.content
            .iter()
            .filter_map(HistoryContent::display_text)
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_sdk_shape() {
        let json = r#"{
            "itemId": "item_1",
            "type": "message",
            "role": "assistant",
            "status": "in_progress",
            "content": [
                {"type": "output_audio", "transcript": "Hola"},
                {"type": "output_text", "text": "que tal"}
            ]
        }"#;
        let item: HistoryItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.item_id.as_deref(), Some("item_1"));
        assert!(item.is_message());
        assert!(item.is_assistant());
        assert_eq!(item.flat_text(), "Hola que tal");
    }

    #[test]
    fn test_deserialize_missing_fields() {
        let item: HistoryItem = serde_json::from_str(r#"{"type": "message"}"#).unwrap();
        assert!(item.item_id.is_none());
        assert!(!item.is_assistant());
        assert_eq!(item.flat_text(), "");

        let item: HistoryItem = serde_json::from_str(r#"{"id": "abc"}"#).unwrap();
        assert_eq!(item.item_id.as_deref(), Some("abc"));
        assert!(!item.is_message());
    }

    #[test]
    fn test_audio_without_transcript_is_skipped() {
        let item = HistoryItem::message(
            "a",
            "user",
            vec![
                HistoryContent::audio("input_audio", None),
                HistoryContent::text("input_text", "  hola  "),
            ],
        );
        assert_eq!(item.flat_text(), "hola");
    }
}
