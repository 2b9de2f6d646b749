//! External services the controller consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::error::SessionResult;
use crate::core::history::{ChatMessage, ChatRole};
use crate::core::transport::EphemeralCredential;

/// Markers a stored template must contain to be used instead of the default.
pub const TEMPLATE_MARKERS: [&str; 2] = ["[TOOL_UPDATE]", "[TOOL_NAVIGATE]"];

/// Issues short-lived credentials for one transport handshake.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self, ttl_seconds: u32) -> SessionResult<EphemeralCredential>;
}

/// Remote storage for instruction templates and session transcripts.
#[async_trait]
pub trait PromptStore: Send + Sync {
    /// The stored template of a profile, `None` if there is none.
    async fn fetch_template(&self, profile_id: &str) -> SessionResult<Option<String>>;

    async fn save_template(&self, profile_id: &str, template: &str) -> SessionResult<()>;

    async fn save_transcript(
        &self,
        profile_id: &str,
        entries: &[TranscriptEntry],
    ) -> SessionResult<()>;
}

/// One persisted transcript line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: ChatRole,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl From<&ChatMessage> for TranscriptEntry {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            text: message.text.clone(),
            timestamp: message.created_at,
        }
    }
}

/// Whether a stored template carries every structural marker.
pub fn is_compatible_template(template: &str) -> bool {
    TEMPLATE_MARKERS
        .iter()
        .all(|marker| template.contains(marker))
}

/// The profile's stored template, or `default` when it is missing,
/// unreachable, or lacks the structural markers.
pub async fn resolve_template(store: &dyn PromptStore, profile_id: &str, default: &str) -> String {
    match store.fetch_template(profile_id).await {
        Ok(Some(template)) if is_compatible_template(&template) => {
            tracing::debug!("Using stored template for profile {}", profile_id);
            template
        }
        Ok(Some(_)) => {
            tracing::warn!(
                "Stored template for profile {} lacks tool markers, using default",
                profile_id
            );
            default.to_string()
        }
        Ok(None) => {
            tracing::debug!("No stored template for profile {}", profile_id);
            default.to_string()
        }
        Err(e) => {
            tracing::warn!(
                "Failed to fetch template for profile {}: {}, using default",
                profile_id,
                e
            );
            default.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::SessionError;

    struct FixedStore(SessionResult<Option<String>>);

    #[async_trait]
    impl PromptStore for FixedStore {
        async fn fetch_template(&self, _profile_id: &str) -> SessionResult<Option<String>> {
            self.0.clone()
        }

        async fn save_template(&self, _profile_id: &str, _template: &str) -> SessionResult<()> {
            Ok(())
        }

        async fn save_transcript(
            &self,
            _profile_id: &str,
            _entries: &[TranscriptEntry],
        ) -> SessionResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_resolve_template_fallbacks() {
        let good = "Use [TOOL_UPDATE] and [TOOL_NAVIGATE] blocks";

        let store = FixedStore(Ok(Some(good.to_string())));
        assert_eq!(resolve_template(&store, "p", "default").await, good);

        let store = FixedStore(Ok(Some("only [TOOL_UPDATE]".to_string())));
        assert_eq!(resolve_template(&store, "p", "default").await, "default");

        let store = FixedStore(Ok(None));
        assert_eq!(resolve_template(&store, "p", "default").await, "default");

        let store = FixedStore(Err(SessionError::PromptStore("503".to_string())));
        assert_eq!(resolve_template(&store, "p", "default").await, "default");
    }

    #[test]
    fn test_transcript_entry_serialization() {
        let entry = TranscriptEntry {
            role: ChatRole::Assistant,
            text: "Hola".to_string(),
            timestamp: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["timestamp"], "1970-01-01T00:00:00Z");
    }
}
