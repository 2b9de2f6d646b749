//! Prompt store backed by the application server.
//!
//! | Operation | Request |
//! |---|---|
//! | fetch template | `GET {base}/prompts/{profile}` → `{"template": "..."}`, 404 when absent |
//! | save template | `POST {base}/prompts/{profile}` with `{"template": "..."}` |
//! | save transcript | `POST {base}/sessions/{profile}/transcript` with `{"entries": [...]}` |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::client::BackendClient;
use super::error::BackendResult;
use crate::core::session::{PromptStore, SessionError, SessionResult, TranscriptEntry};

#[derive(Debug, Serialize)]
struct TemplateBody<'a> {
    template: &'a str,
}

#[derive(Debug, Deserialize)]
struct TemplateResponse {
    #[serde(default)]
    template: Option<String>,
}

#[derive(Debug, Serialize)]
struct TranscriptBody<'a> {
    entries: &'a [TranscriptEntry],
}

/// [`PromptStore`] calling the application backend.
#[derive(Debug, Clone)]
pub struct HttpPromptStore {
    client: BackendClient,
}

impl HttpPromptStore {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    async fn get_template(&self, profile_id: &str) -> BackendResult<Option<String>> {
        let url = self.client.endpoint(&["prompts", profile_id])?;
        let response: Option<TemplateResponse> = self.client.get_json(url, &[]).await?;
        Ok(response
            .and_then(|r| r.template)
            .filter(|t| !t.trim().is_empty()))
    }

    async fn put_template(&self, profile_id: &str, template: &str) -> BackendResult<()> {
        let url = self.client.endpoint(&["prompts", profile_id])?;
        self.client.post_json(url, &TemplateBody { template }).await
    }

    async fn put_transcript(&self, profile_id: &str, entries: &[TranscriptEntry]) -> BackendResult<()> {
        let url = self.client.endpoint(&["sessions", profile_id, "transcript"])?;
        self.client.post_json(url, &TranscriptBody { entries }).await
    }
}

fn store_error(e: impl std::fmt::Display) -> SessionError {
    SessionError::PromptStore(e.to_string())
}

#[async_trait]
impl PromptStore for HttpPromptStore {
    async fn fetch_template(&self, profile_id: &str) -> SessionResult<Option<String>> {
        self.get_template(profile_id).await.map_err(store_error)
    }

    async fn save_template(&self, profile_id: &str, template: &str) -> SessionResult<()> {
        self.put_template(profile_id, template)
            .await
            .map_err(store_error)
    }

    async fn save_transcript(
        &self,
        profile_id: &str,
        entries: &[TranscriptEntry],
    ) -> SessionResult<()> {
        self.put_transcript(profile_id, entries)
            .await
            .map_err(store_error)
    }
}
