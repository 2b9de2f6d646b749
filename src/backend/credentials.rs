//! Ephemeral credential issuer backed by the application server.
//!
//! `GET {base}/realtime/session?ttl=<seconds>` answers either
//! `{"value": "...", "expires_at": 1700000000}` or the provider's own
//! `{"client_secret": {"value": "...", "expires_at": ...}}` shape.

use async_trait::async_trait;
use serde::Deserialize;

use super::client::BackendClient;
use super::error::{BackendError, BackendResult};
use crate::core::session::{CredentialIssuer, SessionError, SessionResult};
use crate::core::transport::EphemeralCredential;

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: String,
    #[serde(default)]
    expires_at: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CredentialResponse {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    expires_at: Option<u64>,
    #[serde(default)]
    client_secret: Option<ClientSecret>,
}

impl CredentialResponse {
    fn into_credential(self) -> BackendResult<EphemeralCredential> {
        let (value, expires_at) = match (self.value, self.client_secret) {
            (Some(value), _) => (value, self.expires_at),
            (None, Some(secret)) => (secret.value, secret.expires_at.or(self.expires_at)),
            (None, None) => {
                return Err(BackendError::Decode(
                    "response carries no credential value".to_string(),
                ));
            }
        };
        if value.trim().is_empty() {
            return Err(BackendError::Decode("credential value is empty".to_string()));
        }
        Ok(EphemeralCredential::new(value, expires_at))
    }
}

/// [`CredentialIssuer`] calling the application backend.
#[derive(Debug, Clone)]
pub struct HttpCredentialIssuer {
    client: BackendClient,
}

impl HttpCredentialIssuer {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    async fn request(&self, ttl_seconds: u32) -> BackendResult<EphemeralCredential> {
        let url = self.client.endpoint(&["realtime", "session"])?;
        let response: Option<CredentialResponse> = self
            .client
            .get_json(url, &[("ttl", ttl_seconds.to_string())])
            .await?;

        match response {
            Some(response) => response.into_credential(),
            None => Err(BackendError::Status {
                status: 404,
                body: "credential endpoint not found".to_string(),
            }),
        }
    }
}

#[async_trait]
impl CredentialIssuer for HttpCredentialIssuer {
    async fn issue(&self, ttl_seconds: u32) -> SessionResult<EphemeralCredential> {
        self.request(ttl_seconds).await.map_err(|e| {
            tracing::error!("Credential request failed: {}", e);
            SessionError::Credential(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> BackendResult<EphemeralCredential> {
        serde_json::from_str::<CredentialResponse>(json)
            .unwrap()
            .into_credential()
    }

    #[test]
    fn test_flat_response() {
        let credential = parse(r#"{"value":"ek_123","expires_at":1700000000}"#).unwrap();
        assert_eq!(credential.secret(), "ek_123");
        assert_eq!(credential.expires_at, Some(1_700_000_000));
    }

    #[test]
    fn test_client_secret_response() {
        let credential =
            parse(r#"{"id":"sess_1","client_secret":{"value":"ek_456","expires_at":42}}"#)
                .unwrap();
        assert_eq!(credential.secret(), "ek_456");
        assert_eq!(credential.expires_at, Some(42));
    }

    #[test]
    fn test_missing_value() {
        assert!(matches!(parse("{}"), Err(BackendError::Decode(_))));
        assert!(matches!(
            parse(r#"{"value":"  "}"#),
            Err(BackendError::Decode(_))
        ));
    }
}
