use thiserror::Error;

use crate::core::transport::TransportError;

/// Errors surfaced by the session controller.
///
/// `Clone` so the controller can keep the last error for `error()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The credential issuer rejected the request or was unreachable
    #[error("Credential request failed: {0}")]
    Credential(String),

    /// Microphone or other media could not be acquired
    #[error("Media access failed: {0}")]
    MediaAccess(String),

    /// The realtime transport failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The prompt store failed
    #[error("Prompt store error: {0}")]
    PromptStore(String),

    /// Invalid session configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The operation needs a connected session
    #[error("Session is not connected")]
    NotConnected,
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::MediaAccess(msg) => SessionError::MediaAccess(msg),
            TransportError::InvalidConfiguration(msg) => SessionError::Configuration(msg),
            TransportError::NotConnected => SessionError::NotConnected,
            other => SessionError::Transport(other.to_string()),
        }
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_mapping() {
        assert_eq!(
            SessionError::from(TransportError::MediaAccess("denied".to_string())),
            SessionError::MediaAccess("denied".to_string())
        );
        assert_eq!(
            SessionError::from(TransportError::NotConnected),
            SessionError::NotConnected
        );
        let err = SessionError::from(TransportError::WebSocketError("reset".to_string()));
        assert_eq!(err.to_string(), "Transport error: WebSocket error: reset");
    }
}
