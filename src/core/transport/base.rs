//! Base traits and types for realtime transports.
//!
//! A transport is one live conversation with the realtime provider. The
//! session controller owns it, subscribes to its history and error events,
//! and drives connect/send/mute/interrupt/close.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

use super::connection::ConnectionHost;
use super::microphone::MicrophoneHost;
use crate::core::history::HistoryItem;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Provider-specific error
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Microphone or other media could not be acquired
    #[error("Media access failed: {0}")]
    MediaAccess(String),

    /// The transport does not implement this operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// Credentials & Agent
// =============================================================================

/// Short-lived, single-use bearer value authorizing one transport handshake.
///
/// The secret is zeroized on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct EphemeralCredential {
    value: String,
    /// Expiry as a unix timestamp in seconds, if the issuer reported one
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl EphemeralCredential {
    pub fn new(value: impl Into<String>, expires_at: Option<u64>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// The bearer value.
    pub fn secret(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralCredential")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Drop for EphemeralCredential {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

/// Tool definition declared to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,
    /// Tool description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Agent configuration a transport session is bound to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent display name
    pub name: String,
    /// Compiled system instructions
    pub instructions: String,
    /// Declared tools
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    /// Voice ID for audio output
    #[serde(default)]
    pub voice: Option<String>,
}

// =============================================================================
// Callbacks
// =============================================================================

/// Async callback shape shared by every event the engine emits.
pub type AsyncCallback<T> =
    Arc<dyn Fn(T) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for history updates. Receives the full history every time.
pub type HistoryUpdatedCallback = AsyncCallback<Vec<HistoryItem>>;

/// Callback type for asynchronous transport errors.
pub type TransportErrorCallback = AsyncCallback<TransportError>;

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

/// A list of subscribers for one event kind.
///
/// Cloning shares the list, so a spawned task can emit into the same
/// subscribers the owner registers and removes.
pub struct Listeners<T> {
    inner: Arc<Mutex<Vec<(SubscriptionId, AsyncCallback<T>)>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone + Send + 'static> Listeners<T> {
    pub fn subscribe(&self, callback: AsyncCallback<T>) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.inner.lock().push((id, callback));
        id
    }

    /// Remove a subscriber. Returns whether it was registered here.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.len();
        inner.retain(|(sid, _)| *sid != id);
        inner.len() != before
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Deliver `value` to every current subscriber, in subscription order.
    pub async fn emit(&self, value: T) {
        // Snapshot so callbacks can (un)subscribe without deadlocking
        let callbacks: Vec<AsyncCallback<T>> =
            self.inner.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for cb in callbacks {
            cb(value.clone()).await;
        }
    }
}

// =============================================================================
// Transport Trait
// =============================================================================

/// Resources a transport may use while connecting.
///
/// Media connections must be created through `connections` and microphone
/// audio acquired through `microphone`, so the audio meter tap and the
/// capture-constraint patch apply to them.
#[derive(Clone)]
pub struct TransportContext {
    pub connections: Arc<ConnectionHost>,
    pub microphone: Arc<MicrophoneHost>,
}

/// One live realtime conversation with the provider.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Perform the handshake using a single-use credential.
    async fn connect(&mut self, credential: &EphemeralCredential) -> TransportResult<()>;

    /// Close the connection and release media. Idempotent.
    async fn close(&mut self) -> TransportResult<()>;

    /// Interrupt any in-progress response generation.
    async fn interrupt(&mut self) -> TransportResult<()>;

    /// Send a user text message.
    async fn send_message(&mut self, text: &str) -> TransportResult<()>;

    /// Whether `set_muted` affects the captured audio.
    fn supports_mute(&self) -> bool {
        false
    }

    /// Mute or unmute the microphone track.
    async fn set_muted(&mut self, _muted: bool) -> TransportResult<()> {
        Err(TransportError::Unsupported("mute".to_string()))
    }

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Subscribe to full-history updates.
    fn on_history_updated(&mut self, callback: HistoryUpdatedCallback) -> SubscriptionId;

    /// Subscribe to asynchronous errors.
    fn on_error(&mut self, callback: TransportErrorCallback) -> SubscriptionId;

    /// Remove a subscription made through `on_history_updated` or `on_error`.
    fn unsubscribe(&mut self, id: SubscriptionId);
}

/// Boxed trait object for transports.
pub type BoxedTransport = Box<dyn RealtimeTransport>;

/// Constructs transport sessions bound to an agent.
pub trait TransportFactory: Send + Sync {
    fn create(&self, agent: &AgentConfig, context: &TransportContext)
    -> TransportResult<BoxedTransport>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = EphemeralCredential::new("ek_secret", Some(10));
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("ek_secret"));
        assert_eq!(credential.secret(), "ek_secret");
    }

    #[test]
    fn test_error_display() {
        let err = TransportError::ConnectionFailed("test".to_string());
        assert!(err.to_string().contains("Connection failed"));
        assert_eq!(TransportError::NotConnected.to_string(), "Not connected");
    }

    #[tokio::test]
    async fn test_listeners_emit_and_unsubscribe() {
        let listeners: Listeners<u32> = Listeners::default();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let id = listeners.subscribe(Arc::new(move |v| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(v as usize, Ordering::SeqCst);
            })
        }));

        listeners.emit(2).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert!(listeners.unsubscribe(id));
        assert!(!listeners.unsubscribe(id));
        listeners.emit(5).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(listeners.is_empty());
    }
}
