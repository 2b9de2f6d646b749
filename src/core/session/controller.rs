//! Session lifecycle controller.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::agent::AgentSpec;
use super::error::{SessionError, SessionResult};
use super::services::{CredentialIssuer, PromptStore, TranscriptEntry};
use crate::core::history::{ChatMessage, HistoryItem, HistoryReconciler, Reconciliation};
use crate::core::protocol::ToolEvent;
use crate::core::transport::{
    AsyncCallback, AudioCaptureConstraints, BoxedTransport, CapturePatch, ConnectionHost,
    Listeners, MicrophoneHost, SubscriptionId, TransportContext, TransportError, TransportFactory,
};

/// Default pause between the disconnect and connect halves of a restart.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(300);

/// Default credential lifetime requested from the issuer.
pub const DEFAULT_CREDENTIAL_TTL_SECONDS: u32 = 600;

// =============================================================================
// State
// =============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Disconnected => write!(f, "disconnected"),
            SessionStatus::Connecting => write!(f, "connecting"),
            SessionStatus::Connected => write!(f, "connected"),
            SessionStatus::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// How `toggle_mute` takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteMode {
    /// The transport mutes the captured audio
    Transport,
    /// Only the local flag changes; audio keeps flowing
    LocalOnly,
}

/// Callback receiving each dispatched tool event.
pub type ToolEventCallback = AsyncCallback<ToolEvent>;

/// Callback receiving the full message list whenever it changes.
pub type MessagesCallback = AsyncCallback<Vec<ChatMessage>>;

/// Tunables of a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Profile used for transcript persistence
    pub profile_id: String,
    pub credential_ttl_seconds: u32,
    pub restart_delay: Duration,
    pub persist_transcripts: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            profile_id: "default".to_string(),
            credential_ttl_seconds: DEFAULT_CREDENTIAL_TTL_SECONDS,
            restart_delay: DEFAULT_RESTART_DELAY,
            persist_transcripts: true,
        }
    }
}

/// Collaborators of a controller.
#[derive(Clone)]
pub struct SessionServices {
    pub credentials: Arc<dyn CredentialIssuer>,
    pub transports: Arc<dyn TransportFactory>,
    pub connections: Arc<ConnectionHost>,
    pub microphone: Arc<MicrophoneHost>,
    pub prompts: Option<Arc<dyn PromptStore>>,
}

impl SessionServices {
    pub fn new(
        credentials: Arc<dyn CredentialIssuer>,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            credentials,
            transports,
            connections: Arc::new(ConnectionHost::default()),
            microphone: Arc::new(MicrophoneHost::default()),
            prompts: None,
        }
    }

    pub fn with_connections(mut self, connections: Arc<ConnectionHost>) -> Self {
        self.connections = connections;
        self
    }

    pub fn with_microphone(mut self, microphone: Arc<MicrophoneHost>) -> Self {
        self.microphone = microphone;
        self
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptStore>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    fn transport_context(&self) -> TransportContext {
        TransportContext {
            connections: self.connections.clone(),
            microphone: self.microphone.clone(),
        }
    }
}

struct ActiveTransport {
    transport: BoxedTransport,
    subscriptions: Vec<SubscriptionId>,
}

impl ActiveTransport {
    /// Unsubscribe and close, ignoring failures.
    async fn discard(mut self) {
        for id in self.subscriptions.drain(..) {
            self.transport.unsubscribe(id);
        }
        if let Err(e) = self.transport.close().await {
            tracing::debug!("Closing discarded transport failed: {}", e);
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

struct ControllerInner {
    services: SessionServices,
    options: SessionOptions,
    agent: RwLock<AgentSpec>,
    status: watch::Sender<SessionStatus>,
    messages: RwLock<Vec<ChatMessage>>,
    error: RwLock<Option<SessionError>>,
    muted: AtomicBool,
    transport_mute: AtomicBool,
    reconciler: Mutex<HistoryReconciler>,
    tool_listeners: Listeners<ToolEvent>,
    message_listeners: Listeners<Vec<ChatMessage>>,
    /// Bumped by every connect and disconnect; a connect whose epoch is no
    /// longer current has been cancelled.
    epoch: AtomicU64,
    transport: tokio::sync::Mutex<Option<ActiveTransport>>,
    /// Capture-constraint patch and the epoch of the connect that installed it
    mic_patch: Mutex<Option<(u64, CapturePatch)>>,
}

impl ControllerInner {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn set_error(&self, error: SessionError) {
        *self.error.write() = Some(error);
    }

    fn install_mic_patch(&self, epoch: u64) {
        let patch = self
            .services
            .microphone
            .install_constraint_patch(AudioCaptureConstraints::voice_defaults());
        let previous = self.mic_patch.lock().replace((epoch, patch));
        if let Some((stale, previous)) = previous {
            tracing::debug!("Restoring leftover capture patch from attempt {}", stale);
            previous.restore();
        }
    }

    /// Restore the capture patch if `epoch` owns it (or any patch if `None`).
    fn restore_mic_patch(&self, epoch: Option<u64>) {
        let patch = {
            let mut slot = self.mic_patch.lock();
            match (slot.as_ref(), epoch) {
                (Some((owner, _)), Some(epoch)) if *owner != epoch => None,
                _ => slot.take(),
            }
        };
        if let Some((_, patch)) = patch {
            patch.restore();
        }
    }

    async fn handle_history(&self, history: Vec<HistoryItem>) {
        let Reconciliation { messages, events } = self.reconciler.lock().reconcile(&history);

        let changed = {
            let mut current = self.messages.write();
            if *current != messages {
                current.clone_from(&messages);
                true
            } else {
                false
            }
        };
        if changed {
            self.message_listeners.emit(messages).await;
        }

        for event in events {
            tracing::info!(
                "Dispatching {} tool event from message {}",
                event.command.kind(),
                event.message_id
            );
            self.tool_listeners.emit(event).await;
        }
    }

    fn handle_transport_error(&self, error: TransportError) {
        tracing::warn!("Transport reported error: {}", error);
        self.set_error(SessionError::from(error));
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        if let Some((_, patch)) = self.mic_patch.get_mut().take() {
            patch.restore();
        }
    }
}

/// Owns the lifecycle of one realtime conversation.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    pub fn new(services: SessionServices, agent: AgentSpec, options: SessionOptions) -> Self {
        let (status, _) = watch::channel(SessionStatus::Disconnected);
        Self {
            inner: Arc::new(ControllerInner {
                services,
                options,
                agent: RwLock::new(agent),
                status,
                messages: RwLock::new(Vec::new()),
                error: RwLock::new(None),
                muted: AtomicBool::new(false),
                transport_mute: AtomicBool::new(false),
                reconciler: Mutex::new(HistoryReconciler::new()),
                tool_listeners: Listeners::default(),
                message_listeners: Listeners::default(),
                epoch: AtomicU64::new(0),
                transport: tokio::sync::Mutex::new(None),
                mic_patch: Mutex::new(None),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Observation
    // -------------------------------------------------------------------------

    pub fn status(&self) -> SessionStatus {
        *self.inner.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// Current display messages.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.messages.read().clone()
    }

    /// Last connection-level error. Cleared when the next connect starts.
    pub fn error(&self) -> Option<SessionError> {
        self.inner.error.read().clone()
    }

    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::SeqCst)
    }

    /// Whether muting reaches the media track.
    pub fn mute_mode(&self) -> MuteMode {
        if self.inner.transport_mute.load(Ordering::SeqCst) {
            MuteMode::Transport
        } else {
            MuteMode::LocalOnly
        }
    }

    pub fn agent(&self) -> AgentSpec {
        self.inner.agent.read().clone()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    pub fn on_tool_event(&self, callback: ToolEventCallback) -> SubscriptionId {
        self.inner.tool_listeners.subscribe(callback)
    }

    pub fn on_messages(&self, callback: MessagesCallback) -> SubscriptionId {
        self.inner.message_listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if !self.inner.tool_listeners.unsubscribe(id) {
            self.inner.message_listeners.unsubscribe(id);
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Open the session. A no-op unless the session is disconnected.
    pub async fn connect(&self) -> SessionResult<()> {
        let inner = &self.inner;
        let mut epoch = 0;
        let started = inner.status.send_if_modified(|status| {
            if *status != SessionStatus::Disconnected {
                return false;
            }
            epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            *status = SessionStatus::Connecting;
            true
        });
        if !started {
            tracing::debug!("connect() ignored while {}", self.status());
            return Ok(());
        }

        *inner.error.write() = None;
        tracing::info!("Connecting session (attempt {})", epoch);

        let active = match self.open(epoch).await {
            Ok(Some(active)) => active,
            Ok(None) => {
                tracing::info!("Connect attempt {} was cancelled", epoch);
                inner.restore_mic_patch(Some(epoch));
                return Ok(());
            }
            Err(e) => {
                inner.restore_mic_patch(Some(epoch));
                let failed = inner.status.send_if_modified(|status| {
                    if *status == SessionStatus::Connecting && inner.is_current(epoch) {
                        *status = SessionStatus::Disconnected;
                        true
                    } else {
                        false
                    }
                });
                if failed {
                    tracing::error!("Connect failed: {}", e);
                    inner.set_error(e.clone());
                }
                return Err(e);
            }
        };

        let mut slot = inner.transport.lock().await;
        let connected = inner.status.send_if_modified(|status| {
            if *status == SessionStatus::Connecting && inner.is_current(epoch) {
                *status = SessionStatus::Connected;
                true
            } else {
                false
            }
        });

        if connected {
            inner
                .transport_mute
                .store(active.transport.supports_mute(), Ordering::SeqCst);
            *slot = Some(active);
            tracing::info!("Session connected");
        } else {
            drop(slot);
            tracing::info!("Connect attempt {} finished after cancellation", epoch);
            active.discard().await;
            inner.restore_mic_patch(Some(epoch));
        }
        Ok(())
    }

    /// Connect steps (a) to (g). `Ok(None)` when the attempt went stale.
    async fn open(&self, epoch: u64) -> SessionResult<Option<ActiveTransport>> {
        let inner = &self.inner;

        inner.install_mic_patch(epoch);

        let credential = inner
            .services
            .credentials
            .issue(inner.options.credential_ttl_seconds)
            .await?;
        if !inner.is_current(epoch) {
            return Ok(None);
        }
        tracing::debug!("Obtained ephemeral credential");

        let agent = inner.agent.read().to_agent_config();
        let mut transport = inner
            .services
            .transports
            .create(&agent, &inner.services.transport_context())?;

        let weak: Weak<ControllerInner> = Arc::downgrade(&self.inner);
        let history_sub = transport.on_history_updated(Arc::new(move |history| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_history(history).await;
                }
            })
        }));
        let weak: Weak<ControllerInner> = Arc::downgrade(&self.inner);
        let error_sub = transport.on_error(Arc::new(move |error| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_transport_error(error);
                }
            })
        }));

        let mut active = ActiveTransport {
            transport,
            subscriptions: vec![history_sub, error_sub],
        };

        if let Err(e) = active.transport.connect(&credential).await {
            active.discard().await;
            return Err(SessionError::from(e));
        }
        if !inner.is_current(epoch) {
            active.discard().await;
            return Ok(None);
        }

        if inner.muted.load(Ordering::SeqCst)
            && active.transport.supports_mute()
            && let Err(e) = active.transport.set_muted(true).await
        {
            tracing::warn!("Failed to apply mute on connect: {}", e);
        }

        Ok(Some(active))
    }

    /// Tear the session down. A no-op unless connecting or connected.
    pub async fn disconnect(&self) -> SessionResult<()> {
        let inner = &self.inner;
        let began = inner.status.send_if_modified(|status| match *status {
            SessionStatus::Connecting | SessionStatus::Connected => {
                inner.epoch.fetch_add(1, Ordering::SeqCst);
                *status = SessionStatus::Disconnecting;
                true
            }
            _ => false,
        });
        if !began {
            return Ok(());
        }
        tracing::info!("Disconnecting session");

        let active = inner.transport.lock().await.take();
        if let Some(mut active) = active {
            if let Err(e) = active.transport.interrupt().await {
                tracing::debug!("Interrupt before close failed: {}", e);
            }
            for id in active.subscriptions.drain(..) {
                active.transport.unsubscribe(id);
            }
            if let Err(e) = active.transport.close().await {
                tracing::warn!("Closing transport failed: {}", e);
            }
        }

        inner.restore_mic_patch(None);
        inner.muted.store(false, Ordering::SeqCst);
        inner.transport_mute.store(false, Ordering::SeqCst);

        inner.status.send_replace(SessionStatus::Disconnected);
        tracing::info!("Session disconnected");

        self.persist_transcript().await;
        Ok(())
    }

    /// Disconnect, wait the restart delay, and connect again.
    pub async fn restart(&self) -> SessionResult<()> {
        tracing::info!("Restarting session");
        self.disconnect().await?;
        tokio::time::sleep(self.inner.options.restart_delay).await;
        self.connect().await
    }

    /// Replace the agent; a live session restarts to apply it.
    pub async fn update_agent(&self, agent: AgentSpec) -> SessionResult<()> {
        *self.inner.agent.write() = agent;
        match self.status() {
            SessionStatus::Connecting | SessionStatus::Connected => self.restart().await,
            _ => Ok(()),
        }
    }

    /// Disconnect and drop every subscriber.
    pub async fn shutdown(&self) -> SessionResult<()> {
        self.disconnect().await?;
        self.inner.tool_listeners.clear();
        self.inner.message_listeners.clear();
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Interaction
    // -------------------------------------------------------------------------

    /// Send a user text message. Ignored unless connected or when blank.
    pub async fn send_text(&self, text: &str) -> SessionResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        if self.status() != SessionStatus::Connected {
            tracing::debug!("send_text() ignored while {}", self.status());
            return Ok(());
        }

        let mut slot = self.inner.transport.lock().await;
        match slot.as_mut() {
            Some(active) => Ok(active.transport.send_message(text).await?),
            None => Ok(()),
        }
    }

    /// Flip the mute flag. Returns the new value.
    pub async fn toggle_mute(&self) -> SessionResult<bool> {
        let muted = !self.is_muted();

        let mut slot = self.inner.transport.lock().await;
        match slot.as_mut() {
            Some(active) if active.transport.supports_mute() => {
                active.transport.set_muted(muted).await?;
            }
            _ => tracing::debug!("Mute is local only"),
        }
        drop(slot);

        self.inner.muted.store(muted, Ordering::SeqCst);
        Ok(muted)
    }

    async fn persist_transcript(&self) {
        let inner = &self.inner;
        if !inner.options.persist_transcripts {
            return;
        }
        let Some(store) = inner.services.prompts.clone() else {
            return;
        };

        let entries: Vec<TranscriptEntry> = inner
            .messages
            .read()
            .iter()
            .map(TranscriptEntry::from)
            .collect();
        if entries.is_empty() {
            return;
        }

        match store
            .save_transcript(&inner.options.profile_id, &entries)
            .await
        {
            Ok(()) => tracing::debug!("Persisted {} transcript entries", entries.len()),
            Err(e) => tracing::warn!("Failed to persist transcript: {}", e),
        }
    }
}
