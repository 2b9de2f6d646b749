//! OpenAI Realtime transport implementation.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Auth: `Authorization: Bearer <ephemeral credential>`
//! - Protocol: WebSocket with JSON events
//! - Audio: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::config::{OPENAI_REALTIME_SAMPLE_RATE, OpenAITransportConfig};
use super::conversation::Conversation;
use super::messages::{
    ClientEvent, ConversationItem, InputAudioTranscription, ServerEvent, SessionConfig, ToolDef,
    TurnDetection,
};
use crate::core::history::HistoryItem;
use crate::core::transport::{
    AgentConfig, AudioCaptureConstraints, BoxedTransport, EphemeralCredential,
    HistoryUpdatedCallback, Listeners, PeerConnection, RealtimeTransport, SubscriptionId,
    TransportContext, TransportError, TransportErrorCallback, TransportFactory, TransportResult,
};

/// Channel capacity for outgoing WebSocket events.
const WS_CHANNEL_CAPACITY: usize = 256;

/// How long `close` waits for the socket to shut down cleanly.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Transport
// =============================================================================

/// One Realtime API conversation over WebSocket.
///
/// Remote audio is fed into a media connection created through the context's
/// [`ConnectionHost`](crate::core::transport::ConnectionHost), and microphone
/// audio is acquired through its
/// [`MicrophoneHost`](crate::core::transport::MicrophoneHost).
pub struct OpenAIRealtimeTransport {
    config: OpenAITransportConfig,
    agent: AgentConfig,
    context: TransportContext,
    /// Shared with the connection task
    connected: Arc<AtomicBool>,
    /// Shared with the capture task
    muted: Arc<AtomicBool>,
    ws_sender: Option<mpsc::Sender<ClientEvent>>,
    conversation: Arc<Mutex<Conversation>>,
    history_listeners: Listeners<Vec<HistoryItem>>,
    error_listeners: Listeners<TransportError>,
    connection: Option<Arc<dyn PeerConnection>>,
    connection_handle: Option<JoinHandle<()>>,
    capture_handle: Option<JoinHandle<()>>,
}

impl OpenAIRealtimeTransport {
    pub fn new(config: OpenAITransportConfig, agent: AgentConfig, context: TransportContext) -> Self {
        Self {
            config,
            agent,
            context,
            connected: Arc::new(AtomicBool::new(false)),
            muted: Arc::new(AtomicBool::new(false)),
            ws_sender: None,
            conversation: Arc::new(Mutex::new(Conversation::new())),
            history_listeners: Listeners::default(),
            error_listeners: Listeners::default(),
            connection: None,
            connection_handle: None,
            capture_handle: None,
        }
    }

    /// The agent this transport is bound to.
    pub fn agent(&self) -> &AgentConfig {
        &self.agent
    }

    /// Current history snapshot.
    pub fn history(&self) -> Vec<HistoryItem> {
        self.conversation.lock().history()
    }

    /// Build the `session.update` payload for the bound agent.
    fn build_session_config(&self) -> SessionConfig {
        let voice = self.config.voice_for(self.agent.voice.as_deref());
        let tools: Vec<ToolDef> = self.agent.tools.iter().map(ToolDef::from).collect();
        let tool_choice = (!tools.is_empty()).then(|| "auto".to_string());

        SessionConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: Some(self.agent.instructions.clone()),
            voice: Some(voice.as_str().to_string()),
            input_audio_format: Some("pcm16".to_string()),
            output_audio_format: Some("pcm16".to_string()),
            input_audio_transcription: self
                .config
                .input_transcription_model
                .clone()
                .map(|model| InputAudioTranscription { model }),
            turn_detection: self.config.audio_input.then_some(TurnDetection::ServerVad {
                threshold: None,
                silence_duration_ms: None,
            }),
            tools,
            tool_choice,
        }
    }

    async fn send_event(&self, event: ClientEvent) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let sender = self.ws_sender.as_ref().ok_or(TransportError::NotConnected)?;
        sender
            .send(event)
            .await
            .map_err(|_| TransportError::WebSocketError("connection task ended".to_string()))
    }

    async fn open_socket(&self, credential: &EphemeralCredential) -> TransportResult<WsStream> {
        let url = self.config.ws_url();
        let mut request = url.as_str().into_client_request().map_err(|e| {
            TransportError::InvalidConfiguration(format!("Invalid realtime URL {}: {}", url, e))
        })?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential.secret()))
            .map_err(|_| {
                TransportError::AuthenticationFailed(
                    "credential is not a valid header value".to_string(),
                )
            })?;
        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _response) =
            tokio_tungstenite::connect_async(request)
                .await
                .map_err(|e| match e {
                    tungstenite::Error::Http(response)
                        if matches!(response.status().as_u16(), 401 | 403) =>
                    {
                        TransportError::AuthenticationFailed(format!(
                            "realtime handshake rejected with {}",
                            response.status()
                        ))
                    }
                    other => TransportError::ConnectionFailed(other.to_string()),
                })?;

        Ok(ws_stream)
    }

    fn release(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        self.ws_sender = None;
        if let Some(handle) = self.capture_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.connection_handle.take() {
            handle.abort();
        }
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }
}

#[async_trait]
impl RealtimeTransport for OpenAIRealtimeTransport {
    async fn connect(&mut self, credential: &EphemeralCredential) -> TransportResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        if credential.secret().is_empty() {
            return Err(TransportError::AuthenticationFailed(
                "ephemeral credential is empty".to_string(),
            ));
        }

        let capture = if self.config.audio_input {
            let constraints = AudioCaptureConstraints {
                sample_rate: Some(OPENAI_REALTIME_SAMPLE_RATE),
                channel_count: Some(1),
                ..Default::default()
            };
            Some(self.context.microphone.acquire(constraints).await?)
        } else {
            None
        };

        let ws_stream = self.open_socket(credential).await?;
        tracing::info!("Connected to OpenAI Realtime API ({})", self.config.model);

        let connection = self.context.connections.create_connection();
        let (ws_sink, ws_stream) = ws_stream.split();
        let (tx, rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);

        self.connected.store(true, Ordering::SeqCst);
        let task = ConnectionTask {
            connected: self.connected.clone(),
            conversation: self.conversation.clone(),
            history: self.history_listeners.clone(),
            errors: self.error_listeners.clone(),
            connection: connection.clone(),
        };
        self.connection_handle = Some(tokio::spawn(task.run(ws_sink, ws_stream, rx)));
        self.connection = Some(connection);

        if let Some(mut capture) = capture {
            tracing::debug!("Streaming microphone capture {}", capture.id);
            let sender = tx.clone();
            let muted = self.muted.clone();
            self.capture_handle = Some(tokio::spawn(async move {
                while let Some(frame) = capture.frames.recv().await {
                    if muted.load(Ordering::SeqCst) {
                        continue;
                    }
                    if sender.send(ClientEvent::audio_append(&frame)).await.is_err() {
                        break;
                    }
                }
            }));
        }
        self.ws_sender = Some(tx);

        let session = self.build_session_config();
        if let Err(e) = self
            .send_event(ClientEvent::SessionUpdate { session })
            .await
        {
            self.release();
            return Err(e);
        }

        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);

        if let Some(handle) = self.capture_handle.take() {
            handle.abort();
        }
        // Dropping the sender makes the connection task send a close frame
        self.ws_sender = None;
        if let Some(mut handle) = self.connection_handle.take()
            && tokio::time::timeout(CLOSE_TIMEOUT, &mut handle)
                .await
                .is_err()
        {
            tracing::warn!("Realtime connection did not close in time, aborting");
            handle.abort();
        }
        if let Some(connection) = self.connection.take() {
            connection.close();
        }

        if was_connected {
            tracing::info!("Disconnected from OpenAI Realtime API");
        }
        Ok(())
    }

    async fn interrupt(&mut self) -> TransportResult<()> {
        self.send_event(ClientEvent::ResponseCancel).await
    }

    async fn send_message(&mut self, text: &str) -> TransportResult<()> {
        self.send_event(ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        })
        .await?;
        self.send_event(ClientEvent::ResponseCreate).await
    }

    fn supports_mute(&self) -> bool {
        true
    }

    async fn set_muted(&mut self, muted: bool) -> TransportResult<()> {
        self.muted.store(muted, Ordering::SeqCst);
        tracing::debug!("Microphone {}", if muted { "muted" } else { "unmuted" });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn on_history_updated(&mut self, callback: HistoryUpdatedCallback) -> SubscriptionId {
        self.history_listeners.subscribe(callback)
    }

    fn on_error(&mut self, callback: TransportErrorCallback) -> SubscriptionId {
        self.error_listeners.subscribe(callback)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        if !self.history_listeners.unsubscribe(id) {
            self.error_listeners.unsubscribe(id);
        }
    }
}

impl Drop for OpenAIRealtimeTransport {
    fn drop(&mut self) {
        self.release();
    }
}

// =============================================================================
// Connection Task
// =============================================================================

/// State the spawned reader/writer loop shares with the transport.
struct ConnectionTask {
    connected: Arc<AtomicBool>,
    conversation: Arc<Mutex<Conversation>>,
    history: Listeners<Vec<HistoryItem>>,
    errors: Listeners<TransportError>,
    connection: Arc<dyn PeerConnection>,
}

impl ConnectionTask {
    async fn run(
        self,
        mut ws_sink: SplitSink<WsStream, Message>,
        mut ws_stream: SplitStream<WsStream>,
        mut rx: mpsc::Receiver<ClientEvent>,
    ) {
        loop {
            tokio::select! {
                outgoing = rx.recv() => {
                    let Some(event) = outgoing else {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    };
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!("Failed to serialize event: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                        self.lost(TransportError::WebSocketError(e.to_string())).await;
                        break;
                    }
                }

                incoming = ws_stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => self.handle(event).await,
                            Err(e) => tracing::warn!("Failed to parse server event: {}", e),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            tracing::error!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        self.lost(TransportError::ConnectionFailed(
                            "connection closed by server".to_string(),
                        ))
                        .await;
                        break;
                    }
                    Some(Err(e)) => {
                        self.lost(TransportError::WebSocketError(e.to_string())).await;
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }

        tracing::debug!("OpenAI Realtime connection task ended");
    }

    async fn handle(&self, event: ServerEvent) {
        match &event {
            ServerEvent::Error { error } => {
                tracing::error!(
                    "OpenAI Realtime error: {} - {}",
                    error.error_type,
                    error.message
                );
                self.errors
                    .emit(TransportError::ProviderError(format!(
                        "{}: {}",
                        error.error_type, error.message
                    )))
                    .await;
                return;
            }
            ServerEvent::SessionCreated { session } => {
                tracing::info!("OpenAI Realtime session created: {}", session.id);
                return;
            }
            ServerEvent::SessionUpdated { session } => {
                tracing::debug!("OpenAI Realtime session updated: {}", session.id);
                return;
            }
            ServerEvent::AudioDelta { delta, .. } => {
                match ServerEvent::decode_pcm16(delta) {
                    Ok(samples) => self.connection.ingest_remote_pcm16(&samples),
                    Err(e) => tracing::error!("Failed to decode audio delta: {}", e),
                }
                return;
            }
            ServerEvent::ResponseDone { response } => {
                tracing::debug!("Response {} done ({})", response.id, response.status);
                return;
            }
            _ => {}
        }

        let snapshot = {
            let mut conversation = self.conversation.lock();
            conversation.apply(&event).then(|| conversation.history())
        };
        if let Some(history) = snapshot {
            self.history.emit(history).await;
        }
    }

    /// Report an unexpected loss of the connection.
    async fn lost(&self, error: TransportError) {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::error!("Realtime connection lost: {}", error);
            self.errors.emit(error).await;
        }
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Creates [`OpenAIRealtimeTransport`] sessions.
#[derive(Debug, Clone, Default)]
pub struct OpenAITransportFactory {
    config: OpenAITransportConfig,
}

impl OpenAITransportFactory {
    pub fn new(config: OpenAITransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OpenAITransportConfig {
        &self.config
    }
}

impl TransportFactory for OpenAITransportFactory {
    fn create(
        &self,
        agent: &AgentConfig,
        context: &TransportContext,
    ) -> TransportResult<BoxedTransport> {
        if self.config.model.trim().is_empty() {
            return Err(TransportError::InvalidConfiguration(
                "realtime model is required".to_string(),
            ));
        }
        Ok(Box::new(OpenAIRealtimeTransport::new(
            self.config.clone(),
            agent.clone(),
            context.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::{ConnectionHost, MicrophoneHost};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    fn context() -> TransportContext {
        TransportContext {
            connections: Arc::new(ConnectionHost::default()),
            microphone: Arc::new(MicrophoneHost::unavailable()),
        }
    }

    fn text_only(url: String) -> OpenAITransportConfig {
        OpenAITransportConfig {
            url,
            audio_input: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_session_config_from_agent() {
        let agent = AgentConfig {
            name: "assistant".to_string(),
            instructions: "Habla en español".to_string(),
            tools: vec![crate::core::transport::ToolDefinition {
                name: "noop".to_string(),
                description: None,
                parameters: None,
            }],
            voice: Some("sage".to_string()),
        };
        let transport =
            OpenAIRealtimeTransport::new(OpenAITransportConfig::default(), agent, context());
        let session = transport.build_session_config();

        assert_eq!(session.instructions.as_deref(), Some("Habla en español"));
        assert_eq!(session.voice.as_deref(), Some("sage"));
        assert_eq!(session.tools.len(), 1);
        assert_eq!(session.tool_choice.as_deref(), Some("auto"));
        assert!(session.turn_detection.is_some());
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let mut transport = OpenAIRealtimeTransport::new(
            OpenAITransportConfig::default(),
            AgentConfig::default(),
            context(),
        );
        assert!(matches!(
            transport.send_message("hola").await,
            Err(TransportError::NotConnected)
        ));
        assert!(transport.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_microphone_failure_fails_connect() {
        let mut transport = OpenAIRealtimeTransport::new(
            OpenAITransportConfig::default(),
            AgentConfig::default(),
            context(),
        );
        let result = transport
            .connect(&EphemeralCredential::new("ek_test", None))
            .await;
        assert!(matches!(result, Err(TransportError::MediaAccess(_))));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_handshake_and_history_updates() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (auth_tx, auth_rx) = oneshot::channel::<String>();
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<serde_json::Value>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_hdr_async(
                stream,
                move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                    let auth = request
                        .headers()
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let _ = auth_tx.send(auth);
                    Ok(response)
                },
            )
            .await
            .unwrap();

            let events = [
                r#"{"type":"session.created","session":{"id":"sess_1"}}"#,
                r#"{"type":"response.output_item.added","item":{"id":"a1","type":"message","role":"assistant","content":[]}}"#,
                r#"{"type":"response.text.delta","item_id":"a1","content_index":0,"delta":"Hola"}"#,
            ];
            for event in events {
                ws.send(Message::Text(event.to_string().into()))
                    .await
                    .unwrap();
            }

            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                    let _ = frames_tx.send(value);
                }
            }
        });

        let mut transport = OpenAIRealtimeTransport::new(
            text_only(format!("ws://{}/v1/realtime", addr)),
            AgentConfig {
                instructions: "be brief".to_string(),
                ..Default::default()
            },
            context(),
        );
        let (history_tx, mut history_rx) = mpsc::unbounded_channel::<Vec<HistoryItem>>();
        transport.on_history_updated(Arc::new(move |history| {
            let history_tx = history_tx.clone();
            Box::pin(async move {
                let _ = history_tx.send(history);
            })
        }));

        transport
            .connect(&EphemeralCredential::new("ek_test", None))
            .await
            .unwrap();
        assert!(transport.is_connected());
        assert_eq!(auth_rx.await.unwrap(), "Bearer ek_test");

        let first = frames_rx.recv().await.unwrap();
        assert_eq!(first["type"], "session.update");
        assert_eq!(first["session"]["instructions"], "be brief");

        let mut latest = Vec::new();
        while latest.first().map(HistoryItem::flat_text).as_deref() != Some("Hola") {
            latest = history_rx.recv().await.unwrap();
        }
        assert!(latest[0].is_assistant());

        transport.send_message("quiero una demo").await.unwrap();
        let create = frames_rx.recv().await.unwrap();
        assert_eq!(create["type"], "conversation.item.create");
        assert_eq!(create["item"]["content"][0]["text"], "quiero una demo");
        let respond = frames_rx.recv().await.unwrap();
        assert_eq!(respond["type"], "response.create");

        transport.interrupt().await.unwrap();
        assert_eq!(frames_rx.recv().await.unwrap()["type"], "response.cancel");

        transport.close().await.unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.interrupt().await,
            Err(TransportError::NotConnected)
        ));
    }
}
