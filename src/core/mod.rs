pub mod history;
pub mod meter;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-export commonly used types for convenience
pub use protocol::{DecodedText, NavigatePayload, ToolCommand, ToolEvent, decode};

pub use history::{ChatMessage, ChatRole, HistoryItem, HistoryReconciler};

pub use transport::{
    AgentConfig, BoxedTransport, ConnectionHost, EphemeralCredential, MicrophoneHost,
    OpenAIRealtimeTransport, OpenAITransportConfig, OpenAITransportFactory, RealtimeTransport,
    ToolDefinition, TransportContext, TransportError, TransportFactory, TransportResult,
};

pub use session::{
    AgentSpec, CredentialIssuer, InstructionTemplate, MuteMode, PromptStore, SessionController,
    SessionError, SessionOptions, SessionResult, SessionServices, SessionStatus, TranscriptEntry,
};

pub use meter::{AudioTapRegistry, RemoteAudioMeter, SoftwareAudioBackend};
