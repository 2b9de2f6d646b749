//! Realtime transport module.
//!
//! This module provides the abstraction the session controller drives, plus
//! the two process-wide, replaceable resources transports go through:
//!
//! - [`ConnectionHost`] - the media connection constructor (tapped by the
//!   audio meter)
//! - [`MicrophoneHost`] - the microphone acquisition call (patched with
//!   capture-constraint defaults while a session is live)
//!
//! # Supported Providers
//!
//! - **OpenAI Realtime API** over WebSocket ([`OpenAIRealtimeTransport`])

mod base;
mod connection;
mod microphone;
pub mod openai;

pub use base::{
    AgentConfig, AsyncCallback, BoxedTransport, EphemeralCredential, HistoryUpdatedCallback,
    Listeners, RealtimeTransport, SubscriptionId, ToolDefinition, TransportContext,
    TransportError, TransportErrorCallback, TransportFactory, TransportResult,
};
pub use connection::{
    AudioSampleSource, ConnectionHost, MediaConnection, MediaConnectionFactory, PcmSampleBuffer,
    PeerConnection, PeerConnectionFactory, REMOTE_STREAM_IDLE, RemoteAudioStream, TrackListener,
};
pub use microphone::{
    AudioCaptureConstraints, CapturePatch, CaptureStream, MediaAcquirer, MicrophoneHost,
    NoMicrophone,
};
pub use openai::{
    OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, OpenAIRealtimeTransport,
    OpenAITransportConfig, OpenAITransportFactory,
};
