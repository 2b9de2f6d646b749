//! OpenAI Realtime API transport.
//!
//! A [`RealtimeTransport`](crate::core::transport::RealtimeTransport) over the
//! Realtime WebSocket API, authenticated with a single-use ephemeral
//! credential.
//!
//! The transport keeps a local mirror of the conversation, built from item and
//! delta events, and hands the full history to its subscribers after every
//! change. Assistant audio is decoded and pushed into the media connection it
//! created through the connection host, which is where the audio meter picks
//! it up.
//!
//! # Audio Format
//!
//! Input and output audio is PCM 16-bit signed little-endian at 24kHz.

mod client;
mod config;
mod conversation;
mod messages;

pub use client::{OpenAIRealtimeTransport, OpenAITransportFactory};
pub use config::{
    DEFAULT_REALTIME_MODEL, OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, OpenAIRealtimeVoice,
    OpenAITransportConfig,
};
pub use conversation::Conversation;
pub use messages::{ClientEvent, ConversationItem, ServerEvent, SessionConfig};
