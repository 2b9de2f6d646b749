//! Session lifecycle controller.
//!
//! [`SessionController`] owns one realtime conversation:
//!
//! ```text
//! disconnected --connect()--> connecting --ok--> connected
//!                                  |                  |
//!                               failure          disconnect()
//!                                  v                  v
//!                            disconnected <-- disconnecting
//! ```
//!
//! `connect()` installs the microphone capture-constraint patch, obtains an
//! ephemeral credential, builds the agent from the instruction template, and
//! hands the transport's history updates to the history reconciler. Decoded
//! tool events reach subscribers registered with
//! [`SessionController::on_tool_event`], at most once per message.
//!
//! Calling `connect()` while connecting or connected, or `disconnect()` while
//! already disconnecting or disconnected, does nothing. A disconnect during
//! `connecting` cancels the attempt.

mod agent;
mod controller;
mod error;
mod services;

pub use agent::{AgentSpec, DEFAULT_TEMPLATE, InstructionTemplate};
pub use controller::{
    DEFAULT_CREDENTIAL_TTL_SECONDS, DEFAULT_RESTART_DELAY, MessagesCallback, MuteMode,
    SessionController, SessionOptions, SessionServices, SessionStatus, ToolEventCallback,
};
pub use error::{SessionError, SessionResult};
pub use services::{
    CredentialIssuer, PromptStore, TEMPLATE_MARKERS, TranscriptEntry, is_compatible_template,
    resolve_template,
};
