//! HTTP clients for the application backend.
//!
//! The backend issues ephemeral realtime credentials and stores instruction
//! templates and session transcripts. Both clients share one
//! [`BackendClient`], which carries the base URL, the optional bearer key
//! and the request timeout.

mod client;
mod credentials;
mod error;
mod prompts;

pub use client::{BackendClient, DEFAULT_BACKEND_TIMEOUT};
pub use credentials::HttpCredentialIssuer;
pub use error::{BackendError, BackendResult};
pub use prompts::HttpPromptStore;
