pub mod backend;
pub mod config;
pub mod core;
pub mod utils;

// Re-export commonly used items for convenience
pub use backend::{BackendClient, BackendError, HttpCredentialIssuer, HttpPromptStore};
pub use config::{ConfigError, EngineConfig};
pub use crate::core::*;
