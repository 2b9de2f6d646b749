//! Inline tool protocol module.
//!
//! The assistant drives the caller's UI by embedding command blocks inside its
//! natural-language output:
//!
//! ```text
//! Creamos tu campaña [TOOL_NAVIGATE]{"path":"/x"}[/TOOL_NAVIGATE]
//! ```
//!
//! # Wire Format
//!
//! - `[TAG]` + JSON body + `[/TAG]`, where `TAG` matches `TOOL_[A-Z0-9_]+`
//! - The closing tag must repeat the opening tag exactly
//! - `TOOL_UPDATE` carries a full-state snapshot object
//! - `TOOL_NAVIGATE` carries `{"path": "..."}`
//! - `TOOL_MISSING` (legacy) is remapped into an update carrying only `missing`
//! - Any other `TOOL_*` tag is stripped from the text and ignored
//!
//! # Example
//!
//! ```rust
//! use waav_session::core::protocol::{ToolCommand, decode};
//!
//! let decoded = decode(r#"hello [TOOL_UPDATE]{"a":1}[/TOOL_UPDATE]"#);
//! assert_eq!(decoded.clean_text, "hello");
//! assert!(matches!(decoded.commands[0], ToolCommand::Update(_)));
//! ```

mod codec;

pub use codec::{
    DecodedText, NavigatePayload, TOOL_MISSING, TOOL_NAVIGATE, TOOL_UPDATE, ToolCommand,
    ToolEvent, decode,
};
