//! Tool block codec.
//!
//! [`decode`] is a pure function over a (possibly still streaming) prefix of an
//! assistant message. It is re-run on every incremental history update, so it
//! never fails: malformed bodies are dropped together with their block.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Full-state snapshot tag.
pub const TOOL_UPDATE: &str = "TOOL_UPDATE";
/// Navigation tag.
pub const TOOL_NAVIGATE: &str = "TOOL_NAVIGATE";
/// Legacy missing-fields tag, remapped into an update.
pub const TOOL_MISSING: &str = "TOOL_MISSING";

/// Start of any tool block. Used to hide unterminated blocks while streaming.
const OPEN_PREFIX: &str = "[TOOL_";

static OPEN_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(TOOL_[A-Z0-9_]+)\]").expect("valid tool tag regex"));

// =============================================================================
// Types
// =============================================================================

/// Payload of a navigate command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigatePayload {
    /// Destination path inside the caller's application
    pub path: String,
}

/// One decoded command, not yet bound to the turn it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum ToolCommand {
    /// Authoritative snapshot of the caller-side state keys it carries.
    Update(Map<String, Value>),
    /// Navigate the caller to a path.
    Navigate(NavigatePayload),
}

impl ToolCommand {
    /// Wire name of the command kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolCommand::Update(_) => "update",
            ToolCommand::Navigate(_) => "navigate",
        }
    }
}

/// A decoded command tied to the message it was decoded from.
///
/// `message_id` is the de-duplication key used by the history reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEvent {
    #[serde(flatten)]
    pub command: ToolCommand,
    #[serde(rename = "messageId")]
    pub message_id: String,
}

impl ToolEvent {
    pub fn new(message_id: impl Into<String>, command: ToolCommand) -> Self {
        Self {
            command,
            message_id: message_id.into(),
        }
    }
}

/// Result of decoding one assistant text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedText {
    /// Text safe to show to the user: no complete or partial tool blocks, trimmed.
    pub clean_text: String,
    /// Commands in document order.
    pub commands: Vec<ToolCommand>,
}

// =============================================================================
// Decoding
// =============================================================================

/// A complete `[TAG]body[/TAG]` region.
struct Block<'a> {
    start: usize,
    end: usize,
    tag: &'a str,
    body: &'a str,
}

/// Decode every complete tool block in `text` and return the display text.
pub fn decode(text: &str) -> DecodedText {
    let blocks = find_blocks(text);

    let mut stripped = String::with_capacity(text.len());
    let mut commands = Vec::new();
    let mut cursor = 0;

    for block in &blocks {
        stripped.push_str(&text[cursor..block.start]);
        cursor = block.end;

        if let Some(command) = decode_block(block.tag, block.body) {
            commands.push(command);
        }
    }
    stripped.push_str(&text[cursor..]);

    // Hide a block that is still being streamed
    if let Some(idx) = stripped.find(OPEN_PREFIX) {
        stripped.truncate(idx);
    }

    DecodedText {
        clean_text: stripped.trim().to_string(),
        commands,
    }
}

/// Find all complete, non-overlapping blocks, leftmost first.
///
/// An opening tag without its matching closing tag is skipped and the scan
/// continues after it, so a later well-formed block is still found.
fn find_blocks(text: &str) -> Vec<Block<'_>> {
    let mut blocks = Vec::new();
    let mut search_from = 0;

    while search_from < text.len() {
        let Some(caps) = OPEN_TAG_RE.captures_at(text, search_from) else {
            break;
        };
        let (Some(open), Some(tag)) = (caps.get(0), caps.get(1)) else {
            break;
        };

        let closing = format!("[/{}]", tag.as_str());
        match text[open.end()..].find(&closing) {
            Some(rel) => {
                let body_end = open.end() + rel;
                blocks.push(Block {
                    start: open.start(),
                    end: body_end + closing.len(),
                    tag: tag.as_str(),
                    body: &text[open.end()..body_end],
                });
                search_from = body_end + closing.len();
            }
            None => {
                // '[' is one byte, so this stays on a char boundary
                search_from = open.start() + 1;
            }
        }
    }

    blocks
}

fn decode_block(tag: &str, body: &str) -> Option<ToolCommand> {
    match tag {
        TOOL_UPDATE => match parse_body(tag, body)? {
            Value::Object(map) => Some(ToolCommand::Update(map)),
            _ => {
                tracing::debug!("{} body is not an object, dropping block", tag);
                None
            }
        },
        TOOL_NAVIGATE => match serde_json::from_value::<NavigatePayload>(parse_body(tag, body)?) {
            Ok(payload) => Some(ToolCommand::Navigate(payload)),
            Err(e) => {
                tracing::debug!("{} body has no usable path: {}", tag, e);
                None
            }
        },
        TOOL_MISSING => {
            let parsed = parse_body(tag, body)?;
            let nested = parsed.get("missing").filter(|v| !v.is_null()).cloned();
            let missing = nested.unwrap_or(parsed);
            let mut map = Map::new();
            map.insert("missing".to_string(), missing);
            Some(ToolCommand::Update(map))
        }
        _ => {
            tracing::trace!("Stripping unrecognized tool block {}", tag);
            None
        }
    }
}

fn parse_body(tag: &str, body: &str) -> Option<Value> {
    match serde_json::from_str(body.trim()) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!("Malformed {} body, dropping block: {}", tag, e);
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
