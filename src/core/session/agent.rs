//! Agent specification and instruction templates.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::transport::{AgentConfig, ToolDefinition};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("valid placeholder regex"));

/// Built-in instructions used when no compatible stored template exists.
pub const DEFAULT_TEMPLATE: &str = "\
You are {{agent_name}}, a voice assistant helping the user set up a campaign.
Speak naturally and keep answers short.

Current campaign state:
{{campaign}}

Whenever the campaign state changes, end your reply with the complete state:
[TOOL_UPDATE]{\"name\": \"...\", \"missing\": []}[/TOOL_UPDATE]
When the user should see another page, end your reply with:
[TOOL_NAVIGATE]{\"path\": \"/campaigns\"}[/TOOL_NAVIGATE]
Never mention these blocks to the user.";

/// Instruction text with `{{key}}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstructionTemplate(String);

impl InstructionTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interpolate `context` into the template.
    ///
    /// Strings are inserted as-is, other JSON values in their compact JSON
    /// form; `null` and unknown keys become the empty string.
    pub fn compile(&self, context: &Map<String, Value>) -> String {
        PLACEHOLDER
            .replace_all(&self.0, |caps: &Captures<'_>| {
                match context.get(&caps[1]) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                }
            })
            .into_owned()
    }

    /// Placeholder keys in order of appearance.
    pub fn placeholders(&self) -> Vec<String> {
        PLACEHOLDER
            .captures_iter(&self.0)
            .map(|caps| caps[1].to_string())
            .collect()
    }
}

impl Default for InstructionTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

impl From<&str> for InstructionTemplate {
    fn from(template: &str) -> Self {
        Self::new(template)
    }
}

/// Everything the controller needs to build an agent on connect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub template: InstructionTemplate,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub voice: Option<String>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, template: InstructionTemplate) -> Self {
        Self {
            name: name.into(),
            template,
            ..Default::default()
        }
    }

    /// Set one context value.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Compile the template into an agent configuration.
    pub fn to_agent_config(&self) -> AgentConfig {
        AgentConfig {
            name: self.name.clone(),
            instructions: self.template.compile(&self.context),
            tools: self.tools.clone(),
            voice: self.voice.clone(),
        }
    }
}
