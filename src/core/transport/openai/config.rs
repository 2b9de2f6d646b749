//! OpenAI Realtime transport configuration.

use serde::{Deserialize, Serialize};

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Sample rate of PCM16 audio exchanged with the Realtime API.
pub const OPENAI_REALTIME_SAMPLE_RATE: u32 = 24000;

/// Default realtime model.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview";

// =============================================================================
// Voices
// =============================================================================

/// Voices accepted by the Realtime API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAIRealtimeVoice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl OpenAIRealtimeVoice {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse a voice name, falling back to the default for unknown names.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "ash" => Self::Ash,
            "ballad" => Self::Ballad,
            "coral" => Self::Coral,
            "echo" => Self::Echo,
            "sage" => Self::Sage,
            "shimmer" => Self::Shimmer,
            "verse" => Self::Verse,
            _ => Self::Alloy,
        }
    }
}

impl std::fmt::Display for OpenAIRealtimeVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Settings shared by every transport the factory creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAITransportConfig {
    /// WebSocket endpoint, without query string
    #[serde(default = "default_url")]
    pub url: String,
    /// Realtime model name
    #[serde(default = "default_model")]
    pub model: String,
    /// Voice used when the agent does not name one
    #[serde(default)]
    pub default_voice: OpenAIRealtimeVoice,
    /// Capture the microphone and stream it to the provider
    #[serde(default = "default_true")]
    pub audio_input: bool,
    /// Model transcribing user audio, if any
    #[serde(default = "default_transcription_model")]
    pub input_transcription_model: Option<String>,
}

fn default_url() -> String {
    OPENAI_REALTIME_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_REALTIME_MODEL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_transcription_model() -> Option<String> {
    Some("whisper-1".to_string())
}

impl Default for OpenAITransportConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            model: default_model(),
            default_voice: OpenAIRealtimeVoice::default(),
            audio_input: true,
            input_transcription_model: default_transcription_model(),
        }
    }
}

impl OpenAITransportConfig {
    /// Endpoint with the model query parameter.
    pub fn ws_url(&self) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}model={}", self.url, separator, self.model)
    }

    /// Voice for an agent, preferring the agent's own choice.
    pub fn voice_for(&self, agent_voice: Option<&str>) -> OpenAIRealtimeVoice {
        agent_voice
            .map(OpenAIRealtimeVoice::from_str_or_default)
            .unwrap_or(self.default_voice)
    }
}
