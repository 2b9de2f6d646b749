//! Configuration module for the session engine
//!
//! Configuration comes from, in increasing priority: defaults, the `.env`
//! file (loaded by `main.rs`), environment variables, and an optional YAML
//! file. The final configuration is validated before it is returned.
//!
//! # Example
//! ```rust,no_run
//! use waav_session::config::EngineConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = EngineConfig::from_env()?;
//!
//! // Load from YAML file with environment variables as the base
//! let config = EngineConfig::from_file(&PathBuf::from("config.yaml"))?;
//! println!("Profile {}", config.profile_id);
//! # Ok(())
//! # }
//! ```

use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use zeroize::Zeroizing;

use crate::core::session::{DEFAULT_CREDENTIAL_TTL_SECONDS, DEFAULT_RESTART_DELAY, SessionOptions};
use crate::core::transport::openai::{
    DEFAULT_REALTIME_MODEL, OPENAI_REALTIME_URL, OpenAIRealtimeVoice, OpenAITransportConfig,
};
use crate::utils::{validate_backend_url, validate_realtime_url};

mod yaml;

pub use yaml::YamlConfig;

/// Longest credential lifetime the engine will request.
pub const MAX_CREDENTIAL_TTL_SECONDS: u32 = 3600;

/// Default remote audio meter poll interval.
pub const DEFAULT_METER_POLL_MS: u64 = 100;

/// Profile used when none is configured.
pub const DEFAULT_PROFILE_ID: &str = "default";

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Engine configuration
#[derive(Clone)]
pub struct EngineConfig {
    /// Base URL of the credential issuer and prompt store
    pub backend_url: Option<String>,
    /// Bearer token for the backend
    pub backend_api_key: Option<Zeroizing<String>>,
    pub profile_id: String,
    pub credential_ttl_seconds: u32,
    pub restart_delay_ms: u64,
    pub meter_poll_interval_ms: u64,
    pub realtime_url: String,
    pub model: String,
    pub voice: Option<String>,
    pub persist_transcripts: bool,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("backend_url", &self.backend_url)
            .field(
                "backend_api_key",
                &self.backend_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("profile_id", &self.profile_id)
            .field("credential_ttl_seconds", &self.credential_ttl_seconds)
            .field("restart_delay_ms", &self.restart_delay_ms)
            .field("meter_poll_interval_ms", &self.meter_poll_interval_ms)
            .field("realtime_url", &self.realtime_url)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("persist_transcripts", &self.persist_transcripts)
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            backend_api_key: None,
            profile_id: DEFAULT_PROFILE_ID.to_string(),
            credential_ttl_seconds: DEFAULT_CREDENTIAL_TTL_SECONDS,
            restart_delay_ms: DEFAULT_RESTART_DELAY.as_millis() as u64,
            meter_poll_interval_ms: DEFAULT_METER_POLL_MS,
            realtime_url: OPENAI_REALTIME_URL.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            voice: None,
            persist_transcripts: true,
        }
    }
}

// =============================================================================
// Environment helpers
// =============================================================================

/// Non-empty, trimmed value of an environment variable.
fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    env_string(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| ConfigError::invalid(key, format!("'{raw}': {e}")))
        })
        .transpose()
}

fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    env_string(key)
        .map(|raw| match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::invalid(key, format!("'{raw}' is not a boolean"))),
        })
        .transpose()
}

// =============================================================================
// Loading
// =============================================================================

impl EngineConfig {
    /// Load configuration from environment variables over defaults.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `WAAV_BACKEND_URL` | `backend_url` |
    /// | `WAAV_BACKEND_API_KEY` | `backend_api_key` |
    /// | `WAAV_PROFILE_ID` | `profile_id` |
    /// | `WAAV_CREDENTIAL_TTL_SECONDS` | `credential_ttl_seconds` |
    /// | `WAAV_RESTART_DELAY_MS` | `restart_delay_ms` |
    /// | `WAAV_METER_POLL_MS` | `meter_poll_interval_ms` |
    /// | `WAAV_REALTIME_URL` | `realtime_url` |
    /// | `WAAV_REALTIME_MODEL` | `model` |
    /// | `WAAV_REALTIME_VOICE` | `voice` |
    /// | `WAAV_PERSIST_TRANSCRIPTS` | `persist_transcripts` |
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::load_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with the environment as the base.
    ///
    /// YAML values override environment variables, which override defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml = YamlConfig::from_file(path)?;

        let mut config = Self::load_env()?;
        config.apply_yaml(yaml);
        config.validate()?;

        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn load_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            backend_url: env_string("WAAV_BACKEND_URL"),
            backend_api_key: env_string("WAAV_BACKEND_API_KEY").map(Zeroizing::new),
            profile_id: env_string("WAAV_PROFILE_ID").unwrap_or(defaults.profile_id),
            credential_ttl_seconds: env_parse("WAAV_CREDENTIAL_TTL_SECONDS")?
                .unwrap_or(defaults.credential_ttl_seconds),
            restart_delay_ms: env_parse("WAAV_RESTART_DELAY_MS")?
                .unwrap_or(defaults.restart_delay_ms),
            meter_poll_interval_ms: env_parse("WAAV_METER_POLL_MS")?
                .unwrap_or(defaults.meter_poll_interval_ms),
            realtime_url: env_string("WAAV_REALTIME_URL").unwrap_or(defaults.realtime_url),
            model: env_string("WAAV_REALTIME_MODEL").unwrap_or(defaults.model),
            voice: env_string("WAAV_REALTIME_VOICE"),
            persist_transcripts: env_bool("WAAV_PERSIST_TRANSCRIPTS")?
                .unwrap_or(defaults.persist_transcripts),
        })
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(backend) = yaml.backend {
            if let Some(url) = backend.url {
                self.backend_url = Some(url);
            }
            if let Some(api_key) = backend.api_key {
                self.backend_api_key = Some(Zeroizing::new(api_key));
            }
        }

        if let Some(session) = yaml.session {
            if let Some(profile_id) = session.profile_id {
                self.profile_id = profile_id;
            }
            if let Some(ttl) = session.credential_ttl_seconds {
                self.credential_ttl_seconds = ttl;
            }
            if let Some(delay) = session.restart_delay_ms {
                self.restart_delay_ms = delay;
            }
            if let Some(persist) = session.persist_transcripts {
                self.persist_transcripts = persist;
            }
        }

        if let Some(realtime) = yaml.realtime {
            if let Some(url) = realtime.url {
                self.realtime_url = url;
            }
            if let Some(model) = realtime.model {
                self.model = model;
            }
            if realtime.voice.is_some() {
                self.voice = realtime.voice;
            }
        }

        if let Some(interval) = yaml.meter.and_then(|m| m.poll_interval_ms) {
            self.meter_poll_interval_ms = interval;
        }
    }

    /// Check ranges and URL schemes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.backend_url {
            validate_backend_url(url)
                .map_err(|e| ConfigError::invalid("backend_url", e.to_string()))?;
        }

        validate_realtime_url(&self.realtime_url)
            .map_err(|e| ConfigError::invalid("realtime_url", e.to_string()))?;

        if !(1..=MAX_CREDENTIAL_TTL_SECONDS).contains(&self.credential_ttl_seconds) {
            return Err(ConfigError::invalid(
                "credential_ttl_seconds",
                format!(
                    "{} is outside 1..={}",
                    self.credential_ttl_seconds, MAX_CREDENTIAL_TTL_SECONDS
                ),
            ));
        }

        if self.meter_poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "meter_poll_interval_ms",
                "must be greater than zero",
            ));
        }

        if self.profile_id.trim().is_empty() {
            return Err(ConfigError::invalid("profile_id", "must not be empty"));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::invalid("model", "must not be empty"));
        }

        Ok(())
    }

    // =========================================================================
    // Derived settings
    // =========================================================================

    /// Backend base URL, required by the HTTP credential issuer and prompt store.
    pub fn require_backend_url(&self) -> Result<&str, ConfigError> {
        self.backend_url
            .as_deref()
            .ok_or_else(|| ConfigError::invalid("backend_url", "WAAV_BACKEND_URL is not set"))
    }

    pub fn backend_api_key(&self) -> Option<&str> {
        self.backend_api_key.as_ref().map(|key| key.as_str())
    }

    pub fn meter_poll_interval(&self) -> Duration {
        Duration::from_millis(self.meter_poll_interval_ms)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            profile_id: self.profile_id.clone(),
            credential_ttl_seconds: self.credential_ttl_seconds,
            restart_delay: Duration::from_millis(self.restart_delay_ms),
            persist_transcripts: self.persist_transcripts,
        }
    }

    pub fn openai_config(&self) -> OpenAITransportConfig {
        OpenAITransportConfig {
            url: self.realtime_url.clone(),
            model: self.model.clone(),
            default_voice: self
                .voice
                .as_deref()
                .map(OpenAIRealtimeVoice::from_str_or_default)
                .unwrap_or_default(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "WAAV_BACKEND_URL",
        "WAAV_BACKEND_API_KEY",
        "WAAV_PROFILE_ID",
        "WAAV_CREDENTIAL_TTL_SECONDS",
        "WAAV_RESTART_DELAY_MS",
        "WAAV_METER_POLL_MS",
        "WAAV_REALTIME_URL",
        "WAAV_REALTIME_MODEL",
        "WAAV_REALTIME_VOICE",
        "WAAV_PERSIST_TRANSCRIPTS",
    ];

    fn cleanup_env_vars() {
        unsafe {
            for key in ENV_VARS {
                env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = EngineConfig::from_env().unwrap();
        assert!(config.backend_url.is_none());
        assert!(config.backend_api_key.is_none());
        assert_eq!(config.profile_id, "default");
        assert_eq!(config.credential_ttl_seconds, 600);
        assert_eq!(config.restart_delay_ms, 300);
        assert_eq!(config.meter_poll_interval_ms, 100);
        assert_eq!(config.realtime_url, OPENAI_REALTIME_URL);
        assert_eq!(config.model, "gpt-4o-realtime-preview");
        assert!(config.voice.is_none());
        assert!(config.persist_transcripts);
        assert!(config.require_backend_url().is_err());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_values() {
        cleanup_env_vars();
        unsafe {
            env::set_var("WAAV_BACKEND_URL", "https://api.example.com");
            env::set_var("WAAV_BACKEND_API_KEY", "backend-secret");
            env::set_var("WAAV_PROFILE_ID", "campaigns");
            env::set_var("WAAV_CREDENTIAL_TTL_SECONDS", "120");
            env::set_var("WAAV_RESTART_DELAY_MS", "0");
            env::set_var("WAAV_METER_POLL_MS", "50");
            env::set_var("WAAV_REALTIME_VOICE", "coral");
            env::set_var("WAAV_PERSIST_TRANSCRIPTS", "no");
        }

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.require_backend_url().unwrap(), "https://api.example.com");
        assert_eq!(config.backend_api_key(), Some("backend-secret"));
        assert_eq!(config.profile_id, "campaigns");
        assert!(!config.persist_transcripts);

        let options = config.session_options();
        assert_eq!(options.credential_ttl_seconds, 120);
        assert_eq!(options.restart_delay, Duration::ZERO);
        assert_eq!(config.meter_poll_interval(), Duration::from_millis(50));
        assert_eq!(
            config.openai_config().default_voice,
            OpenAIRealtimeVoice::Coral
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        cleanup_env_vars();
        unsafe {
            env::set_var("WAAV_CREDENTIAL_TTL_SECONDS", "ten minutes");
        }

        let err = EngineConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("WAAV_CREDENTIAL_TTL_SECONDS"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_ttl_out_of_range() {
        cleanup_env_vars();
        unsafe {
            env::set_var("WAAV_CREDENTIAL_TTL_SECONDS", "7200");
        }

        let err = EngineConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "credential_ttl_seconds"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_backend_scheme() {
        cleanup_env_vars();
        unsafe {
            env::set_var("WAAV_BACKEND_URL", "ftp://files.example.com");
        }

        let err = EngineConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("backend_url"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
backend:
  url: "http://localhost:8000"

session:
  profile_id: "yaml-profile"

meter:
  poll_interval_ms: 25
"#,
        )
        .unwrap();

        unsafe {
            env::set_var("WAAV_BACKEND_URL", "https://env.example.com");
            env::set_var("WAAV_PROFILE_ID", "env-profile");
            env::set_var("WAAV_REALTIME_MODEL", "gpt-4o-mini-realtime-preview");
        }

        let config = EngineConfig::from_file(&config_path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.backend_url.as_deref(), Some("http://localhost:8000"));
        assert_eq!(config.profile_id, "yaml-profile");
        assert_eq!(config.meter_poll_interval_ms, 25);
        // ENV value kept where YAML is silent
        assert_eq!(config.model, "gpt-4o-mini-realtime-preview");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_zero_poll_interval() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "meter:\n  poll_interval_ms: 0\n").unwrap();

        let err = EngineConfig::from_file(&config_path).unwrap_err();
        assert!(err.to_string().contains("meter_poll_interval_ms"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let result = EngineConfig::from_file(Path::new("/nonexistent/config.yaml"));
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = EngineConfig {
            backend_api_key: Some(Zeroizing::new("super-secret".to_string())),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
