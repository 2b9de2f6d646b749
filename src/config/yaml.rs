use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// Every field is optional so a file can override only what it needs. Values
/// present here win over environment variables.
///
/// # Example YAML structure
/// ```yaml
/// backend:
///   url: "https://api.example.com"
///   api_key: "backend-key"
///
/// session:
///   profile_id: "campaigns"
///   credential_ttl_seconds: 600
///   restart_delay_ms: 300
///   persist_transcripts: true
///
/// realtime:
///   url: "wss://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview"
///   voice: "coral"
///
/// meter:
///   poll_interval_ms: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub backend: Option<BackendYaml>,
    pub session: Option<SessionYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub meter: Option<MeterYaml>,
}

/// Credential issuer / prompt store backend
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BackendYaml {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// Session controller tunables
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub profile_id: Option<String>,
    pub credential_ttl_seconds: Option<u32>,
    pub restart_delay_ms: Option<u64>,
    pub persist_transcripts: Option<bool>,
}

/// Realtime provider settings
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
}

/// Remote audio meter settings
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MeterYaml {
    pub poll_interval_ms: Option<u64>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Ok(serde_yaml::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
backend:
  url: "https://api.example.com"
  api_key: "secret"

session:
  profile_id: "campaigns"
  credential_ttl_seconds: 120
  restart_delay_ms: 50
  persist_transcripts: false

realtime:
  model: "gpt-4o-mini-realtime-preview"
  voice: "coral"

meter:
  poll_interval_ms: 40
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let backend = config.backend.unwrap();
        assert_eq!(backend.url.as_deref(), Some("https://api.example.com"));
        assert_eq!(backend.api_key.as_deref(), Some("secret"));

        let session = config.session.unwrap();
        assert_eq!(session.profile_id.as_deref(), Some("campaigns"));
        assert_eq!(session.credential_ttl_seconds, Some(120));
        assert_eq!(session.restart_delay_ms, Some(50));
        assert_eq!(session.persist_transcripts, Some(false));

        let realtime = config.realtime.unwrap();
        assert!(realtime.url.is_none());
        assert_eq!(realtime.voice.as_deref(), Some("coral"));

        assert_eq!(config.meter.unwrap().poll_interval_ms, Some(40));
    }

    #[test]
    fn test_yaml_config_partial() {
        let config: YamlConfig = serde_yaml::from_str("meter:\n  poll_interval_ms: 10\n").unwrap();
        assert!(config.backend.is_none());
        assert!(config.session.is_none());
        assert_eq!(config.meter.unwrap().poll_interval_ms, Some(10));
    }

    #[test]
    fn test_yaml_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "backend:\n  url: \"http://localhost:8000\"\n").unwrap();

        let config = YamlConfig::from_file(&path).unwrap();
        assert_eq!(
            config.backend.unwrap().url.as_deref(),
            Some("http://localhost:8000")
        );
    }

    #[test]
    fn test_yaml_from_missing_file() {
        let err = YamlConfig::from_file(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_yaml_malformed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "session: [unclosed").unwrap();

        let err = YamlConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }
}
