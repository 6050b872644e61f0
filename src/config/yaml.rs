use serde::Deserialize;
use std::path::PathBuf;

use super::{ConfigError, ConfigResult};
use crate::core::session::ToolDefinition;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// session:
///   endpoint: "wss://speech.example.com/s2s"
///   auth_token: "your-token"
///   voice_id: "matthew"
///   endpointing_sensitivity: "MEDIUM"
///   idle_timeout_seconds: 20
///   system_prompt: |
///     You are a friend. Keep your responses short.
///
/// inference:
///   max_tokens: 1024
///   top_p: 0.9
///   temperature: 0.7
///
/// audio:
///   input_sample_rate: 16000
///   output_sample_rate: 24000
///   initial_buffer_samples: 24000
///
/// tools:
///   - name: "getDateTool"
///     description: "Get the current date"
///     input_schema:
///       type: "object"
///       properties: {}
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub session: Option<SessionYaml>,
    pub inference: Option<InferenceYaml>,
    pub audio: Option<AudioYaml>,
    pub tools: Option<Vec<ToolDefinition>>,
}

/// Session settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub endpoint: Option<String>,
    pub auth_token: Option<String>,
    pub system_prompt: Option<String>,
    pub voice_id: Option<String>,
    /// HIGH, MEDIUM or LOW
    pub endpointing_sensitivity: Option<String>,
    pub idle_timeout_seconds: Option<u64>,
}

/// Generation parameters from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct InferenceYaml {
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub temperature: Option<f32>,
}

/// Audio settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub input_sample_rate: Option<u32>,
    pub output_sample_rate: Option<u32>,
    pub initial_buffer_samples: Option<usize>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &PathBuf) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;

        Ok(config)
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
session:
  endpoint: "wss://speech.example.com/s2s"
  auth_token: "secret"
  voice_id: "tiffany"
  endpointing_sensitivity: "HIGH"
  idle_timeout_seconds: 45
  system_prompt: "Be brief."

inference:
  max_tokens: 512
  top_p: 0.5
  temperature: 0.3

audio:
  input_sample_rate: 16000
  output_sample_rate: 24000
  initial_buffer_samples: 12000

tools:
  - name: "getWeatherTool"
    description: "Weather for a location"
    input_schema:
      type: "object"
      properties:
        city:
          type: "string"
      required: ["city"]
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let session = config.session.unwrap();
        assert_eq!(
            session.endpoint.as_deref(),
            Some("wss://speech.example.com/s2s")
        );
        assert_eq!(session.auth_token.as_deref(), Some("secret"));
        assert_eq!(session.voice_id.as_deref(), Some("tiffany"));
        assert_eq!(session.endpointing_sensitivity.as_deref(), Some("HIGH"));
        assert_eq!(session.idle_timeout_seconds, Some(45));

        let inference = config.inference.unwrap();
        assert_eq!(inference.max_tokens, Some(512));
        assert_eq!(inference.top_p, Some(0.5));

        let audio = config.audio.unwrap();
        assert_eq!(audio.initial_buffer_samples, Some(12000));

        let tools = config.tools.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "getWeatherTool");
        assert_eq!(tools[0].input_schema["required"][0], "city");
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
session:
  voice_id: "amy"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        let session = config.session.unwrap();
        assert_eq!(session.voice_id.as_deref(), Some("amy"));
        assert!(session.endpoint.is_none());
        assert!(config.inference.is_none());
        assert!(config.tools.is_none());
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.session.is_none());
        assert!(config.audio.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        fs::write(
            &config_path,
            "session:\n  endpoint: \"ws://localhost:9000\"\n",
        )
        .unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        assert_eq!(
            config.session.unwrap().endpoint.as_deref(),
            Some("ws://localhost:9000")
        );
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/config.yaml");
        let result = YamlConfig::from_file(&path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }
}
