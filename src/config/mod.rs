//! Configuration module for the s2s-stream client
//!
//! Configuration comes from .env files, environment variables and an optional
//! YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Environment Variables
//! - `S2S_ENDPOINT`: WebSocket endpoint (`ws://` or `wss://`)
//! - `S2S_AUTH_TOKEN`: bearer token sent in the handshake
//! - `S2S_SYSTEM_PROMPT`, `S2S_VOICE_ID`
//! - `S2S_ENDPOINTING_SENSITIVITY`: HIGH, MEDIUM or LOW
//! - `S2S_MAX_TOKENS`, `S2S_TOP_P`, `S2S_TEMPERATURE`
//! - `S2S_INPUT_SAMPLE_RATE`, `S2S_OUTPUT_SAMPLE_RATE`
//! - `S2S_INITIAL_BUFFER_SAMPLES`
//! - `S2S_IDLE_TIMEOUT_SECONDS`
//! - `S2S_TOOLS_JSON`: JSON array of `{name, description, input_schema}`
//!
//! # Example
//! ```rust,no_run
//! use s2s_stream::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variable fallbacks
//! let config_path = PathBuf::from("config.yaml");
//! let config = ClientConfig::from_file(&config_path)?;
//!
//! println!("Connecting to {}", config.endpoint);
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

mod yaml;

pub use yaml::{AudioYaml, InferenceYaml, SessionYaml, YamlConfig};

use crate::core::audio::{
    DEFAULT_INITIAL_BUFFER_LENGTH, DEFAULT_INPUT_SAMPLE_RATE, DEFAULT_OUTPUT_SAMPLE_RATE,
};
use crate::core::session::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_SYSTEM_PROMPT, DEFAULT_VOICE_ID, EndpointingSensitivity,
    InferenceParams, SessionConfig, ToolDefinition,
};
use crate::utils::validate_ws_endpoint;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Client configuration
///
/// Contains everything needed to run one speech-to-speech session:
/// - Endpoint and credentials
/// - Conversation settings (system prompt, voice, turn detection, tools)
/// - Inference parameters
/// - Audio rates and playback buffering
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // Connection
    pub endpoint: String,
    pub auth_token: Option<String>,

    // Conversation
    pub system_prompt: String,
    pub voice_id: String,
    pub endpointing_sensitivity: Option<EndpointingSensitivity>,
    pub tools: Vec<ToolDefinition>,

    // Inference
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,

    // Audio
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    /// Samples buffered before playback starts (and after every drain)
    pub initial_buffer_samples: usize,

    /// Session terminates after this long without server events
    pub idle_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let inference = InferenceParams::default();
        Self {
            endpoint: String::new(),
            auth_token: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            voice_id: DEFAULT_VOICE_ID.to_string(),
            endpointing_sensitivity: None,
            tools: Vec::new(),
            max_tokens: inference.max_tokens,
            top_p: inference.top_p,
            temperature: inference.temperature,
            input_sample_rate: DEFAULT_INPUT_SAMPLE_RATE,
            output_sample_rate: DEFAULT_OUTPUT_SAMPLE_RATE,
            initial_buffer_samples: DEFAULT_INITIAL_BUFFER_LENGTH,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// Unset variables keep their defaults. The result is validated.
    pub fn from_env() -> ConfigResult<Self> {
        let config = Self::defaults_with_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable fallbacks
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> ConfigResult<Self> {
        // .env is loaded in main.rs, so here it is already part of the environment
        let yaml_config = YamlConfig::from_file(path)?;

        let mut config = Self::defaults_with_env()?;
        config.apply_yaml(yaml_config)?;
        config.validate()?;

        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn defaults_with_env() -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(endpoint) = env_string("S2S_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(token) = env_string("S2S_AUTH_TOKEN") {
            config.auth_token = Some(token);
        }
        if let Some(prompt) = env_string("S2S_SYSTEM_PROMPT") {
            config.system_prompt = prompt;
        }
        if let Some(voice) = env_string("S2S_VOICE_ID") {
            config.voice_id = voice;
        }
        if let Some(value) = env_string("S2S_ENDPOINTING_SENSITIVITY") {
            config.endpointing_sensitivity =
                Some(parse_sensitivity("S2S_ENDPOINTING_SENSITIVITY", &value)?);
        }
        if let Some(value) = env_parse::<u32>("S2S_MAX_TOKENS")? {
            config.max_tokens = value;
        }
        if let Some(value) = env_parse::<f32>("S2S_TOP_P")? {
            config.top_p = value;
        }
        if let Some(value) = env_parse::<f32>("S2S_TEMPERATURE")? {
            config.temperature = value;
        }
        if let Some(value) = env_parse::<u32>("S2S_INPUT_SAMPLE_RATE")? {
            config.input_sample_rate = value;
        }
        if let Some(value) = env_parse::<u32>("S2S_OUTPUT_SAMPLE_RATE")? {
            config.output_sample_rate = value;
        }
        if let Some(value) = env_parse::<usize>("S2S_INITIAL_BUFFER_SAMPLES")? {
            config.initial_buffer_samples = value;
        }
        if let Some(value) = env_parse::<u64>("S2S_IDLE_TIMEOUT_SECONDS")? {
            config.idle_timeout = Duration::from_secs(value);
        }
        if let Some(json) = env_string("S2S_TOOLS_JSON") {
            config.tools = parse_tools_json(&json)?;
        }

        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) -> ConfigResult<()> {
        if let Some(session) = yaml.session {
            if let Some(endpoint) = session.endpoint {
                self.endpoint = endpoint;
            }
            if let Some(token) = session.auth_token {
                self.auth_token = Some(token);
            }
            if let Some(prompt) = session.system_prompt {
                self.system_prompt = prompt;
            }
            if let Some(voice) = session.voice_id {
                self.voice_id = voice;
            }
            if let Some(value) = session.endpointing_sensitivity {
                self.endpointing_sensitivity =
                    Some(parse_sensitivity("session.endpointing_sensitivity", &value)?);
            }
            if let Some(seconds) = session.idle_timeout_seconds {
                self.idle_timeout = Duration::from_secs(seconds);
            }
        }

        if let Some(inference) = yaml.inference {
            if let Some(value) = inference.max_tokens {
                self.max_tokens = value;
            }
            if let Some(value) = inference.top_p {
                self.top_p = value;
            }
            if let Some(value) = inference.temperature {
                self.temperature = value;
            }
        }

        if let Some(audio) = yaml.audio {
            if let Some(value) = audio.input_sample_rate {
                self.input_sample_rate = value;
            }
            if let Some(value) = audio.output_sample_rate {
                self.output_sample_rate = value;
            }
            if let Some(value) = audio.initial_buffer_samples {
                self.initial_buffer_samples = value;
            }
        }

        if let Some(tools) = yaml.tools {
            self.tools = tools;
        }

        Ok(())
    }

    /// Check the merged configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "endpoint is required (S2S_ENDPOINT or session.endpoint)".to_string(),
            ));
        }
        validate_ws_endpoint(&self.endpoint)
            .map_err(|e| ConfigError::Invalid(format!("endpoint: {e}")))?;

        if self.voice_id.trim().is_empty() {
            return Err(ConfigError::Invalid("voice_id must not be empty".to_string()));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::Invalid("max_tokens must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ConfigError::Invalid(format!(
                "top_p must be within [0, 1], got {}",
                self.top_p
            )));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature must be within [0, 1], got {}",
                self.temperature
            )));
        }
        if self.input_sample_rate == 0 || self.output_sample_rate == 0 {
            return Err(ConfigError::Invalid(
                "sample rates must be positive".to_string(),
            ));
        }
        if self.initial_buffer_samples == 0 {
            return Err(ConfigError::Invalid(
                "initial_buffer_samples must be positive".to_string(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "idle_timeout_seconds must be positive".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(ConfigError::Invalid("tool name must not be empty".to_string()));
            }
            if !names.insert(tool.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate tool name: {}",
                    tool.name
                )));
            }
        }

        Ok(())
    }

    /// Settings for one session.
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.endpoint.clone(),
            auth_token: self.auth_token.clone().unwrap_or_default(),
            system_prompt: self.system_prompt.clone(),
            voice_id: self.voice_id.clone(),
            endpointing_sensitivity: self.endpointing_sensitivity,
            inference: InferenceParams {
                max_tokens: self.max_tokens,
                top_p: self.top_p,
                temperature: self.temperature,
            },
            input_sample_rate: self.input_sample_rate,
            output_sample_rate: self.output_sample_rate,
            idle_timeout: self.idle_timeout,
            tools: self.tools.clone(),
        }
    }

    pub fn has_auth_token(&self) -> bool {
        self.auth_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> ConfigResult<Option<T>> {
    match env_string(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value: raw,
            }),
        None => Ok(None),
    }
}

fn parse_sensitivity(name: &str, value: &str) -> ConfigResult<EndpointingSensitivity> {
    EndpointingSensitivity::parse(value).ok_or_else(|| ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

pub(crate) fn parse_tools_json(json: &str) -> ConfigResult<Vec<ToolDefinition>> {
    serde_json::from_str(json).map_err(|e| ConfigError::InvalidValue {
        name: "S2S_TOOLS_JSON".to_string(),
        value: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            env::remove_var("S2S_ENDPOINT");
            env::remove_var("S2S_AUTH_TOKEN");
            env::remove_var("S2S_SYSTEM_PROMPT");
            env::remove_var("S2S_VOICE_ID");
            env::remove_var("S2S_ENDPOINTING_SENSITIVITY");
            env::remove_var("S2S_MAX_TOKENS");
            env::remove_var("S2S_TOP_P");
            env::remove_var("S2S_TEMPERATURE");
            env::remove_var("S2S_INPUT_SAMPLE_RATE");
            env::remove_var("S2S_OUTPUT_SAMPLE_RATE");
            env::remove_var("S2S_INITIAL_BUFFER_SAMPLES");
            env::remove_var("S2S_IDLE_TIMEOUT_SECONDS");
            env::remove_var("S2S_TOOLS_JSON");
        }
    }

    fn valid_config() -> ClientConfig {
        ClientConfig {
            endpoint: "wss://speech.example.com/s2s".to_string(),
            ..Default::default()
        }
    }

    #[test]
    #[serial]
    fn test_from_env() {
        cleanup_env_vars();
        unsafe {
            env::set_var("S2S_ENDPOINT", "wss://speech.example.com/s2s");
            env::set_var("S2S_AUTH_TOKEN", "env-token");
            env::set_var("S2S_VOICE_ID", "tiffany");
            env::set_var("S2S_ENDPOINTING_SENSITIVITY", "low");
            env::set_var("S2S_MAX_TOKENS", "2048");
            env::set_var("S2S_IDLE_TIMEOUT_SECONDS", "30");
        }

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.endpoint, "wss://speech.example.com/s2s");
        assert_eq!(config.auth_token.as_deref(), Some("env-token"));
        assert_eq!(config.voice_id, "tiffany");
        assert_eq!(
            config.endpointing_sensitivity,
            Some(EndpointingSensitivity::Low)
        );
        assert_eq!(config.max_tokens, 2048);
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.output_sample_rate, 24000);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_requires_endpoint() {
        cleanup_env_vars();

        let result = ClientConfig::from_env();
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("endpoint")));
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        cleanup_env_vars();
        unsafe {
            env::set_var("S2S_ENDPOINT", "wss://speech.example.com");
            env::set_var("S2S_TOP_P", "high");
        }

        match ClientConfig::from_env() {
            Err(ConfigError::InvalidValue { name, value }) => {
                assert_eq!(name, "S2S_TOP_P");
                assert_eq!(value, "high");
            }
            other => panic!("Expected InvalidValue, got {other:?}"),
        }

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_tools_json() {
        cleanup_env_vars();
        unsafe {
            env::set_var("S2S_ENDPOINT", "wss://speech.example.com");
            env::set_var(
                "S2S_TOOLS_JSON",
                r#"[{"name":"getDateTool","description":"Today's date"}]"#,
            );
        }

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.tools.len(), 1);
        assert_eq!(config.tools[0].name, "getDateTool");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_only() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
session:
  endpoint: "ws://127.0.0.1:9000/s2s"
  voice_id: "amy"
  endpointing_sensitivity: "HIGH"

inference:
  temperature: 0.2

audio:
  initial_buffer_samples: 4800
"#;

        fs::write(&config_path, yaml_content).unwrap();

        let config = ClientConfig::from_file(&config_path).unwrap();

        assert_eq!(config.endpoint, "ws://127.0.0.1:9000/s2s");
        assert_eq!(config.voice_id, "amy");
        assert_eq!(
            config.endpointing_sensitivity,
            Some(EndpointingSensitivity::High)
        );
        assert!((config.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.initial_buffer_samples, 4800);
        assert!(!config.has_auth_token());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
session:
  endpoint: "wss://yaml.example.com"
  auth_token: "yaml-token"
"#;

        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var("S2S_ENDPOINT", "wss://env.example.com");
            env::set_var("S2S_AUTH_TOKEN", "env-token");
            env::set_var("S2S_VOICE_ID", "env-voice");
        }

        let config = ClientConfig::from_file(&config_path).unwrap();

        // YAML wins where set, env fills the rest
        assert_eq!(config.endpoint, "wss://yaml.example.com");
        assert_eq!(config.auth_token.as_deref(), Some("yaml-token"));
        assert_eq!(config.voice_id, "env-voice");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_invalid_sensitivity() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            "session:\n  endpoint: \"wss://a.example.com\"\n  endpointing_sensitivity: \"EXTREME\"\n",
        )
        .unwrap();

        assert!(matches!(
            ClientConfig::from_file(&config_path),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(valid_config().validate().is_ok());

        let config = ClientConfig {
            endpoint: "https://speech.example.com".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ClientConfig {
            top_p: 1.5,
            ..valid_config()
        };
        assert!(config.validate().is_err());

        let config = ClientConfig {
            idle_timeout: Duration::ZERO,
            ..valid_config()
        };
        assert!(config.validate().is_err());

        let config = ClientConfig {
            initial_buffer_samples: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_tools() {
        let tools = parse_tools_json(r#"[{"name":"a"},{"name":"a"}]"#).unwrap();
        let config = ClientConfig {
            tools,
            ..valid_config()
        };
        match config.validate() {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("duplicate")),
            other => panic!("Expected duplicate tool error, got {other:?}"),
        }
    }

    #[test]
    fn test_to_session_config() {
        let config = ClientConfig {
            auth_token: Some("token".to_string()),
            max_tokens: 300,
            endpointing_sensitivity: Some(EndpointingSensitivity::Medium),
            ..valid_config()
        };

        let session = config.to_session_config();
        assert_eq!(session.endpoint, "wss://speech.example.com/s2s");
        assert_eq!(session.auth_token, "token");
        assert_eq!(session.inference.max_tokens, 300);
        assert_eq!(
            session.endpointing_sensitivity,
            Some(EndpointingSensitivity::Medium)
        );
        assert_eq!(session.idle_timeout, Duration::from_secs(20));
    }
}
