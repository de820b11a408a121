use serde::Deserialize;
use std::path::PathBuf;

use super::AuthMode;

/// Complete YAML configuration structure
///
/// All fields are optional so a file only needs to name what it overrides.
///
/// # Example YAML structure
/// ```yaml
/// realtime:
///   url: "wss://api.x.ai/v1/realtime"
///   model: "grok-3-fast-realtime"
///   voice: "tara"
///   instructions: "You are a helpful voice assistant."
///   transcription_model: "whisper-1"
///   auth_mode: "bearer"
///   connect_timeout_ms: 10000
///   modalities: ["text", "audio"]
///
/// vad:
///   threshold: 0.5
///   prefix_padding_ms: 300
///   silence_duration_ms: 500
///
/// credentials:
///   token_endpoint: "https://app.example.com/api/voice/token"
///   api_key: "xai-..."
///
/// greeting:
///   text: "(The call is connected. Please greet the user naturally.)"
///   delay_ms: 300
///   capture_delay_ms: 500
///
/// audio:
///   sample_rate: 24000
///   frame_size: 4096
///   input_device: "USB Microphone"
///   output_device: "Built-in Output"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub realtime: Option<RealtimeYaml>,
    pub vad: Option<VadYaml>,
    pub credentials: Option<CredentialsYaml>,
    pub greeting: Option<GreetingYaml>,
    pub audio: Option<AudioYaml>,
}

/// Realtime service settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub transcription_model: Option<String>,
    pub auth_mode: Option<AuthMode>,
    pub connect_timeout_ms: Option<u64>,
    pub modalities: Option<Vec<String>>,
}

/// Server VAD thresholds from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VadYaml {
    pub threshold: Option<f32>,
    pub prefix_padding_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
}

/// Credential sources from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CredentialsYaml {
    pub token_endpoint: Option<String>,
    pub api_key: Option<String>,
}

/// Greeting settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GreetingYaml {
    /// Greeting turn text; an empty string disables the greeting
    pub text: Option<String>,
    pub delay_ms: Option<u64>,
    pub capture_delay_ms: Option<u64>,
}

/// Audio stream settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub sample_rate: Option<u32>,
    pub frame_size: Option<usize>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Required fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

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
realtime:
  url: "wss://voice.example.com/v1/realtime"
  model: "grok-3-fast-realtime"
  voice: "ara"
  auth_mode: "subprotocol"
  connect_timeout_ms: 5000
  modalities: ["audio"]

vad:
  threshold: 0.6
  silence_duration_ms: 800

credentials:
  token_endpoint: "https://app.example.com/token"

greeting:
  text: "Hello?"
  delay_ms: 100

audio:
  sample_rate: 16000
  frame_size: 2048
  input_device: "USB Microphone"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let realtime = config.realtime.as_ref().unwrap();
        assert_eq!(
            realtime.url,
            Some("wss://voice.example.com/v1/realtime".to_string())
        );
        assert_eq!(realtime.voice, Some("ara".to_string()));
        assert_eq!(realtime.auth_mode, Some(AuthMode::Subprotocol));
        assert_eq!(realtime.connect_timeout_ms, Some(5000));
        assert_eq!(realtime.modalities, Some(vec!["audio".to_string()]));

        let vad = config.vad.as_ref().unwrap();
        assert_eq!(vad.threshold, Some(0.6));
        assert_eq!(vad.prefix_padding_ms, None);
        assert_eq!(vad.silence_duration_ms, Some(800));

        assert_eq!(
            config.credentials.as_ref().unwrap().token_endpoint,
            Some("https://app.example.com/token".to_string())
        );
        assert_eq!(
            config.greeting.as_ref().unwrap().text,
            Some("Hello?".to_string())
        );
        let audio = config.audio.as_ref().unwrap();
        assert_eq!(audio.sample_rate, Some(16000));
        assert_eq!(audio.frame_size, Some(2048));
        assert_eq!(audio.input_device, Some("USB Microphone".to_string()));
        assert_eq!(audio.output_device, None);
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
vad:
  threshold: 0.4
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        assert!(config.realtime.is_none());
        assert!(config.credentials.is_none());
        assert_eq!(config.vad.as_ref().unwrap().threshold, Some(0.4));
    }

    #[test]
    fn test_yaml_config_empty() {
        let yaml = "";

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        assert!(config.realtime.is_none());
        assert!(config.vad.is_none());
        assert!(config.greeting.is_none());
        assert!(config.audio.is_none());
    }

    #[test]
    fn test_yaml_config_rejects_unknown_auth_mode() {
        let yaml = r#"
realtime:
  auth_mode: "cookie"
"#;
        assert!(serde_yaml::from_str::<YamlConfig>(yaml).is_err());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
realtime:
  voice: "leo"
audio:
  frame_size: 1024
"#;

        fs::write(&config_path, yaml_content).unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();

        assert_eq!(
            config.realtime.as_ref().unwrap().voice,
            Some("leo".to_string())
        );
        assert_eq!(config.audio.as_ref().unwrap().frame_size, Some(1024));
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
