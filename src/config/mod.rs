//! Configuration module for voice calls
//!
//! This module loads call configuration from .env files, environment variables and
//! YAML files. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Applying YAML overrides on top of the environment
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use waav_voice_call::config::CallConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = CallConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config_path = PathBuf::from("voice.yaml");
//! let config = CallConfig::from_file(&config_path)?;
//!
//! println!("Calling {}", config.realtime_url);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

/// Default realtime endpoint.
pub const DEFAULT_REALTIME_URL: &str = "wss://api.x.ai/v1/realtime";

/// Default realtime model.
pub const DEFAULT_MODEL: &str = "grok-3-fast-realtime";

/// How the call credential is presented during the WebSocket handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// `Authorization: Bearer <token>` header
    #[default]
    Bearer,
    /// Token carried in `Sec-WebSocket-Protocol`, for clients that cannot set headers
    Subprotocol,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Bearer => write!(f, "bearer"),
            AuthMode::Subprotocol => write!(f, "subprotocol"),
        }
    }
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bearer" => Ok(AuthMode::Bearer),
            "subprotocol" => Ok(AuthMode::Subprotocol),
            other => Err(format!(
                "Invalid auth mode '{other}'. Expected 'bearer' or 'subprotocol'"
            )),
        }
    }
}

/// Voice call configuration
///
/// Contains everything needed to place a call:
/// - Realtime endpoint, model, voice and instructions
/// - Server VAD thresholds
/// - Credential source (token endpoint or API key)
/// - Greeting and capture timing
/// - Audio stream parameters and device selection
#[derive(Debug, Clone)]
pub struct CallConfig {
    // Realtime service
    pub realtime_url: String,
    pub model: Option<String>,
    pub voice: String,
    pub instructions: Option<String>,
    pub transcription_model: String,
    pub modalities: Vec<String>,
    pub auth_mode: AuthMode,
    /// Bound on credential fetch, connect and acknowledgement
    pub connect_timeout_ms: u64,

    // Server VAD
    pub vad_threshold: f32,
    pub vad_prefix_padding_ms: u32,
    pub vad_silence_duration_ms: u32,

    // Credentials
    /// Endpoint issuing a per-call token; preferred over `api_key`
    pub token_endpoint: Option<String>,
    /// Long-lived key used directly; development only
    pub api_key: Option<String>,

    // Greeting
    /// Synthetic user turn sent on activation; `None` disables the greeting
    pub greeting: Option<String>,
    pub greeting_delay_ms: u64,
    pub capture_delay_ms: u64,

    // Audio
    pub sample_rate: u32,
    pub frame_size: usize,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            model: Some(DEFAULT_MODEL.to_string()),
            voice: "tara".to_string(),
            instructions: None,
            transcription_model: "whisper-1".to_string(),
            modalities: vec!["text".to_string(), "audio".to_string()],
            auth_mode: AuthMode::Bearer,
            connect_timeout_ms: 10_000,
            vad_threshold: 0.5,
            vad_prefix_padding_ms: 300,
            vad_silence_duration_ms: 500,
            token_endpoint: None,
            api_key: None,
            greeting: Some(crate::core::realtime::session::DEFAULT_GREETING.to_string()),
            greeting_delay_ms: 300,
            capture_delay_ms: 500,
            sample_rate: crate::core::audio::CALL_SAMPLE_RATE,
            frame_size: crate::core::audio::CALL_FRAME_SIZE,
            input_device: None,
            output_device: None,
        }
    }
}

/// Zeroize the API key when the configuration is dropped.
impl Drop for CallConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}

impl CallConfig {
    /// Load configuration from environment variables over defaults.
    ///
    /// Does not validate: a config without a credential source is still
    /// useful for listing devices.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        merge::merge_config(None)
    }

    /// Load configuration from a YAML file with environment variable base
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
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // Note: .env file is loaded in main.rs at application startup
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration can place a call.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_realtime_url(&self.realtime_url)?;
        validation::validate_vad(self.vad_threshold)?;
        validation::validate_audio(self.sample_rate, self.frame_size)?;
        validation::validate_modalities(&self.modalities)?;
        validation::validate_credentials(&self.token_endpoint, &self.api_key)?;
        Ok(())
    }

    /// Whether calls authenticate through a token endpoint.
    pub fn uses_token_endpoint(&self) -> bool {
        self.token_endpoint
            .as_deref()
            .is_some_and(|endpoint| !endpoint.is_empty())
    }
}
