use std::env;
use std::str::FromStr;

use super::{AuthMode, CallConfig};

/// Read a variable, treating unset and empty the same.
fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Parse a variable when present.
fn parse_var<T>(key: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {key} '{raw}': {e}").into()),
        None => Ok(None),
    }
}

/// Apply environment variables on top of `config`.
pub(super) fn apply_env(config: &mut CallConfig) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(url) = var("VOICE_REALTIME_URL") {
        config.realtime_url = url;
    }
    if let Some(model) = var("VOICE_MODEL") {
        config.model = Some(model);
    }
    if let Some(voice) = var("VOICE_NAME") {
        config.voice = voice;
    }
    if let Some(instructions) = var("VOICE_INSTRUCTIONS") {
        config.instructions = Some(instructions);
    }
    if let Some(model) = var("VOICE_TRANSCRIPTION_MODEL") {
        config.transcription_model = model;
    }
    if let Some(modalities) = var("VOICE_MODALITIES") {
        config.modalities = modalities
            .split(',')
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
    }
    if let Some(mode) = parse_var::<AuthMode>("VOICE_AUTH_MODE")? {
        config.auth_mode = mode;
    }
    if let Some(timeout) = parse_var::<u64>("VOICE_CONNECT_TIMEOUT_MS")? {
        config.connect_timeout_ms = timeout;
    }

    if let Some(threshold) = parse_var::<f32>("VOICE_VAD_THRESHOLD")? {
        config.vad_threshold = threshold;
    }
    if let Some(padding) = parse_var::<u32>("VOICE_VAD_PREFIX_PADDING_MS")? {
        config.vad_prefix_padding_ms = padding;
    }
    if let Some(silence) = parse_var::<u32>("VOICE_VAD_SILENCE_MS")? {
        config.vad_silence_duration_ms = silence;
    }

    if let Some(endpoint) = var("VOICE_TOKEN_ENDPOINT") {
        config.token_endpoint = Some(endpoint);
    }
    if let Some(key) = var("VOICE_API_KEY").or_else(|| var("XAI_API_KEY")) {
        config.api_key = Some(key);
    }

    if let Some(greeting) = var("VOICE_GREETING") {
        config.greeting = Some(greeting);
    }
    if let Some(delay) = parse_var::<u64>("VOICE_GREETING_DELAY_MS")? {
        config.greeting_delay_ms = delay;
    }
    if let Some(delay) = parse_var::<u64>("VOICE_CAPTURE_DELAY_MS")? {
        config.capture_delay_ms = delay;
    }

    if let Some(rate) = parse_var::<u32>("VOICE_SAMPLE_RATE")? {
        config.sample_rate = rate;
    }
    if let Some(size) = parse_var::<usize>("VOICE_FRAME_SIZE")? {
        config.frame_size = size;
    }
    if let Some(device) = var("VOICE_INPUT_DEVICE") {
        config.input_device = Some(device);
    }
    if let Some(device) = var("VOICE_OUTPUT_DEVICE") {
        config.output_device = Some(device);
    }

    Ok(())
}
