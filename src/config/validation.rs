/// Validate the realtime endpoint is a WebSocket URL
pub(super) fn validate_realtime_url(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = url::Url::parse(url).map_err(|e| format!("Invalid realtime URL '{url}': {e}"))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(format!("Realtime URL must use ws or wss, got '{other}'").into()),
    }
}

/// Validate the server VAD threshold
pub(super) fn validate_vad(threshold: f32) -> Result<(), Box<dyn std::error::Error>> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(format!("VAD threshold must be between 0.0 and 1.0, got {threshold}").into());
    }
    Ok(())
}

/// Validate audio stream parameters
pub(super) fn validate_audio(
    sample_rate: u32,
    frame_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if sample_rate == 0 {
        return Err("Sample rate must be greater than 0".into());
    }
    if frame_size == 0 {
        return Err("Frame size must be greater than 0".into());
    }
    Ok(())
}

/// Validate the requested response modalities
pub(super) fn validate_modalities(modalities: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    if !modalities.iter().any(|m| m == "audio") {
        return Err("Modalities must include 'audio' for a voice call".into());
    }
    if let Some(unknown) = modalities.iter().find(|m| *m != "audio" && *m != "text") {
        return Err(format!("Unknown modality '{unknown}'").into());
    }
    Ok(())
}

/// Validate that at least one credential source is configured
pub(super) fn validate_credentials(
    token_endpoint: &Option<String>,
    api_key: &Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let has_endpoint = token_endpoint.as_deref().is_some_and(|e| !e.is_empty());
    let has_key = api_key.as_deref().is_some_and(|k| !k.is_empty());
    if !has_endpoint && !has_key {
        return Err(
            "No credential source configured: set a token endpoint or an API key".into(),
        );
    }
    if let Some(endpoint) = token_endpoint.as_deref().filter(|e| !e.is_empty()) {
        url::Url::parse(endpoint)
            .map_err(|e| format!("Invalid token endpoint '{endpoint}': {e}"))?;
    }
    Ok(())
}
