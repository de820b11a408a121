use super::CallConfig;
use super::env::apply_env;
use super::yaml::YamlConfig;

/// Build the final configuration: defaults, then environment, then YAML.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<CallConfig, Box<dyn std::error::Error>> {
    let mut config = CallConfig::default();
    apply_env(&mut config)?;

    if let Some(yaml) = yaml {
        apply_yaml(&mut config, yaml);
    }

    Ok(config)
}

fn apply_yaml(config: &mut CallConfig, yaml: YamlConfig) {
    if let Some(realtime) = yaml.realtime {
        if let Some(url) = realtime.url {
            config.realtime_url = url;
        }
        if let Some(model) = realtime.model {
            config.model = Some(model).filter(|m| !m.is_empty());
        }
        if let Some(voice) = realtime.voice {
            config.voice = voice;
        }
        if let Some(instructions) = realtime.instructions {
            config.instructions = Some(instructions);
        }
        if let Some(model) = realtime.transcription_model {
            config.transcription_model = model;
        }
        if let Some(mode) = realtime.auth_mode {
            config.auth_mode = mode;
        }
        if let Some(timeout) = realtime.connect_timeout_ms {
            config.connect_timeout_ms = timeout;
        }
        if let Some(modalities) = realtime.modalities {
            config.modalities = modalities;
        }
    }

    if let Some(vad) = yaml.vad {
        if let Some(threshold) = vad.threshold {
            config.vad_threshold = threshold;
        }
        if let Some(padding) = vad.prefix_padding_ms {
            config.vad_prefix_padding_ms = padding;
        }
        if let Some(silence) = vad.silence_duration_ms {
            config.vad_silence_duration_ms = silence;
        }
    }

    if let Some(credentials) = yaml.credentials {
        if let Some(endpoint) = credentials.token_endpoint {
            config.token_endpoint = Some(endpoint);
        }
        if let Some(key) = credentials.api_key {
            config.api_key = Some(key);
        }
    }

    if let Some(greeting) = yaml.greeting {
        if let Some(text) = greeting.text {
            config.greeting = Some(text).filter(|t| !t.is_empty());
        }
        if let Some(delay) = greeting.delay_ms {
            config.greeting_delay_ms = delay;
        }
        if let Some(delay) = greeting.capture_delay_ms {
            config.capture_delay_ms = delay;
        }
    }

    if let Some(audio) = yaml.audio {
        if let Some(rate) = audio.sample_rate {
            config.sample_rate = rate;
        }
        if let Some(size) = audio.frame_size {
            config.frame_size = size;
        }
        if let Some(device) = audio.input_device {
            config.input_device = Some(device);
        }
        if let Some(device) = audio.output_device {
            config.output_device = Some(device);
        }
    }
}
