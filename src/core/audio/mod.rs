//! Audio side of a voice call.
//!
//! - [`codec`] converts float samples to and from the wire encoding
//! - [`device`] defines the input/output device seams
//! - [`capture`] frames microphone audio and streams it out
//! - [`playback`] renders agent audio strictly in arrival order
//! - [`file`] feeds a WAV file in place of a microphone
//!
//! Real hardware backends live behind the `cpal-devices` feature.

pub mod capture;
pub mod codec;
pub mod device;
pub mod file;
#[cfg(feature = "cpal-devices")]
pub mod hardware;
pub mod playback;

use std::sync::Arc;

pub use capture::{CaptureUnit, Framer};
pub use codec::{DecodeError, decode, encode};
pub use device::{
    AudioInput, AudioOutput, CALL_FRAME_SIZE, CALL_SAMPLE_RATE, InputStream, NullOutput,
    OutputSink, SampleCallback, StreamSpec,
};
pub use file::WavFileInput;
pub use playback::{PlaybackUnit, SpeakingCallback};

use crate::core::realtime::CallResult;

/// Default microphone, or the named device.
#[cfg(feature = "cpal-devices")]
pub fn default_input(device_name: Option<String>) -> CallResult<Arc<dyn AudioInput>> {
    Ok(Arc::new(hardware::CpalInput::new(device_name)))
}

/// Default microphone, or the named device.
#[cfg(not(feature = "cpal-devices"))]
pub fn default_input(_device_name: Option<String>) -> CallResult<Arc<dyn AudioInput>> {
    Err(crate::core::realtime::CallError::Device(
        "audio devices require the cpal-devices feature".to_string(),
    ))
}

/// Default speaker, or the named device.
#[cfg(feature = "cpal-devices")]
pub fn default_output(device_name: Option<String>) -> CallResult<Arc<dyn AudioOutput>> {
    Ok(Arc::new(hardware::CpalOutput::new(device_name)))
}

/// Default speaker, or the named device.
#[cfg(not(feature = "cpal-devices"))]
pub fn default_output(_device_name: Option<String>) -> CallResult<Arc<dyn AudioOutput>> {
    Err(crate::core::realtime::CallError::Device(
        "audio devices require the cpal-devices feature".to_string(),
    ))
}

/// Names of the available input and output devices.
#[cfg(feature = "cpal-devices")]
pub fn list_devices() -> CallResult<(Vec<String>, Vec<String>)> {
    let label = |d: hardware::AudioDeviceInfo| {
        if d.is_default {
            format!("{} (default)", d.name)
        } else {
            d.name
        }
    };
    let inputs = hardware::list_input_devices()?.into_iter().map(label).collect();
    let outputs = hardware::list_output_devices()?.into_iter().map(label).collect();
    Ok((inputs, outputs))
}

/// Names of the available input and output devices.
#[cfg(not(feature = "cpal-devices"))]
pub fn list_devices() -> CallResult<(Vec<String>, Vec<String>)> {
    Err(crate::core::realtime::CallError::Device(
        "audio devices require the cpal-devices feature".to_string(),
    ))
}
