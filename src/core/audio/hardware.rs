//! Microphone and speaker backends built on cpal.
//!
//! cpal streams are not `Send` on every platform, so each stream is created,
//! played and dropped on a dedicated OS thread. The handles returned to the
//! call only talk to that thread through channels and shared state.
//!
//! Devices are opened in their native format. Capture downmixes to mono and
//! resamples to the call rate inside the stream callback; playback resamples
//! each block once before handing it to the output callback.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::codec::resample;
use super::device::{AudioInput, AudioOutput, InputStream, OutputSink, SampleCallback, StreamSpec};
use crate::core::realtime::{CallError, CallResult};

// ---------------------------------------------------------------------------
// Device enumeration
// ---------------------------------------------------------------------------

/// Describes an available audio device.
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    /// Device name as reported by the host
    pub name: String,
    /// Whether this is the host's default device for its direction
    pub is_default: bool,
}

/// List available input devices.
pub fn list_input_devices() -> CallResult<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host
        .input_devices()
        .map_err(|e| CallError::Device(e.to_string()))?;
    Ok(describe(devices, default_name))
}

/// List available output devices.
pub fn list_output_devices() -> CallResult<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let devices = host
        .output_devices()
        .map_err(|e| CallError::Device(e.to_string()))?;
    Ok(describe(devices, default_name))
}

fn describe(
    devices: impl Iterator<Item = cpal::Device>,
    default_name: Option<String>,
) -> Vec<AudioDeviceInfo> {
    devices
        .filter_map(|d| d.name().ok())
        .map(|name| AudioDeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
        })
        .collect()
}

fn find_input_device(name: Option<&str>) -> Result<cpal::Device, String> {
    let host = cpal::default_host();
    match name {
        Some(target) => host
            .input_devices()
            .map_err(|e| e.to_string())?
            .find(|d| d.name().ok().as_deref() == Some(target))
            .ok_or_else(|| format!("audio input device '{target}' not found")),
        None => host
            .default_input_device()
            .ok_or_else(|| "no default audio input device found".to_string()),
    }
}

fn find_output_device(name: Option<&str>) -> Result<cpal::Device, String> {
    let host = cpal::default_host();
    match name {
        Some(target) => host
            .output_devices()
            .map_err(|e| e.to_string())?
            .find(|d| d.name().ok().as_deref() == Some(target))
            .ok_or_else(|| format!("audio output device '{target}' not found")),
        None => host
            .default_output_device()
            .ok_or_else(|| "no default audio output device found".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

/// Microphone capture through cpal.
#[derive(Debug, Clone, Default)]
pub struct CpalInput {
    device_name: Option<String>,
}

impl CpalInput {
    /// Use the named device, or the host default when `None`.
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl AudioInput for CpalInput {
    fn open(
        &self,
        spec: &StreamSpec,
        on_samples: SampleCallback,
    ) -> CallResult<Box<dyn InputStream>> {
        if spec.echo_cancellation || spec.noise_suppression {
            debug!("cpal exposes no echo cancellation or noise suppression; capturing raw input");
        }

        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let device_name = self.device_name.clone();
        let target_rate = spec.sample_rate;

        std::thread::Builder::new()
            .name("voice-capture".to_string())
            .spawn(move || {
                let stream = match build_capture_stream(device_name.as_deref(), target_rate, on_samples)
                {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Returns on stop or when the handle is dropped.
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Capture stream closed");
            })
            .map_err(|e| CallError::Device(format!("failed to start capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalInputStream {
                stop: Some(stop_tx),
            })),
            Ok(Err(e)) => Err(CallError::Device(e)),
            Err(_) => Err(CallError::Device("capture thread exited early".to_string())),
        }
    }
}

fn build_capture_stream(
    device_name: Option<&str>,
    target_rate: u32,
    on_samples: SampleCallback,
) -> Result<cpal::Stream, String> {
    let device = find_input_device(device_name)?;
    let supported = device.default_input_config().map_err(|e| e.to_string())?;
    let config: cpal::StreamConfig = supported.config();

    info!(
        device = device.name().unwrap_or_default(),
        channels = config.channels,
        sample_rate = config.sample_rate.0,
        "Opening audio input device (native format)"
    );

    match supported.sample_format() {
        cpal::SampleFormat::F32 => {
            capture_stream::<f32>(&device, &config, target_rate, on_samples)
        }
        cpal::SampleFormat::I16 => {
            capture_stream::<i16>(&device, &config, target_rate, on_samples)
        }
        cpal::SampleFormat::U16 => {
            capture_stream::<u16>(&device, &config, target_rate, on_samples)
        }
        other => Err(format!("unsupported input sample format {other:?}")),
    }
}

fn capture_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    target_rate: u32,
    mut on_samples: SampleCallback,
) -> Result<cpal::Stream, String>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let device_rate = config.sample_rate.0;
    let mut mono = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                mono.clear();
                mono.extend(data.chunks(channels).map(|frame| {
                    frame
                        .iter()
                        .map(|s| <f32 as cpal::FromSample<T>>::from_sample_(*s))
                        .sum::<f32>()
                        / frame.len() as f32
                }));
                if device_rate == target_rate {
                    on_samples(&mono);
                } else {
                    on_samples(&resample(&mono, device_rate, target_rate));
                }
            },
            |err| warn!("Audio input stream error: {err}"),
            None,
        )
        .map_err(|e| e.to_string())
}

/// Handle to the capture thread. Stopping signals the thread and returns
/// without waiting for the device to close.
struct CpalInputStream {
    stop: Option<std_mpsc::Sender<()>>,
}

impl InputStream for CpalInputStream {
    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

/// Speaker output through cpal.
#[derive(Debug, Clone, Default)]
pub struct CpalOutput {
    device_name: Option<String>,
}

impl CpalOutput {
    /// Use the named device, or the host default when `None`.
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

/// Block currently owned by the output callback.
struct ActiveBlock {
    samples: Arc<[f32]>,
    position: usize,
    done: oneshot::Sender<()>,
}

#[derive(Default)]
struct PlayoutState {
    active: VecDeque<ActiveBlock>,
    halted: bool,
}

impl AudioOutput for CpalOutput {
    fn open(&self, spec: &StreamSpec) -> CallResult<Arc<dyn OutputSink>> {
        let state = Arc::new(Mutex::new(PlayoutState::default()));
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32, String>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let device_name = self.device_name.clone();
        let callback_state = state.clone();

        std::thread::Builder::new()
            .name("voice-playback".to_string())
            .spawn(move || {
                let (stream, device_rate) =
                    match build_playback_stream(device_name.as_deref(), callback_state) {
                        Ok(built) => built,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(device_rate));
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Playback stream closed");
            })
            .map_err(|e| CallError::Device(format!("failed to start playback thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(device_rate)) => Ok(Arc::new(CpalSink {
                state,
                source_rate: spec.sample_rate,
                device_rate,
                stop: Mutex::new(Some(stop_tx)),
            })),
            Ok(Err(e)) => Err(CallError::Device(e)),
            Err(_) => Err(CallError::Device("playback thread exited early".to_string())),
        }
    }
}

fn build_playback_stream(
    device_name: Option<&str>,
    state: Arc<Mutex<PlayoutState>>,
) -> Result<(cpal::Stream, u32), String> {
    let device = find_output_device(device_name)?;
    let supported = device.default_output_config().map_err(|e| e.to_string())?;
    let config: cpal::StreamConfig = supported.config();
    let device_rate = config.sample_rate.0;

    info!(
        device = device.name().unwrap_or_default(),
        channels = config.channels,
        sample_rate = device_rate,
        "Opening audio output device (native format)"
    );

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => playback_stream::<f32>(&device, &config, state),
        cpal::SampleFormat::I16 => playback_stream::<i16>(&device, &config, state),
        cpal::SampleFormat::U16 => playback_stream::<u16>(&device, &config, state),
        other => Err(format!("unsupported output sample format {other:?}")),
    }?;
    Ok((stream, device_rate))
}

fn playback_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    state: Arc<Mutex<PlayoutState>>,
) -> Result<cpal::Stream, String>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut state = state.lock();
                for frame in data.chunks_mut(channels) {
                    let sample = next_sample(&mut state);
                    let value = <T as cpal::FromSample<f32>>::from_sample_(sample);
                    frame.fill(value);
                }
            },
            |err| warn!("Audio output stream error: {err}"),
            None,
        )
        .map_err(|e| e.to_string())
}

/// Pull the next sample of the active block, completing blocks as they drain.
fn next_sample(state: &mut PlayoutState) -> f32 {
    while let Some(block) = state.active.front_mut() {
        if let Some(sample) = block.samples.get(block.position) {
            block.position += 1;
            return *sample;
        }
        if let Some(finished) = state.active.pop_front() {
            let _ = finished.done.send(());
        }
    }
    0.0
}

struct CpalSink {
    state: Arc<Mutex<PlayoutState>>,
    source_rate: u32,
    device_rate: u32,
    stop: Mutex<Option<std_mpsc::Sender<()>>>,
}

#[async_trait]
impl OutputSink for CpalSink {
    async fn render(&self, block: Arc<[f32]>) -> CallResult<()> {
        let samples: Arc<[f32]> = if self.source_rate == self.device_rate {
            block
        } else {
            resample(&block, self.source_rate, self.device_rate).into()
        };

        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if state.halted {
                return Ok(());
            }
            state.active.push_back(ActiveBlock {
                samples,
                position: 0,
                done: done_tx,
            });
        }

        // Sender dropped means the sink was halted mid-block.
        let _ = done_rx.await;
        Ok(())
    }

    fn halt(&self) {
        {
            let mut state = self.state.lock();
            state.halted = true;
            state.active.clear();
        }
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.halt();
    }
}
