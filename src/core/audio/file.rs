//! WAV file capture source.
//!
//! Plays a WAV file into the call as if it were a microphone: samples are
//! downmixed, resampled to the call rate and delivered one frame per frame
//! period on a dedicated thread. Once the file is exhausted the source keeps
//! delivering silence so the server's turn detection can close the turn.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use super::codec::resample;
use super::device::{AudioInput, InputStream, SampleCallback, StreamSpec};
use crate::core::realtime::{CallError, CallResult};

/// Capture source backed by a WAV file.
#[derive(Debug, Clone)]
pub struct WavFileInput {
    path: PathBuf,
}

impl WavFileInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AudioInput for WavFileInput {
    fn open(
        &self,
        spec: &StreamSpec,
        mut on_samples: SampleCallback,
    ) -> CallResult<Box<dyn InputStream>> {
        if spec.frame_size == 0 {
            return Err(CallError::Device("frame size must be positive".to_string()));
        }

        let samples = read_wav_mono(&self.path, spec.sample_rate)?;
        info!(
            path = %self.path.display(),
            samples = samples.len(),
            "Opened WAV capture source"
        );

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let frame_size = spec.frame_size;
        let period = spec.frame_duration();

        std::thread::Builder::new()
            .name("wav-capture".to_string())
            .spawn(move || {
                let silence = vec![0.0f32; frame_size];
                let mut frames = samples.chunks(frame_size);
                while !thread_stop.load(Ordering::SeqCst) {
                    match frames.next() {
                        Some(frame) => on_samples(frame),
                        None => on_samples(&silence),
                    }
                    std::thread::sleep(period);
                }
                debug!("WAV capture thread finished");
            })
            .map_err(|e| CallError::Device(format!("failed to start capture thread: {e}")))?;

        Ok(Box::new(FlagStream { stop }))
    }
}

/// Stream stopped by raising a shared flag.
struct FlagStream {
    stop: Arc<AtomicBool>,
}

impl InputStream for FlagStream {
    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for FlagStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read a WAV file as mono float samples at `target_rate`.
pub fn read_wav_mono(path: &Path, target_rate: u32) -> CallResult<Vec<f32>> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| CallError::Device(format!("failed to open {}: {e}", path.display())))?;
    let wav_spec = reader.spec();
    let channels = wav_spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match wav_spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| CallError::Device(format!("failed to read WAV samples: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (wav_spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| CallError::Device(format!("failed to read WAV samples: {e}")))?
        }
    };

    let mono: Vec<f32> = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(resample(&mono, wav_spec.sample_rate, target_rate))
}
