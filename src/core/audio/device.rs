//! Audio device abstractions.
//!
//! Capture and render hardware sit behind object-safe traits so the call can
//! run against real devices, files, or test doubles alike.
//!
//! - [`AudioInput`] opens a capture stream that pushes mono float samples into
//!   a callback at whatever cadence the device delivers them.
//! - [`AudioOutput`] opens an [`OutputSink`] that renders one block at a time;
//!   [`OutputSink::render`] resolves once the block has finished playing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::realtime::{CallError, CallResult};

/// Sample rate used on the wire.
pub const CALL_SAMPLE_RATE: u32 = 24000;

/// Samples per captured frame.
pub const CALL_FRAME_SIZE: usize = 4096;

/// Requested stream parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamSpec {
    /// Samples per second
    pub sample_rate: u32,
    /// Channel count delivered to callbacks (always mono for calls)
    pub channels: u16,
    /// Samples per captured frame
    pub frame_size: usize,
    /// Ask the backend for echo cancellation when it offers it
    pub echo_cancellation: bool,
    /// Ask the backend for noise suppression when it offers it
    pub noise_suppression: bool,
}

impl Default for StreamSpec {
    fn default() -> Self {
        Self {
            sample_rate: CALL_SAMPLE_RATE,
            channels: 1,
            frame_size: CALL_FRAME_SIZE,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

impl StreamSpec {
    /// Wall-clock length of `samples` at this rate.
    pub fn duration_of(&self, samples: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(samples as f64 / self.sample_rate as f64)
    }

    /// Wall-clock length of one frame.
    pub fn frame_duration(&self) -> Duration {
        self.duration_of(self.frame_size)
    }
}

/// Callback receiving captured mono samples.
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Source of captured audio.
pub trait AudioInput: Send + Sync {
    /// Open a capture stream delivering samples to `on_samples`.
    fn open(&self, spec: &StreamSpec, on_samples: SampleCallback)
    -> CallResult<Box<dyn InputStream>>;
}

/// A running capture stream.
pub trait InputStream: Send {
    /// Stop delivering samples and release the device. Idempotent.
    fn stop(&mut self);
}

/// Destination for rendered audio.
pub trait AudioOutput: Send + Sync {
    /// Open an output sink.
    fn open(&self, spec: &StreamSpec) -> CallResult<Arc<dyn OutputSink>>;
}

/// An open output device.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Render one block, returning once it has finished playing.
    async fn render(&self, block: Arc<[f32]>) -> CallResult<()>;

    /// Stop rendering immediately. Pending and later renders return at once.
    fn halt(&self);
}

// =============================================================================
// Paced null output
// =============================================================================

/// Output that plays nothing but takes as long as real playback would.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn open(&self, spec: &StreamSpec) -> CallResult<Arc<dyn OutputSink>> {
        if spec.sample_rate == 0 {
            return Err(CallError::Device("sample rate must be positive".to_string()));
        }
        Ok(Arc::new(PacedSink {
            spec: *spec,
            halted: CancellationToken::new(),
        }))
    }
}

struct PacedSink {
    spec: StreamSpec,
    halted: CancellationToken,
}

#[async_trait]
impl OutputSink for PacedSink {
    async fn render(&self, block: Arc<[f32]>) -> CallResult<()> {
        let duration = self.spec.duration_of(block.len());
        tokio::select! {
            _ = self.halted.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
        Ok(())
    }

    fn halt(&self) {
        self.halted.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_default_spec() {
        let spec = StreamSpec::default();
        assert_eq!(spec.sample_rate, 24000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.frame_size, 4096);
        let ms = spec.frame_duration().as_millis();
        assert!((170..=171).contains(&ms), "frame lasts {ms}ms");
    }

    #[tokio::test]
    async fn test_null_output_paces_blocks() {
        let spec = StreamSpec {
            sample_rate: 1000,
            ..StreamSpec::default()
        };
        let sink = NullOutput.open(&spec).unwrap();
        let started = Instant::now();
        sink.render(Arc::from(vec![0.0f32; 50])).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_null_output_halt_returns_immediately() {
        let spec = StreamSpec {
            sample_rate: 10,
            ..StreamSpec::default()
        };
        let sink = NullOutput.open(&spec).unwrap();
        sink.halt();
        let started = Instant::now();
        sink.render(Arc::from(vec![0.0f32; 100])).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_null_output_rejects_zero_rate() {
        let spec = StreamSpec {
            sample_rate: 0,
            ..StreamSpec::default()
        };
        assert!(matches!(NullOutput.open(&spec), Err(CallError::Device(_))));
    }
}
