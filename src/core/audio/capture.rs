//! Microphone capture for a call.
//!
//! [`CaptureUnit`] slices device audio into fixed-size frames and sends each
//! one as an `input_audio_buffer.append` event. Frames are dropped, never
//! buffered, while the call is muted or the channel is closed, so capture
//! never builds a backlog.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace, warn};

use super::device::{AudioInput, InputStream, StreamSpec};
use crate::core::realtime::messages::ClientEvent;
use crate::core::realtime::signaling::ChannelSender;
use crate::core::realtime::{CallError, CallResult};

/// Accumulates arbitrary-length device buffers into fixed-size frames.
#[derive(Debug)]
pub struct Framer {
    frame_size: usize,
    pending: Vec<f32>,
}

impl Framer {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Feed samples, calling `on_frame` for every completed frame in order.
    pub fn push(&mut self, mut samples: &[f32], mut on_frame: impl FnMut(&[f32])) {
        while !samples.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];
            if self.pending.len() == self.frame_size {
                on_frame(&self.pending);
                self.pending.clear();
            }
        }
    }

    /// Samples waiting for the next frame boundary.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Discard any partial frame.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

/// Open capture stream bound to one call.
pub struct CaptureUnit {
    stream: Option<Box<dyn InputStream>>,
    closed: Arc<AtomicBool>,
}

impl CaptureUnit {
    /// Open `input` and start forwarding frames through `sender`.
    ///
    /// `muted` is read on every device buffer and frame; flipping it never
    /// touches the device.
    pub fn acquire(
        input: &dyn AudioInput,
        spec: &StreamSpec,
        sender: ChannelSender,
        muted: Arc<AtomicBool>,
    ) -> CallResult<Self> {
        if spec.frame_size == 0 {
            return Err(CallError::Device("frame size must be positive".to_string()));
        }

        let closed = Arc::new(AtomicBool::new(false));
        let callback_closed = closed.clone();
        let mut framer = Framer::new(spec.frame_size);

        let stream = input.open(
            spec,
            Box::new(move |samples| {
                if callback_closed.load(Ordering::SeqCst) {
                    return;
                }
                // Audio recorded while muted never reaches a frame.
                if muted.load(Ordering::SeqCst) {
                    framer.reset();
                    return;
                }
                framer.push(samples, |frame| {
                    // Re-checked per frame: release may land mid-buffer.
                    if callback_closed.load(Ordering::SeqCst) {
                        return;
                    }
                    if muted.load(Ordering::SeqCst) {
                        trace!("Muted, dropping captured frame");
                        return;
                    }
                    if !sender.is_open() {
                        trace!("Channel closed, dropping captured frame");
                        return;
                    }
                    if let Err(e) = sender.send(ClientEvent::audio_append(frame)) {
                        warn!("Failed to send captured frame: {e}");
                    }
                });
            }),
        )?;

        debug!(
            sample_rate = spec.sample_rate,
            frame_size = spec.frame_size,
            "Capture started"
        );

        Ok(Self {
            stream: Some(stream),
            closed,
        })
    }

    /// Whether the device is still held.
    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    /// Stop capturing and release the device. Idempotent.
    pub fn release(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            debug!("Capture released");
        }
    }
}

impl Drop for CaptureUnit {
    fn drop(&mut self) {
        self.release();
    }
}
