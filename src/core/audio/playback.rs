//! Ordered playback of agent audio.
//!
//! [`PlaybackUnit`] decodes each inbound chunk as it arrives and appends the
//! block to a FIFO queue. A single render task drains the queue: it pops the
//! head, renders it to completion, then considers the next block. Blocks are
//! therefore played one at a time in exactly the order they were enqueued.
//!
//! The next block is only scheduled after the previous one finishes, so
//! network jitter can leave short audible gaps between blocks.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::codec;
use super::device::OutputSink;
use crate::core::realtime::{CallError, CallResult};

/// Callback invoked when rendering starts (`true`) or goes idle (`false`).
pub type SpeakingCallback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct QueueState {
    blocks: VecDeque<Arc<[f32]>>,
    rendering: bool,
    closed: bool,
}

struct PlaybackInner {
    state: Mutex<QueueState>,
    sink: Arc<dyn OutputSink>,
    cancel: CancellationToken,
    on_speaking: Option<SpeakingCallback>,
    runtime: Handle,
}

impl PlaybackInner {
    fn notify_speaking(&self, speaking: bool) {
        if let Some(callback) = &self.on_speaking {
            callback(speaking);
        }
    }
}

/// FIFO render queue in front of an output sink.
#[derive(Clone)]
pub struct PlaybackUnit {
    inner: Arc<PlaybackInner>,
}

impl PlaybackUnit {
    /// Create a unit rendering to `sink`. Must be called inside a Tokio runtime.
    pub fn new(sink: Arc<dyn OutputSink>) -> CallResult<Self> {
        Self::build(sink, None)
    }

    /// Like [`PlaybackUnit::new`], reporting speaking transitions to `on_speaking`.
    pub fn with_speaking_callback(
        sink: Arc<dyn OutputSink>,
        on_speaking: SpeakingCallback,
    ) -> CallResult<Self> {
        Self::build(sink, Some(on_speaking))
    }

    fn build(sink: Arc<dyn OutputSink>, on_speaking: Option<SpeakingCallback>) -> CallResult<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            CallError::InvalidState("playback requires a running Tokio runtime".to_string())
        })?;
        Ok(Self {
            inner: Arc::new(PlaybackInner {
                state: Mutex::new(QueueState::default()),
                sink,
                cancel: CancellationToken::new(),
                on_speaking,
                runtime,
            }),
        })
    }

    /// Decode `chunk` and queue it behind everything already enqueued.
    ///
    /// A chunk that fails to decode is dropped and reported; the queue and
    /// the render loop are unaffected.
    pub fn enqueue(&self, chunk: &str) -> CallResult<()> {
        let samples = match codec::decode(chunk) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Dropping undecodable audio chunk: {e}");
                return Err(e.into());
            }
        };
        if samples.is_empty() {
            trace!("Skipping empty audio chunk");
            return Ok(());
        }
        self.enqueue_block(samples.into());
        Ok(())
    }

    /// Queue an already decoded block.
    pub fn enqueue_block(&self, block: Arc<[f32]>) {
        let start_loop = {
            let mut state = self.inner.state.lock();
            if state.closed {
                trace!("Playback flushed, ignoring block");
                return;
            }
            state.blocks.push_back(block);
            if state.rendering {
                false
            } else {
                state.rendering = true;
                self.inner.notify_speaking(true);
                true
            }
        };

        if start_loop {
            self.inner.runtime.spawn(render_loop(self.inner.clone()));
        }
    }

    /// Drop every pending block and halt the output. Terminal.
    pub fn flush(&self) {
        let was_rendering = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.blocks.clear();
            std::mem::replace(&mut state.rendering, false)
        };

        self.inner.cancel.cancel();
        self.inner.sink.halt();
        if was_rendering {
            self.inner.notify_speaking(false);
        }
        debug!("Playback flushed");
    }

    /// Blocks waiting behind the one currently rendering.
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().blocks.len()
    }

    /// Whether a block is being rendered.
    pub fn is_rendering(&self) -> bool {
        self.inner.state.lock().rendering
    }

    pub fn is_flushed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

/// Render queued blocks one at a time until the queue drains or is flushed.
async fn render_loop(inner: Arc<PlaybackInner>) {
    loop {
        let block = {
            let mut state = inner.state.lock();
            if state.closed {
                return;
            }
            match state.blocks.pop_front() {
                Some(block) => block,
                None => {
                    state.rendering = false;
                    inner.notify_speaking(false);
                    return;
                }
            }
        };

        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            result = inner.sink.render(block) => {
                if let Err(e) = result {
                    warn!("Audio render failed: {e}");
                }
            }
        }
    }
}
