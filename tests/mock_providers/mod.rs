//! Mock collaborators for voice call tests
//!
//! Stands in for everything a session talks to:
//! - Transport handing out loopback channels whose far end the test drives
//! - Credential providers that succeed or fail on demand
//! - Microphone fed by hand from the test
//! - Speaker that records what it rendered, with a configurable render time
//! - Transcript sink that records every turn

// Allow dead code in test infrastructure - not every test file uses every mock
#![allow(dead_code)]

pub mod websocket_mock;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use waav_voice_call::core::audio::device::SampleCallback;
use waav_voice_call::core::audio::{AudioInput, AudioOutput, InputStream, OutputSink, StreamSpec};
use waav_voice_call::core::realtime::{
    CallError, CallResult, CallState, CredentialProvider, EphemeralCredential, LoopbackPeer,
    SessionController, SessionDeps, SessionOptions, SignalingChannel, SignalingTransport,
    StaticCredentialProvider, TranscriptSink, TranscriptTurn,
};

// =============================================================================
// Transport
// =============================================================================

/// Transport returning loopback channels. Each connect hands the peer to the test.
pub struct MockTransport {
    peers: mpsc::UnboundedSender<LoopbackPeer>,
    failure: Option<CallError>,
    pub connects: AtomicUsize,
    pub last_secret: Mutex<Option<String>>,
}

impl MockTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoopbackPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers: tx,
                failure: None,
                connects: AtomicUsize::new(0),
                last_secret: Mutex::new(None),
            },
            rx,
        )
    }

    pub fn failing(error: CallError) -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self {
            peers: tx,
            failure: Some(error),
            connects: AtomicUsize::new(0),
            last_secret: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SignalingTransport for MockTransport {
    async fn connect(&self, credential: &EphemeralCredential) -> CallResult<SignalingChannel> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.last_secret.lock() = Some(credential.secret().to_string());
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        let (channel, peer) = SignalingChannel::loopback();
        let _ = self.peers.send(peer);
        Ok(channel)
    }
}

/// Credential provider that always fails.
pub struct FailingCredentials;

#[async_trait]
impl CredentialProvider for FailingCredentials {
    async fn fetch(&self) -> CallResult<EphemeralCredential> {
        Err(CallError::Credential("token endpoint returned 401".to_string()))
    }
}

// =============================================================================
// Audio input
// =============================================================================

/// Microphone fed by the test through [`MockInput::feed`].
#[derive(Default)]
pub struct MockInput {
    callback: Arc<Mutex<Option<SampleCallback>>>,
    pub opens: AtomicUsize,
    pub stops: Arc<AtomicUsize>,
    pub deny: AtomicBool,
}

impl MockInput {
    pub fn denied() -> Self {
        let input = Self::default();
        input.deny.store(true, Ordering::SeqCst);
        input
    }

    /// Deliver samples as if the device produced them. Returns false if no stream is open.
    pub fn feed(&self, samples: &[f32]) -> bool {
        match self.callback.lock().as_mut() {
            Some(callback) => {
                callback(samples);
                true
            }
            None => false,
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

struct MockInputStream {
    stops: Arc<AtomicUsize>,
    stopped: bool,
}

impl InputStream for MockInputStream {
    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl AudioInput for MockInput {
    fn open(
        &self,
        _spec: &StreamSpec,
        on_samples: SampleCallback,
    ) -> CallResult<Box<dyn InputStream>> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(CallError::Device("microphone permission denied".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.callback.lock() = Some(on_samples);
        Ok(Box::new(MockInputStream {
            stops: self.stops.clone(),
            stopped: false,
        }))
    }
}

// =============================================================================
// Audio output
// =============================================================================

/// Speaker recording the first sample of every block it finished rendering.
pub struct MockOutput {
    sink: Arc<RecordingSink>,
    open_delay: Duration,
    pub opens: AtomicUsize,
}

impl MockOutput {
    pub fn new(render_time: Duration) -> Self {
        Self {
            sink: Arc::new(RecordingSink {
                render_time,
                started: AtomicUsize::new(0),
                rendered: Mutex::new(Vec::new()),
                halted: AtomicBool::new(false),
            }),
            open_delay: Duration::ZERO,
            opens: AtomicUsize::new(0),
        }
    }

    /// Make `open` block the calling thread, like a slow hardware backend.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn rendered(&self) -> Vec<f32> {
        self.sink.rendered.lock().clone()
    }

    pub fn started(&self) -> usize {
        self.sink.started.load(Ordering::SeqCst)
    }

    pub fn halted(&self) -> bool {
        self.sink.halted.load(Ordering::SeqCst)
    }
}

impl AudioOutput for MockOutput {
    fn open(&self, _spec: &StreamSpec) -> CallResult<Arc<dyn OutputSink>> {
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.sink.clone())
    }
}

pub struct RecordingSink {
    render_time: Duration,
    started: AtomicUsize,
    rendered: Mutex<Vec<f32>>,
    halted: AtomicBool,
}

#[async_trait]
impl OutputSink for RecordingSink {
    async fn render(&self, block: Arc<[f32]>) -> CallResult<()> {
        if self.halted.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.render_time).await;
        if !self.halted.load(Ordering::SeqCst) {
            self.rendered.lock().push(block[0]);
        }
        Ok(())
    }

    fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }
}

// =============================================================================
// Transcripts
// =============================================================================

#[derive(Default)]
pub struct RecordingTranscripts {
    turns: Mutex<Vec<TranscriptTurn>>,
}

impl RecordingTranscripts {
    pub fn turns(&self) -> Vec<TranscriptTurn> {
        self.turns.lock().clone()
    }

    pub fn final_turns(&self) -> Vec<TranscriptTurn> {
        self.turns().into_iter().filter(|t| t.is_final).collect()
    }
}

impl TranscriptSink for RecordingTranscripts {
    fn append(&self, turn: TranscriptTurn) {
        self.turns.lock().push(turn);
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A session wired entirely to mocks.
pub struct Harness {
    pub session: SessionController,
    pub peers: mpsc::UnboundedReceiver<LoopbackPeer>,
    pub transport: Arc<MockTransport>,
    pub input: Arc<MockInput>,
    pub output: Arc<MockOutput>,
    pub transcripts: Arc<RecordingTranscripts>,
}

/// Options with short delays and tiny frames so tests run fast.
pub fn fast_options() -> SessionOptions {
    let mut options = SessionOptions::default();
    options.greeting_delay = Duration::from_millis(10);
    options.capture_delay = Duration::from_millis(10);
    options.connect_timeout = Duration::from_secs(2);
    options.stream.frame_size = 4;
    options
}

pub struct HarnessBuilder {
    options: SessionOptions,
    credentials: Arc<dyn CredentialProvider>,
    input: Arc<MockInput>,
    render_time: Duration,
    open_delay: Duration,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            options: fast_options(),
            credentials: Arc::new(StaticCredentialProvider::new("ephemeral-test-token")),
            input: Arc::new(MockInput::default()),
            render_time: Duration::from_millis(5),
            open_delay: Duration::ZERO,
        }
    }

    pub fn options(mut self, update: impl FnOnce(&mut SessionOptions)) -> Self {
        update(&mut self.options);
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn input(mut self, input: MockInput) -> Self {
        self.input = Arc::new(input);
        self
    }

    pub fn render_time(mut self, render_time: Duration) -> Self {
        self.render_time = render_time;
        self
    }

    pub fn open_delay(mut self, open_delay: Duration) -> Self {
        self.open_delay = open_delay;
        self
    }

    pub fn build(self) -> Harness {
        let (transport, peers) = MockTransport::new();
        let transport = Arc::new(transport);
        let output = Arc::new(MockOutput::new(self.render_time).with_open_delay(self.open_delay));
        let transcripts = Arc::new(RecordingTranscripts::default());
        let deps = SessionDeps {
            credentials: self.credentials,
            transport: transport.clone(),
            input: self.input.clone(),
            output: output.clone(),
            transcripts: transcripts.clone(),
        };
        Harness {
            session: SessionController::new(deps, self.options),
            peers,
            transport,
            input: self.input,
            output,
            transcripts,
        }
    }
}

pub fn harness() -> Harness {
    HarnessBuilder::new().build()
}

impl Harness {
    /// Wait for the session to open its channel and return the far end.
    pub async fn next_peer(&mut self) -> LoopbackPeer {
        tokio::time::timeout(Duration::from_secs(2), self.peers.recv())
            .await
            .expect("timed out waiting for connect")
            .expect("transport dropped")
    }

    /// Start the call, acknowledge the configuration and wait for Active.
    pub async fn connect(&mut self) -> LoopbackPeer {
        self.session.start().expect("start failed");
        let mut peer = self.next_peer().await;
        let first = tokio::time::timeout(Duration::from_secs(2), peer.outbound.recv())
            .await
            .expect("timed out waiting for session.update")
            .expect("channel closed");
        assert_eq!(first.event_type(), "session.update");
        peer.send_json(serde_json::json!({"type": "session.updated", "session": {}}))
            .await;
        wait_for_state(&self.session, CallState::Active).await;
        peer
    }

    /// Wait until capture has opened the microphone and the session holds it.
    pub async fn wait_for_capture(&self) {
        let input = self.input.clone();
        let session = self.session.clone();
        eventually(move || input.opens() == 1 && session.held_resources().capture).await;
    }
}

/// Wait for the session to reach `state`.
pub async fn wait_for_state(session: &SessionController, state: CallState) {
    let mut status = session.subscribe();
    tokio::time::timeout(Duration::from_secs(3), status.wait_for(|s| s.state == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}, status {:?}", session.status()))
        .map(|_| ())
        .expect("status channel closed");
}

/// Poll `condition` until it holds.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 3s");
}

/// Encoded chunk of `len` samples all equal to `value`.
pub fn chunk(value: f32, len: usize) -> String {
    waav_voice_call::core::audio::encode(&vec![value; len])
}
