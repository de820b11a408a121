//! Voice call session controller.
//!
//! A [`SessionController`] owns one call from start to finish:
//!
//! ```text
//! Idle --start()--> Connecting --session.updated--> Active --end()/close--> Ended
//!   ^                   |
//!   +---- failure ------+
//! ```
//!
//! `start()` and `end()` never block. Connecting runs on a spawned task that
//! fetches a credential, opens the signaling channel, opens the output device
//! and sends the session configuration, all under one connect timeout. Once
//! the server acknowledges, the call goes Active, a greeting turn is
//! requested, and capture starts shortly after.
//!
//! The channel, playback unit and capture unit are held together in one
//! resource set and always torn down together. Background tasks check the
//! attempt's cancellation token before touching shared state, so callbacks
//! that fire after `end()` are no-ops. Dropping the last controller ends the
//! call the same way `end()` does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::base::{CallError, CallResult, CallState, SessionStatus};
use super::credentials::{CredentialProvider, provider_from_config};
use super::dispatcher::{EventDispatcher, SessionSignals};
use super::messages::{ClientEvent, InputAudioTranscription, SessionConfig, TurnDetection};
use super::signaling::{
    ChannelSender, InboundMessage, SignalingChannel, SignalingTransport, WebSocketTransport,
};
use super::transcript::TranscriptSink;
use crate::config::CallConfig;
use crate::core::audio::capture::CaptureUnit;
use crate::core::audio::device::{AudioInput, AudioOutput, StreamSpec};
use crate::core::audio::playback::PlaybackUnit;

/// Synthetic user turn that prompts the agent to open the conversation.
pub const DEFAULT_GREETING: &str = "(The call is connected. Please greet the user naturally.)";

/// Delay between activation and the greeting request.
pub const DEFAULT_GREETING_DELAY: Duration = Duration::from_millis(300);

/// Delay between the greeting request and capture start.
pub const DEFAULT_CAPTURE_DELAY: Duration = Duration::from_millis(500);

/// Bound on credential fetch, connect and acknowledgement together.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Options
// =============================================================================

/// External collaborators a session drives.
#[derive(Clone)]
pub struct SessionDeps {
    /// Issues one credential per call
    pub credentials: Arc<dyn CredentialProvider>,
    /// Opens the signaling channel
    pub transport: Arc<dyn SignalingTransport>,
    /// Microphone (or stand-in)
    pub input: Arc<dyn AudioInput>,
    /// Speaker (or stand-in)
    pub output: Arc<dyn AudioOutput>,
    /// Receives user and agent transcript turns
    pub transcripts: Arc<dyn TranscriptSink>,
}

/// Behavior of a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Configuration sent with `session.update`
    pub session: SessionConfig,
    /// Modalities requested for the greeting response
    pub modalities: Vec<String>,
    /// Greeting turn text; `None` skips the greeting
    pub greeting: Option<String>,
    pub greeting_delay: Duration,
    pub capture_delay: Duration,
    pub connect_timeout: Duration,
    /// Capture and playback stream parameters
    pub stream: StreamSpec,
}

impl Default for SessionOptions {
    fn default() -> Self {
        let modalities = vec!["text".to_string(), "audio".to_string()];
        Self {
            session: SessionConfig {
                modalities: Some(modalities.clone()),
                instructions: None,
                voice: Some("tara".to_string()),
                input_audio_format: Some("pcm16".to_string()),
                output_audio_format: Some("pcm16".to_string()),
                input_audio_transcription: Some(InputAudioTranscription {
                    model: "whisper-1".to_string(),
                }),
                turn_detection: Some(TurnDetection::ServerVad {
                    threshold: Some(0.5),
                    prefix_padding_ms: Some(300),
                    silence_duration_ms: Some(500),
                }),
            },
            modalities,
            greeting: Some(DEFAULT_GREETING.to_string()),
            greeting_delay: DEFAULT_GREETING_DELAY,
            capture_delay: DEFAULT_CAPTURE_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stream: StreamSpec::default(),
        }
    }
}

impl SessionOptions {
    /// Options described by a loaded configuration.
    pub fn from_config(config: &CallConfig) -> Self {
        Self {
            session: SessionConfig {
                modalities: Some(config.modalities.clone()),
                instructions: config.instructions.clone().filter(|i| !i.is_empty()),
                voice: Some(config.voice.clone()),
                input_audio_format: Some("pcm16".to_string()),
                output_audio_format: Some("pcm16".to_string()),
                input_audio_transcription: Some(InputAudioTranscription {
                    model: config.transcription_model.clone(),
                }),
                turn_detection: Some(TurnDetection::ServerVad {
                    threshold: Some(config.vad_threshold),
                    prefix_padding_ms: Some(config.vad_prefix_padding_ms),
                    silence_duration_ms: Some(config.vad_silence_duration_ms),
                }),
            },
            modalities: config.modalities.clone(),
            greeting: config.greeting.clone(),
            greeting_delay: Duration::from_millis(config.greeting_delay_ms),
            capture_delay: Duration::from_millis(config.capture_delay_ms),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            stream: StreamSpec {
                sample_rate: config.sample_rate,
                frame_size: config.frame_size,
                ..StreamSpec::default()
            },
        }
    }
}

/// Which per-call handles a session currently holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeldResources {
    pub channel: bool,
    pub capture: bool,
    pub playback: bool,
}

impl HeldResources {
    pub fn none(&self) -> bool {
        !self.channel && !self.capture && !self.playback
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Handles for one connection attempt, released as a unit.
#[derive(Default)]
struct Resources {
    channel: Option<SignalingChannel>,
    sender: Option<ChannelSender>,
    capture: Option<CaptureUnit>,
    playback: Option<PlaybackUnit>,
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

struct SessionInner {
    id: String,
    deps: SessionDeps,
    options: SessionOptions,
    status: watch::Sender<SessionStatus>,
    muted: Arc<AtomicBool>,
    resources: Mutex<Resources>,
}

/// Controls one voice call. Cheap to clone; clones share the call.
///
/// Dropping the last clone ends the call, even while a connect attempt is
/// still holding the session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<SessionInner>,
    _guard: Arc<EndOnDrop>,
}

/// Shared by every controller clone; ends the call when the last one goes.
struct EndOnDrop(Arc<SessionInner>);

impl Drop for EndOnDrop {
    fn drop(&mut self) {
        self.0.end();
    }
}

impl SessionController {
    pub fn new(deps: SessionDeps, options: SessionOptions) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        let inner = Arc::new(SessionInner {
            id: uuid::Uuid::new_v4().to_string(),
            deps,
            options,
            status,
            muted: Arc::new(AtomicBool::new(false)),
            resources: Mutex::new(Resources::default()),
        });
        Self {
            _guard: Arc::new(EndOnDrop(inner.clone())),
            inner,
        }
    }

    /// Session wired to the WebSocket transport and the configured credential source.
    pub fn from_config(
        config: &CallConfig,
        input: Arc<dyn AudioInput>,
        output: Arc<dyn AudioOutput>,
        transcripts: Arc<dyn TranscriptSink>,
    ) -> CallResult<Self> {
        config
            .validate()
            .map_err(|e| CallError::InvalidConfiguration(e.to_string()))?;
        let deps = SessionDeps {
            credentials: provider_from_config(config)?,
            transport: Arc::new(WebSocketTransport::from_config(config)),
            input,
            output,
            transcripts,
        };
        Ok(Self::new(deps, SessionOptions::from_config(config)))
    }

    /// Identifier used in logs.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    pub fn state(&self) -> CallState {
        self.inner.status.borrow().state
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::SeqCst)
    }

    /// Per-call handles currently held.
    pub fn held_resources(&self) -> HeldResources {
        let resources = self.inner.resources.lock();
        HeldResources {
            channel: resources.channel.is_some(),
            capture: resources.capture.is_some(),
            playback: resources.playback.is_some(),
        }
    }

    /// Begin connecting. Only valid from `Idle`; returns immediately.
    ///
    /// The outcome is reported through the status: `Active` on success, or
    /// back to `Idle` with `last_error` set on failure.
    pub fn start(&self) -> CallResult<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            CallError::InvalidState("start requires a running Tokio runtime".to_string())
        })?;

        let mut current = CallState::Idle;
        let started = self.inner.status.send_if_modified(|status| {
            current = status.state;
            if status.state != CallState::Idle {
                return false;
            }
            status.state = CallState::Connecting;
            status.last_error = None;
            status.session_id = None;
            true
        });
        if !started {
            return Err(CallError::InvalidState(format!(
                "cannot start a call that is {current}"
            )));
        }

        let span = info_span!("voice_call", call_id = %self.inner.id);
        let mut resources = self.inner.resources.lock();
        if self.inner.status.borrow().state != CallState::Connecting {
            // Ended before the attempt was registered.
            return Ok(());
        }
        resources.cancel = CancellationToken::new();
        let cancel = resources.cancel.clone();
        let inner = self.inner.clone();
        info!(parent: &span, "Call connecting");
        resources
            .tasks
            .push(runtime.spawn(inner.run_connect(cancel).instrument(span)));
        Ok(())
    }

    /// End the call and release everything it holds. Idempotent; never fails.
    pub fn end(&self) {
        self.inner.end();
    }

    /// Flip the mute flag and return the new value.
    ///
    /// Capture keeps running while muted; frames are simply not sent.
    pub fn toggle_mute(&self) -> bool {
        let muted = !self.inner.muted.fetch_xor(true, Ordering::SeqCst);
        self.inner.status.send_if_modified(|status| {
            let now = self.inner.muted.load(Ordering::SeqCst);
            let changed = status.muted != now;
            status.muted = now;
            changed
        });
        debug!(call_id = %self.inner.id, muted, "Mute toggled");
        muted
    }
}

impl SessionInner {
    // -------------------------------------------------------------------------
    // Connecting
    // -------------------------------------------------------------------------

    async fn run_connect(self: Arc<Self>, cancel: CancellationToken) {
        let timeout = self.options.connect_timeout;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            result = tokio::time::timeout(timeout, self.negotiate(&cancel)) => match result {
                Ok(result) => result,
                Err(_) => Err(CallError::Connection(format!(
                    "session not acknowledged within {}ms",
                    timeout.as_millis()
                ))),
            },
        };

        match outcome {
            Ok(()) => self.activate(&cancel),
            Err(e) => self.fail_connect(e),
        }
    }

    /// Everything up to and including the session acknowledgement.
    async fn negotiate(self: &Arc<Self>, cancel: &CancellationToken) -> CallResult<()> {
        let credential = self.deps.credentials.fetch().await?;
        let mut channel = self.deps.transport.connect(&credential).await?;
        drop(credential);

        let inbound = channel
            .take_inbound()
            .ok_or_else(|| CallError::Connection("inbound stream unavailable".to_string()))?;
        let sender = channel.sender();

        // Device backends may block while the hardware opens.
        let output = self.deps.output.clone();
        let spec = self.options.stream;
        let sink = tokio::task::spawn_blocking(move || output.open(&spec))
            .await
            .map_err(|e| CallError::Device(format!("output open task failed: {e}")))??;
        // Invoked under the playback queue lock, so it must not own the session.
        let status = self.status.clone();
        let playback = PlaybackUnit::with_speaking_callback(
            sink,
            Arc::new(move |speaking| apply_speaking(&status, speaking)),
        )?;

        let (ack_tx, ack_rx) = oneshot::channel();
        let signals = Arc::new(ControllerSignals {
            session: Arc::downgrade(self),
            ack: Mutex::new(Some(ack_tx)),
        });
        let dispatcher =
            EventDispatcher::new(signals.clone(), playback.clone(), self.deps.transcripts.clone());

        {
            let mut resources = self.resources.lock();
            if cancel.is_cancelled() {
                drop(resources);
                playback.flush();
                channel.close();
                return Err(CallError::InvalidState(
                    "call ended while connecting".to_string(),
                ));
            }
            resources.tasks.push(tokio::spawn(
                dispatch_loop(
                    Arc::downgrade(self),
                    inbound,
                    dispatcher,
                    signals,
                    cancel.clone(),
                )
                .in_current_span(),
            ));
            resources.channel = Some(channel);
            resources.sender = Some(sender.clone());
            resources.playback = Some(playback);
        }

        sender.send(ClientEvent::SessionUpdate {
            session: self.options.session.clone(),
        })?;
        debug!("Session configuration sent");

        match ack_rx.await {
            Ok(result) => result,
            Err(_) => Err(CallError::Connection(
                "connection closed before the session was acknowledged".to_string(),
            )),
        }
    }

    fn activate(self: &Arc<Self>, cancel: &CancellationToken) {
        let activated = self.status.send_if_modified(|status| {
            if status.state != CallState::Connecting {
                return false;
            }
            status.state = CallState::Active;
            true
        });
        if !activated {
            return;
        }
        info!("Call active");

        let mut resources = self.resources.lock();
        if cancel.is_cancelled() {
            return;
        }
        resources.tasks.push(tokio::spawn(
            greet_then_capture(Arc::downgrade(self), cancel.clone()).in_current_span(),
        ));
    }

    fn fail_connect(&self, error: CallError) {
        warn!("Call failed to connect: {error}");
        // Handles go before the state returns to Idle.
        self.teardown();
        self.status.send_if_modified(|status| {
            if status.state != CallState::Connecting {
                return false;
            }
            status.state = CallState::Idle;
            status.last_error = Some(error.clone());
            true
        });
    }

    // -------------------------------------------------------------------------
    // Active
    // -------------------------------------------------------------------------

    fn send_greeting(&self, text: &str) {
        let Some(sender) = self.resources.lock().sender.clone() else {
            return;
        };
        let result = sender
            .send(ClientEvent::user_text(text))
            .and_then(|_| sender.send(ClientEvent::response_create(&self.options.modalities)));
        match result {
            Ok(()) => debug!("Greeting requested"),
            Err(e) => warn!("Failed to request greeting: {e}"),
        }
    }

    async fn start_capture(&self, cancel: &CancellationToken) -> CallResult<()> {
        let sender = self
            .resources
            .lock()
            .sender
            .clone()
            .ok_or(CallError::NotConnected)?;

        let input = self.deps.input.clone();
        let spec = self.options.stream;
        let muted = self.muted.clone();
        let capture = tokio::task::spawn_blocking(move || {
            CaptureUnit::acquire(input.as_ref(), &spec, sender, muted)
        })
        .await
        .map_err(|e| CallError::Device(format!("capture open task failed: {e}")))??;

        let mut resources = self.resources.lock();
        if cancel.is_cancelled() {
            drop(resources);
            drop(capture);
            return Ok(());
        }
        resources.capture = Some(capture);
        info!("Capture running");
        Ok(())
    }

    fn end(&self) {
        let ended = self.status.send_if_modified(|status| {
            if status.state == CallState::Ended {
                return false;
            }
            status.state = CallState::Ended;
            true
        });
        if ended {
            info!(call_id = %self.id, "Call ended");
        }
        self.teardown();
    }

    /// Connecting or Active ends with `error` recorded.
    fn terminate(&self, error: CallError) {
        let ended = self.status.send_if_modified(|status| {
            if !matches!(status.state, CallState::Connecting | CallState::Active) {
                return false;
            }
            status.state = CallState::Ended;
            status.last_error = Some(error.clone());
            true
        });
        if ended {
            warn!("Call terminated: {error}");
            self.teardown();
        }
    }

    fn record_error(&self, error: CallError) {
        self.status.send_modify(|status| status.last_error = Some(error));
    }

    fn set_listening(&self, listening: bool) {
        self.status.send_if_modified(|status| {
            if !status.state.is_live() || status.listening == listening {
                return false;
            }
            status.listening = listening;
            true
        });
    }

    fn set_session_id(&self, session_id: Option<String>) {
        self.status.send_if_modified(|status| {
            if status.session_id == session_id {
                return false;
            }
            status.session_id = session_id;
            true
        });
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Release every handle of the current attempt. Idempotent.
    fn teardown(&self) {
        let resources = {
            let mut guard = self.resources.lock();
            guard.cancel.cancel();
            std::mem::take(&mut *guard)
        };

        if let Some(mut capture) = resources.capture {
            capture.release();
        }
        if let Some(playback) = resources.playback {
            playback.flush();
        }
        if let Some(mut channel) = resources.channel {
            channel.close();
        }
        for task in resources.tasks {
            task.abort();
        }

        self.status.send_if_modified(|status| {
            let changed = status.listening || status.speaking;
            status.listening = false;
            status.speaking = false;
            changed
        });
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn apply_speaking(status: &watch::Sender<SessionStatus>, speaking: bool) {
    status.send_if_modified(|status| {
        if !status.state.is_live() || status.speaking == speaking {
            return false;
        }
        status.speaking = speaking;
        true
    });
}

impl CallState {
    /// Connecting or Active.
    fn is_live(self) -> bool {
        matches!(self, CallState::Connecting | CallState::Active)
    }
}

// =============================================================================
// Background tasks
// =============================================================================

/// Wait, request the greeting, wait again, then open the microphone.
async fn greet_then_capture(session: Weak<SessionInner>, cancel: CancellationToken) {
    let Some((greeting, greeting_delay, capture_delay)) = session.upgrade().map(|inner| {
        (
            inner.options.greeting.clone(),
            inner.options.greeting_delay,
            inner.options.capture_delay,
        )
    }) else {
        return;
    };

    if let Some(text) = greeting {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(greeting_delay) => {}
        }
        match session.upgrade() {
            Some(inner) => inner.send_greeting(&text),
            None => return,
        }
    }

    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(capture_delay) => {}
    }
    let Some(inner) = session.upgrade() else {
        return;
    };
    if let Err(e) = inner.start_capture(&cancel).await {
        inner.terminate(e);
    }
}

/// Feed inbound messages to the dispatcher, one at a time, in arrival order.
async fn dispatch_loop(
    session: Weak<SessionInner>,
    mut inbound: mpsc::Receiver<InboundMessage>,
    mut dispatcher: EventDispatcher,
    signals: Arc<ControllerSignals>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return,
            message = inbound.recv() => message,
        };

        let reason = match message {
            Some(InboundMessage::Text(text)) => {
                if cancel.is_cancelled() {
                    return;
                }
                let _ = dispatcher.dispatch_text(&text);
                continue;
            }
            Some(InboundMessage::Closed(reason)) => reason,
            None => None,
        };

        if cancel.is_cancelled() {
            return;
        }
        let error = CallError::Connection(
            reason.unwrap_or_else(|| "signaling channel closed".to_string()),
        );
        if !signals.resolve_ack(Err(error.clone()))
            && let Some(inner) = session.upgrade()
        {
            inner.terminate(error);
        }
        return;
    }
}

/// Bridges dispatcher signals back into the session.
struct ControllerSignals {
    session: Weak<SessionInner>,
    ack: Mutex<Option<oneshot::Sender<CallResult<()>>>>,
}

impl ControllerSignals {
    /// Complete the pending acknowledgement. False if it was already settled.
    fn resolve_ack(&self, result: CallResult<()>) -> bool {
        match self.ack.lock().take() {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }
}

impl SessionSignals for ControllerSignals {
    fn set_listening(&self, listening: bool) {
        if let Some(inner) = self.session.upgrade() {
            inner.set_listening(listening);
        }
    }

    fn on_acknowledged(&self) {
        if !self.resolve_ack(Ok(())) {
            debug!("Session configuration re-acknowledged");
        }
    }

    fn on_session_created(&self, session_id: Option<String>) {
        if let Some(inner) = self.session.upgrade() {
            inner.set_session_id(session_id);
        }
    }

    fn on_server_error(&self, error: CallError) {
        // Fatal only while the configuration is unacknowledged.
        if self.resolve_ack(Err(error.clone())) {
            return;
        }
        if let Some(inner) = self.session.upgrade() {
            inner.record_error(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = SessionOptions::default();
        assert_eq!(options.modalities, vec!["text", "audio"]);
        assert_eq!(options.greeting_delay, Duration::from_millis(300));
        assert_eq!(options.capture_delay, Duration::from_millis(500));
        assert_eq!(options.session.voice.as_deref(), Some("tara"));
        assert_eq!(options.stream.frame_size, 4096);
    }

    #[test]
    fn test_options_from_config() {
        let mut config = CallConfig::default();
        config.voice = "ara".to_string();
        config.vad_threshold = 0.7;
        config.frame_size = 2048;
        config.greeting = None;
        config.instructions = Some(String::new());

        let options = SessionOptions::from_config(&config);
        assert_eq!(options.session.voice.as_deref(), Some("ara"));
        assert!(options.session.instructions.is_none());
        assert!(options.greeting.is_none());
        assert_eq!(options.stream.frame_size, 2048);
        match options.session.turn_detection {
            Some(TurnDetection::ServerVad { threshold, .. }) => assert_eq!(threshold, Some(0.7)),
            other => panic!("Expected server VAD, got {other:?}"),
        }
    }

    #[test]
    fn test_call_state_liveness() {
        assert!(!CallState::Idle.is_live());
        assert!(CallState::Connecting.is_live());
        assert!(CallState::Active.is_live());
        assert!(!CallState::Ended.is_live());
    }

    #[test]
    fn test_held_resources_none() {
        assert!(HeldResources::default().none());
        assert!(
            !HeldResources {
                channel: true,
                ..HeldResources::default()
            }
            .none()
        );
    }
}
