//! Inbound event routing.
//!
//! The [`EventDispatcher`] is owned by a session's dispatch loop and sees
//! every inbound message in arrival order. Audio goes to the playback queue,
//! turn-taking and lifecycle signals go back to the session through
//! [`SessionSignals`], and transcripts go to the embedder's sink.

use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use super::base::{CallError, CallResult, TranscriptTurn};
use super::messages::ServerEvent;
use super::transcript::TranscriptSink;
use crate::core::audio::playback::PlaybackUnit;

/// Session-side effects of inbound events.
pub trait SessionSignals: Send + Sync {
    /// Server VAD started or stopped hearing the user.
    fn set_listening(&self, listening: bool);

    /// The session configuration was acknowledged.
    fn on_acknowledged(&self);

    /// The server announced its session.
    fn on_session_created(&self, session_id: Option<String>);

    /// The server reported an error event.
    fn on_server_error(&self, error: CallError);
}

/// Routes inbound protocol events for one call.
pub struct EventDispatcher {
    signals: Arc<dyn SessionSignals>,
    playback: PlaybackUnit,
    transcripts: Arc<dyn TranscriptSink>,
    assistant_partial: String,
}

impl EventDispatcher {
    pub fn new(
        signals: Arc<dyn SessionSignals>,
        playback: PlaybackUnit,
        transcripts: Arc<dyn TranscriptSink>,
    ) -> Self {
        Self {
            signals,
            playback,
            transcripts,
            assistant_partial: String::new(),
        }
    }

    /// Parse and route one text frame.
    ///
    /// A frame that does not parse is logged and discarded; the error is
    /// returned for the caller's information only.
    pub fn dispatch_text(&mut self, text: &str) -> CallResult<()> {
        match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => {
                self.dispatch(event);
                Ok(())
            }
            Err(e) => {
                warn!("Discarding malformed inbound message: {e}");
                Err(CallError::Protocol(e.to_string()))
            }
        }
    }

    /// Route one parsed event.
    pub fn dispatch(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated { session } => {
                info!(session_id = ?session.id, model = ?session.model, "Realtime session created");
                self.signals.on_session_created(session.id);
            }

            ServerEvent::SessionUpdated { .. } => {
                debug!("Session configuration acknowledged");
                self.signals.on_acknowledged();
            }

            ServerEvent::Error { error } => {
                error!("Realtime service error: {}", error);
                self.signals.on_server_error(CallError::Server(error.to_string()));
            }

            ServerEvent::SpeechStarted { audio_start_ms, .. } => {
                debug!("Speech started at {}ms", audio_start_ms);
                self.signals.set_listening(true);
            }

            ServerEvent::SpeechStopped { audio_end_ms, .. } => {
                debug!("Speech stopped at {}ms", audio_end_ms);
                self.signals.set_listening(false);
            }

            ServerEvent::TranscriptionCompleted {
                item_id,
                transcript,
            } => {
                debug!("User transcript: {}", transcript);
                self.transcripts
                    .append(TranscriptTurn::user(transcript, item_id));
            }

            ServerEvent::TranscriptionFailed { item_id, error } => {
                let reason = error.map(|e| e.to_string()).unwrap_or_default();
                warn!(item_id = ?item_id, "User transcription failed: {}", reason);
            }

            ServerEvent::AudioDelta { delta, .. } => {
                // Undecodable chunks are dropped inside the playback unit.
                let _ = self.playback.enqueue(&delta);
            }

            ServerEvent::AudioTranscriptDelta { delta, item_id, .. } => {
                self.assistant_partial.push_str(&delta);
                self.transcripts.append(TranscriptTurn::assistant(
                    self.assistant_partial.clone(),
                    false,
                    item_id,
                ));
            }

            ServerEvent::AudioTranscriptDone {
                transcript,
                item_id,
                ..
            } => {
                let partial = std::mem::take(&mut self.assistant_partial);
                let text = if transcript.is_empty() {
                    partial
                } else {
                    transcript
                };
                debug!("Agent transcript: {}", text);
                self.transcripts
                    .append(TranscriptTurn::assistant(text, true, item_id));
            }

            ServerEvent::ResponseDone { response } => {
                debug!(response_id = ?response.id, status = ?response.status, "Response done");
            }

            ServerEvent::Unhandled => {
                trace!("Unhandled server event");
            }
        }
    }
}
