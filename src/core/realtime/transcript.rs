//! Transcript sinks.
//!
//! The call does not render transcripts itself. Recognized user speech and
//! agent speech are handed to a [`TranscriptSink`] supplied by the embedder.

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::base::{TranscriptRole, TranscriptTurn};

/// Receiver of transcript turns.
///
/// Called from the session's dispatch loop, so implementations must not block.
pub trait TranscriptSink: Send + Sync {
    /// Record one transcript turn.
    fn append(&self, turn: TranscriptTurn);
}

/// Writes transcript turns to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTranscriptSink;

impl TranscriptSink for LoggingTranscriptSink {
    fn append(&self, turn: TranscriptTurn) {
        if turn.is_final {
            info!(role = %turn.role, "{}", turn.text);
        } else {
            debug!(role = %turn.role, "(partial) {}", turn.text);
        }
    }
}

/// Forwards transcript turns over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelTranscriptSink {
    tx: mpsc::UnboundedSender<TranscriptTurn>,
    include_partials: bool,
}

impl ChannelTranscriptSink {
    /// Create a sink and the receiving end for final turns only.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TranscriptTurn>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                include_partials: false,
            },
            rx,
        )
    }

    /// Also forward in-progress agent fragments.
    pub fn with_partials(mut self) -> Self {
        self.include_partials = true;
        self
    }
}

impl TranscriptSink for ChannelTranscriptSink {
    fn append(&self, turn: TranscriptTurn) {
        if !turn.is_final && !self.include_partials {
            return;
        }
        // Receiver gone means nobody is reading transcripts any more.
        let _ = self.tx.send(turn);
    }
}

/// Prefix used when printing a turn.
pub fn speaker_label(role: TranscriptRole) -> &'static str {
    match role {
        TranscriptRole::User => "You",
        TranscriptRole::Assistant => "Agent",
    }
}
