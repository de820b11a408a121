//! Base types shared by the voice call components.
//!
//! Errors, lifecycle states, the observable session status and transcript
//! turns live here so that the audio units, the signaling channel and the
//! session controller can agree on them without depending on each other.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::core::audio::codec::DecodeError;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while running a voice call.
///
/// Payloads are plain strings so errors can be cloned into the published
/// session status.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    /// The per-call credential could not be obtained
    #[error("Credential error: {0}")]
    Credential(String),

    /// An audio input or output device is unavailable
    #[error("Device error: {0}")]
    Device(String),

    /// The signaling channel failed to open, timed out or closed
    #[error("Connection error: {0}")]
    Connection(String),

    /// An inbound message was malformed or unexpected
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An encoded audio chunk could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The remote service reported an error event
    #[error("Server error: {0}")]
    Server(String),

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for voice call operations.
pub type CallResult<T> = Result<T, CallError>;

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle state of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    /// Not started, or a start attempt failed
    #[default]
    Idle,
    /// Fetching a credential and negotiating the session
    Connecting,
    /// Session acknowledged, audio flowing
    Active,
    /// Call finished; terminal
    Ended,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Idle => write!(f, "idle"),
            CallState::Connecting => write!(f, "connecting"),
            CallState::Active => write!(f, "active"),
            CallState::Ended => write!(f, "ended"),
        }
    }
}

/// Snapshot of everything a caller can observe about a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatus {
    /// Lifecycle state
    pub state: CallState,
    /// Outbound audio is suppressed
    pub muted: bool,
    /// The remote side currently detects user speech
    pub listening: bool,
    /// Agent audio is being rendered
    pub speaking: bool,
    /// Remote session identifier, once announced
    pub session_id: Option<String>,
    /// Most recent error surfaced by the session
    pub last_error: Option<CallError>,
}

// =============================================================================
// Transcripts
// =============================================================================

/// Speaker of a transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    /// Local user speech recognized by the service
    User,
    /// Agent speech
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// One transcript entry handed to the transcript sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptTurn {
    /// Recognized or spoken text
    pub text: String,
    /// Who said it
    pub role: TranscriptRole,
    /// False for in-progress agent fragments
    pub is_final: bool,
    /// Conversation item the text belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
}

impl TranscriptTurn {
    /// Completed user turn.
    pub fn user(text: impl Into<String>, item_id: Option<String>) -> Self {
        Self {
            text: text.into(),
            role: TranscriptRole::User,
            is_final: true,
            item_id,
        }
    }

    /// Agent turn, partial or final.
    pub fn assistant(text: impl Into<String>, is_final: bool, item_id: Option<String>) -> Self {
        Self {
            text: text.into(),
            role: TranscriptRole::Assistant,
            is_final,
            item_id,
        }
    }
}
