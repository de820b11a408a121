//! Realtime voice call over a duplex signaling channel.
//!
//! # Architecture
//!
//! - [`SessionController`] owns the call lifecycle and its resources
//! - [`SignalingChannel`] carries JSON protocol events both ways
//! - [`EventDispatcher`] routes inbound events to playback, the session and
//!   the transcript sink
//! - [`CredentialProvider`] issues one credential per call
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use waav_voice_call::config::CallConfig;
//! use waav_voice_call::core::audio::{NullOutput, WavFileInput};
//! use waav_voice_call::core::realtime::{LoggingTranscriptSink, SessionController};
//!
//! let config = CallConfig::from_env()?;
//! let session = SessionController::from_config(
//!     &config,
//!     Arc::new(WavFileInput::new("question.wav")),
//!     Arc::new(NullOutput),
//!     Arc::new(LoggingTranscriptSink),
//! )?;
//! session.start()?;
//! ```

mod base;
pub mod credentials;
pub mod dispatcher;
pub mod messages;
pub mod session;
pub mod signaling;
pub mod transcript;

pub use base::{
    CallError, CallResult, CallState, SessionStatus, TranscriptRole, TranscriptTurn,
};
pub use credentials::{
    CredentialProvider, EphemeralCredential, HttpCredentialProvider, StaticCredentialProvider,
    provider_from_config,
};
pub use dispatcher::{EventDispatcher, SessionSignals};
pub use messages::{ClientEvent, ServerEvent, SessionConfig};
pub use session::{HeldResources, SessionController, SessionDeps, SessionOptions};
pub use signaling::{
    ChannelSender, InboundMessage, LoopbackPeer, SignalingChannel, SignalingTransport,
    WebSocketTransport,
};
pub use transcript::{ChannelTranscriptSink, LoggingTranscriptSink, TranscriptSink};
