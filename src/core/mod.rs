pub mod audio;
pub mod realtime;

// Re-export commonly used types for convenience
pub use audio::{
    AudioInput, AudioOutput, CaptureUnit, NullOutput, OutputSink, PlaybackUnit, StreamSpec,
    WavFileInput,
};

pub use realtime::{
    CallError, CallResult, CallState, SessionController, SessionDeps, SessionOptions,
    SessionStatus, TranscriptSink, TranscriptTurn,
};
