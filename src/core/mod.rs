pub mod audio;
pub mod session;

// Re-export commonly used types for convenience
pub use audio::{
    AudioCapture, AudioChunk, AudioError, AudioInput, AudioOutput, AudioPlayer, AudioResult,
    CaptureConstraints, ExpandableBuffer, PlayerHandle, PulledOutput, PushedInput,
};

pub use session::{
    BaseSession, ChatMessage, SessionConfig, SessionError, SessionResult,
    SessionState, SonicSession, TurnIndicators,
};
