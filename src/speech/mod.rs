//! Device speech capability: listening, speaking and their events.
//!
//! Platform engines are callback driven. A [`SpeechCapability`] exposes the
//! four commands and reports everything else as [`SpeechEvent`]s pushed into
//! an unbounded channel that the coordinator drains for its whole lifetime.
//! Engine handles stay private to the implementation.

pub mod console;

pub use console::ConsoleSpeech;

use crate::error::Result;
use std::fmt;

/// Speech-recognition and synthesis failures reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    /// Recognizer heard audio but matched nothing.
    NoMatch,
    /// Listening ended without any speech.
    SpeechTimeout,
    Audio,
    Client,
    Permissions,
    Network,
    NetworkTimeout,
    Busy,
    Server,
    /// Text-to-speech failed for an utterance.
    Synthesis,
    /// No recognition or synthesis engine on this device.
    Unavailable,
    Other(String),
}

impl RecognitionError {
    /// Silence outcomes are routine during continuous listening.
    pub fn is_silence(&self) -> bool {
        matches!(self, Self::NoMatch | Self::SpeechTimeout)
    }

    /// Retrying cannot help until the user changes something on the device.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permissions | Self::Unavailable)
    }
}

impl fmt::Display for RecognitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatch => f.write_str("no speech input detected"),
            Self::SpeechTimeout => f.write_str("no speech input"),
            Self::Audio => f.write_str("audio recording error"),
            Self::Client => f.write_str("client side error"),
            Self::Permissions => f.write_str("insufficient permissions"),
            Self::Network => f.write_str("network error"),
            Self::NetworkTimeout => f.write_str("network timeout"),
            Self::Busy => f.write_str("recognition service busy"),
            Self::Server => f.write_str("server error"),
            Self::Synthesis => f.write_str("speech synthesis error"),
            Self::Unavailable => f.write_str("speech services unavailable"),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

/// Events emitted by a speech capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    /// Final recognized text for one utterance.
    FinalText(String),
    /// Interim recognition result; replaces the previous partial text.
    PartialText(String),
    /// The user started talking (used for barge-in).
    SpeechStarted,
    ListeningChanged(bool),
    SpeakingChanged(bool),
    Error(RecognitionError),
}

/// Commands accepted by a speech capability. All calls return immediately.
pub trait SpeechCapability: Send + Sync {
    fn start_listening(&self) -> Result<()>;
    fn stop_listening(&self) -> Result<()>;
    /// Speak `text`, replacing any utterance in progress.
    fn speak(&self, text: &str) -> Result<()>;
    fn stop_speaking(&self) -> Result<()>;
    /// Release engine resources. Further commands are no-ops.
    fn shutdown(&self) -> Result<()>;
}
