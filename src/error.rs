//! Error types for the assistant chat core.

/// Top-level error type for the conversation core and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Token generation failed (stream open, mid-stream, or empty result).
    #[error("generation error: {0}")]
    Generation(String),

    /// Context retrieval failed or returned nothing usable.
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// Speech recognition or synthesis error.
    #[error("speech error: {0}")]
    Speech(String),

    /// Model listing, download or loading error.
    #[error("model error: {0}")]
    Model(String),

    /// Unknown or deleted chat session.
    #[error("session error: {0}")]
    Session(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ChatError>;
