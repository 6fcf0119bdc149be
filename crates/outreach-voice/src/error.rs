//! Error types for the voice session engine

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur while running a call's conversation
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Realtime connection failed: {0}")]
    RealtimeConnect(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for VoiceError {
    fn from(err: serde_json::Error) -> Self {
        VoiceError::Protocol(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        VoiceError::RealtimeConnect(err.to_string())
    }
}

/// Why a structured email capture was rejected
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Arguments are not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("No email address in capture")]
    MissingEmail,

    #[error("Email address '{0}' is not valid")]
    InvalidEmail(String),

    #[error("Caller has not confirmed the email address")]
    Unconfirmed,
}
