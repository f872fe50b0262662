//! MediaPlayer Error Definitions
//!
//! Defines error types used throughout the project.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::playback::BackendKind;

/// Core library error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Source Errors
    // =========================================================================
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(BackendKind),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Core library result type
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Engine Errors
// =============================================================================

/// Failure reported by a native engine handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Engine error: {0}")]
    Other(String),
}

/// Engine result type
pub type EngineResult<T> = Result<T, EngineError>;

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                Self::Source(e.to_string())
            }
            _ => Self::Other(e.to_string()),
        }
    }
}

// =============================================================================
// Player Errors
// =============================================================================

/// Error surfaced to the player's error listener.
///
/// Equality is by variant and message: two errors of different variants are
/// never equal even when their messages match.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "camelCase")]
pub enum PlayerError {
    /// Unsupported or corrupt media
    #[error("Codec error: {0}")]
    CodecError(String),
    /// Transport failure
    #[error("Network error: {0}")]
    NetworkError(String),
    /// Missing or invalid source
    #[error("Source error: {0}")]
    SourceError(String),
    /// Anything else
    #[error("Unknown error: {0}")]
    UnknownError(String),
}

impl PlayerError {
    /// Returns the raw message without the variant prefix
    pub fn message(&self) -> &str {
        match self {
            Self::CodecError(m)
            | Self::NetworkError(m)
            | Self::SourceError(m)
            | Self::UnknownError(m) => m,
        }
    }

    /// Short variant name, used in logs and CLI output
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CodecError(_) => "codec",
            Self::NetworkError(_) => "network",
            Self::SourceError(_) => "source",
            Self::UnknownError(_) => "unknown",
        }
    }

    /// Maps a raw engine error string onto a variant by keyword.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if has(&["codec", "decoder", "decode", "unsupported format", "corrupt"]) {
            Self::CodecError(message.to_string())
        } else if has(&["network", "connection", "timeout", "timed out", "http", "dns"]) {
            Self::NetworkError(message.to_string())
        } else if has(&[
            "not found",
            "no such file",
            "invalid uri",
            "invalid source",
            "permission",
        ]) {
            Self::SourceError(message.to_string())
        } else {
            Self::UnknownError(message.to_string())
        }
    }
}

impl From<EngineError> for PlayerError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Codec(m) => Self::CodecError(m),
            EngineError::Network(m) => Self::NetworkError(m),
            EngineError::Source(m) => Self::SourceError(m),
            EngineError::Other(m) => Self::UnknownError(m),
        }
    }
}
