//! Error types for Cadence.

use thiserror::Error;

/// Result type alias using Cadence's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Cadence.
#[derive(Error, Debug)]
pub enum Error {
    // Session errors
    #[error("Failed to open media: {0}")]
    Open(String),

    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Filter graph error: {0}")]
    FilterGraph(String),

    #[error("Seek failed: {0}")]
    Seek(String),

    // Output errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation not allowed while {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Per-unit decoder outcomes that are not frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("decoder needs more input")]
    Again,

    #[error("end of stream")]
    EndOfStream,

    #[error("decoder refused input: {0}")]
    Refused(String),
}

impl Error {
    /// Returns true if the failure only affects a single unit of work and the
    /// pipeline may continue.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::FilterGraph(_) | Self::Seek(_)
        )
    }

    /// Returns true if this is a decoder end-of-stream signal.
    pub const fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::Decode(DecodeError::EndOfStream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_recoverable() {
        assert!(Error::Decode(DecodeError::Again).is_recoverable());
        assert!(Error::FilterGraph("bad factor".into()).is_recoverable());
        assert!(Error::Seek("no index".into()).is_recoverable());
        assert!(!Error::Open("missing".into()).is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Decode(DecodeError::Refused("corrupt".into()));
        assert_eq!(err.to_string(), "Decode failed: decoder refused input: corrupt");
        assert!(Error::Decode(DecodeError::EndOfStream).is_end_of_stream());
    }
}
