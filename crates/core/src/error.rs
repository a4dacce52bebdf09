//! Error types for the instrumentation core
//!
//! Tracking is fail-open: lookups return `Option`, bookkeeping never raises
//! into the application. The `Error` enum covers the few genuinely fallible
//! edges (id parsing, module-session misuse, payload serialization). We use
//! `thiserror` for automatic `Display` and `Error` trait implementations.

use thiserror::Error;

/// Result type alias for instrumentation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the instrumentation core
#[derive(Debug, Error)]
pub enum Error {
    /// An id string did not parse as `"{kind}#{n}"`
    #[error("invalid entity id: {0:?}")]
    InvalidId(String),

    /// A module session was used after `end()`
    #[error("module session for {module:?} already ended")]
    SessionEnded {
        /// Module whose session was reused
        module: String,
    },

    /// Event payload serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_id() {
        let err = Error::InvalidId("bogus".to_string());
        assert!(err.to_string().contains("invalid entity id"));
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_error_display_session_ended() {
        let err = Error::SessionEnded {
            module: "app/streams".to_string(),
        };
        assert!(err.to_string().contains("already ended"));
        assert!(err.to_string().contains("app/streams"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let bad: std::result::Result<u64, _> = serde_json::from_str("not json");
        let err: Error = bad.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
