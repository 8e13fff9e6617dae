//! Service-specific error types

use thiserror::Error;

/// Session store and session construction errors.
///
/// Per-request failures inside a batch never surface here; they become
/// failure outcomes on the batch result.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("session parse error: {0}")]
    Parse(String),

    #[error("invalid session {id}: {reason}")]
    InvalidSession { id: String, reason: String },

    #[error(transparent)]
    Pool(#[from] session_pool::Error),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages_are_descriptive() {
        assert!(
            Error::Io("disk full".into())
                .to_string()
                .contains("disk full")
        );
        assert!(
            Error::Parse("expected value".into())
                .to_string()
                .starts_with("session parse error")
        );
        assert_eq!(
            Error::InvalidSession {
                id: "s1".into(),
                reason: "bad header name".into()
            }
            .to_string(),
            "invalid session s1: bad header name"
        );
    }

    #[test]
    fn pool_errors_pass_through() {
        let err: Error = session_pool::Error::DuplicateResource("s1".into()).into();
        assert_eq!(err.to_string(), "resource already registered: s1");
    }

    #[test]
    fn error_debug_includes_variant_name() {
        let err = Error::Parse("trailing comma".into());
        let debug = format!("{err:?}");
        assert!(
            debug.contains("Parse"),
            "Debug output must include variant name, got: {debug}"
        );
    }
}
