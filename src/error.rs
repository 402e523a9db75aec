//! Error taxonomy for the insight pipeline
//!
//! Transient I/O failures are logged and left for the next scheduled cycle
//! to retry. Data errors skip the offending record only. A duplicate insight
//! is not an error at all, see [`crate::dedup::StoreOutcome`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Store or network failure. Never retried within the same cycle.
    #[error("transient I/O failure in {operation}: {message}")]
    TransientIo { operation: &'static str, message: String },

    /// A record with an unexpected shape
    #[error("malformed {kind} record {id}: {reason}")]
    Data {
        kind: &'static str,
        id: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn transient(operation: &'static str, err: impl std::fmt::Display) -> Self {
        PipelineError::TransientIo {
            operation,
            message: err.to_string(),
        }
    }

    pub fn data(kind: &'static str, id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        PipelineError::Data {
            kind,
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::TransientIo { .. })
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::transient("sqlite", err)
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        let operation = if err.is_timeout() { "http timeout" } else { "http" };
        PipelineError::transient(operation, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PipelineError::data("event", "abc", "bad timestamp");
        assert_eq!(err.to_string(), "malformed event record abc: bad timestamp");
        assert!(!err.is_transient());

        let err = PipelineError::transient("fetch events", "connection refused");
        assert!(err.is_transient());
        assert!(err.to_string().contains("fetch events"));
    }
}
