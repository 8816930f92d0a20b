//! Custom error types for the monitoring engine.
//!
//! This module defines the primary error type, `MonitorError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failure classes the pipeline distinguishes:
//!
//! - **`Config`** / **`Configuration`**: file/format errors from `figment`
//!   versus semantic errors caught during the validation step (weights that
//!   do not sum to one, inverted threshold bands, ...).
//! - **`Validation`**: a malformed or out-of-range raw payload. The reading
//!   is rejected and the pipeline continues with the next one; liveness is
//!   still updated for the source.
//! - **`Persistence`**: a store write failed. Units are retried with bounded
//!   backoff before the overflow path takes over.
//! - **`Publish`**: best-effort fan-out failed. Logged, never retried.
//!
//! Insufficient rolling history is deliberately *not* an error: the scoring
//! and anomaly components represent it as a neutral result instead.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, MonitorError>;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid reading from {source_id}: {reason}")]
    Validation { source_id: String, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Persistence retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Source adapter error: {0}")]
    Adapter(String),

    #[error("Engine command channel closed")]
    EngineClosed,
}

impl MonitorError {
    /// Shorthand for a validation failure on a given source.
    pub fn validation(source: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            source_id: source.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MonitorError::validation("esp", "VAL1 is not numeric");
        assert_eq!(err.to_string(), "Invalid reading from esp: VAL1 is not numeric");
    }

    #[test]
    fn test_retries_exhausted_display() {
        let err = MonitorError::RetriesExhausted {
            attempts: 3,
            last: "store unavailable".into(),
        };
        assert!(err.to_string().contains("after 3 attempts"));
    }
}
