//! Error types for the check engine.

use std::time::Duration;

use uuid::Uuid;

use crate::data::SourceRef;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Data source error: {0}")]
    Data(#[from] DataError),

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Check error: {0}")]
    Check(#[from] CheckError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Configuration and validation errors. These fail fast, before any I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required input '{variable}' (no answer and no default)")]
    MissingInput { variable: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Cipher suite not supported: {0}")]
    UnsupportedCipherSuite(String),

    #[error("Malformed proxy '{input}': {reason}")]
    MalformedProxy { input: String, reason: String },

    #[error("TLS configuration rejected: {0}")]
    Tls(String),

    #[error("Checkpoint was saved for {saved:?}, but the job reads {actual:?}")]
    CheckpointSource { saved: SourceRef, actual: SourceRef },
}

/// Data source errors.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Offset {offset} is past the end of a source of {size} items")]
    OffsetOutOfRange { offset: u64, size: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the HTTP execution layer.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to build client: {0}")]
    Client(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request failed: {0}")]
    Send(String),

    #[error("Failed to read response body: {0}")]
    Body(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl HttpError {
    /// Network conditions a check routine should report as ERROR rather than
    /// treat as a bug in the routine.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connect(_) | Self::Send(_) | Self::Body(_)
        )
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            // reqwest doesn't say which deadline fired
            Self::Timeout(Duration::ZERO)
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_builder() {
            Self::InvalidRequest(e.to_string())
        } else if e.is_body() || e.is_decode() {
            Self::Body(e.to_string())
        } else {
            Self::Send(e.to_string())
        }
    }
}

/// Errors surfaced by a check routine.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("Check routine failed: {0}")]
    Routine(String),

    #[error("Check routine panicked: {0}")]
    Panicked(String),
}

impl CheckError {
    /// Whether the failure is a transient network condition.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_transient())
    }
}

/// Orchestrator errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        state: String,
        target: String,
    },

    #[error("Job {id} failed: {reason}")]
    Fatal { id: Uuid, reason: String },

    #[error("Bot count must be at least 1, got {0}")]
    InvalidBots(usize),

    #[error("Checkpoint persistence failed {failures} times in a row for job {id}")]
    CheckpointExhausted { id: Uuid, failures: u32 },
}

/// Checkpoint persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Checkpoint for job {0} not found")]
    NotFound(Uuid),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(HttpError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(HttpError::Connect("reset".into()).is_transient());
        assert!(!HttpError::Cancelled.is_transient());
        assert!(!HttpError::InvalidRequest("bad".into()).is_transient());
        assert!(CheckError::from(HttpError::Send("eof".into())).is_transient());
        assert!(!CheckError::Routine("boom".into()).is_transient());
    }

    #[test]
    fn config_error_converts_to_top_level() {
        let err: Error = ConfigError::UnsupportedCipherSuite("TLS_FOO".into()).into();
        assert_eq!(
            err.to_string(),
            "Configuration error: Cipher suite not supported: TLS_FOO"
        );
    }
}
