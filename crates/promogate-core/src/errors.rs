use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigError: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Failures of the check engine that callers need to tell apart.
///
/// These travel inside `anyhow::Error`; recover them with
/// `err.downcast_ref::<CheckError>()`.
#[derive(Debug, Error)]
pub enum CheckError {
    /// A payload of one kind reached the evaluator of another. Registry bug,
    /// never retried.
    #[error("invalid check type: {actual}. Expected {expected}")]
    KindMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("no evaluator registered for check type {0}")]
    UnsupportedKind(String),

    #[error("invalid payload for check type {kind}: {detail}")]
    InvalidPayload { kind: String, detail: String },

    /// Rollback wanted to pin the previous version but none is on record.
    #[error("no successful rollback version for env {application}/{environment}")]
    NoRollbackCandidate {
        application: String,
        environment: String,
    },

    #[error("check metadata is missing required key `{key}`")]
    MissingMetadata { key: &'static str },

    #[error("check metadata key `{key}` is malformed: {detail}")]
    MalformedMetadata { key: &'static str, detail: String },

    #[error("remote task {operation} timed out after {seconds}s")]
    GatewayTimeout {
        operation: &'static str,
        seconds: u64,
    },
}
