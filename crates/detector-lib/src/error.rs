//! Error types for collaborator calls and incident delivery

use std::time::Duration;

use thiserror::Error;

/// Failure of a cluster or log backend call. Always skips the current tick.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The call did not complete within the per-call timeout.
    #[error("{source_name} call timed out after {}s", .timeout.as_secs())]
    Timeout {
        source_name: &'static str,
        timeout: Duration,
    },

    /// The backend could not be reached or answered with an error status.
    #[error("{source_name} unreachable: {message}")]
    Unreachable {
        source_name: &'static str,
        message: String,
    },

    /// The backend answered but the payload could not be interpreted.
    #[error("{source_name} returned a malformed response: {message}")]
    Malformed {
        source_name: &'static str,
        message: String,
    },
}

impl CollaboratorError {
    /// Name of the collaborator that failed
    pub fn source_name(&self) -> &'static str {
        match self {
            CollaboratorError::Timeout { source_name, .. }
            | CollaboratorError::Unreachable { source_name, .. }
            | CollaboratorError::Malformed { source_name, .. } => source_name,
        }
    }
}

/// Failure to deliver an incident to a sink. Never affects deduplication.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to serialize incident: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to write incident: {0}")]
    Io(#[from] std::io::Error),

    #[error("{sink} delivery failed: {message}")]
    Delivery { sink: &'static str, message: String },
}
