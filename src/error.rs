use std::time::Duration;

use crate::types::PathError;

/// Public failure taxonomy of the client. Every variant names the path(s)
/// the operation was working on; authority-originated failures keep the
/// authority's diagnostic text.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("can't reach authority '{uri}': {reason}")]
    Connection { uri: String, reason: String },
    #[error("invalid configuration: {reason}")]
    Config { reason: String },
    #[error("'{path}' exists and is not a directory")]
    PathConflict { path: String },
    #[error("'{path}' already exists")]
    AlreadyExists { path: String },
    #[error("'{path}' does not exist")]
    NotFound { path: String },
    #[error("directory '{path}' is not empty")]
    NotEmpty { path: String },
    #[error("checksum mismatch in block {block} of '{path}'")]
    ChecksumMismatch { path: String, block: usize },
    #[error("i/o failure on '{path}': {reason}")]
    Io { path: String, reason: String },
    #[error("{op} on '{path}' timed out after {}s", .timeout.as_secs())]
    Timeout {
        op: &'static str,
        path: String,
        timeout: Duration,
    },
}

impl From<PathError> for ClientError {
    fn from(err: PathError) -> Self {
        ClientError::Config {
            reason: err.to_string(),
        }
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
