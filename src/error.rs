use std::time::Duration;

use thiserror::Error;

/// Why a scan produced no verdict. Never to be read as "clean".
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scanner unavailable: {0}")]
    Unavailable(String),

    #[error("scan timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
#[error("secret {secret_id} unavailable: {reason}")]
pub struct SecretUnavailable {
    pub secret_id: String,
    pub reason: String,
}

#[derive(Debug, Error)]
#[error("audit query failed: {0}")]
pub struct AuditQueryFailed(pub String);

/// Errors reported by an object store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
#[error("failed to delete s3://{bucket}/{key}: {reason}")]
pub struct DeleteFailed {
    pub bucket: String,
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Error)]
#[error("failed to send alert: {0}")]
pub struct NotifyFailed(pub String);

/// Pipeline stage, used in logs and in deadline errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scanning,
    Correlating,
    Deleting,
    Notifying,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scanning => "scanning",
            Stage::Correlating => "correlating",
            Stage::Deleting => "deleting",
            Stage::Notifying => "notifying",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run that ended in the aborted state. The triggering event is not
/// considered handled.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Delete(#[from] DeleteFailed),

    #[error("run deadline exceeded while {stage}")]
    DeadlineExceeded { stage: Stage },
}

/// Errors turning an inbound notification into upload events.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("malformed notification: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing or empty field: {0}")]
    MissingField(&'static str),

    #[error("object key is not valid UTF-8 after decoding: {0}")]
    InvalidKey(String),

    #[error("unparseable event time: {0}")]
    InvalidTimestamp(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}
