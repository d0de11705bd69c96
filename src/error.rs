use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::RecordStatus;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Failures reported by a storage backend collaborator.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("write rejected: {0}")]
    Rejected(String),

    /// The signing principal refused to authorize the write.
    #[error("write declined by signer: {0}")]
    Declined(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        BackendError::Io(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A read failed after the session's probe had succeeded.
    #[error("read of '{key}' failed: {reason}")]
    ReadFailed { key: String, reason: String },

    #[error("record not found: {id}")]
    NotFound { id: String },

    #[error("malformed payload at '{key}': {reason}")]
    Decode { key: String, reason: String },

    #[error("no signing principal connected")]
    Unauthorized,

    #[error("record {id} is already {from}, only pending records can be analyzed")]
    InvalidTransition { id: String, from: RecordStatus },

    #[error("write to '{key}' rejected: {reason}")]
    WriteRejected { key: String, reason: String, declined: bool },

    #[error("record {id} was stored but could not be indexed: {reason}")]
    OrphanedRecord { id: String, reason: String },

    #[error("analysis of {id} failed: {reason}")]
    AnalysisFailed { id: String, reason: String },
}

impl StoreError {
    pub(crate) fn write_failed(key: &str, err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(reason) => StoreError::BackendUnavailable(reason),
            BackendError::Declined(reason) => StoreError::WriteRejected {
                key: key.to_string(),
                reason,
                declined: true,
            },
            BackendError::Rejected(reason) | BackendError::Io(reason) => StoreError::WriteRejected {
                key: key.to_string(),
                reason,
                declined: false,
            },
        }
    }

    pub(crate) fn read_failed(key: &str, err: BackendError) -> Self {
        StoreError::ReadFailed { key: key.to_string(), reason: err.to_string() }
    }

    /// Names the stage of an operation that produced this error.
    pub fn step(&self) -> &'static str {
        match self {
            StoreError::BackendUnavailable(_) => "probe",
            StoreError::ReadFailed { .. } | StoreError::NotFound { .. } => "read",
            StoreError::Decode { .. } => "decode",
            StoreError::Unauthorized => "authorize",
            StoreError::InvalidTransition { .. } => "transition",
            StoreError::WriteRejected { .. } => "write",
            StoreError::OrphanedRecord { .. } => "index",
            StoreError::AnalysisFailed { .. } => "analysis",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::ReadFailed { .. }
                | StoreError::WriteRejected { .. }
                | StoreError::OrphanedRecord { .. }
                | StoreError::AnalysisFailed { .. }
                | StoreError::Unauthorized
        )
    }

    /// Message for the person who triggered the write.
    pub fn user_message(&self) -> String {
        match self {
            StoreError::WriteRejected { declined: true, .. } => "Transaction rejected by user".to_string(),
            other => other.to_string(),
        }
    }
}
