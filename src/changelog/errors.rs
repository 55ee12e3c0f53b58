//! Change log storage errors
//!
//! Error codes:
//! - CAUSELOG_STORAGE_TRANSIENT (ERROR severity, retried)
//! - CAUSELOG_STORAGE_FATAL (ERROR severity, never retried)
//! - CAUSELOG_INVALID_ENTITY_ID (ERROR severity, never retried)
//! - CAUSELOG_STORAGE_ENTITY_MISMATCH (ERROR severity)
//! - CAUSELOG_STORAGE_OUT_OF_ORDER (ERROR severity)
//! - CAUSELOG_STORAGE_DUPLICATE_BATCH (ERROR severity)
//! - CAUSELOG_STORAGE_STALE_CAUSE (ERROR severity)
//! - CAUSELOG_STORAGE_SERIALIZATION (ERROR severity)
//! - CAUSELOG_DATA_CORRUPTION (FATAL severity for the file)
//! - CAUSELOG_STORAGE_RETRIES_EXHAUSTED (ERROR severity)
//! - CAUSELOG_STORAGE_TIMEOUT (ERROR severity)

use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::{FailureKind, Severity};
use crate::retry::{Recoverable, RetryError};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid entity id '{0}'")]
    InvalidEntityId(String),

    #[error("batch for entity '{found}' cannot be stored under entity '{expected}'")]
    EntityMismatch { expected: String, found: String },

    #[error("batch for entity '{entity_id}' at {attempted} precedes the last persisted batch at {last}")]
    OutOfOrder {
        entity_id: String,
        last: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },

    #[error("batch '{batch_id}' is already persisted for entity '{entity_id}'")]
    DuplicateBatch { entity_id: String, batch_id: String },

    /// A cross-cycle link names a batch other than the one the new batch
    /// directly follows
    #[error(
        "batch '{batch_id}' for entity '{entity_id}' links to batch '{cause_batch_id}', which is not the preceding batch"
    )]
    StaleCause {
        entity_id: String,
        batch_id: String,
        cause_batch_id: String,
        preceding: Option<String>,
    },

    #[error("failed to encode log file {path}: {reason}")]
    Serialization { path: PathBuf, reason: String },

    #[error("corrupted log file {path}: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("storage operation failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("storage operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64, last: Option<String> },
}

impl StorageError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        StorageError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn corrupted(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StorageError::Corrupted {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            StorageError::Io { .. } if self.is_recoverable() => "CAUSELOG_STORAGE_TRANSIENT",
            StorageError::Io { .. } => "CAUSELOG_STORAGE_FATAL",
            StorageError::InvalidEntityId(_) => "CAUSELOG_INVALID_ENTITY_ID",
            StorageError::EntityMismatch { .. } => "CAUSELOG_STORAGE_ENTITY_MISMATCH",
            StorageError::OutOfOrder { .. } => "CAUSELOG_STORAGE_OUT_OF_ORDER",
            StorageError::DuplicateBatch { .. } => "CAUSELOG_STORAGE_DUPLICATE_BATCH",
            StorageError::StaleCause { .. } => "CAUSELOG_STORAGE_STALE_CAUSE",
            StorageError::Serialization { .. } => "CAUSELOG_STORAGE_SERIALIZATION",
            StorageError::Corrupted { .. } => "CAUSELOG_DATA_CORRUPTION",
            StorageError::RetriesExhausted { .. } => "CAUSELOG_STORAGE_RETRIES_EXHAUSTED",
            StorageError::Timeout { .. } => "CAUSELOG_STORAGE_TIMEOUT",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            StorageError::Corrupted { .. } => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            StorageError::Corrupted { .. } => FailureKind::CorruptionDetected,
            StorageError::RetriesExhausted { .. } | StorageError::Timeout { .. } => {
                FailureKind::StorageTransientFailure
            }
            StorageError::Io { .. } if self.is_recoverable() => FailureKind::StorageTransientFailure,
            _ => FailureKind::StorageFatalFailure,
        }
    }

    /// True if the caller handed the store something it must refuse
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidEntityId(_)
                | StorageError::EntityMismatch { .. }
                | StorageError::OutOfOrder { .. }
                | StorageError::DuplicateBatch { .. }
                | StorageError::StaleCause { .. }
        )
    }
}

impl Recoverable for StorageError {
    fn is_recoverable(&self) -> bool {
        match self {
            StorageError::Io { source, .. } => !matches!(
                source.kind(),
                io::ErrorKind::PermissionDenied
                    | io::ErrorKind::InvalidInput
                    | io::ErrorKind::InvalidData
                    | io::ErrorKind::AlreadyExists
                    | io::ErrorKind::Unsupported
            ),
            _ => false,
        }
    }

    fn failure_kind(&self) -> FailureKind {
        self.kind()
    }
}

impl From<RetryError<StorageError>> for StorageError {
    fn from(err: RetryError<StorageError>) -> Self {
        match err {
            RetryError::Fatal(inner) => inner,
            RetryError::Exhausted { attempts, last } => StorageError::RetriesExhausted {
                attempts,
                last: last.to_string(),
            },
            RetryError::TimedOut {
                elapsed_ms, last, ..
            } => StorageError::Timeout {
                elapsed_ms,
                last: last.map(|e| e.to_string()),
            },
        }
    }
}
