//! Query error types
//!
//! Error codes:
//! - CAUSELOG_QUERY_INVALID_LIMIT (ERROR)
//! - CAUSELOG_QUERY_INVALID_RANGE (ERROR)
//! - CAUSELOG_QUERY_CHANGE_NOT_FOUND (ERROR)
//! - storage codes pass through unchanged

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::changelog::StorageError;
use crate::error::{FailureKind, Severity};

pub type QueryEngineResult<T> = Result<T, QueryError>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("limit {limit} is outside 1..={max}")]
    InvalidLimit { limit: usize, max: usize },

    #[error("time range starts at {start} but ends at {end}")]
    InvalidTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("change {0} not found")]
    ChangeNotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl QueryError {
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::InvalidLimit { .. } => "CAUSELOG_QUERY_INVALID_LIMIT",
            QueryError::InvalidTimeRange { .. } => "CAUSELOG_QUERY_INVALID_RANGE",
            QueryError::ChangeNotFound(_) => "CAUSELOG_QUERY_CHANGE_NOT_FOUND",
            QueryError::Storage(e) => e.code(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            QueryError::Storage(e) => e.severity(),
            _ => Severity::Error,
        }
    }

    /// Storage kind for storage failures; `None` for rejected queries
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            QueryError::Storage(e) => Some(e.kind()),
            _ => None,
        }
    }
}
