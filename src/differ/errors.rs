//! Detection error types
//!
//! Error codes:
//! - CAUSELOG_DETECTOR_MALFORMED (ERROR severity, recovered by skipping the category)
//! - CAUSELOG_DETECTOR_CRITICAL (FATAL severity for the cycle)
//! - CAUSELOG_BATCH_IDENTITY (FATAL severity for the cycle)
//! - CAUSELOG_INVALID_ENTITY_ID (FATAL severity for the cycle)
//! - CAUSELOG_DETECTION_ABORTED (FATAL severity for the cycle)

use thiserror::Error;

use crate::error::{FailureKind, Severity};
use crate::model::ChangeCategory;

/// Result type for a single detector
pub type DetectionResult<T> = Result<T, DetectionError>;

/// Result type for a whole detection cycle
pub type DiffResult<T> = Result<T, DiffError>;

/// Failure raised by one category detector
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectionError {
    /// A section had an unexpected shape; only this category is affected
    #[error("malformed field '{path}': {reason}")]
    Malformed { path: String, reason: String },

    /// The snapshot is structurally unusable; the whole cycle must abort
    #[error("critical snapshot error: {0}")]
    Critical(String),
}

impl DetectionError {
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        DetectionError::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, DetectionError::Critical(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            DetectionError::Malformed { .. } => "CAUSELOG_DETECTOR_MALFORMED",
            DetectionError::Critical(_) => "CAUSELOG_DETECTOR_CRITICAL",
        }
    }
}

/// Failure that aborts a whole comparison cycle; no batch is produced
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DiffError {
    #[error("invalid entity id '{0}'")]
    InvalidEntityId(String),

    #[error("snapshot identity failure for entity '{entity_id}': {reason}")]
    Identity { entity_id: String, reason: String },

    #[error("detector for {category} reported a critical error for entity '{entity_id}': {reason}")]
    Critical {
        entity_id: String,
        category: ChangeCategory,
        reason: String,
    },

    #[error("{failed} of {total} detectors failed for entity '{entity_id}'")]
    TooManyFailures {
        entity_id: String,
        failed: usize,
        total: usize,
    },
}

impl DiffError {
    pub fn code(&self) -> &'static str {
        match self {
            DiffError::InvalidEntityId(_) => "CAUSELOG_INVALID_ENTITY_ID",
            DiffError::Identity { .. } => "CAUSELOG_BATCH_IDENTITY",
            DiffError::Critical { .. } => "CAUSELOG_DETECTOR_CRITICAL",
            DiffError::TooManyFailures { .. } => "CAUSELOG_DETECTION_ABORTED",
        }
    }

    /// Every cycle-level detection error is fatal for the cycle
    pub fn severity(&self) -> Severity {
        Severity::Fatal
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            DiffError::TooManyFailures { .. } => FailureKind::DetectionFailure,
            _ => FailureKind::BatchIdentityFailure,
        }
    }
}
