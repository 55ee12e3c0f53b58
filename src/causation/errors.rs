//! Causation error types
//!
//! Error codes (all ERROR severity; the batch is still persisted):
//! - CAUSELOG_CAUSATION_DUPLICATE_ID
//! - CAUSELOG_CAUSATION_FOREIGN_PRIOR
//! - CAUSELOG_CAUSATION_PRIOR_NEWER

use thiserror::Error;

use crate::error::{FailureKind, Severity};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CausationError {
    #[error("change id '{change_id}' occurs more than once in a batch for entity '{entity_id}'")]
    DuplicateChangeId { entity_id: String, change_id: String },

    #[error("previous batch belongs to entity '{prior_entity_id}', not '{entity_id}'")]
    ForeignPriorBatch {
        entity_id: String,
        prior_entity_id: String,
    },

    #[error("previous batch '{prior_batch_id}' for entity '{entity_id}' is newer than the current cycle")]
    PriorBatchNewer {
        entity_id: String,
        prior_batch_id: String,
    },
}

impl CausationError {
    pub fn code(&self) -> &'static str {
        match self {
            CausationError::DuplicateChangeId { .. } => "CAUSELOG_CAUSATION_DUPLICATE_ID",
            CausationError::ForeignPriorBatch { .. } => "CAUSELOG_CAUSATION_FOREIGN_PRIOR",
            CausationError::PriorBatchNewer { .. } => "CAUSELOG_CAUSATION_PRIOR_NEWER",
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::Error
    }

    pub fn kind(&self) -> FailureKind {
        FailureKind::CausationFailure
    }
}
