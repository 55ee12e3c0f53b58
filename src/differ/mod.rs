//! Snapshot differ
//!
//! Runs every registered [`CategoryDetector`] over two snapshots of the
//! same entity and assembles the results into a [`ChangeBatch`].
//!
//! # Failure semantics
//!
//! - A detector that fails is recorded as a [`DetectorFailure`]; its
//!   category is marked incomplete and the remaining detectors still run.
//! - A critical detector error, more failed detectors than the configured
//!   ratio allows, a missing or mismatched identity, or an invalid entity ID
//!   abort the cycle with a [`DiffError`]. No partial batch is returned.

pub mod detector;
pub mod detectors;
mod errors;

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::model::{is_valid_entity_id, ChangeBatch, ChangeCategory, DetectionContext, FieldChange};
use crate::observability::Event;
use crate::snapshot::Snapshot;

pub use detector::{CategoryDetector, ChangeDraft};
pub use errors::{DetectionError, DetectionResult, DiffError, DiffResult};

/// Default fraction of detectors allowed to fail before the cycle aborts
pub const DEFAULT_MAX_FAILURE_RATIO: f64 = 0.5;

/// A detector that failed during a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorFailure {
    pub entity_id: String,
    pub category: ChangeCategory,
    pub error: DetectionError,
}

/// Result of one comparison cycle
#[derive(Debug, Clone)]
pub struct DiffOutcome {
    pub batch: ChangeBatch,
    pub failures: Vec<DetectorFailure>,
}

impl DiffOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Registry of category detectors
pub struct SnapshotDiffer {
    detectors: Vec<Box<dyn CategoryDetector>>,
    max_failure_ratio: f64,
}

impl Default for SnapshotDiffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FAILURE_RATIO)
    }
}

impl SnapshotDiffer {
    /// Differ with the built-in detectors
    pub fn new(max_failure_ratio: f64) -> Self {
        Self::with_detectors(detectors::builtin(), max_failure_ratio)
    }

    pub fn with_detectors(detectors: Vec<Box<dyn CategoryDetector>>, max_failure_ratio: f64) -> Self {
        Self {
            detectors,
            max_failure_ratio,
        }
    }

    /// Categories covered, in registration order
    pub fn categories(&self) -> Vec<ChangeCategory> {
        self.detectors.iter().map(|d| d.category()).collect()
    }

    /// Compares two snapshots of `entity_id`.
    pub fn detect(
        &self,
        entity_id: &str,
        old: &Snapshot,
        new: &Snapshot,
        context: DetectionContext,
    ) -> DiffResult<DiffOutcome> {
        if !is_valid_entity_id(entity_id) {
            return Err(DiffError::InvalidEntityId(entity_id.to_string()));
        }
        check_identity(entity_id, old, new)?;

        let batch_id = Uuid::new_v4().to_string();
        let mut batch = ChangeBatch::new(batch_id.clone(), entity_id, context);
        let mut failures = Vec::new();

        for detector in &self.detectors {
            let category = detector.category();
            match detector.detect(old, new) {
                Ok(drafts) => {
                    for draft in drafts {
                        let id = format!("{}-{:04}", batch_id, batch.changes.len() + 1);
                        batch.changes.push(FieldChange {
                            id,
                            entity_id: entity_id.to_string(),
                            category: draft.category,
                            field_path: draft.field_path,
                            old_value: draft.old_value,
                            new_value: draft.new_value,
                            priority: draft.priority,
                            description: draft.description,
                            detected_at: batch.context.cycle_timestamp,
                        });
                    }
                }
                Err(err) if err.is_critical() => {
                    error!(
                        event = %Event::DetectionAborted,
                        entity = entity_id,
                        category = %category,
                        code = err.code(),
                        error = %err
                    );
                    return Err(DiffError::Critical {
                        entity_id: entity_id.to_string(),
                        category,
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    warn!(
                        event = %Event::DetectorFailed,
                        entity = entity_id,
                        category = %category,
                        code = err.code(),
                        error = %err
                    );
                    batch.incomplete_categories.push(category);
                    failures.push(DetectorFailure {
                        entity_id: entity_id.to_string(),
                        category,
                        error: err,
                    });
                }
            }
        }

        let total = self.detectors.len();
        if total > 0 && failures.len() as f64 / total as f64 > self.max_failure_ratio {
            error!(
                event = %Event::DetectionAborted,
                entity = entity_id,
                failed = failures.len(),
                total = total
            );
            return Err(DiffError::TooManyFailures {
                entity_id: entity_id.to_string(),
                failed: failures.len(),
                total,
            });
        }

        debug!(
            event = %Event::BatchDetected,
            entity = entity_id,
            batch = %batch.batch_id,
            changes = batch.changes.len(),
            incomplete = batch.incomplete_categories.len()
        );
        Ok(DiffOutcome { batch, failures })
    }
}

fn check_identity(entity_id: &str, old: &Snapshot, new: &Snapshot) -> DiffResult<()> {
    let identity_error = |reason: String| DiffError::Identity {
        entity_id: entity_id.to_string(),
        reason,
    };
    let old_id = old
        .identity()
        .ok_or_else(|| identity_error("old snapshot has no identity".to_string()))?;
    let new_id = new
        .identity()
        .ok_or_else(|| identity_error("new snapshot has no identity".to_string()))?;
    if old_id != new_id {
        return Err(identity_error(format!(
            "snapshots describe different entities ({} vs {})",
            old_id, new_id
        )));
    }
    Ok(())
}
