//! Comparison-cycle orchestration
//!
//! One cycle is: detect, fetch the previous batch, analyze causation,
//! persist. Only a cycle-level detection error (identity, invalid entity
//! ID, too many detector failures) aborts it. Everything else degrades:
//!
//! | failure | effect on the cycle |
//! |---------|---------------------|
//! | one detector | category marked incomplete |
//! | previous batch unreadable | analyzed without cross-cycle causes |
//! | causation | links omitted |
//! | storage (after retries) | batch returned but not persisted |
//!
//! Each of these is returned as a [`ComponentFailure`] and recorded in the
//! health registry.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::causation::{CausationAnalyzer, CausationError};
use crate::changelog::{
    AppendReceipt, ChangeLogStore, CleanupResult, RetentionPolicy, RotationOutcome, StorageError,
    ValidationResult,
};
use crate::config::EngineConfig;
use crate::differ::{DiffError, SnapshotDiffer};
use crate::error::{FailureKind, Severity};
use crate::model::{AnnotatedBatch, ChangeBatch, DetectionContext};
use crate::observability::{Event, HealthRegistry, ObservationScope, StorageHealth};
use crate::query::QueryEngine;
use crate::snapshot::Snapshot;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// The cycle was aborted; no batch exists
    #[error(transparent)]
    Detection(#[from] DiffError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl TrackerError {
    pub fn code(&self) -> &'static str {
        match self {
            TrackerError::Detection(e) => e.code(),
            TrackerError::Storage(e) => e.code(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            TrackerError::Detection(e) => e.severity(),
            TrackerError::Storage(e) => e.severity(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            TrackerError::Detection(e) => e.kind(),
            TrackerError::Storage(e) => e.kind(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Detection,
    Causation,
    Storage,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Detection => f.write_str("detection"),
            Component::Causation => f.write_str("causation"),
            Component::Storage => f.write_str("storage"),
        }
    }
}

/// A failure the cycle recovered from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentFailure {
    pub component: Component,
    pub kind: FailureKind,
    pub code: String,
    pub message: String,
}

/// How the causation step ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum ProcessingMode {
    /// Every step ran as designed
    Full,
    /// Causation fell back to a reduced pass
    Fallback { reason: String },
}

impl ProcessingMode {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ProcessingMode::Fallback { .. })
    }
}

/// Outcome of one comparison cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub entity_id: String,
    pub batch: AnnotatedBatch,
    pub failures: Vec<ComponentFailure>,
    pub mode: ProcessingMode,
    /// Set when the batch was appended
    pub receipt: Option<AppendReceipt>,
}

impl CycleReport {
    pub fn is_persisted(&self) -> bool {
        self.receipt.is_some()
    }

    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty() || self.mode.is_fallback()
    }

    pub fn failures_of(&self, component: Component) -> impl Iterator<Item = &ComponentFailure> {
        self.failures.iter().filter(move |f| f.component == component)
    }
}

/// Result of [`ChangeTracker::run_maintenance`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub entity_id: String,
    /// `None` when the live file was under the rotation threshold
    pub rotation: Option<RotationOutcome>,
    pub cleanup: CleanupResult,
    pub validation: ValidationResult,
    pub disk_usage_bytes: u64,
    pub health: StorageHealth,
    pub elapsed_ms: u64,
}

/// Wires the differ, analyzer and store together
pub struct ChangeTracker {
    config: EngineConfig,
    differ: SnapshotDiffer,
    analyzer: CausationAnalyzer,
    store: Arc<ChangeLogStore>,
    health: Arc<HealthRegistry>,
}

impl ChangeTracker {
    pub fn new(config: EngineConfig, health: Arc<HealthRegistry>) -> Self {
        let store = Arc::new(ChangeLogStore::new(
            config.layout(),
            config.store_options(),
            config.retry_policy.clone(),
            Arc::clone(&health),
        ));
        Self {
            differ: config.differ(),
            analyzer: config.analyzer(),
            store,
            health,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ChangeLogStore> {
        &self.store
    }

    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    pub fn query_engine(&self) -> QueryEngine {
        QueryEngine::new(Arc::clone(&self.store))
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        self.config.retention_policy()
    }

    /// Runs one comparison cycle for `entity_id`.
    pub async fn process_cycle(
        &self,
        entity_id: &str,
        old: &Snapshot,
        new: &Snapshot,
        context: DetectionContext,
    ) -> Result<CycleReport, TrackerError> {
        let scope = ObservationScope::new("CYCLE", entity_id);
        let mut failures = Vec::new();

        let outcome = match self.differ.detect(entity_id, old, new, context) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.health
                    .record_component_failure(entity_id, err.kind(), &err.to_string());
                scope.fail(err.code());
                return Err(err.into());
            }
        };
        for failure in &outcome.failures {
            failures.push(self.component_failure(
                entity_id,
                Component::Detection,
                FailureKind::DetectionFailure,
                failure.error.code(),
                format!("{}: {}", failure.category, failure.error),
            ));
        }

        let mut fallback_reason = None;
        let prior = match self.store.last_entry(entity_id).await {
            Ok(entry) => entry.map(|e| e.into_batch()),
            Err(err) => {
                fallback_reason = Some(format!("previous batch unavailable: {}", err.code()));
                failures.push(self.component_failure(
                    entity_id,
                    Component::Causation,
                    FailureKind::CausationFailure,
                    err.code(),
                    err.to_string(),
                ));
                None
            }
        };

        let detected = outcome.batch;
        let analysis = self.analyzer.analyze(detected.clone(), prior.as_ref());
        failures.extend(self.causation_failures(entity_id, &analysis.failures, &mut fallback_reason));
        let batch = analysis.batch;

        let mode = match fallback_reason {
            Some(reason) => {
                warn!(
                    event = %Event::FallbackEngaged,
                    entity = entity_id,
                    batch = %batch.batch_id,
                    reason = %reason
                );
                ProcessingMode::Fallback { reason }
            }
            None => ProcessingMode::Full,
        };

        let (batch, receipt) = if batch.is_empty() && !self.config.persist_empty_batches {
            (batch, None)
        } else {
            self.persist(entity_id, &detected, batch, &mut failures).await
        };

        let summary = format!(
            "changes={} links={} failures={} persisted={}",
            batch.len(),
            batch.link_count(),
            failures.len(),
            receipt.is_some()
        );
        scope.complete_with(&summary);

        Ok(CycleReport {
            entity_id: entity_id.to_string(),
            batch,
            failures,
            mode,
            receipt,
        })
    }

    pub fn check_health(&self, entity_id: &str) -> StorageHealth {
        self.health.check(entity_id)
    }

    /// Rotation if due, retention cleanup, then validation.
    pub async fn run_maintenance(&self, entity_id: &str) -> Result<MaintenanceReport, TrackerError> {
        let started = Instant::now();
        let scope = ObservationScope::new("MAINTENANCE", entity_id);

        let result = self.maintain(entity_id).await;
        match result {
            Ok((rotation, cleanup, validation, disk_usage_bytes)) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                scope.complete_with(if validation.is_clean() { "clean" } else { "issues" });
                Ok(MaintenanceReport {
                    entity_id: entity_id.to_string(),
                    rotation,
                    cleanup,
                    validation,
                    disk_usage_bytes,
                    health: self.health.check(entity_id),
                    elapsed_ms,
                })
            }
            Err(err) => {
                scope.fail(err.code());
                Err(err.into())
            }
        }
    }

    async fn maintain(
        &self,
        entity_id: &str,
    ) -> Result<(Option<RotationOutcome>, CleanupResult, ValidationResult, u64), StorageError> {
        let rotation = self.store.rotate_if_due(entity_id).await?;
        let cleanup = self.store.cleanup(entity_id, &self.retention_policy()).await?;
        let validation = self.store.validate(entity_id).await?;
        let disk_usage = if cleanup.removed_entity_dir {
            0
        } else {
            self.store.disk_usage(entity_id).await?
        };
        Ok((rotation, cleanup, validation, disk_usage))
    }

    /// Appends the batch. If another append for the entity landed after
    /// the previous batch was read, causation is redone once against the
    /// batch that now precedes it.
    async fn persist(
        &self,
        entity_id: &str,
        detected: &ChangeBatch,
        batch: AnnotatedBatch,
        failures: &mut Vec<ComponentFailure>,
    ) -> (AnnotatedBatch, Option<AppendReceipt>) {
        let mut batch = batch;
        let mut appended = self.store.append(entity_id, &batch).await;

        if let Err(StorageError::StaleCause { cause_batch_id, .. }) = &appended {
            warn!(
                event = %Event::FallbackEngaged,
                entity = entity_id,
                batch = %batch.batch_id,
                stale = %cause_batch_id,
                reason = "preceding batch changed during analysis"
            );
            let prior = match self.store.last_entry(entity_id).await {
                Ok(entry) => entry.map(|e| e.into_batch()),
                Err(_) => None,
            };
            let analysis = self.analyzer.analyze(detected.clone(), prior.as_ref());
            let mut ignored = None;
            failures.extend(self.causation_failures(entity_id, &analysis.failures, &mut ignored));
            batch = analysis.batch;
            appended = self.store.append(entity_id, &batch).await;
        }

        match appended {
            Ok(receipt) => (batch, Some(receipt)),
            Err(err) => {
                // Retried failures were recorded by the retry executor.
                if err.is_rejection() {
                    self.health
                        .record_storage_failure(entity_id, err.kind(), &err.to_string());
                }
                error!(
                    event = %Event::StorageFatal,
                    entity = entity_id,
                    batch = %batch.batch_id,
                    code = err.code(),
                    error = %err
                );
                failures.push(ComponentFailure {
                    component: Component::Storage,
                    kind: err.kind(),
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                (batch, None)
            }
        }
    }

    fn causation_failures(
        &self,
        entity_id: &str,
        errors: &[CausationError],
        fallback_reason: &mut Option<String>,
    ) -> Vec<ComponentFailure> {
        errors
            .iter()
            .map(|err| {
                fallback_reason.get_or_insert_with(|| format!("causation degraded: {}", err.code()));
                self.component_failure(entity_id, Component::Causation, err.kind(), err.code(), err.to_string())
            })
            .collect()
    }

    fn component_failure(
        &self,
        entity_id: &str,
        component: Component,
        kind: FailureKind,
        code: &str,
        message: String,
    ) -> ComponentFailure {
        self.health.record_component_failure(entity_id, kind, &message);
        ComponentFailure {
            component,
            kind,
            code: code.to_string(),
            message,
        }
    }
}
