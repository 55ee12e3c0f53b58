//! Per-entity storage health
//!
//! The registry is constructed once per process and passed explicitly to
//! the store, the retry executor and the tracker. Counters are atomic and
//! monotonic for the process lifetime; timestamps and the last validation
//! summary sit behind a small per-entity mutex. There is no global lock
//! across entities beyond the map lookup.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

/// Consecutive storage failures at which an entity is reported as failing
pub const FAILING_THRESHOLD: u64 = 3;

/// Derived state of an entity's storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Recent failures or validation issues, still writable
    Degraded,
    /// Repeated consecutive storage failures
    Failing,
    /// The last validation found corrupted files
    Corrupted,
    /// Nothing recorded yet in this process
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Failing => "failing",
            HealthStatus::Corrupted => "corrupted",
            HealthStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Outcome of the most recent validation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub at: DateTime<Utc>,
    pub files_checked: usize,
    pub corrupted_files: usize,
    pub repaired_files: usize,
    pub issues: usize,
}

impl ValidationSummary {
    pub fn is_clean(&self) -> bool {
        self.corrupted_files == 0 && self.issues == 0
    }
}

#[derive(Debug, Default)]
struct EntityHealth {
    writes: AtomicU64,
    write_failures: AtomicU64,
    consecutive_failures: AtomicU64,
    retries: AtomicU64,
    rotations: AtomicU64,
    repairs: AtomicU64,
    component_failures: AtomicU64,
    disk_usage_bytes: AtomicU64,
    state: Mutex<EntityState>,
}

#[derive(Debug, Default, Clone)]
struct EntityState {
    last_write: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_failure_kind: Option<FailureKind>,
    last_rotation: Option<DateTime<Utc>>,
    last_validation: Option<ValidationSummary>,
}

impl EntityHealth {
    fn state(&self) -> MutexGuard<'_, EntityState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Point-in-time view of one entity's storage health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageHealth {
    pub entity_id: String,
    pub status: HealthStatus,
    pub writes: u64,
    pub write_failures: u64,
    pub consecutive_failures: u64,
    pub retries: u64,
    pub rotations: u64,
    pub repairs: u64,
    /// Detection and causation failures recovered during cycles
    pub component_failures: u64,
    pub disk_usage_bytes: u64,
    pub last_write: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_failure_kind: Option<FailureKind>,
    pub last_rotation: Option<DateTime<Utc>>,
    pub last_validation: Option<ValidationSummary>,
    pub observed_at: DateTime<Utc>,
}

impl StorageHealth {
    fn unknown(entity_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            status: HealthStatus::Unknown,
            writes: 0,
            write_failures: 0,
            consecutive_failures: 0,
            retries: 0,
            rotations: 0,
            repairs: 0,
            component_failures: 0,
            disk_usage_bytes: 0,
            last_write: None,
            last_failure: None,
            last_error: None,
            last_failure_kind: None,
            last_rotation: None,
            last_validation: None,
            observed_at: Utc::now(),
        }
    }
}

/// Process-wide health store, keyed by entity
#[derive(Debug, Default)]
pub struct HealthRegistry {
    entities: Mutex<HashMap<String, Arc<EntityHealth>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, entity_id: &str) -> Arc<EntityHealth> {
        let mut entities = self
            .entities
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(entities.entry(entity_id.to_string()).or_default())
    }

    fn existing(&self, entity_id: &str) -> Option<Arc<EntityHealth>> {
        let entities = self
            .entities
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entities.get(entity_id).cloned()
    }

    /// A write reached disk; resets the consecutive failure count.
    pub fn record_write(&self, entity_id: &str) {
        let health = self.entry(entity_id);
        health.writes.fetch_add(1, Ordering::Relaxed);
        health.consecutive_failures.store(0, Ordering::Relaxed);
        health.state().last_write = Some(Utc::now());
    }

    /// A storage operation failed terminally (after any retries).
    pub fn record_storage_failure(&self, entity_id: &str, kind: FailureKind, message: &str) {
        let health = self.entry(entity_id);
        health.write_failures.fetch_add(1, Ordering::Relaxed);
        health.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        let mut state = health.state();
        state.last_failure = Some(Utc::now());
        state.last_error = Some(message.to_string());
        state.last_failure_kind = Some(kind);
    }

    /// A detection or causation failure that was recovered locally.
    pub fn record_component_failure(&self, entity_id: &str, kind: FailureKind, message: &str) {
        let health = self.entry(entity_id);
        health.component_failures.fetch_add(1, Ordering::Relaxed);
        let mut state = health.state();
        state.last_failure = Some(Utc::now());
        state.last_error = Some(message.to_string());
        state.last_failure_kind = Some(kind);
    }

    pub fn record_retry(&self, entity_id: &str) {
        self.entry(entity_id).retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rotation(&self, entity_id: &str) {
        let health = self.entry(entity_id);
        health.rotations.fetch_add(1, Ordering::Relaxed);
        health.state().last_rotation = Some(Utc::now());
    }

    pub fn record_repairs(&self, entity_id: &str, count: u64) {
        self.entry(entity_id)
            .repairs
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_validation(&self, entity_id: &str, summary: ValidationSummary) {
        self.entry(entity_id).state().last_validation = Some(summary);
    }

    pub fn set_disk_usage(&self, entity_id: &str, bytes: u64) {
        self.entry(entity_id)
            .disk_usage_bytes
            .store(bytes, Ordering::Relaxed);
    }

    /// Current health of an entity. Entities never touched in this process
    /// report `Unknown`.
    pub fn check(&self, entity_id: &str) -> StorageHealth {
        let Some(health) = self.existing(entity_id) else {
            return StorageHealth::unknown(entity_id);
        };
        let state = health.state().clone();
        let consecutive_failures = health.consecutive_failures.load(Ordering::Relaxed);

        let status = match &state.last_validation {
            Some(v) if v.corrupted_files > 0 => HealthStatus::Corrupted,
            _ if consecutive_failures >= FAILING_THRESHOLD => HealthStatus::Failing,
            Some(v) if v.issues > 0 => HealthStatus::Degraded,
            _ if consecutive_failures > 0 => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        };

        StorageHealth {
            entity_id: entity_id.to_string(),
            status,
            writes: health.writes.load(Ordering::Relaxed),
            write_failures: health.write_failures.load(Ordering::Relaxed),
            consecutive_failures,
            retries: health.retries.load(Ordering::Relaxed),
            rotations: health.rotations.load(Ordering::Relaxed),
            repairs: health.repairs.load(Ordering::Relaxed),
            component_failures: health.component_failures.load(Ordering::Relaxed),
            disk_usage_bytes: health.disk_usage_bytes.load(Ordering::Relaxed),
            last_write: state.last_write,
            last_failure: state.last_failure,
            last_error: state.last_error,
            last_failure_kind: state.last_failure_kind,
            last_rotation: state.last_rotation,
            last_validation: state.last_validation,
            observed_at: Utc::now(),
        }
    }
}
