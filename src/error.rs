//! Shared error taxonomy
//!
//! Every subsystem error maps onto one [`FailureKind`] so that callers and
//! the health registry can reason about failures uniformly:
//!
//! | kind | handling |
//! |------|----------|
//! | `DetectionFailure` | recovered by skipping the category |
//! | `BatchIdentityFailure` | whole cycle aborted, no batch |
//! | `CausationFailure` | links omitted, changes still persisted |
//! | `StorageTransientFailure` | retried per policy |
//! | `StorageFatalFailure` | surfaced immediately |
//! | `CorruptionDetected` | reported, never auto-deleted |

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Operation fails or degrades, engine continues
    Error,
    /// The operation (cycle, append) cannot proceed at all
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Failure category shared across subsystems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    DetectionFailure,
    BatchIdentityFailure,
    CausationFailure,
    StorageTransientFailure,
    StorageFatalFailure,
    CorruptionDetected,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::DetectionFailure => "detection-failure",
            FailureKind::BatchIdentityFailure => "batch-identity-failure",
            FailureKind::CausationFailure => "causation-failure",
            FailureKind::StorageTransientFailure => "storage-transient-failure",
            FailureKind::StorageFatalFailure => "storage-fatal-failure",
            FailureKind::CorruptionDetected => "corruption-detected",
        }
    }

    /// Whether the failure was recovered where it happened
    pub fn is_locally_recovered(&self) -> bool {
        matches!(
            self,
            FailureKind::DetectionFailure | FailureKind::CausationFailure
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
