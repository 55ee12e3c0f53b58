//! Observable events
//!
//! Every log line carries one of these as its `event` field. Event names
//! are stable strings so log pipelines can match on them.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    /// Configuration loaded and validated
    ConfigLoaded,

    // Detection
    /// A single detector failed; its category is skipped
    DetectorFailed,
    /// Too many detectors failed or one reported a critical error
    DetectionAborted,
    /// A change batch was produced
    BatchDetected,

    // Causation
    /// Causation links attached to a batch
    CausationComplete,
    /// Causation analysis degraded; some or all links omitted
    CausationDegraded,

    // Storage
    /// Batch durably appended
    AppendComplete,
    /// Append refused (ordering, duplicate or entity mismatch)
    AppendRejected,
    /// Live file moved to the rotated directory
    RotationComplete,
    /// Retention cleanup finished
    CleanupComplete,
    /// Validation finished
    ValidationComplete,
    /// File metadata repaired during validation
    MetadataRepaired,
    /// A file or entry failed integrity checks (FATAL)
    CorruptionDetected,
    /// Non-recoverable storage failure (FATAL)
    StorageFatal,

    // Retry
    /// A recoverable failure will be retried
    RetryAttempt,
    /// All attempts used up
    RetryExhausted,
    /// The overall deadline passed
    RetryTimeout,

    // Query
    /// Query answered
    QueryComplete,
    /// Query options rejected
    QueryRejected,
    /// Causation report generated
    ReportGenerated,

    // Orchestration
    /// A cycle finished through the degraded path
    FallbackEngaged,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::DetectorFailed => "DETECTOR_FAILED",
            Event::DetectionAborted => "DETECTION_ABORTED",
            Event::BatchDetected => "BATCH_DETECTED",

            Event::CausationComplete => "CAUSATION_COMPLETE",
            Event::CausationDegraded => "CAUSATION_DEGRADED",

            Event::AppendComplete => "APPEND_COMPLETE",
            Event::AppendRejected => "APPEND_REJECTED",
            Event::RotationComplete => "ROTATION_COMPLETE",
            Event::CleanupComplete => "CLEANUP_COMPLETE",
            Event::ValidationComplete => "VALIDATION_COMPLETE",
            Event::MetadataRepaired => "METADATA_REPAIRED",
            Event::CorruptionDetected => "CORRUPTION_DETECTED",
            Event::StorageFatal => "STORAGE_FATAL",

            Event::RetryAttempt => "RETRY_ATTEMPT",
            Event::RetryExhausted => "RETRY_EXHAUSTED",
            Event::RetryTimeout => "RETRY_TIMEOUT",

            Event::QueryComplete => "QUERY_COMPLETE",
            Event::QueryRejected => "QUERY_REJECTED",
            Event::ReportGenerated => "REPORT_GENERATED",

            Event::FallbackEngaged => "FALLBACK_ENGAGED",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Event::CorruptionDetected | Event::StorageFatal | Event::DetectionAborted
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
