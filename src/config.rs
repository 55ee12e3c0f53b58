//! Engine configuration
//!
//! Loaded from a JSON file with camelCase keys. Every key is optional and
//! falls back to its default; the loaded value is validated before use.
//!
//! ```json
//! {
//!   "storageRootPath": "./changelogs",
//!   "rotationSizeThreshold": 5242880,
//!   "retentionDays": 90,
//!   "retentionAction": "archive",
//!   "causationConfidenceThreshold": 0.7,
//!   "maxCascadeDepth": 3,
//!   "retryPolicy": { "maxAttempts": 3, "baseDelayMs": 100, "maxDelayMs": 5000 }
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::causation::{
    CausationAnalyzer, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_CROSS_CYCLE_WINDOW_SECS, DEFAULT_MAX_CASCADE_DEPTH,
};
use crate::changelog::{
    RetentionAction, RetentionPolicy, StorageLayout, StoreOptions, DEFAULT_ROTATION_SIZE_THRESHOLD,
};
use crate::differ::{SnapshotDiffer, DEFAULT_MAX_FAILURE_RATIO};
use crate::observability::Event;
use crate::retry::RetryPolicy;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config JSON in {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "CAUSELOG_CONFIG_READ",
            ConfigError::Parse { .. } => "CAUSELOG_CONFIG_PARSE",
            ConfigError::Invalid { .. } => "CAUSELOG_CONFIG_INVALID",
        }
    }

    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub storage_root_path: PathBuf,
    pub rotation_size_threshold: u64,
    pub auto_rotate: bool,
    pub retention_days: u32,
    pub retention_action: RetentionAction,
    pub causation_confidence_threshold: f64,
    pub max_cascade_depth: u32,
    /// How old the preceding batch may be and still provide causes
    pub cross_cycle_window_secs: i64,
    pub max_detector_failure_ratio: f64,
    /// Append cycles that found no changes
    pub persist_empty_batches: bool,
    pub retry_policy: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_root_path: PathBuf::from("./changelogs"),
            rotation_size_threshold: DEFAULT_ROTATION_SIZE_THRESHOLD,
            auto_rotate: true,
            retention_days: 90,
            retention_action: RetentionAction::Archive,
            causation_confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
            cross_cycle_window_secs: DEFAULT_CROSS_CYCLE_WINDOW_SECS,
            max_detector_failure_ratio: DEFAULT_MAX_FAILURE_RATIO,
            persist_empty_batches: false,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Reads and validates a config file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(path, &content)?;
        info!(
            event = %Event::ConfigLoaded,
            path = %path.display(),
            root = %config.storage_root_path.display()
        );
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        match Self::load(path) {
            Err(ConfigError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                let config = Self::default();
                info!(
                    event = %Event::ConfigLoaded,
                    path = %path.display(),
                    defaults = true
                );
                Ok(config)
            }
            other => other,
        }
    }

    pub fn from_json(path: &Path, content: &str) -> ConfigResult<Self> {
        let config: EngineConfig = serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.storage_root_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("storageRootPath", "must not be empty"));
        }
        if self.rotation_size_threshold == 0 {
            return Err(ConfigError::invalid("rotationSizeThreshold", "must be > 0"));
        }
        let threshold = self.causation_confidence_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::invalid(
                "causationConfidenceThreshold",
                format!("{} is outside (0, 1]", threshold),
            ));
        }
        let ratio = self.max_detector_failure_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::invalid(
                "maxDetectorFailureRatio",
                format!("{} is outside (0, 1]", ratio),
            ));
        }
        if self.cross_cycle_window_secs < 0 {
            return Err(ConfigError::invalid("crossCycleWindowSecs", "must be >= 0"));
        }

        let retry = &self.retry_policy;
        if retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retryPolicy.maxAttempts", "must be > 0"));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::invalid(
                "retryPolicy.baseDelayMs",
                format!("{} exceeds maxDelayMs {}", retry.base_delay_ms, retry.max_delay_ms),
            ));
        }
        if retry.exponential_base < 1.0 {
            return Err(ConfigError::invalid("retryPolicy.exponentialBase", "must be >= 1"));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(ConfigError::invalid("retryPolicy.jitter", "must be within [0, 1]"));
        }
        if retry.overall_timeout_ms == 0 {
            return Err(ConfigError::invalid("retryPolicy.overallTimeoutMs", "must be > 0"));
        }
        Ok(())
    }

    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(self.storage_root_path.clone())
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            rotation_size_threshold: self.rotation_size_threshold,
            auto_rotate: self.auto_rotate,
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.retention_days, self.retention_action)
    }

    pub fn analyzer(&self) -> CausationAnalyzer {
        CausationAnalyzer::new(
            self.causation_confidence_threshold,
            self.max_cascade_depth,
            chrono::Duration::seconds(self.cross_cycle_window_secs),
        )
    }

    pub fn differ(&self) -> SnapshotDiffer {
        SnapshotDiffer::new(self.max_detector_failure_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config = EngineConfig::from_json(Path::new("c.json"), "{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.rotation_size_threshold, 5 * 1024 * 1024);
        assert_eq!(config.retention_days, 90);
        assert_eq!(config.causation_confidence_threshold, 0.7);
        assert_eq!(config.max_cascade_depth, 3);
        assert_eq!(config.retry_policy.max_attempts, 3);
    }

    #[test]
    fn test_partial_override() {
        let json = r#"{
            "storageRootPath": "/var/lib/causelog",
            "retentionAction": "delete",
            "retryPolicy": { "maxAttempts": 5 }
        }"#;
        let config = EngineConfig::from_json(Path::new("c.json"), json).unwrap();
        assert_eq!(config.storage_root_path, PathBuf::from("/var/lib/causelog"));
        assert_eq!(config.retention_action, RetentionAction::Delete);
        assert_eq!(config.retry_policy.max_attempts, 5);
        assert_eq!(config.retry_policy.base_delay_ms, 100);
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = [
            r#"{"causationConfidenceThreshold": 0}"#,
            r#"{"causationConfidenceThreshold": 1.5}"#,
            r#"{"rotationSizeThreshold": 0}"#,
            r#"{"storageRootPath": ""}"#,
            r#"{"retryPolicy": {"maxAttempts": 0}}"#,
            r#"{"retryPolicy": {"baseDelayMs": 9000, "maxDelayMs": 100}}"#,
            r#"{"retryPolicy": {"exponentialBase": 0.5}}"#,
            r#"{"retryPolicy": {"jitter": 2.0}}"#,
        ];
        for json in cases {
            let err = EngineConfig::from_json(Path::new("c.json"), json).unwrap_err();
            assert_eq!(err.code(), "CAUSELOG_CONFIG_INVALID", "{}", json);
        }
    }

    #[test]
    fn test_malformed_json() {
        let err = EngineConfig::from_json(Path::new("c.json"), "{").unwrap_err();
        assert_eq!(err.code(), "CAUSELOG_CONFIG_PARSE");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("causelog.json");
        assert!(matches!(EngineConfig::load(&path), Err(ConfigError::Read { .. })));
        assert_eq!(EngineConfig::load_or_default(&path).unwrap(), EngineConfig::default());

        std::fs::write(&path, r#"{"retentionDays": 30}"#).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap().retention_days, 30);
    }
}
