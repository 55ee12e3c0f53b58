//! Age-based retention

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ChangeLogEntry;

/// What happens to expired entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionAction {
    /// Move them under `archive/`
    Archive,
    Delete,
}

impl fmt::Display for RetentionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionAction::Archive => f.write_str("archive"),
            RetentionAction::Delete => f.write_str("delete"),
        }
    }
}

impl FromStr for RetentionAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "archive" => Ok(RetentionAction::Archive),
            "delete" => Ok(RetentionAction::Delete),
            _ => Err(format!("unknown retention action: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    pub retention_days: u32,
    pub action: RetentionAction,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_days: 90,
            action: RetentionAction::Archive,
        }
    }
}

impl RetentionPolicy {
    pub fn new(retention_days: u32, action: RetentionAction) -> Self {
        Self {
            retention_days,
            action,
        }
    }

    /// Entries stamped strictly before the cutoff have expired.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.retention_days))
    }

    /// Splits entries into `(expired, kept)`, preserving order.
    pub fn partition(
        &self,
        entries: Vec<ChangeLogEntry>,
        cutoff: DateTime<Utc>,
    ) -> (Vec<ChangeLogEntry>, Vec<ChangeLogEntry>) {
        entries.into_iter().partition(|e| e.timestamp < cutoff)
    }
}

/// Outcome of one cleanup run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub entity_id: String,
    pub action: RetentionAction,
    pub cutoff: DateTime<Utc>,
    pub entries_archived: usize,
    pub entries_deleted: usize,
    pub entries_retained: usize,
    /// Archive files written
    pub archive_files: Vec<PathBuf>,
    /// Source files that lost some entries and were rewritten
    pub files_rewritten: Vec<PathBuf>,
    /// Source files that lost every entry and were removed
    pub files_removed: Vec<PathBuf>,
    /// Files skipped because they could not be parsed
    pub corrupted_files: Vec<PathBuf>,
    pub removed_entity_dir: bool,
}

impl CleanupResult {
    pub fn new(entity_id: &str, action: RetentionAction, cutoff: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            action,
            cutoff,
            entries_archived: 0,
            entries_deleted: 0,
            entries_retained: 0,
            archive_files: Vec::new(),
            files_rewritten: Vec::new(),
            files_removed: Vec::new(),
            corrupted_files: Vec::new(),
            removed_entity_dir: false,
        }
    }

    pub fn entries_expired(&self) -> usize {
        self.entries_archived + self.entries_deleted
    }
}
