//! Validation and metadata repair
//!
//! Only file-level metadata is ever repaired: `entryCount`, the file
//! checksum, the file `entityId` and the live file's `rotationCount`.
//! Entry content is immutable; a file whose entries fail their checksum or
//! belong to another entity is reported as corrupted and left untouched.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::file::LogFile;
use crate::observability::ValidationSummary;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorruptedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Repair {
    pub path: PathBuf,
    pub description: String,
}

/// Outcome of validating one entity's files
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub entity_id: String,
    pub validated_at: DateTime<Utc>,
    pub files_checked: usize,
    pub corrupted: Vec<CorruptedFile>,
    pub repairs: Vec<Repair>,
    /// Inconsistencies that are reported but not repaired
    pub issues: Vec<String>,
    pub removed_temp_files: Vec<PathBuf>,
}

impl ValidationResult {
    pub fn new(entity_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            validated_at: Utc::now(),
            files_checked: 0,
            corrupted: Vec::new(),
            repairs: Vec::new(),
            issues: Vec::new(),
            removed_temp_files: Vec::new(),
        }
    }

    /// No corruption and no unrepaired issues
    pub fn is_clean(&self) -> bool {
        self.corrupted.is_empty() && self.issues.is_empty()
    }

    pub fn repaired_files(&self) -> usize {
        self.repairs.iter().map(|r| &r.path).collect::<HashSet<_>>().len()
    }

    pub fn summary(&self) -> ValidationSummary {
        ValidationSummary {
            at: self.validated_at,
            files_checked: self.files_checked,
            corrupted_files: self.corrupted.len(),
            repaired_files: self.repaired_files(),
            issues: self.issues.len(),
        }
    }
}

/// Findings for a single parsed file
#[derive(Debug, Default)]
pub(crate) struct Inspection {
    pub repairs: Vec<String>,
    pub corruption: Vec<String>,
    pub issues: Vec<String>,
}

/// Checks one parsed file and repairs its metadata in memory.
///
/// `min_rotation_count` is set for the live file: its rotation count must
/// be at least the highest rotated file number. Repairs are only applied
/// when no corruption was found; the caller persists them.
pub(crate) fn inspect(file: &mut LogFile, entity_id: &str, min_rotation_count: Option<u32>) -> Inspection {
    let mut inspection = Inspection::default();

    let mut previous: Option<(u64, DateTime<Utc>)> = None;
    for entry in &file.entries {
        if entry.entity_id != entity_id {
            inspection.corruption.push(format!(
                "entry {} belongs to entity '{}'",
                entry.sequence, entry.entity_id
            ));
        }
        if !entry.verify_checksum() {
            inspection
                .corruption
                .push(format!("entry {} fails its checksum", entry.sequence));
        }
        if entry.storage.change_count != entry.changes.len() {
            inspection.issues.push(format!(
                "entry {} records {} changes but holds {}",
                entry.sequence,
                entry.storage.change_count,
                entry.changes.len()
            ));
        }
        let mut ids = HashSet::with_capacity(entry.changes.len());
        for change in &entry.changes {
            if !ids.insert(change.id()) {
                inspection.issues.push(format!(
                    "entry {} repeats change id {}",
                    entry.sequence,
                    change.id()
                ));
            }
        }
        if let Some((sequence, timestamp)) = previous {
            if entry.sequence <= sequence {
                inspection.issues.push(format!(
                    "sequence {} follows {}",
                    entry.sequence, sequence
                ));
            }
            if entry.timestamp < timestamp {
                inspection.issues.push(format!(
                    "entry {} is older than the entry before it",
                    entry.sequence
                ));
            }
        }
        previous = Some((entry.sequence, entry.timestamp));
    }

    if !inspection.corruption.is_empty() {
        return inspection;
    }

    if file.entity_id != entity_id {
        inspection.repairs.push(format!(
            "entityId '{}' -> '{}'",
            file.entity_id, entity_id
        ));
        file.entity_id = entity_id.to_string();
    }
    if let Some(min) = min_rotation_count {
        if file.metadata.rotation_count < min {
            inspection.repairs.push(format!(
                "rotationCount {} -> {}",
                file.metadata.rotation_count, min
            ));
            file.metadata.rotation_count = min;
        }
    }
    if file.metadata.entry_count != file.entries.len() {
        inspection.repairs.push(format!(
            "entryCount {} -> {}",
            file.metadata.entry_count,
            file.entries.len()
        ));
    }
    let checksum = file.compute_checksum();
    if file.metadata.checksum != checksum {
        inspection.repairs.push(format!(
            "checksum {} -> {}",
            file.metadata.checksum, checksum
        ));
    }
    if !inspection.repairs.is_empty() {
        file.seal();
    }
    inspection
}
