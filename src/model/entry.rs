//! Persisted change log entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::causation::{AnnotatedBatch, AttributedChange};
use super::change::{BatchId, ChangeCategory, DetectionContext};
use crate::changelog::checksum::{checksum_json, format_checksum};

/// Storage metadata stamped on every entry at append time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryStorageMeta {
    /// Number of changes in the entry
    pub change_count: usize,
    /// Rotation generation of the live file the entry was written into
    pub rotation_count: u32,
    /// CRC32 over the entry content (format: "crc32:XXXXXXXX")
    pub checksum: String,
}

/// One persisted comparison cycle
///
/// Entries are immutable once written. Rotation and retention move or
/// delete whole entries; validation may only repair file-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    pub entity_id: String,
    pub batch_id: BatchId,
    /// Monotonic per entity, continuing across rotations
    pub sequence: u64,
    /// Cycle timestamp of the batch
    pub timestamp: DateTime<Utc>,
    pub context: DetectionContext,
    pub changes: Vec<AttributedChange>,
    #[serde(default)]
    pub incomplete_categories: Vec<ChangeCategory>,
    pub storage: EntryStorageMeta,
}

/// The part of an entry its checksum covers
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EntryContent<'a> {
    entity_id: &'a str,
    batch_id: &'a str,
    sequence: u64,
    timestamp: &'a DateTime<Utc>,
    context: &'a DetectionContext,
    changes: &'a [AttributedChange],
    incomplete_categories: &'a [ChangeCategory],
}

impl ChangeLogEntry {
    /// Builds an entry from an annotated batch and stamps its checksum.
    pub fn from_batch(batch: AnnotatedBatch, sequence: u64, rotation_count: u32) -> Self {
        let mut entry = Self {
            entity_id: batch.entity_id,
            batch_id: batch.batch_id,
            sequence,
            timestamp: batch.context.cycle_timestamp,
            context: batch.context,
            storage: EntryStorageMeta {
                change_count: batch.changes.len(),
                rotation_count,
                checksum: String::new(),
            },
            changes: batch.changes,
            incomplete_categories: batch.incomplete_categories,
        };
        entry.storage.checksum = entry.compute_checksum();
        entry
    }

    /// Computes the content checksum, ignoring the stored metadata.
    pub fn compute_checksum(&self) -> String {
        let content = EntryContent {
            entity_id: &self.entity_id,
            batch_id: &self.batch_id,
            sequence: self.sequence,
            timestamp: &self.timestamp,
            context: &self.context,
            changes: &self.changes,
            incomplete_categories: &self.incomplete_categories,
        };
        format_checksum(checksum_json(&content))
    }

    /// True if the stored checksum matches the content
    pub fn verify_checksum(&self) -> bool {
        self.storage.checksum == self.compute_checksum()
    }

    /// The annotated batch this entry was built from
    pub fn into_batch(self) -> AnnotatedBatch {
        AnnotatedBatch {
            batch_id: self.batch_id,
            entity_id: self.entity_id,
            context: self.context,
            changes: self.changes,
            incomplete_categories: self.incomplete_categories,
        }
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn get(&self, change_id: &str) -> Option<&AttributedChange> {
        self.changes.iter().find(|c| c.id() == change_id)
    }
}
