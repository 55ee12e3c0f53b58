//! Core data model for change tracking
//!
//! A comparison cycle produces a [`ChangeBatch`] of [`FieldChange`]s. The
//! causation pass turns it into an [`AnnotatedBatch`] of
//! [`AttributedChange`]s, which the change log persists as a
//! [`ChangeLogEntry`].
//!
//! # Lifecycle
//!
//! - `ChangeBatch` is created fresh per cycle and discarded after persistence
//! - `FieldChange` is immutable once produced
//! - `ChangeLogEntry` is immutable once durably written

mod causation;
mod change;
mod entry;

pub use causation::{AnnotatedBatch, AttributedChange, CausationLink, CauseType};
pub use change::{
    BatchId, ChangeBatch, ChangeCategory, ChangeId, DetectionContext, FieldChange, Priority,
};
pub use entry::{ChangeLogEntry, EntryStorageMeta};

/// Longest accepted entity ID
pub const MAX_ENTITY_ID_LEN: usize = 128;

/// Entity IDs name directories on disk: non-empty, ASCII letters, digits,
/// `_`, `-` and `.`, and never `.` or `..`.
pub fn is_valid_entity_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ENTITY_ID_LEN
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
