//! Durable per-entity change log
//!
//! # On-disk layout
//!
//! ```text
//! <root>/<entity_id>/changelog.json
//! <root>/<entity_id>/rotated/changelog_<YYYYMMDDTHHMMSSZ>_r<NNNN>.json
//! <root>/<entity_id>/archive/archived_<YYYYMMDDTHHMMSSZ>_<source>.json
//! ```
//!
//! Every file is a [`LogFile`]: format version, entity ID, metadata (entry
//! count, rotation count, timestamps, CRC32 over the entries) and the
//! entries themselves, each carrying its own checksum.
//!
//! # Durability
//!
//! Files are only ever replaced whole: serialize to `<file>.tmp`, fsync,
//! rename over the target, fsync the directory. A crash leaves either the
//! old or the new file, plus possibly a stray `.tmp` that validation
//! removes.
//!
//! Transient I/O failures are retried under the store's
//! [`RetryPolicy`](crate::retry::RetryPolicy); everything else surfaces
//! immediately.

pub mod checksum;
mod errors;
mod file;
mod layout;
mod retention;
mod rotation;
mod store;
mod validation;

pub use errors::{StorageError, StorageResult};
pub use file::{LogFile, LogMetadata, FORMAT_VERSION};
pub use layout::{StorageLayout, ARCHIVE_DIR, LIVE_FILE, ROTATED_DIR};
pub use retention::{CleanupResult, RetentionAction, RetentionPolicy};
pub use rotation::RotationOutcome;
pub use store::{AppendReceipt, ChangeLogStore, StoreOptions, DEFAULT_ROTATION_SIZE_THRESHOLD};
pub use validation::{CorruptedFile, Repair, ValidationResult};
