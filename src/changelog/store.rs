//! Per-entity change log store
//!
//! # Concurrency
//!
//! Each entity has its own `RwLock`. Appends, rotations, cleanups and
//! validations take it exclusively, so at most one write is in flight per
//! entity; loads share it, so a load never observes a rotation half done.
//! Different entities never contend beyond the lock map lookup. A lock is
//! forgotten once cleanup has removed the entity's directory.
//!
//! # Deadlines
//!
//! Every file system step goes through the retry executor. A public
//! operation takes one deadline once it holds the entity lock and every
//! step inside it runs under that same deadline.
//!
//! # Ordering
//!
//! Appends must arrive in cycle order. A batch older than the last
//! persisted one, or one whose batch ID was already persisted, is rejected.
//! So is a batch with a cross-cycle link to any batch other than the one it
//! directly follows.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::errors::{StorageError, StorageResult};
use super::file::{file_size, move_file, read_log_file, write_atomic, LogFile};
use super::layout::{is_json_file, is_tmp_file, StorageLayout};
use super::retention::{CleanupResult, RetentionAction, RetentionPolicy};
use super::rotation::{is_due, list_rotated, max_rotation, RotationOutcome};
use super::validation::{inspect, CorruptedFile, Repair, ValidationResult};
use crate::model::{is_valid_entity_id, AnnotatedBatch, ChangeLogEntry};
use crate::observability::{Event, HealthRegistry};
use crate::retry::{RetryExecutor, RetryPolicy};

/// Default live-file size that makes rotation due (5 MiB)
pub const DEFAULT_ROTATION_SIZE_THRESHOLD: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub rotation_size_threshold: u64,
    /// Rotate before an append when the live file is over the threshold
    pub auto_rotate: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            rotation_size_threshold: DEFAULT_ROTATION_SIZE_THRESHOLD,
            auto_rotate: true,
        }
    }
}

/// What an append wrote
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendReceipt {
    pub entity_id: String,
    pub batch_id: String,
    pub sequence: u64,
    pub live_file_bytes: u64,
    /// The live file has reached the rotation threshold
    pub rotation_due: bool,
    /// A rotation ran just before this append
    pub rotated_before: bool,
}

pub struct ChangeLogStore {
    layout: StorageLayout,
    options: StoreOptions,
    retry: RetryExecutor,
    health: Arc<HealthRegistry>,
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl ChangeLogStore {
    pub fn new(
        layout: StorageLayout,
        options: StoreOptions,
        retry_policy: RetryPolicy,
        health: Arc<HealthRegistry>,
    ) -> Self {
        Self {
            layout,
            options,
            retry: RetryExecutor::new(retry_policy, Arc::clone(&health)),
            health,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    fn lock_for(&self, entity_id: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(entity_id.to_string()).or_default())
    }

    /// Drops the entity's lock if no task holds or waits on it.
    fn prune_lock(&self, entity_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks.get(entity_id).map(|l| Arc::strong_count(l) == 1).unwrap_or(false) {
            locks.remove(entity_id);
        }
    }

    /// Appends an annotated batch as the next entry of the entity's log.
    pub async fn append(&self, entity_id: &str, batch: &AnnotatedBatch) -> StorageResult<AppendReceipt> {
        check_entity_id(entity_id)?;
        if batch.entity_id != entity_id {
            return Err(self.rejected(
                entity_id,
                StorageError::EntityMismatch {
                    expected: entity_id.to_string(),
                    found: batch.entity_id.clone(),
                },
            ));
        }

        let lock = self.lock_for(entity_id);
        let _guard = lock.write().await;
        let deadline = self.retry.deadline();

        let live_path = self.layout.live_file(entity_id);
        let mut rotated_before = false;
        if self.options.auto_rotate
            && is_due(
                self.size_of(entity_id, deadline, &live_path).await?,
                self.options.rotation_size_threshold,
            )
        {
            rotated_before = self.rotate_locked(entity_id, deadline).await?.rotated();
        }

        let mut live = self.live_or_new(entity_id, deadline).await?;
        let previous = self.last_entry_locked(entity_id, deadline, &live).await?;

        if let Some(previous) = &previous {
            if batch.context.cycle_timestamp < previous.timestamp {
                return Err(self.rejected(
                    entity_id,
                    StorageError::OutOfOrder {
                        entity_id: entity_id.to_string(),
                        last: previous.timestamp,
                        attempted: batch.context.cycle_timestamp,
                    },
                ));
            }
        }
        let duplicate = live.entries.iter().any(|e| e.batch_id == batch.batch_id)
            || previous.as_ref().map(|e| e.batch_id == batch.batch_id).unwrap_or(false);
        if duplicate {
            return Err(self.rejected(
                entity_id,
                StorageError::DuplicateBatch {
                    entity_id: entity_id.to_string(),
                    batch_id: batch.batch_id.clone(),
                },
            ));
        }

        // Cross-cycle causes may only come from the batch this one follows.
        let preceding = previous.as_ref().map(|e| e.batch_id.as_str());
        if let Some(cause_batch_id) = batch
            .links()
            .filter_map(|l| l.cause_batch_id.as_deref())
            .find(|id| Some(*id) != preceding)
        {
            return Err(self.rejected(
                entity_id,
                StorageError::StaleCause {
                    entity_id: entity_id.to_string(),
                    batch_id: batch.batch_id.clone(),
                    cause_batch_id: cause_batch_id.to_string(),
                    preceding: preceding.map(str::to_string),
                },
            ));
        }

        let sequence = previous.map(|e| e.sequence + 1).unwrap_or(1);
        let entry = ChangeLogEntry::from_batch(batch.clone(), sequence, live.metadata.rotation_count);
        live.push(entry);
        let live_file_bytes = self.write_file(entity_id, deadline, &live_path, &live).await?;

        self.health.record_write(entity_id);
        let rotation_due = is_due(live_file_bytes, self.options.rotation_size_threshold);
        info!(
            event = %Event::AppendComplete,
            entity = entity_id,
            batch = %batch.batch_id,
            sequence = sequence,
            changes = batch.changes.len(),
            bytes = live_file_bytes,
            rotation_due = rotation_due
        );

        Ok(AppendReceipt {
            entity_id: entity_id.to_string(),
            batch_id: batch.batch_id.clone(),
            sequence,
            live_file_bytes,
            rotation_due,
            rotated_before,
        })
    }

    /// Every entry of the entity, oldest first: rotated files in rotation
    /// order, then the live file. Archived entries are not included.
    pub async fn load(&self, entity_id: &str) -> StorageResult<Vec<ChangeLogEntry>> {
        check_entity_id(entity_id)?;
        let lock = self.lock_for(entity_id);
        let _guard = lock.read().await;
        let deadline = self.retry.deadline();

        let mut entries = Vec::new();
        for (_, path) in self.rotated_files(entity_id, deadline).await? {
            if let Some(file) = self.read_file(entity_id, deadline, &path).await? {
                entries.extend(checked_entries(&path, file));
            }
        }
        let live_path = self.layout.live_file(entity_id);
        if let Some(file) = self.read_file(entity_id, deadline, &live_path).await? {
            entries.extend(checked_entries(&live_path, file));
        }
        Ok(entries)
    }

    /// Entries moved to the archive by cleanup, oldest first
    pub async fn load_archived(&self, entity_id: &str) -> StorageResult<Vec<ChangeLogEntry>> {
        check_entity_id(entity_id)?;
        let lock = self.lock_for(entity_id);
        let _guard = lock.read().await;
        let deadline = self.retry.deadline();

        let mut entries = Vec::new();
        for path in self.archive_files(entity_id, deadline).await? {
            if let Some(file) = self.read_file(entity_id, deadline, &path).await? {
                entries.extend(checked_entries(&path, file));
            }
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.sequence.cmp(&b.sequence)));
        Ok(entries)
    }

    /// The most recently persisted entry, wherever it lives
    pub async fn last_entry(&self, entity_id: &str) -> StorageResult<Option<ChangeLogEntry>> {
        check_entity_id(entity_id)?;
        let lock = self.lock_for(entity_id);
        let _guard = lock.read().await;
        let deadline = self.retry.deadline();
        let live = self.live_or_new(entity_id, deadline).await?;
        self.last_entry_locked(entity_id, deadline, &live).await
    }

    /// Entities with a directory under the storage root, sorted
    pub async fn list_entities(&self) -> StorageResult<Vec<String>> {
        let root = self.layout.root();
        let mut reader = match fs::read_dir(root).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(format!("failed to list {}", root.display()), e)),
        };
        let mut entities = Vec::new();
        while let Some(item) = reader
            .next_entry()
            .await
            .map_err(|e| StorageError::io(format!("failed to list {}", root.display()), e))?
        {
            let is_dir = item.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if let Some(name) = item.file_name().to_str() {
                if is_dir && is_valid_entity_id(name) {
                    entities.push(name.to_string());
                }
            }
        }
        entities.sort();
        Ok(entities)
    }

    /// Bytes used by the entity's directory, including rotated and archived
    /// files. Also recorded against the entity's health.
    pub async fn disk_usage(&self, entity_id: &str) -> StorageResult<u64> {
        check_entity_id(entity_id)?;
        self.disk_usage_until(entity_id, self.retry.deadline()).await
    }

    async fn disk_usage_until(&self, entity_id: &str, deadline: Instant) -> StorageResult<u64> {
        let dir = self.layout.entity_dir(entity_id);
        let dir: &Path = &dir;
        let total = self
            .retry
            .run_until(deadline, entity_id, "disk_usage", || dir_size(dir))
            .await?;
        self.health.set_disk_usage(entity_id, total);
        Ok(total)
    }

    /// Moves the live file into `rotated/` and starts an empty one.
    pub async fn rotate(&self, entity_id: &str) -> StorageResult<RotationOutcome> {
        check_entity_id(entity_id)?;
        let lock = self.lock_for(entity_id);
        let _guard = lock.write().await;
        self.rotate_locked(entity_id, self.retry.deadline()).await
    }

    /// Rotates only if the live file has reached the threshold.
    pub async fn rotate_if_due(&self, entity_id: &str) -> StorageResult<Option<RotationOutcome>> {
        check_entity_id(entity_id)?;
        let lock = self.lock_for(entity_id);
        let _guard = lock.write().await;
        let deadline = self.retry.deadline();
        let size = self
            .size_of(entity_id, deadline, &self.layout.live_file(entity_id))
            .await?;
        if !is_due(size, self.options.rotation_size_threshold) {
            return Ok(None);
        }
        self.rotate_locked(entity_id, deadline).await.map(Some)
    }

    async fn rotate_locked(&self, entity_id: &str, deadline: Instant) -> StorageResult<RotationOutcome> {
        let live_path = self.layout.live_file(entity_id);
        let rotated = self.rotated_files(entity_id, deadline).await?;
        let live = match self.read_file(entity_id, deadline, &live_path).await? {
            Some(live) if !live.is_empty() => live,
            Some(live) => return Ok(RotationOutcome::skipped(entity_id, live.metadata.rotation_count)),
            None => return Ok(RotationOutcome::skipped(entity_id, max_rotation(&rotated))),
        };

        let rotation = live.metadata.rotation_count.max(max_rotation(&rotated)) + 1;
        let target = self.layout.rotated_file(entity_id, Utc::now(), rotation);
        self.retry
            .run_until(deadline, entity_id, "rotate", || move_file(&live_path, &target))
            .await?;

        let fresh = LogFile::new(entity_id, rotation);
        self.write_file(entity_id, deadline, &live_path, &fresh).await?;

        self.health.record_rotation(entity_id);
        info!(
            event = %Event::RotationComplete,
            entity = entity_id,
            rotation = rotation,
            entries = live.entries.len(),
            file = %target.display()
        );
        Ok(RotationOutcome {
            entity_id: entity_id.to_string(),
            rotated_file: Some(target),
            entries_moved: live.entries.len(),
            rotation_count: rotation,
        })
    }

    /// Applies the retention policy as of now.
    pub async fn cleanup(&self, entity_id: &str, policy: &RetentionPolicy) -> StorageResult<CleanupResult> {
        self.cleanup_at(entity_id, policy, Utc::now()).await
    }

    /// Applies the retention policy as of `now`.
    ///
    /// Expired entries are written to the archive (or dropped) before their
    /// source file is rewritten, so an interruption can duplicate entries
    /// but never lose them. Unparsable files are skipped and reported.
    pub async fn cleanup_at(
        &self,
        entity_id: &str,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> StorageResult<CleanupResult> {
        check_entity_id(entity_id)?;
        let lock = self.lock_for(entity_id);
        let result = {
            let _guard = lock.write().await;
            self.cleanup_locked(entity_id, policy, now, self.retry.deadline())
                .await
        };
        drop(lock);

        if matches!(&result, Ok(cleanup) if cleanup.removed_entity_dir) {
            self.prune_lock(entity_id);
        }
        result
    }

    async fn cleanup_locked(
        &self,
        entity_id: &str,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
        deadline: Instant,
    ) -> StorageResult<CleanupResult> {
        let cutoff = policy.cutoff(now);
        let mut result = CleanupResult::new(entity_id, policy.action, cutoff);
        let live_path = self.layout.live_file(entity_id);

        let mut sources: Vec<PathBuf> = self
            .rotated_files(entity_id, deadline)
            .await?
            .into_iter()
            .map(|(_, path)| path)
            .collect();
        sources.push(live_path.clone());

        for path in sources {
            let mut file = match self.read_file(entity_id, deadline, &path).await {
                Ok(Some(file)) => file,
                Ok(None) => continue,
                Err(StorageError::Corrupted { reason, .. }) => {
                    warn!(
                        event = %Event::CorruptionDetected,
                        entity = entity_id,
                        file = %path.display(),
                        reason = %reason
                    );
                    result.corrupted_files.push(path);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let (expired, kept) = policy.partition(std::mem::take(&mut file.entries), cutoff);
            result.entries_retained += kept.len();
            if expired.is_empty() {
                continue;
            }

            match policy.action {
                RetentionAction::Archive => {
                    let count = expired.len();
                    let archive = LogFile::with_entries(entity_id, file.metadata.rotation_count, expired);
                    let target = self.unique_archive_path(entity_id, deadline, now, &path).await?;
                    self.write_file(entity_id, deadline, &target, &archive).await?;
                    result.entries_archived += count;
                    result.archive_files.push(target);
                }
                RetentionAction::Delete => result.entries_deleted += expired.len(),
            }

            if kept.is_empty() && path != live_path {
                self.remove_file(entity_id, deadline, &path).await?;
                result.files_removed.push(path);
            } else {
                file.entries = kept;
                file.seal();
                self.write_file(entity_id, deadline, &path, &file).await?;
                result.files_rewritten.push(path);
            }
        }

        result.removed_entity_dir = self.remove_empty_dirs(entity_id, deadline).await?;
        if !result.removed_entity_dir {
            self.disk_usage_until(entity_id, deadline).await?;
        }

        info!(
            event = %Event::CleanupComplete,
            entity = entity_id,
            action = %policy.action,
            archived = result.entries_archived,
            deleted = result.entries_deleted,
            retained = result.entries_retained,
            corrupted = result.corrupted_files.len()
        );
        Ok(result)
    }

    /// Checks every file of the entity and repairs metadata-only
    /// inconsistencies. Corrupted files are reported, never deleted.
    pub async fn validate(&self, entity_id: &str) -> StorageResult<ValidationResult> {
        check_entity_id(entity_id)?;
        let lock = self.lock_for(entity_id);
        let _guard = lock.write().await;
        let deadline = self.retry.deadline();

        let mut result = ValidationResult::new(entity_id);
        result.removed_temp_files = self.remove_temp_files(entity_id, deadline).await?;

        let rotated = self.rotated_files(entity_id, deadline).await?;
        let highest_rotation = max_rotation(&rotated);
        let mut chain: Vec<(PathBuf, Option<u32>)> =
            rotated.into_iter().map(|(_, path)| (path, None)).collect();
        chain.push((self.layout.live_file(entity_id), Some(highest_rotation)));

        let mut last: Option<(u64, DateTime<Utc>)> = None;
        for (path, min_rotation) in chain {
            if let Some(tail) = self
                .validate_file(entity_id, deadline, &path, min_rotation, &mut result)
                .await?
            {
                if let (Some((seq, ts)), Some((first_seq, first_ts))) = (last, tail.first) {
                    if first_seq <= seq {
                        result.issues.push(format!(
                            "{}: sequence {} does not follow {}",
                            path.display(),
                            first_seq,
                            seq
                        ));
                    }
                    if first_ts < ts {
                        result
                            .issues
                            .push(format!("{}: first entry predates the previous file", path.display()));
                    }
                }
                last = tail.last.or(last);
            }
        }
        for path in self.archive_files(entity_id, deadline).await? {
            self.validate_file(entity_id, deadline, &path, None, &mut result)
                .await?;
        }

        let summary = result.summary();
        self.health.record_validation(entity_id, summary.clone());
        self.health.record_repairs(entity_id, result.repairs.len() as u64);
        if result.corrupted.is_empty() {
            info!(
                event = %Event::ValidationComplete,
                entity = entity_id,
                files = summary.files_checked,
                repaired = summary.repaired_files,
                issues = summary.issues
            );
        } else {
            error!(
                event = %Event::ValidationComplete,
                entity = entity_id,
                files = summary.files_checked,
                corrupted = summary.corrupted_files,
                repaired = summary.repaired_files,
                issues = summary.issues
            );
        }
        Ok(result)
    }

    async fn validate_file(
        &self,
        entity_id: &str,
        deadline: Instant,
        path: &Path,
        min_rotation: Option<u32>,
        result: &mut ValidationResult,
    ) -> StorageResult<Option<FileSpan>> {
        let mut file = match self.read_file(entity_id, deadline, path).await {
            Ok(Some(file)) => file,
            Ok(None) => return Ok(None),
            Err(StorageError::Corrupted { reason, .. }) => {
                result.files_checked += 1;
                error!(
                    event = %Event::CorruptionDetected,
                    entity = entity_id,
                    file = %path.display(),
                    reason = %reason
                );
                result.corrupted.push(CorruptedFile {
                    path: path.to_path_buf(),
                    reason,
                });
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        result.files_checked += 1;

        let inspection = inspect(&mut file, entity_id, min_rotation);
        for reason in inspection.corruption {
            error!(
                event = %Event::CorruptionDetected,
                entity = entity_id,
                file = %path.display(),
                reason = %reason
            );
            result.corrupted.push(CorruptedFile {
                path: path.to_path_buf(),
                reason,
            });
        }
        result
            .issues
            .extend(inspection.issues.into_iter().map(|i| format!("{}: {}", path.display(), i)));

        if !inspection.repairs.is_empty() {
            self.write_file(entity_id, deadline, path, &file).await?;
            for description in inspection.repairs {
                info!(
                    event = %Event::MetadataRepaired,
                    entity = entity_id,
                    file = %path.display(),
                    repair = %description
                );
                result.repairs.push(Repair {
                    path: path.to_path_buf(),
                    description,
                });
            }
        }

        Ok(Some(FileSpan {
            first: file.entries.first().map(|e| (e.sequence, e.timestamp)),
            last: file.entries.last().map(|e| (e.sequence, e.timestamp)),
        }))
    }

    async fn read_file(&self, entity_id: &str, deadline: Instant, path: &Path) -> StorageResult<Option<LogFile>> {
        Ok(self
            .retry
            .run_until(deadline, entity_id, "read", || read_log_file(path))
            .await?)
    }

    async fn write_file(&self, entity_id: &str, deadline: Instant, path: &Path, file: &LogFile) -> StorageResult<u64> {
        Ok(self
            .retry
            .run_until(deadline, entity_id, "write", || async move {
                let bytes = file.to_bytes(path)?;
                write_atomic(path, &bytes).await?;
                Ok::<_, StorageError>(bytes.len() as u64)
            })
            .await?)
    }

    async fn remove_file(&self, entity_id: &str, deadline: Instant, path: &Path) -> StorageResult<()> {
        self.retry
            .run_until(deadline, entity_id, "remove", || async move {
                match fs::remove_file(path).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(StorageError::io(format!("failed to remove {}", path.display()), e)),
                }
            })
            .await?;
        Ok(())
    }

    async fn remove_dir(&self, entity_id: &str, deadline: Instant, dir: &Path) -> StorageResult<()> {
        self.retry
            .run_until(deadline, entity_id, "remove", || async move {
                match fs::remove_dir(dir).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(StorageError::io(format!("failed to remove {}", dir.display()), e)),
                }
            })
            .await?;
        Ok(())
    }

    async fn size_of(&self, entity_id: &str, deadline: Instant, path: &Path) -> StorageResult<u64> {
        Ok(self
            .retry
            .run_until(deadline, entity_id, "stat", || file_size(path))
            .await?)
    }

    async fn exists(&self, entity_id: &str, deadline: Instant, path: &Path) -> StorageResult<bool> {
        Ok(self
            .retry
            .run_until(deadline, entity_id, "stat", || async move {
                fs::try_exists(path)
                    .await
                    .map_err(|e| StorageError::io(format!("failed to stat {}", path.display()), e))
            })
            .await?)
    }

    async fn list(&self, entity_id: &str, deadline: Instant, dir: &Path) -> StorageResult<Vec<PathBuf>> {
        Ok(self
            .retry
            .run_until(deadline, entity_id, "list", || list_dir(dir))
            .await?)
    }

    async fn rotated_files(&self, entity_id: &str, deadline: Instant) -> StorageResult<Vec<(u32, PathBuf)>> {
        let dir = self.layout.rotated_dir(entity_id);
        let dir: &Path = &dir;
        Ok(self
            .retry
            .run_until(deadline, entity_id, "list", || list_rotated(dir))
            .await?)
    }

    async fn archive_files(&self, entity_id: &str, deadline: Instant) -> StorageResult<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = self
            .list(entity_id, deadline, &self.layout.archive_dir(entity_id))
            .await?
            .into_iter()
            .filter(|p| is_json_file(p))
            .collect();
        files.sort();
        Ok(files)
    }

    /// The live file, or an empty one continuing the rotation count
    async fn live_or_new(&self, entity_id: &str, deadline: Instant) -> StorageResult<LogFile> {
        match self
            .read_file(entity_id, deadline, &self.layout.live_file(entity_id))
            .await?
        {
            Some(live) => Ok(live),
            None => {
                let rotated = self.rotated_files(entity_id, deadline).await?;
                Ok(LogFile::new(entity_id, max_rotation(&rotated)))
            }
        }
    }

    async fn last_entry_locked(
        &self,
        entity_id: &str,
        deadline: Instant,
        live: &LogFile,
    ) -> StorageResult<Option<ChangeLogEntry>> {
        if let Some(entry) = live.last_entry() {
            return Ok(Some(entry.clone()));
        }
        for (_, path) in self.rotated_files(entity_id, deadline).await?.into_iter().rev() {
            if let Some(file) = self.read_file(entity_id, deadline, &path).await? {
                if let Some(entry) = file.entries.last() {
                    return Ok(Some(entry.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn unique_archive_path(
        &self,
        entity_id: &str,
        deadline: Instant,
        now: DateTime<Utc>,
        source: &Path,
    ) -> StorageResult<PathBuf> {
        let base = self.layout.archive_file(entity_id, now, source);
        let mut candidate = base.clone();
        let mut n = 2;
        while self.exists(entity_id, deadline, &candidate).await? {
            let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("archived");
            candidate = base.with_file_name(format!("{}_{}.json", stem, n));
            n += 1;
        }
        Ok(candidate)
    }

    async fn remove_temp_files(&self, entity_id: &str, deadline: Instant) -> StorageResult<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for dir in [
            self.layout.entity_dir(entity_id),
            self.layout.rotated_dir(entity_id),
            self.layout.archive_dir(entity_id),
        ] {
            for path in self.list(entity_id, deadline, &dir).await? {
                if is_tmp_file(&path) {
                    self.remove_file(entity_id, deadline, &path).await?;
                    debug!(entity = entity_id, removed = %path.display(), "removed stray temp file");
                    removed.push(path);
                }
            }
        }
        Ok(removed)
    }

    /// Removes an empty `rotated/` directory and, when nothing with entries
    /// is left, the entity directory itself. Returns true if the entity
    /// directory went away.
    async fn remove_empty_dirs(&self, entity_id: &str, deadline: Instant) -> StorageResult<bool> {
        let rotated_dir = self.layout.rotated_dir(entity_id);
        if self.exists(entity_id, deadline, &rotated_dir).await?
            && self.list(entity_id, deadline, &rotated_dir).await?.is_empty()
        {
            self.remove_dir(entity_id, deadline, &rotated_dir).await?;
        }

        let entity_dir = self.layout.entity_dir(entity_id);
        if !self.exists(entity_id, deadline, &entity_dir).await? {
            return Ok(false);
        }
        let live_path = self.layout.live_file(entity_id);
        let live: &Path = &live_path;
        let live_empty = self
            .retry
            .run_until(deadline, entity_id, "read", || async move {
                match read_log_file(live).await {
                    Ok(Some(file)) => Ok(file.is_empty()),
                    Ok(None) => Ok(true),
                    // Kept on disk; already reported by the cleanup pass
                    Err(StorageError::Corrupted { .. }) => Ok(false),
                    Err(e) => Err(e),
                }
            })
            .await?;
        let remaining = self
            .list(entity_id, deadline, &entity_dir)
            .await?
            .into_iter()
            .filter(|p| p != &live_path)
            .count();
        if !live_empty || remaining > 0 {
            return Ok(false);
        }

        self.remove_file(entity_id, deadline, &live_path).await?;
        self.remove_dir(entity_id, deadline, &entity_dir).await?;
        debug!(event = %Event::CleanupComplete, entity = entity_id, removed = %entity_dir.display());
        Ok(true)
    }

    fn rejected(&self, entity_id: &str, err: StorageError) -> StorageError {
        warn!(
            event = %Event::AppendRejected,
            entity = entity_id,
            code = err.code(),
            error = %err
        );
        err
    }
}

struct FileSpan {
    first: Option<(u64, DateTime<Utc>)>,
    last: Option<(u64, DateTime<Utc>)>,
}

fn check_entity_id(entity_id: &str) -> StorageResult<()> {
    if is_valid_entity_id(entity_id) {
        Ok(())
    } else {
        Err(StorageError::InvalidEntityId(entity_id.to_string()))
    }
}

/// Entries of a loaded file; checksum failures are logged, not dropped.
fn checked_entries(path: &Path, file: LogFile) -> Vec<ChangeLogEntry> {
    for entry in &file.entries {
        if !entry.verify_checksum() {
            warn!(
                event = %Event::CorruptionDetected,
                entity = %entry.entity_id,
                file = %path.display(),
                sequence = entry.sequence
            );
        }
    }
    file.entries
}

async fn list_dir(dir: &Path) -> StorageResult<Vec<PathBuf>> {
    let mut reader = match fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(format!("failed to list {}", dir.display()), e)),
    };
    let mut paths = Vec::new();
    while let Some(item) = reader
        .next_entry()
        .await
        .map_err(|e| StorageError::io(format!("failed to list {}", dir.display()), e))?
    {
        paths.push(item.path());
    }
    Ok(paths)
}

/// Total size of the files under `root`, 0 if it does not exist
async fn dir_size(root: &Path) -> StorageResult<u64> {
    let mut total = 0u64;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for path in list_dir(&dir).await? {
            let meta = fs::metadata(&path)
                .await
                .map_err(|e| StorageError::io(format!("failed to stat {}", path.display()), e))?;
            if meta.is_dir() {
                pending.push(path);
            } else {
                total += meta.len();
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    use crate::model::{AttributedChange, CausationLink, CauseType, ChangeBatch, ChangeCategory, DetectionContext, FieldChange, Priority};
    use crate::observability::HealthStatus;

    fn store(dir: &TempDir, threshold: u64) -> ChangeLogStore {
        ChangeLogStore::new(
            StorageLayout::new(dir.path()),
            StoreOptions {
                rotation_size_threshold: threshold,
                auto_rotate: false,
            },
            RetryPolicy::no_retry(),
            Arc::new(HealthRegistry::new()),
        )
    }

    fn batch(id: &str, at: DateTime<Utc>) -> AnnotatedBatch {
        AnnotatedBatch::unannotated(ChangeBatch::new(id, "42", DetectionContext::new("a", "b", at)))
    }

    /// A batch whose single change is caused by a change in `cause_batch`
    fn caused_by(id: &str, at: DateTime<Utc>, cause_batch: &str) -> AnnotatedBatch {
        let mut batch = batch(id, at);
        let change_id = format!("{}-0001", id);
        let mut change = AttributedChange::unattributed(FieldChange {
            id: change_id.clone(),
            entity_id: "42".into(),
            category: ChangeCategory::Spellcasting,
            field_path: "spellcasting.spells.Fireball".into(),
            old_value: None,
            new_value: Some(serde_json::json!("Fireball")),
            priority: Priority::Medium,
            description: "learned Fireball".into(),
            detected_at: at,
        });
        change.caused_by = Some(CausationLink {
            cause_change_id: format!("{}-0001", cause_batch),
            effect_change_id: change_id,
            cause_type: CauseType::LevelProgression,
            cause_name: "Wizard 5".into(),
            confidence: 0.73,
            cascade_depth: 0,
            cause_batch_id: Some(cause_batch.to_string()),
        });
        batch.changes.push(change);
        batch
    }

    #[tokio::test]
    async fn test_append_assigns_sequences() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, DEFAULT_ROTATION_SIZE_THRESHOLD);
        let now = Utc::now();

        let first = store.append("42", &batch("b1", now - Duration::minutes(2))).await.unwrap();
        let second = store.append("42", &batch("b2", now)).await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert!(!second.rotation_due);

        let entries = store.load("42").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.verify_checksum()));
        assert_eq!(store.health().check("42").writes, 2);
    }

    #[tokio::test]
    async fn test_rejects_out_of_order_and_duplicates() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, DEFAULT_ROTATION_SIZE_THRESHOLD);
        let now = Utc::now();
        store.append("42", &batch("b1", now)).await.unwrap();

        let err = store
            .append("42", &batch("b0", now - Duration::hours(1)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CAUSELOG_STORAGE_OUT_OF_ORDER");

        let err = store.append("42", &batch("b1", now)).await.unwrap_err();
        assert_eq!(err.code(), "CAUSELOG_STORAGE_DUPLICATE_BATCH");

        assert_eq!(store.load("42").await.unwrap().len(), 1);
        assert_eq!(store.health().check("42").consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_rejects_foreign_batch_and_bad_ids() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, DEFAULT_ROTATION_SIZE_THRESHOLD);
        let err = store.append("7", &batch("b1", Utc::now())).await.unwrap_err();
        assert!(matches!(err, StorageError::EntityMismatch { .. }));
        let err = store.load("../etc").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidEntityId(_)));
    }

    #[tokio::test]
    async fn test_sequence_continues_across_rotation() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, DEFAULT_ROTATION_SIZE_THRESHOLD);
        let now = Utc::now();
        store.append("42", &batch("b1", now - Duration::minutes(1))).await.unwrap();
        let outcome = store.rotate("42").await.unwrap();
        assert!(outcome.rotated());
        assert_eq!(outcome.rotation_count, 1);

        let receipt = store.append("42", &batch("b2", now)).await.unwrap();
        assert_eq!(receipt.sequence, 2);
        let last = store.last_entry("42").await.unwrap().unwrap();
        assert_eq!(last.batch_id, "b2");
        assert_eq!(last.storage.rotation_count, 1);

        let err = store.append("42", &batch("b2", now)).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateBatch { .. }));
    }

    #[tokio::test]
    async fn test_rotating_empty_log_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, DEFAULT_ROTATION_SIZE_THRESHOLD);
        let outcome = store.rotate("42").await.unwrap();
        assert!(!outcome.rotated());
        assert!(store.rotate_if_due("42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_entities_and_disk_usage() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, DEFAULT_ROTATION_SIZE_THRESHOLD);
        assert!(store.list_entities().await.unwrap().is_empty());
        store.append("42", &batch("b1", Utc::now())).await.unwrap();
        std::fs::create_dir_all(dir.path().join("not valid")).unwrap();

        assert_eq!(store.list_entities().await.unwrap(), vec!["42".to_string()]);
        let usage = store.disk_usage("42").await.unwrap();
        assert!(usage > 0);
        assert_eq!(store.health().check("42").disk_usage_bytes, usage);
    }

    /// A failure outside the read/write steps still counts against health.
    #[tokio::test]
    async fn test_stat_failure_is_recorded() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("42"), b"not a directory").unwrap();
        let store = ChangeLogStore::new(
            StorageLayout::new(dir.path()),
            StoreOptions::default(),
            RetryPolicy::no_retry(),
            Arc::new(HealthRegistry::new()),
        );

        let err = store.append("42", &batch("b1", Utc::now())).await.unwrap_err();
        assert!(!err.is_rejection());
        let health = store.health().check("42");
        assert_eq!(health.write_failures, 1);
        assert_eq!(health.status, HealthStatus::Degraded);

        assert!(store.disk_usage("42").await.is_err());
        assert_eq!(store.health().check("42").consecutive_failures, 2);
    }

    /// An operation whose deadline has passed fails before touching disk.
    #[tokio::test]
    async fn test_operation_deadline() {
        let dir = TempDir::new().unwrap();
        let store = ChangeLogStore::new(
            StorageLayout::new(dir.path()),
            StoreOptions::default(),
            RetryPolicy {
                overall_timeout_ms: 0,
                ..RetryPolicy::no_retry()
            },
            Arc::new(HealthRegistry::new()),
        );

        let err = store.append("42", &batch("b1", Utc::now())).await.unwrap_err();
        assert_eq!(err.code(), "CAUSELOG_STORAGE_TIMEOUT");
        assert!(!store.layout().entity_dir("42").exists());
        assert_eq!(store.health().check("42").write_failures, 1);
    }

    #[tokio::test]
    async fn test_cross_cycle_link_must_name_preceding_batch() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, DEFAULT_ROTATION_SIZE_THRESHOLD);
        let now = Utc::now();

        let err = store
            .append("42", &caused_by("b0", now - Duration::hours(3), "gone"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::StaleCause { preceding: None, .. }));

        store.append("42", &batch("b1", now - Duration::hours(2))).await.unwrap();
        store.append("42", &batch("b2", now - Duration::hours(1))).await.unwrap();

        // Analyzed against b1, but b2 landed first
        let err = store.append("42", &caused_by("b3", now, "b1")).await.unwrap_err();
        match err {
            StorageError::StaleCause {
                cause_batch_id,
                preceding,
                ..
            } => {
                assert_eq!(cause_batch_id, "b1");
                assert_eq!(preceding.as_deref(), Some("b2"));
            }
            other => panic!("unexpected: {}", other),
        }
        assert_eq!(store.load("42").await.unwrap().len(), 2);

        let receipt = store.append("42", &caused_by("b3", now, "b2")).await.unwrap();
        assert_eq!(receipt.sequence, 3);
    }

    #[tokio::test]
    async fn test_lock_forgotten_after_entity_removed() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, DEFAULT_ROTATION_SIZE_THRESHOLD);
        let now = Utc::now();
        store.append("42", &batch("b1", now - Duration::days(10))).await.unwrap();
        assert_eq!(store.locks.lock().unwrap().len(), 1);

        let keep = RetentionPolicy::new(30, RetentionAction::Delete);
        let result = store.cleanup_at("42", &keep, now).await.unwrap();
        assert!(!result.removed_entity_dir);
        assert_eq!(store.locks.lock().unwrap().len(), 1);

        let drop_all = RetentionPolicy::new(1, RetentionAction::Delete);
        let result = store.cleanup_at("42", &drop_all, now).await.unwrap();
        assert!(result.removed_entity_dir);
        assert!(store.locks.lock().unwrap().is_empty());

        // A later append starts over with a fresh lock
        store.append("42", &batch("b2", now)).await.unwrap();
        assert_eq!(store.locks.lock().unwrap().len(), 1);
    }
}
