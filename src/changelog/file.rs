//! Log file format and atomic file I/O

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::checksum::{checksum_json, format_checksum};
use super::errors::{StorageError, StorageResult};
use super::layout::tmp_path;
use crate::model::ChangeLogEntry;

pub const FORMAT_VERSION: u32 = 1;

/// File-level metadata, repairable by validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMetadata {
    pub entry_count: usize,
    /// Rotations the entity had gone through when this file was started
    pub rotation_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// CRC32 over the entries (format: "crc32:xxxxxxxx")
    pub checksum: String,
}

/// One persisted log file (live, rotated or archived)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFile {
    pub format_version: u32,
    pub entity_id: String,
    pub metadata: LogMetadata,
    pub entries: Vec<ChangeLogEntry>,
}

impl LogFile {
    pub fn new(entity_id: impl Into<String>, rotation_count: u32) -> Self {
        let now = Utc::now();
        let mut file = Self {
            format_version: FORMAT_VERSION,
            entity_id: entity_id.into(),
            metadata: LogMetadata {
                entry_count: 0,
                rotation_count,
                created_at: now,
                updated_at: now,
                checksum: String::new(),
            },
            entries: Vec::new(),
        };
        file.metadata.checksum = file.compute_checksum();
        file
    }

    pub fn with_entries(entity_id: impl Into<String>, rotation_count: u32, entries: Vec<ChangeLogEntry>) -> Self {
        let mut file = Self::new(entity_id, rotation_count);
        file.entries = entries;
        file.seal();
        file
    }

    pub fn compute_checksum(&self) -> String {
        format_checksum(checksum_json(&self.entries))
    }

    /// Recomputes the derived metadata after the entries changed.
    pub fn seal(&mut self) {
        self.metadata.entry_count = self.entries.len();
        self.metadata.checksum = self.compute_checksum();
        self.metadata.updated_at = Utc::now();
    }

    pub fn push(&mut self, entry: ChangeLogEntry) {
        self.entries.push(entry);
        self.seal();
    }

    pub fn last_entry(&self) -> Option<&ChangeLogEntry> {
        self.entries.last()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_bytes(&self, path: &Path) -> StorageResult<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| StorageError::Serialization {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn from_bytes(path: &Path, bytes: &[u8]) -> StorageResult<Self> {
        let file: LogFile =
            serde_json::from_slice(bytes).map_err(|e| StorageError::corrupted(path, e.to_string()))?;
        if file.format_version != FORMAT_VERSION {
            return Err(StorageError::corrupted(
                path,
                format!("unsupported format version {}", file.format_version),
            ));
        }
        Ok(file)
    }
}

/// Reads a log file; `Ok(None)` if it does not exist.
pub async fn read_log_file(path: &Path) -> StorageResult<Option<LogFile>> {
    match fs::read(path).await {
        Ok(bytes) => LogFile::from_bytes(path, &bytes).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(format!("failed to read {}", path.display()), e)),
    }
}

/// Writes `bytes` to `path` so that readers see either the old or the new
/// content: write a temporary sibling, fsync it, rename it over the target,
/// then fsync the directory.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(format!("failed to create {}", parent.display()), e))?;
    }

    let tmp = tmp_path(path);
    let mut file = fs::File::create(&tmp)
        .await
        .map_err(|e| StorageError::io(format!("failed to create {}", tmp.display()), e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| StorageError::io(format!("failed to write {}", tmp.display()), e))?;
    file.sync_all()
        .await
        .map_err(|e| StorageError::io(format!("failed to fsync {}", tmp.display()), e))?;
    drop(file);

    fs::rename(&tmp, path).await.map_err(|e| {
        StorageError::io(
            format!("failed to rename {} to {}", tmp.display(), path.display()),
            e,
        )
    })?;

    if let Some(parent) = path.parent() {
        sync_dir(parent).await?;
    }
    Ok(())
}

/// Moves a whole file, then makes both directories durable.
pub async fn move_file(from: &Path, to: &Path) -> StorageResult<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(format!("failed to create {}", parent.display()), e))?;
    }
    fs::rename(from, to).await.map_err(|e| {
        StorageError::io(
            format!("failed to move {} to {}", from.display(), to.display()),
            e,
        )
    })?;
    for dir in [from.parent(), to.parent()].into_iter().flatten() {
        sync_dir(dir).await?;
    }
    Ok(())
}

pub async fn sync_dir(dir: &Path) -> StorageResult<()> {
    let handle = fs::File::open(dir)
        .await
        .map_err(|e| StorageError::io(format!("failed to open {} for fsync", dir.display()), e))?;
    handle
        .sync_all()
        .await
        .map_err(|e| StorageError::io(format!("failed to fsync {}", dir.display()), e))
}

/// Size of a file, 0 if it does not exist
pub async fn file_size(path: &Path) -> StorageResult<u64> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(StorageError::io(format!("failed to stat {}", path.display()), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_file_is_sealed() {
        let file = LogFile::new("42", 2);
        assert_eq!(file.metadata.entry_count, 0);
        assert_eq!(file.metadata.rotation_count, 2);
        assert_eq!(file.metadata.checksum, file.compute_checksum());
    }

    #[test]
    fn test_rejects_unknown_format_version() {
        let mut file = LogFile::new("42", 0);
        file.format_version = 9;
        let bytes = serde_json::to_vec(&file).unwrap();
        let err = LogFile::from_bytes(Path::new("x.json"), &bytes).unwrap_err();
        assert!(matches!(err, StorageError::Corrupted { .. }));
    }

    #[tokio::test]
    async fn test_atomic_write_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("42").join("changelog.json");
        let file = LogFile::new("42", 0);

        write_atomic(&path, &file.to_bytes(&path).unwrap()).await.unwrap();
        assert!(!tmp_path(&path).exists());
        let loaded = read_log_file(&path).await.unwrap().unwrap();
        assert_eq!(loaded, file);
    }

    #[tokio::test]
    async fn test_missing_file_reads_as_none() {
        let dir = TempDir::new().unwrap();
        assert!(read_log_file(&dir.path().join("none.json")).await.unwrap().is_none());
        assert_eq!(file_size(&dir.path().join("none.json")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unparsable_file_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("changelog.json");
        std::fs::write(&path, b"{\"formatVersion\": 1, \"entit").unwrap();
        let err = read_log_file(&path).await.unwrap_err();
        assert_eq!(err.code(), "CAUSELOG_DATA_CORRUPTION");
    }
}
