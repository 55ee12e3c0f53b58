//! Size-based rotation
//!
//! A rotation moves the live file whole into `rotated/` under a name
//! carrying the rotation timestamp and number, then starts an empty live
//! file with the new rotation count. Entries are never rewritten, so the
//! total entry count across live and rotated files is unchanged.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;

use super::errors::{StorageError, StorageResult};
use super::layout::parse_rotated_file_name;

/// Result of a rotation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationOutcome {
    pub entity_id: String,
    /// Where the live file went; `None` if there was nothing to rotate
    pub rotated_file: Option<PathBuf>,
    pub entries_moved: usize,
    /// Rotation count of the live file afterwards
    pub rotation_count: u32,
}

impl RotationOutcome {
    pub fn skipped(entity_id: &str, rotation_count: u32) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            rotated_file: None,
            entries_moved: 0,
            rotation_count,
        }
    }

    pub fn rotated(&self) -> bool {
        self.rotated_file.is_some()
    }
}

/// Rotation is due once the live file reaches the threshold.
pub fn is_due(live_file_bytes: u64, threshold: u64) -> bool {
    threshold > 0 && live_file_bytes >= threshold
}

/// Rotated files ordered by rotation number (oldest first).
///
/// Files whose names do not follow the rotated naming scheme are ignored.
pub async fn list_rotated(dir: &Path) -> StorageResult<Vec<(u32, PathBuf)>> {
    let mut reader = match fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(format!("failed to list {}", dir.display()), e)),
    };

    let mut files = Vec::new();
    while let Some(item) = reader
        .next_entry()
        .await
        .map_err(|e| StorageError::io(format!("failed to list {}", dir.display()), e))?
    {
        let path = item.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some((_, rotation)) = parse_rotated_file_name(name) {
            files.push((rotation, path));
        }
    }
    files.sort();
    Ok(files)
}

/// Highest rotation number among `files`, 0 if none
pub fn max_rotation(files: &[(u32, PathBuf)]) -> u32 {
    files.iter().map(|(n, _)| *n).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_due() {
        assert!(!is_due(10, 100));
        assert!(is_due(100, 100));
        assert!(is_due(101, 100));
        assert!(!is_due(1_000, 0));
    }

    #[tokio::test]
    async fn test_list_rotated_orders_by_rotation_number() {
        let dir = TempDir::new().unwrap();
        for name in [
            "changelog_20260102T000000Z_r0002.json",
            "changelog_20260101T000000Z_r0001.json",
            "changelog_20260103T000000Z_r0010.json",
            "notes.txt",
            "changelog_20260103T000000Z_r0011.json.tmp",
        ] {
            std::fs::write(dir.path().join(name), b"{}").unwrap();
        }
        let files = list_rotated(dir.path()).await.unwrap();
        let numbers: Vec<u32> = files.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 10]);
        assert_eq!(max_rotation(&files), 10);
    }

    #[tokio::test]
    async fn test_missing_dir_lists_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(list_rotated(&dir.path().join("rotated")).await.unwrap().is_empty());
    }
}
