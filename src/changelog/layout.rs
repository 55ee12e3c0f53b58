//! On-disk layout
//!
//! ```text
//! <root>/<entity>/changelog.json
//! <root>/<entity>/rotated/changelog_<YYYYMMDDTHHMMSSZ>_r<NNNN>.json
//! <root>/<entity>/archive/archived_<YYYYMMDDTHHMMSSZ>_<source>.json
//! ```
//!
//! The layout is stable so external tools can inspect and repair it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};

pub const LIVE_FILE: &str = "changelog.json";
pub const ROTATED_DIR: &str = "rotated";
pub const ARCHIVE_DIR: &str = "archive";
pub const TMP_SUFFIX: &str = ".tmp";

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entity_dir(&self, entity_id: &str) -> PathBuf {
        self.root.join(entity_id)
    }

    pub fn live_file(&self, entity_id: &str) -> PathBuf {
        self.entity_dir(entity_id).join(LIVE_FILE)
    }

    pub fn rotated_dir(&self, entity_id: &str) -> PathBuf {
        self.entity_dir(entity_id).join(ROTATED_DIR)
    }

    pub fn archive_dir(&self, entity_id: &str) -> PathBuf {
        self.entity_dir(entity_id).join(ARCHIVE_DIR)
    }

    pub fn rotated_file(&self, entity_id: &str, at: DateTime<Utc>, rotation: u32) -> PathBuf {
        self.rotated_dir(entity_id).join(rotated_file_name(at, rotation))
    }

    pub fn archive_file(&self, entity_id: &str, at: DateTime<Utc>, source: &Path) -> PathBuf {
        self.archive_dir(entity_id).join(archive_file_name(at, source))
    }
}

pub fn rotated_file_name(at: DateTime<Utc>, rotation: u32) -> String {
    format!("changelog_{}_r{:04}.json", at.format(TIMESTAMP_FORMAT), rotation)
}

/// Parses a rotated file name back into its timestamp and rotation number
pub fn parse_rotated_file_name(name: &str) -> Option<(DateTime<Utc>, u32)> {
    let stem = name.strip_prefix("changelog_")?.strip_suffix(".json")?;
    let (timestamp, rotation) = stem.rsplit_once("_r")?;
    let at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
    let rotation = rotation.parse().ok()?;
    Some((at.and_utc(), rotation))
}

/// `source` is the file the archived entries came from; its stem is kept
/// in the archive name.
pub fn archive_file_name(at: DateTime<Utc>, source: &Path) -> String {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("changelog");
    format!("archived_{}_{}.json", at.format(TIMESTAMP_FORMAT), stem)
}

/// Temporary sibling used for atomic replacement
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}

pub fn is_tmp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(TMP_SUFFIX))
        .unwrap_or(false)
}

pub fn is_json_file(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}
