//! CLI error types
//!
//! Subsystem errors keep their own codes; CLI-only failures use
//! CAUSELOG_CLI_*.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::changelog::StorageError;
use crate::config::ConfigError;
use crate::query::QueryError;
use crate::tracker::TrackerError;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read snapshot {path}: {source}")]
    SnapshotRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid snapshot {path}: {reason}")]
    SnapshotParse { path: PathBuf, reason: String },

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("output error: {0}")]
    Output(String),
}

impl CliError {
    pub fn code(&self) -> &'static str {
        match self {
            CliError::Config(e) => e.code(),
            CliError::SnapshotRead { .. } => "CAUSELOG_CLI_SNAPSHOT_READ",
            CliError::SnapshotParse { .. } => "CAUSELOG_CLI_SNAPSHOT_PARSE",
            CliError::Tracker(e) => e.code(),
            CliError::Query(e) => e.code(),
            CliError::Storage(e) => e.code(),
            CliError::Output(_) => "CAUSELOG_CLI_OUTPUT",
        }
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        CliError::Output(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Output(format!("JSON error: {}", e))
    }
}
