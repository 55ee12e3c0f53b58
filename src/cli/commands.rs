//! CLI command implementations
//!
//! Each command loads the configuration, builds a [`ChangeTracker`] with a
//! fresh health registry, runs, and returns the JSON `data` payload.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::fs;

use crate::config::EngineConfig;
use crate::model::DetectionContext;
use crate::observability::HealthRegistry;
use crate::query::{QueryOptions, SortSpec, TimeRange};
use crate::snapshot::Snapshot;
use crate::tracker::ChangeTracker;

use super::args::Command;
use super::errors::{CliError, CliResult};

pub async fn run_command(command: Command) -> CliResult<Value> {
    let config = EngineConfig::load_or_default(command.config_path())?;
    let tracker = ChangeTracker::new(config, Arc::new(HealthRegistry::new()));

    match command {
        Command::Track {
            entity,
            old,
            new,
            old_ref,
            new_ref,
            ..
        } => {
            let old_snapshot = read_snapshot(&old).await?;
            let new_snapshot = read_snapshot(&new).await?;
            let context = DetectionContext::now(
                old_ref.unwrap_or_else(|| file_ref(&old)),
                new_ref.unwrap_or_else(|| file_ref(&new)),
            );
            track(&tracker, &entity, &old_snapshot, &new_snapshot, context).await
        }
        Command::Query {
            entity,
            categories,
            priorities,
            cause_type,
            cause_name,
            attributed,
            text,
            since,
            until,
            sort,
            order,
            offset,
            limit,
            include_archived,
            ..
        } => {
            let mut options = QueryOptions {
                categories,
                priorities,
                cause_type,
                cause_name,
                attributed,
                text,
                include_archived,
                sort: SortSpec {
                    field: sort,
                    direction: order,
                },
                offset,
                limit,
                ..QueryOptions::default()
            };
            options.time_range = time_range(since, until);
            let result = tracker.query_engine().query(&entity, &options).await?;
            Ok(serde_json::to_value(result)?)
        }
        Command::Report {
            entity,
            since,
            until,
            ..
        } => {
            let report = tracker
                .query_engine()
                .generate_causation_report(&entity, time_range(since, until))
                .await?;
            Ok(serde_json::to_value(report)?)
        }
        Command::Related { change, .. } => {
            let related = tracker.query_engine().find_related(&change).await?;
            Ok(serde_json::to_value(related)?)
        }
        Command::Health { entity, .. } => {
            let mut reports = Vec::new();
            for entity in entities(&tracker, entity).await? {
                tracker.store().disk_usage(&entity).await?;
                let last = tracker.store().last_entry(&entity).await?;
                reports.push(json!({
                    "health": tracker.check_health(&entity),
                    "lastSequence": last.as_ref().map(|e| e.sequence),
                    "lastTimestamp": last.as_ref().map(|e| e.timestamp),
                }));
            }
            Ok(Value::Array(reports))
        }
        Command::Maintain { entity, .. } => {
            let mut reports = Vec::new();
            for entity in entities(&tracker, entity).await? {
                reports.push(serde_json::to_value(tracker.run_maintenance(&entity).await?)?);
            }
            Ok(Value::Array(reports))
        }
        Command::Validate { entity, .. } => {
            let mut results = Vec::new();
            for entity in entities(&tracker, entity).await? {
                results.push(serde_json::to_value(tracker.store().validate(&entity).await?)?);
            }
            Ok(Value::Array(results))
        }
    }
}

pub async fn track(
    tracker: &ChangeTracker,
    entity: &str,
    old: &Snapshot,
    new: &Snapshot,
    context: DetectionContext,
) -> CliResult<Value> {
    let report = tracker.process_cycle(entity, old, new, context).await?;
    let rendered: Vec<Value> = report
        .batch
        .changes
        .iter()
        .map(|c| {
            json!({
                "id": c.id(),
                "summary": c.summary(),
                "explanation": c.explanation(),
            })
        })
        .collect();
    let mut value = serde_json::to_value(&report)?;
    if let Value::Object(map) = &mut value {
        map.insert("rendered".to_string(), Value::Array(rendered));
    }
    Ok(value)
}

async fn read_snapshot(path: &Path) -> CliResult<Snapshot> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|source| CliError::SnapshotRead {
            path: path.to_path_buf(),
            source,
        })?;
    Snapshot::from_json(&content).map_err(|e| CliError::SnapshotParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn file_ref(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(String::from)
        .unwrap_or_else(|| path.display().to_string())
}

fn time_range(since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Option<TimeRange> {
    (since.is_some() || until.is_some()).then(|| TimeRange::new(since, until))
}

/// The named entity, or every stored entity
async fn entities(tracker: &ChangeTracker, entity: Option<String>) -> CliResult<Vec<String>> {
    match entity {
        Some(entity) => Ok(vec![entity]),
        None => Ok(tracker.store().list_entities().await?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    use super::super::args::ConfigArg;

    fn write_config(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("causelog.json");
        let config = json!({
            "storageRootPath": dir.path().join("logs"),
            "retryPolicy": { "maxAttempts": 1 }
        });
        std::fs::write(&path, config.to_string()).unwrap();
        path
    }

    fn write_snapshot(dir: &TempDir, name: &str, value: Value) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, value.to_string()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_track_then_query() {
        let dir = TempDir::new().unwrap();
        let config = ConfigArg {
            config: write_config(&dir),
        };
        let old = write_snapshot(&dir, "v1.json", json!({"id": "42", "level": 3}));
        let new = write_snapshot(&dir, "v2.json", json!({"id": "42", "level": 4}));

        let tracked = run_command(Command::Track {
            config: config.clone(),
            entity: "42".into(),
            old,
            new,
            old_ref: None,
            new_ref: None,
        })
        .await
        .unwrap();
        assert_eq!(tracked["batch"]["context"]["oldSnapshotRef"], "v1.json");
        assert_eq!(tracked["receipt"]["sequence"], 1);
        assert!(!tracked["rendered"].as_array().unwrap().is_empty());

        let queried = run_command(Command::Query {
            config: config.clone(),
            entity: "42".into(),
            categories: Vec::new(),
            priorities: Vec::new(),
            cause_type: None,
            cause_name: None,
            attributed: None,
            text: Some("level".into()),
            since: None,
            until: None,
            sort: crate::query::SortField::Timestamp,
            order: crate::query::SortDirection::Desc,
            offset: 0,
            limit: 50,
            include_archived: false,
        })
        .await
        .unwrap();
        assert_eq!(queried["totalMatches"], 1);

        let health = run_command(Command::Health { config, entity: None }).await.unwrap();
        assert_eq!(health.as_array().unwrap().len(), 1);
        assert_eq!(health[0]["lastSequence"], 1);
    }

    #[tokio::test]
    async fn test_unreadable_snapshot() {
        let dir = TempDir::new().unwrap();
        let err = run_command(Command::Track {
            config: ConfigArg {
                config: write_config(&dir),
            },
            entity: "42".into(),
            old: dir.path().join("missing.json"),
            new: dir.path().join("missing.json"),
            old_ref: None,
            new_ref: None,
        })
        .await
        .unwrap_err();
        assert_eq!(err.code(), "CAUSELOG_CLI_SNAPSHOT_READ");
    }
}
