//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;

use causelog::changelog::{ChangeLogStore, StorageLayout, StoreOptions, DEFAULT_ROTATION_SIZE_THRESHOLD};
use causelog::config::EngineConfig;
use causelog::model::{
    AnnotatedBatch, CausationLink, CauseType, ChangeBatch, ChangeCategory, DetectionContext, FieldChange,
    Priority,
};
use causelog::observability::HealthRegistry;
use causelog::retry::RetryPolicy;
use causelog::snapshot::Snapshot;
use causelog::tracker::ChangeTracker;

pub const ENTITY: &str = "1234";

pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp dir")
}

pub fn store_with(dir: &TempDir, options: StoreOptions) -> ChangeLogStore {
    ChangeLogStore::new(
        StorageLayout::new(dir.path()),
        options,
        RetryPolicy::no_retry(),
        Arc::new(HealthRegistry::new()),
    )
}

/// Store that never rotates on its own
pub fn manual_store(dir: &TempDir) -> ChangeLogStore {
    store_with(
        dir,
        StoreOptions {
            rotation_size_threshold: DEFAULT_ROTATION_SIZE_THRESHOLD,
            auto_rotate: false,
        },
    )
}

pub fn tracker(dir: &TempDir) -> ChangeTracker {
    let config = EngineConfig {
        storage_root_path: dir.path().to_path_buf(),
        retry_policy: RetryPolicy::no_retry(),
        ..EngineConfig::default()
    };
    ChangeTracker::new(config, Arc::new(HealthRegistry::new()))
}

pub fn field(
    batch_id: &str,
    seq: usize,
    category: ChangeCategory,
    path: &str,
    priority: Priority,
    at: DateTime<Utc>,
) -> FieldChange {
    FieldChange {
        id: format!("{}-{:04}", batch_id, seq),
        entity_id: ENTITY.to_string(),
        category,
        field_path: path.to_string(),
        old_value: Some(json!(1)),
        new_value: Some(json!(2)),
        priority,
        description: format!("{} changed", path),
        detected_at: at,
    }
}

/// Batch of `changes` stamped `at`, no links
pub fn batch_at(batch_id: &str, at: DateTime<Utc>, changes: Vec<FieldChange>) -> AnnotatedBatch {
    let mut batch = ChangeBatch::new(batch_id, ENTITY, DetectionContext::new("old", "new", at));
    batch.changes = changes;
    AnnotatedBatch::unannotated(batch)
}

/// Batch holding one MEDIUM and one HIGH change
pub fn simple_batch(batch_id: &str, at: DateTime<Utc>) -> AnnotatedBatch {
    batch_at(
        batch_id,
        at,
        vec![
            field(batch_id, 1, ChangeCategory::CombatStats, "combat.max_hp", Priority::Medium, at),
            field(batch_id, 2, ChangeCategory::Progression, "level", Priority::High, at),
        ],
    )
}

pub fn link(cause: &str, effect: &str, cause_type: CauseType, name: &str, depth: u32) -> CausationLink {
    CausationLink {
        cause_change_id: cause.to_string(),
        effect_change_id: effect.to_string(),
        cause_type,
        cause_name: name.to_string(),
        confidence: 0.9,
        cascade_depth: depth,
        cause_batch_id: None,
    }
}

/// A character sheet snapshot
pub fn character(level: u32, feats: &[&str], initiative: i64, spells: &[&str]) -> Snapshot {
    Snapshot::new(character_json(level, feats, initiative, spells))
}

pub fn character_json(level: u32, feats: &[&str], initiative: i64, spells: &[&str]) -> Value {
    json!({
        "id": ENTITY,
        "name": "Thorin",
        "level": level,
        "ability_scores": {
            "strength": 16, "dexterity": 14, "constitution": 15,
            "intelligence": 10, "wisdom": 12, "charisma": 8
        },
        "feats": feats,
        "combat": { "initiative_bonus": initiative, "armor_class": 16, "max_hp": 38 },
        "spellcasting": { "ability": "intelligence", "spells": spells },
        "inventory": [ { "name": "Rope", "quantity": 1 } ]
    })
}
