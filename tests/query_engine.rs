//! Query engine tests over a persisted history
//!
//! Validates that:
//! - Filters combine (priority AND time range) and paginate deterministically
//! - Cause lookups and related-change traversal follow stored links
//! - Reports aggregate attribution over a time window
//! - Invalid queries are rejected before touching storage

mod common;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use causelog::changelog::ChangeLogStore;
use causelog::model::{AnnotatedBatch, CauseType, ChangeCategory, Priority};
use causelog::query::{QueryEngine, QueryError, QueryOptions, SortDirection, SortField, TimeRange};
use common::{batch_at, field, link, manual_store, temp_dir, ENTITY};

// =============================================================================
// Helpers
// =============================================================================

/// Batch `n` (1-based): two HIGH changes and one LOW; batch 5 gets a third
/// HIGH change and a causal chain Alert -> initiative -> passive score.
fn history_batch(n: i64, at: DateTime<Utc>) -> AnnotatedBatch {
    let id = format!("b{}", n);
    let mut changes = vec![
        field(&id, 1, ChangeCategory::Feats, "feats.Alert", Priority::High, at),
        field(&id, 2, ChangeCategory::CombatStats, "combat.initiative_bonus", Priority::High, at),
        field(&id, 3, ChangeCategory::Proficiencies, "proficiencies.Perception", Priority::Low, at),
    ];
    if n == 5 {
        changes.push(field(&id, 4, ChangeCategory::Progression, "level", Priority::High, at));
    }
    let mut batch = batch_at(&id, at, changes);

    if n == 5 {
        let alert = format!("{}-0001", id);
        let initiative = format!("{}-0002", id);
        let perception = format!("{}-0003", id);
        let first = link(&alert, &initiative, CauseType::FeatSelection, "Alert", 0);
        let second = link(&initiative, &perception, CauseType::FeatSelection, "Alert", 1);
        batch.changes[0].causes.push(first.clone());
        batch.changes[1].caused_by = Some(first);
        batch.changes[1].causes.push(second.clone());
        batch.changes[2].caused_by = Some(second);
    }
    batch
}

/// Five daily batches; returns the store and each batch's timestamp.
async fn seeded_engine() -> (tempfile::TempDir, QueryEngine, Vec<DateTime<Utc>>) {
    let dir = temp_dir();
    let store: Arc<ChangeLogStore> = Arc::new(manual_store(&dir));
    let start = Utc::now() - Duration::days(5);
    let mut stamps = Vec::new();
    for n in 1..=5 {
        let at = start + Duration::days(n - 1);
        store.append(ENTITY, &history_batch(n, at)).await.unwrap();
        stamps.push(at);
    }
    (dir, QueryEngine::new(store), stamps)
}

// =============================================================================
// Filter and Pagination Tests
// =============================================================================

/// HIGH priority within a window holding only the last batch, two per page.
#[tokio::test]
async fn test_priority_and_time_range_paginated() {
    let (_dir, engine, stamps) = seeded_engine().await;
    let window = TimeRange::between(stamps[4] - Duration::minutes(1), stamps[4] + Duration::minutes(1));
    let options = QueryOptions::new()
        .priority(Priority::High)
        .time_range(window)
        .sort_by(SortField::FieldPath, SortDirection::Asc)
        .limit(2);

    let first = engine.query(ENTITY, &options).await.unwrap();
    assert_eq!(first.total_matches, 3);
    assert_eq!(first.len(), 2);
    assert!(first.has_more);
    assert_eq!(first.next_offset(), Some(2));
    assert_eq!(first.entries_scanned, 5);

    let second = engine
        .query(ENTITY, &options.clone().offset(2))
        .await
        .unwrap();
    assert_eq!(second.len(), 1);
    assert!(!second.has_more);
    assert_eq!(second.next_offset(), None);

    let paths: Vec<&str> = first
        .changes
        .iter()
        .chain(second.changes.iter())
        .map(|c| c.change.field_path.as_str())
        .collect();
    assert_eq!(paths, vec!["combat.initiative_bonus", "feats.Alert", "level"]);
    assert!(first
        .changes
        .iter()
        .chain(second.changes.iter())
        .all(|c| c.change.id.starts_with("b5-")));
}

/// Default ordering is newest first.
#[tokio::test]
async fn test_default_sort_newest_first() {
    let (_dir, engine, _) = seeded_engine().await;
    let options = QueryOptions::new().category(ChangeCategory::Feats);

    let result = engine.query(ENTITY, &options).await.unwrap();
    let ids: Vec<&str> = result.changes.iter().map(|c| c.id()).collect();
    assert_eq!(ids, vec!["b5-0001", "b4-0001", "b3-0001", "b2-0001", "b1-0001"]);
}

/// Attribution and text filters combine.
#[tokio::test]
async fn test_attributed_text_filter() {
    let (_dir, engine, _) = seeded_engine().await;
    let options = QueryOptions::new().attributed(true).text("PERCEPTION");

    let result = engine.query(ENTITY, &options).await.unwrap();
    assert_eq!(result.total_matches, 1);
    assert_eq!(result.changes[0].id(), "b5-0003");
}

/// Limits beyond the maximum and inverted ranges are rejected.
#[tokio::test]
async fn test_invalid_options_rejected() {
    let (_dir, engine, stamps) = seeded_engine().await;

    let err = engine
        .query(ENTITY, &QueryOptions::new().limit(0))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidLimit { .. }));

    let inverted = TimeRange::between(stamps[4], stamps[0]);
    let err = engine
        .query(ENTITY, &QueryOptions::new().time_range(inverted))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidTimeRange { .. }));
}

// =============================================================================
// Causation Lookup Tests
// =============================================================================

/// Every effect of the Alert feat, by type and by name.
#[tokio::test]
async fn test_get_by_cause() {
    let (_dir, engine, _) = seeded_engine().await;

    let by_type = engine
        .get_by_cause(ENTITY, CauseType::FeatSelection, None)
        .await
        .unwrap();
    assert_eq!(by_type.len(), 2);

    let by_name = engine
        .get_by_cause(ENTITY, CauseType::FeatSelection, Some("alert"))
        .await
        .unwrap();
    assert_eq!(by_name.len(), 2);

    let none = engine
        .get_by_cause(ENTITY, CauseType::LevelProgression, None)
        .await
        .unwrap();
    assert!(none.is_empty());
}

/// Related changes walk the chain in both directions.
#[tokio::test]
async fn test_get_related_follows_chain() {
    let (_dir, engine, _) = seeded_engine().await;

    let from_root = engine.get_related(ENTITY, "b5-0001").await.unwrap();
    let ids: Vec<&str> = from_root.iter().map(|c| c.id()).collect();
    assert_eq!(ids, vec!["b5-0002", "b5-0003"]);

    let from_leaf = engine.get_related(ENTITY, "b5-0003").await.unwrap();
    let ids: Vec<&str> = from_leaf.iter().map(|c| c.id()).collect();
    assert_eq!(ids, vec!["b5-0002", "b5-0001"]);

    let isolated = engine.get_related(ENTITY, "b1-0001").await.unwrap();
    assert!(isolated.is_empty());

    let err = engine.get_related(ENTITY, "nope-0001").await.unwrap_err();
    assert!(matches!(err, QueryError::ChangeNotFound(_)));
}

/// find_related locates the entity on its own.
#[tokio::test]
async fn test_find_related_across_entities() {
    let (_dir, engine, _) = seeded_engine().await;

    let related = engine.find_related("b5-0002").await.unwrap();
    assert_eq!(related.entity_id, ENTITY);
    assert_eq!(related.ancestors.len(), 1);
    assert_eq!(related.descendants.len(), 1);
    assert_eq!(related.ancestors[0].id(), "b5-0001");
    assert_eq!(related.descendants[0].id(), "b5-0003");
}

// =============================================================================
// Report Tests
// =============================================================================

#[tokio::test]
async fn test_report_over_full_history() {
    let (_dir, engine, _) = seeded_engine().await;

    let report = engine.generate_causation_report(ENTITY, None).await.unwrap();
    assert_eq!(report.batch_count, 5);
    assert_eq!(report.total_changes, 16);
    assert_eq!(report.attributed_changes, 2);
    assert_eq!(report.attribution_coverage, 12.5);
    assert_eq!(report.top_causes.len(), 1);
    assert_eq!(report.top_causes[0].cause_name, "Alert");
    assert_eq!(report.top_causes[0].effect_count, 2);
    assert_eq!(report.cascade_depth_distribution.get(&0), Some(&1));
    assert_eq!(report.cascade_depth_distribution.get(&1), Some(&1));
    assert_eq!(report.changes_by_category.get(&ChangeCategory::Feats), Some(&5));
    assert_eq!(report.cross_cycle_links, 0);
}

#[tokio::test]
async fn test_report_time_window() {
    let (_dir, engine, stamps) = seeded_engine().await;

    let window = TimeRange::between(stamps[0], stamps[1]);
    let report = engine
        .generate_causation_report(ENTITY, Some(window))
        .await
        .unwrap();
    assert_eq!(report.batch_count, 2);
    assert_eq!(report.total_changes, 6);
    assert_eq!(report.attributed_changes, 0);
    assert_eq!(report.attribution_coverage, 0.0);
    assert!(report.top_causes.is_empty());
}
