//! Query engine over persisted history

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::errors::{QueryEngineResult, QueryError};
use super::filters::ChangeFilter;
use super::options::{QueryOptions, TimeRange};
use super::report::CausationReport;
use super::result::{QueryResult, RelatedChanges};
use super::sorter::ChangeSorter;
use crate::changelog::ChangeLogStore;
use crate::model::{AttributedChange, CauseType, ChangeLogEntry};
use crate::observability::Event;

/// Answers questions about stored change history
///
/// Reads go through the store's shared per-entity lock, so a query never
/// sees a rotation or cleanup half done.
pub struct QueryEngine {
    store: Arc<ChangeLogStore>,
}

impl QueryEngine {
    pub fn new(store: Arc<ChangeLogStore>) -> Self {
        Self { store }
    }

    pub async fn query(&self, entity_id: &str, options: &QueryOptions) -> QueryEngineResult<QueryResult> {
        let started = Instant::now();
        if let Err(err) = options.validate() {
            warn!(event = %Event::QueryRejected, entity = entity_id, code = err.code(), error = %err);
            return Err(err);
        }

        let entries = self.history(entity_id, options.include_archived).await?;
        let mut result = execute(entity_id, &entries, options);
        result.latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        info!(
            event = %Event::QueryComplete,
            entity = entity_id,
            scanned = result.entries_scanned,
            matches = result.total_matches,
            returned = result.changes.len(),
            latency_ms = result.latency_ms
        );
        Ok(result)
    }

    /// Every change whose direct cause has this type and, if given, name
    pub async fn get_by_cause(
        &self,
        entity_id: &str,
        cause_type: CauseType,
        cause_name: Option<&str>,
    ) -> QueryEngineResult<Vec<AttributedChange>> {
        let entries = self.store.load(entity_id).await?;
        let name = cause_name.map(str::to_lowercase);
        let changes: Vec<AttributedChange> = entries
            .iter()
            .flat_map(|e| e.changes.iter())
            .filter(|c| match &c.caused_by {
                Some(link) => {
                    link.cause_type == cause_type
                        && name.as_ref().map_or(true, |n| link.cause_name.to_lowercase() == *n)
                }
                None => false,
            })
            .cloned()
            .collect();
        debug!(event = %Event::QueryComplete, entity = entity_id, cause = %cause_type, matches = changes.len());
        Ok(changes)
    }

    /// Changes linked to `change_id` by causation, in either direction and
    /// transitively, within the entity's history
    pub async fn get_related(&self, entity_id: &str, change_id: &str) -> QueryEngineResult<Vec<AttributedChange>> {
        let entries = self.store.load(entity_id).await?;
        related_in(entity_id, &entries, change_id)
            .map(|related| related.all())
            .ok_or_else(|| QueryError::ChangeNotFound(change_id.to_string()))
    }

    /// Like [`get_related`](Self::get_related) without knowing the entity:
    /// searches every stored entity for the change.
    pub async fn find_related(&self, change_id: &str) -> QueryEngineResult<RelatedChanges> {
        for entity_id in self.store.list_entities().await? {
            let entries = self.store.load(&entity_id).await?;
            if let Some(related) = related_in(&entity_id, &entries, change_id) {
                return Ok(related);
            }
        }
        Err(QueryError::ChangeNotFound(change_id.to_string()))
    }

    pub async fn generate_causation_report(
        &self,
        entity_id: &str,
        time_range: Option<TimeRange>,
    ) -> QueryEngineResult<CausationReport> {
        if let Some(range) = &time_range {
            range.validate()?;
        }
        let entries = self.store.load(entity_id).await?;
        let report = CausationReport::build(entity_id, time_range, &entries);
        info!(
            event = %Event::ReportGenerated,
            entity = entity_id,
            batches = report.batch_count,
            changes = report.total_changes,
            coverage = report.attribution_coverage
        );
        Ok(report)
    }

    async fn history(&self, entity_id: &str, include_archived: bool) -> QueryEngineResult<Vec<ChangeLogEntry>> {
        let mut entries = Vec::new();
        if include_archived {
            entries.extend(self.store.load_archived(entity_id).await?);
        }
        entries.extend(self.store.load(entity_id).await?);
        Ok(entries)
    }
}

/// Filters, sorts and pages `entries`. Only the returned page is cloned.
pub fn execute(entity_id: &str, entries: &[ChangeLogEntry], options: &QueryOptions) -> QueryResult {
    let filter = ChangeFilter::new(options);
    let mut hits = filter.collect(entries);
    ChangeSorter::sort(&mut hits, &options.sort);

    let total_matches = hits.len();
    let changes: Vec<AttributedChange> = hits
        .iter()
        .skip(options.offset)
        .take(options.limit)
        .map(|h| h.change.clone())
        .collect();
    let has_more = options.offset.saturating_add(changes.len()) < total_matches;

    QueryResult {
        entity_id: entity_id.to_string(),
        changes,
        total_matches,
        has_more,
        offset: options.offset,
        limit: options.limit,
        entries_scanned: entries.len(),
        latency_ms: 0.0,
    }
}

/// The causal chain around `change_id`, or `None` if it is not in `entries`
pub fn related_in(entity_id: &str, entries: &[ChangeLogEntry], change_id: &str) -> Option<RelatedChanges> {
    let mut by_id: HashMap<&str, &AttributedChange> = HashMap::new();
    let mut effects: HashMap<&str, Vec<&str>> = HashMap::new();
    for change in entries.iter().flat_map(|e| e.changes.iter()) {
        by_id.insert(change.id(), change);
        if let Some(link) = &change.caused_by {
            effects
                .entry(link.cause_change_id.as_str())
                .or_default()
                .push(change.id());
        }
    }
    let target = *by_id.get(change_id)?;

    let mut seen: HashSet<&str> = HashSet::from([target.id()]);

    let mut ancestors = Vec::new();
    let mut current = target;
    while let Some(link) = &current.caused_by {
        let Some(cause) = by_id.get(link.cause_change_id.as_str()).copied() else {
            break;
        };
        if !seen.insert(cause.id()) {
            break;
        }
        ancestors.push(cause.clone());
        current = cause;
    }

    let mut descendants = Vec::new();
    let mut queue: VecDeque<&str> = VecDeque::from([target.id()]);
    while let Some(id) = queue.pop_front() {
        for &effect in effects.get(id).into_iter().flatten() {
            if seen.insert(effect) {
                if let Some(change) = by_id.get(effect) {
                    descendants.push((*change).clone());
                }
                queue.push_back(effect);
            }
        }
    }

    Some(RelatedChanges {
        entity_id: entity_id.to_string(),
        change: target.clone(),
        ancestors,
        descendants,
    })
}
