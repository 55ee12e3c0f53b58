//! Causation reports

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::options::TimeRange;
use crate::model::{CauseType, ChangeCategory, ChangeLogEntry};

/// Causes listed in a report
pub const TOP_CAUSES_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CauseSummary {
    pub cause_type: CauseType,
    pub cause_name: String,
    pub effect_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CausationReport {
    pub entity_id: String,
    pub time_range: Option<TimeRange>,
    pub generated_at: DateTime<Utc>,
    pub batch_count: usize,
    pub total_changes: usize,
    pub attributed_changes: usize,
    /// Percentage of changes with a known cause, one decimal
    pub attribution_coverage: f64,
    /// Ranked by effect count, then name
    pub top_causes: Vec<CauseSummary>,
    /// Link count per cascade depth
    pub cascade_depth_distribution: BTreeMap<u32, usize>,
    pub changes_by_category: BTreeMap<ChangeCategory, usize>,
    pub cross_cycle_links: usize,
}

impl CausationReport {
    pub fn build(entity_id: &str, time_range: Option<TimeRange>, entries: &[ChangeLogEntry]) -> Self {
        let in_range: Vec<&ChangeLogEntry> = entries
            .iter()
            .filter(|e| time_range.map_or(true, |r| r.contains(e.timestamp)))
            .collect();

        let mut total_changes = 0;
        let mut attributed_changes = 0;
        let mut cross_cycle_links = 0;
        let mut causes: HashMap<(CauseType, String), usize> = HashMap::new();
        let mut depths = BTreeMap::new();
        let mut categories = BTreeMap::new();
        let mut batches = HashSet::new();

        for entry in &in_range {
            batches.insert(entry.batch_id.as_str());
            for change in &entry.changes {
                total_changes += 1;
                *categories.entry(change.change.category).or_insert(0) += 1;
                let Some(link) = &change.caused_by else {
                    continue;
                };
                attributed_changes += 1;
                if link.is_cross_cycle() {
                    cross_cycle_links += 1;
                }
                *depths.entry(link.cascade_depth).or_insert(0) += 1;
                *causes.entry((link.cause_type, link.cause_name.clone())).or_insert(0) += 1;
            }
        }

        let mut top_causes: Vec<CauseSummary> = causes
            .into_iter()
            .map(|((cause_type, cause_name), effect_count)| CauseSummary {
                cause_type,
                cause_name,
                effect_count,
            })
            .collect();
        top_causes.sort_by(|a, b| {
            b.effect_count
                .cmp(&a.effect_count)
                .then_with(|| a.cause_name.cmp(&b.cause_name))
                .then_with(|| a.cause_type.cmp(&b.cause_type))
        });
        top_causes.truncate(TOP_CAUSES_LIMIT);

        let attribution_coverage = if total_changes == 0 {
            0.0
        } else {
            (attributed_changes as f64 / total_changes as f64 * 1000.0).round() / 10.0
        };

        Self {
            entity_id: entity_id.to_string(),
            time_range,
            generated_at: Utc::now(),
            batch_count: batches.len(),
            total_changes,
            attributed_changes,
            attribution_coverage,
            top_causes,
            cascade_depth_distribution: depths,
            changes_by_category: categories,
            cross_cycle_links,
        }
    }
}
