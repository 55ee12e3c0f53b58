//! Causation analysis
//!
//! Infers which changes of a batch caused which others. Every change that
//! an ordered [`CausationRule`] recognizes as a trigger is paired with every
//! other change of the batch; the rule grades the pair with a [`Signal`]
//! whose confidence must reach the configured threshold.
//!
//! # Selection
//!
//! - A change has at most one direct cause: the highest-confidence
//!   candidate, the earlier rule on ties, then the earlier trigger.
//! - A candidate that would close a cycle is skipped.
//! - Link depth is the number of links above it on the chain
//!   (root causes have depth 0). Links deeper than the maximum are
//!   discarded, together with everything below them.
//!
//! # Cross-cycle causes
//!
//! Changes of the preceding persisted batch may act as causes (never as
//! effects) when that batch is within the configured window. Such links
//! carry the preceding batch ID and lose [`CROSS_CYCLE_PENALTY`].
//!
//! # Failure semantics
//!
//! Analysis never fails the cycle. Problems are reported as
//! [`CausationError`]s alongside a batch with fewer (or no) links.

mod errors;
pub mod feats;
pub mod rules;

use std::collections::HashMap;

use chrono::Duration;
use tracing::{debug, warn};

use crate::model::{AnnotatedBatch, AttributedChange, CausationLink, ChangeBatch, FieldChange};
use crate::observability::Event;

pub use errors::CausationError;
pub use rules::{BatchFacts, CausationRule, Signal, Trigger};

/// Default minimum confidence for an attached link
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Default maximum cascade depth
pub const DEFAULT_MAX_CASCADE_DEPTH: u32 = 3;

/// Default age limit of the preceding batch, in seconds
pub const DEFAULT_CROSS_CYCLE_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Confidence lost by a cause drawn from the preceding batch
pub const CROSS_CYCLE_PENALTY: f64 = 0.05;

/// Result of analyzing one batch
#[derive(Debug, Clone)]
pub struct Analysis {
    pub batch: AnnotatedBatch,
    pub failures: Vec<CausationError>,
}

impl Analysis {
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CauseRef {
    Current(usize),
    Prior(usize),
}

#[derive(Debug, Clone)]
struct Candidate {
    cause: CauseRef,
    effect: usize,
    rule: CausationRule,
    name: String,
    confidence: f64,
}

/// Rule-based causation analyzer
#[derive(Debug, Clone)]
pub struct CausationAnalyzer {
    confidence_threshold: f64,
    max_cascade_depth: u32,
    cross_cycle_window: Duration,
}

impl Default for CausationAnalyzer {
    fn default() -> Self {
        Self::new(
            DEFAULT_CONFIDENCE_THRESHOLD,
            DEFAULT_MAX_CASCADE_DEPTH,
            Duration::seconds(DEFAULT_CROSS_CYCLE_WINDOW_SECS),
        )
    }
}

impl CausationAnalyzer {
    pub fn new(confidence_threshold: f64, max_cascade_depth: u32, cross_cycle_window: Duration) -> Self {
        Self {
            confidence_threshold,
            max_cascade_depth,
            cross_cycle_window,
        }
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    pub fn max_cascade_depth(&self) -> u32 {
        self.max_cascade_depth
    }

    /// Annotates `batch` with causation links.
    ///
    /// `prior` is the most recently persisted batch of the same entity, if
    /// any. It is ignored when it falls outside the cross-cycle window and
    /// reported as a failure when it is inconsistent with `batch`.
    pub fn analyze(&self, batch: ChangeBatch, prior: Option<&AnnotatedBatch>) -> Analysis {
        let mut failures = Vec::new();

        if let Some(id) = batch.duplicate_id() {
            let err = CausationError::DuplicateChangeId {
                entity_id: batch.entity_id.clone(),
                change_id: id.to_string(),
            };
            warn!(
                event = %Event::CausationDegraded,
                entity = %batch.entity_id,
                code = err.code(),
                error = %err
            );
            return Analysis {
                batch: AnnotatedBatch::unannotated(batch),
                failures: vec![err],
            };
        }

        let prior = match prior.map(|p| self.check_prior(&batch, p)) {
            Some(Ok(Some(p))) => Some(p),
            Some(Err(err)) => {
                warn!(
                    event = %Event::CausationDegraded,
                    entity = %batch.entity_id,
                    code = err.code(),
                    error = %err
                );
                failures.push(err);
                None
            }
            _ => None,
        };

        let prior_changes: Vec<&FieldChange> = prior
            .map(|p| p.changes.iter().map(|c| &c.change).collect())
            .unwrap_or_default();
        let prior_depths: Vec<Option<u32>> = prior
            .map(|p| {
                p.changes
                    .iter()
                    .map(|c| c.caused_by.as_ref().map(|l| l.cascade_depth))
                    .collect()
            })
            .unwrap_or_default();

        let candidates = self.candidates(&batch.changes, &prior_changes);
        let parents = select(&batch.changes, candidates);
        let depths = link_depths(&parents, &prior_depths);

        let prior_batch_id = prior.map(|p| p.batch_id.clone());
        let mut changes: Vec<AttributedChange> = batch
            .changes
            .iter()
            .cloned()
            .map(AttributedChange::unattributed)
            .collect();

        let mut attached = 0usize;
        let mut discarded = 0usize;
        for (effect, parent) in parents.iter().enumerate() {
            let (Some(candidate), Some(depth)) = (parent, depths[effect]) else {
                continue;
            };
            if depth > self.max_cascade_depth {
                discarded += 1;
                continue;
            }
            let (cause_change_id, cause_batch_id) = match candidate.cause {
                CauseRef::Current(i) => (batch.changes[i].id.clone(), None),
                CauseRef::Prior(j) => (prior_changes[j].id.clone(), prior_batch_id.clone()),
            };
            let link = CausationLink {
                cause_change_id,
                effect_change_id: batch.changes[effect].id.clone(),
                cause_type: candidate.rule.cause_type(),
                cause_name: candidate.name.clone(),
                confidence: candidate.confidence,
                cascade_depth: depth,
                cause_batch_id,
            };
            if let CauseRef::Current(i) = candidate.cause {
                changes[i].causes.push(link.clone());
            }
            changes[effect].caused_by = Some(link);
            attached += 1;
        }

        debug!(
            event = %Event::CausationComplete,
            entity = %batch.entity_id,
            batch = %batch.batch_id,
            links = attached,
            discarded = discarded,
            cross_cycle = prior.is_some()
        );

        Analysis {
            batch: AnnotatedBatch {
                batch_id: batch.batch_id,
                entity_id: batch.entity_id,
                context: batch.context,
                changes,
                incomplete_categories: batch.incomplete_categories,
            },
            failures,
        }
    }

    /// `Ok(None)` when the prior batch is simply too old to matter.
    fn check_prior<'p>(
        &self,
        batch: &ChangeBatch,
        prior: &'p AnnotatedBatch,
    ) -> Result<Option<&'p AnnotatedBatch>, CausationError> {
        if prior.entity_id != batch.entity_id {
            return Err(CausationError::ForeignPriorBatch {
                entity_id: batch.entity_id.clone(),
                prior_entity_id: prior.entity_id.clone(),
            });
        }
        let current = batch.context.cycle_timestamp;
        let previous = prior.context.cycle_timestamp;
        if previous > current {
            return Err(CausationError::PriorBatchNewer {
                entity_id: batch.entity_id.clone(),
                prior_batch_id: prior.batch_id.clone(),
            });
        }
        if let Some(id) = duplicate_id(prior) {
            return Err(CausationError::DuplicateChangeId {
                entity_id: batch.entity_id.clone(),
                change_id: id.to_string(),
            });
        }
        if current - previous > self.cross_cycle_window {
            return Ok(None);
        }
        Ok(Some(prior))
    }

    fn candidates(&self, changes: &[FieldChange], prior: &[&FieldChange]) -> Vec<Candidate> {
        let facts = BatchFacts::from_changes(changes);
        let causes = changes
            .iter()
            .enumerate()
            .map(|(i, c)| (CauseRef::Current(i), c))
            .chain(prior.iter().enumerate().map(|(j, c)| (CauseRef::Prior(j), *c)));

        let mut candidates = Vec::new();
        for (cause, change) in causes {
            for rule in CausationRule::ORDERED {
                let Some(trigger) = rule.trigger(change) else {
                    continue;
                };
                for (effect, candidate) in changes.iter().enumerate() {
                    if cause == CauseRef::Current(effect) {
                        continue;
                    }
                    let Some(signal) = rule.assess(&trigger, candidate, &facts) else {
                        continue;
                    };
                    let mut confidence = signal.confidence();
                    if matches!(cause, CauseRef::Prior(_)) {
                        confidence -= CROSS_CYCLE_PENALTY;
                    }
                    let confidence = round_confidence(confidence);
                    if confidence + f64::EPSILON < self.confidence_threshold {
                        continue;
                    }
                    candidates.push(Candidate {
                        cause,
                        effect,
                        rule,
                        name: trigger.name.clone(),
                        confidence,
                    });
                }
            }
        }
        candidates
    }
}

/// Picks at most one cause per effect, strongest first, never closing a
/// cycle. Returns the chosen candidate for each change of the batch.
fn select(changes: &[FieldChange], mut candidates: Vec<Candidate>) -> Vec<Option<Candidate>> {
    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.rule.rank().cmp(&b.rule.rank()))
            .then_with(|| cause_order(a.cause).cmp(&cause_order(b.cause)))
            .then_with(|| a.effect.cmp(&b.effect))
    });

    let mut parents: Vec<Option<Candidate>> = vec![None; changes.len()];
    for candidate in candidates {
        if parents[candidate.effect].is_some() {
            continue;
        }
        if let CauseRef::Current(cause) = candidate.cause {
            if is_ancestor_or_self(&parents, candidate.effect, cause) {
                continue;
            }
        }
        let effect = candidate.effect;
        parents[effect] = Some(candidate);
    }
    parents
}

fn cause_order(cause: CauseRef) -> (u8, usize) {
    match cause {
        CauseRef::Current(i) => (0, i),
        CauseRef::Prior(j) => (1, j),
    }
}

/// True if `node` is `start` or lies on the cause chain above `start`.
fn is_ancestor_or_self(parents: &[Option<Candidate>], node: usize, start: usize) -> bool {
    let mut current = start;
    for _ in 0..=parents.len() {
        if current == node {
            return true;
        }
        match parents[current].as_ref().map(|p| p.cause) {
            Some(CauseRef::Current(next)) => current = next,
            _ => return false,
        }
    }
    false
}

/// Depth of the link into each change, or `None` for unattributed changes.
fn link_depths(parents: &[Option<Candidate>], prior_depths: &[Option<u32>]) -> Vec<Option<u32>> {
    let mut memo: HashMap<usize, u32> = HashMap::new();
    (0..parents.len())
        .map(|effect| depth_of(effect, parents, prior_depths, &mut memo))
        .collect()
}

fn depth_of(
    effect: usize,
    parents: &[Option<Candidate>],
    prior_depths: &[Option<u32>],
    memo: &mut HashMap<usize, u32>,
) -> Option<u32> {
    if let Some(depth) = memo.get(&effect) {
        return Some(*depth);
    }
    let depth = match parents[effect].as_ref()?.cause {
        CauseRef::Current(cause) => match parents[cause] {
            None => 0,
            Some(_) => depth_of(cause, parents, prior_depths, memo)?.saturating_add(1),
        },
        CauseRef::Prior(j) => match prior_depths.get(j).copied().flatten() {
            None => 0,
            Some(parent_depth) => parent_depth.saturating_add(1),
        },
    };
    memo.insert(effect, depth);
    Some(depth)
}

fn duplicate_id(batch: &AnnotatedBatch) -> Option<&str> {
    let mut seen = std::collections::HashSet::with_capacity(batch.changes.len());
    batch
        .changes
        .iter()
        .find(|c| !seen.insert(c.id()))
        .map(|c| c.id())
}

fn round_confidence(confidence: f64) -> f64 {
    ((confidence * 100.0).round() / 100.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Value};

    use crate::model::{CauseType, ChangeCategory, DetectionContext, Priority};

    fn change(batch: &str, seq: usize, category: ChangeCategory, path: &str, old: Option<Value>, new: Option<Value>) -> FieldChange {
        FieldChange {
            id: format!("{}-{:04}", batch, seq),
            entity_id: "42".into(),
            category,
            field_path: path.into(),
            old_value: old,
            new_value: new,
            priority: Priority::Medium,
            description: path.into(),
            detected_at: Utc::now(),
        }
    }

    fn batch(id: &str, changes: Vec<FieldChange>) -> ChangeBatch {
        let mut batch = ChangeBatch::new(id, "42", DetectionContext::now("v1", "v2"));
        batch.changes = changes;
        batch
    }

    fn scenario() -> ChangeBatch {
        batch(
            "b",
            vec![
                change("b", 1, ChangeCategory::Progression, "level", Some(json!(3)), Some(json!(4))),
                change("b", 2, ChangeCategory::Feats, "feats.Alert", None, Some(json!("Alert"))),
                change(
                    "b",
                    3,
                    ChangeCategory::CombatStats,
                    "combat.initiative_bonus",
                    Some(json!(2)),
                    Some(json!(7)),
                ),
            ],
        )
    }

    #[test]
    fn test_feat_selection_scenario() {
        let analysis = CausationAnalyzer::default().analyze(scenario(), None);
        assert!(analysis.failures.is_empty());
        let batch = analysis.batch;
        assert_eq!(batch.link_count(), 1);

        let initiative = batch.get("b-0003").unwrap();
        let link = initiative.caused_by.as_ref().unwrap();
        assert_eq!(link.cause_change_id, "b-0002");
        assert_eq!(link.cause_type, CauseType::FeatSelection);
        assert_eq!(link.cause_name, "Alert");
        assert!(link.confidence >= 0.7);
        assert_eq!(link.cascade_depth, 0);

        let feat = batch.get("b-0002").unwrap();
        assert!(feat.caused_by.is_none());
        assert_eq!(feat.causes.len(), 1);
        assert!(batch.get("b-0001").unwrap().caused_by.is_none());
    }

    #[test]
    fn test_cascade_depth_follows_parent() {
        // Resilient -> constitution 13 -> 14 -> max hp
        let b = batch(
            "b",
            vec![
                change("b", 1, ChangeCategory::Feats, "feats.Resilient", None, Some(json!("Resilient"))),
                change(
                    "b",
                    2,
                    ChangeCategory::AbilityScores,
                    "ability_scores.constitution",
                    Some(json!(13)),
                    Some(json!(14)),
                ),
                change("b", 3, ChangeCategory::CombatStats, "combat.max_hp", Some(json!(30)), Some(json!(34))),
            ],
        );
        let analysis = CausationAnalyzer::default().analyze(b, None);
        let con = analysis.batch.get("b-0002").unwrap().caused_by.clone().unwrap();
        assert_eq!(con.cause_change_id, "b-0001");
        assert_eq!(con.cascade_depth, 0);
        let hp = analysis.batch.get("b-0003").unwrap().caused_by.clone().unwrap();
        assert_eq!(hp.cause_change_id, "b-0002");
        assert_eq!(hp.cause_type, CauseType::AbilityScoreChange);
        assert_eq!(hp.cascade_depth, 1);
    }

    #[test]
    fn test_links_deeper_than_max_are_discarded() {
        let b = batch(
            "b",
            vec![
                change("b", 1, ChangeCategory::Feats, "feats.Resilient", None, Some(json!("Resilient"))),
                change(
                    "b",
                    2,
                    ChangeCategory::AbilityScores,
                    "ability_scores.constitution",
                    Some(json!(13)),
                    Some(json!(14)),
                ),
                change("b", 3, ChangeCategory::CombatStats, "combat.max_hp", Some(json!(30)), Some(json!(31))),
            ],
        );
        let analyzer = CausationAnalyzer::new(0.7, 0, Duration::hours(24));
        let analysis = analyzer.analyze(b, None);
        assert!(analysis.batch.get("b-0002").unwrap().is_attributed());
        assert!(!analysis.batch.get("b-0003").unwrap().is_attributed());
        for link in analysis.batch.links() {
            assert_eq!(link.cascade_depth, 0);
        }
    }

    #[test]
    fn test_highest_confidence_cause_wins() {
        // Both the shield and the dexterity increase could explain AC;
        // the shield's exact bonus is the stronger signal.
        let b = batch(
            "b",
            vec![
                change(
                    "b",
                    1,
                    ChangeCategory::AbilityScores,
                    "ability_scores.dexterity",
                    Some(json!(14)),
                    Some(json!(16)),
                ),
                change(
                    "b",
                    2,
                    ChangeCategory::Inventory,
                    "inventory.Shield",
                    None,
                    Some(json!({"name": "Shield", "quantity": 1, "equipped": true, "ac_bonus": 2})),
                ),
                change("b", 3, ChangeCategory::CombatStats, "combat.armor_class", Some(json!(15)), Some(json!(17))),
            ],
        );
        let analysis = CausationAnalyzer::default().analyze(b, None);
        let ac = analysis.batch.get("b-0003").unwrap().caused_by.clone().unwrap();
        assert_eq!(ac.cause_type, CauseType::EquipmentChange);
        assert_eq!(ac.cause_name, "Shield");
        assert_eq!(ac.confidence, 0.95);
        assert_eq!(analysis.batch.link_count(), 1);
    }

    #[test]
    fn test_threshold_filters_weak_links() {
        let analyzer = CausationAnalyzer::new(0.9, 3, Duration::hours(24));
        let b = batch(
            "b",
            vec![
                change("b", 1, ChangeCategory::Progression, "level", Some(json!(3)), Some(json!(4))),
                change("b", 2, ChangeCategory::CombatStats, "combat.max_hp", Some(json!(30)), Some(json!(37))),
            ],
        );
        assert_eq!(analyzer.analyze(b, None).batch.link_count(), 0);
    }

    #[test]
    fn test_cross_cycle_cause() {
        let prior_batch = batch(
            "p",
            vec![change("p", 1, ChangeCategory::Progression, "level", Some(json!(4)), Some(json!(5)))],
        );
        let prior = CausationAnalyzer::default().analyze(prior_batch, None).batch;

        let current = batch(
            "c",
            vec![change(
                "c",
                1,
                ChangeCategory::Spellcasting,
                "spellcasting.spells.Fireball",
                None,
                Some(json!("Fireball")),
            )],
        );
        let analysis = CausationAnalyzer::default().analyze(current, Some(&prior));
        let link = analysis.batch.get("c-0001").unwrap().caused_by.clone().unwrap();
        assert_eq!(link.cause_change_id, "p-0001");
        assert_eq!(link.cause_batch_id.as_deref(), Some("p"));
        assert_eq!(link.cascade_depth, 0);
        assert!((link.confidence - 0.73).abs() < 1e-9);
        assert!(link.explanation().ends_with("from the previous update"));
        assert!(analysis.batch.changes[0].causes.is_empty());
    }

    #[test]
    fn test_prior_outside_window_is_ignored() {
        let mut prior_batch = batch(
            "p",
            vec![change("p", 1, ChangeCategory::Progression, "level", Some(json!(4)), Some(json!(5)))],
        );
        prior_batch.context.cycle_timestamp = Utc::now() - Duration::days(3);
        let prior = AnnotatedBatch::unannotated(prior_batch);
        let current = batch(
            "c",
            vec![change("c", 1, ChangeCategory::Features, "features.Evasion", None, Some(json!("Evasion")))],
        );
        let analysis = CausationAnalyzer::default().analyze(current, Some(&prior));
        assert!(analysis.failures.is_empty());
        assert_eq!(analysis.batch.link_count(), 0);
    }

    #[test]
    fn test_foreign_prior_degrades_without_blocking() {
        let mut prior = AnnotatedBatch::unannotated(batch("p", vec![]));
        prior.entity_id = "other".into();
        let analysis = CausationAnalyzer::default().analyze(scenario(), Some(&prior));
        assert_eq!(analysis.failures.len(), 1);
        assert_eq!(analysis.failures[0].code(), "CAUSELOG_CAUSATION_FOREIGN_PRIOR");
        assert!(analysis.is_degraded());
        assert_eq!(analysis.batch.len(), 3);
        assert_eq!(analysis.batch.link_count(), 1);
    }

    #[test]
    fn test_newer_prior_is_rejected() {
        let mut prior_batch = batch("p", vec![]);
        prior_batch.context.cycle_timestamp = Utc::now() + Duration::hours(1);
        let prior = AnnotatedBatch::unannotated(prior_batch);
        let analysis = CausationAnalyzer::default().analyze(scenario(), Some(&prior));
        assert!(matches!(analysis.failures[0], CausationError::PriorBatchNewer { .. }));
    }

    #[test]
    fn test_duplicate_ids_disable_links() {
        let mut b = scenario();
        b.changes[2].id = b.changes[1].id.clone();
        let analysis = CausationAnalyzer::default().analyze(b, None);
        assert_eq!(analysis.batch.len(), 3);
        assert_eq!(analysis.batch.link_count(), 0);
        assert!(matches!(analysis.failures[0], CausationError::DuplicateChangeId { .. }));
    }

    #[test]
    fn test_no_cycles() {
        // Dexterity and initiative cannot explain each other both ways;
        // every chain must terminate at a root.
        let b = scenario();
        let analysis = CausationAnalyzer::default().analyze(b, None);
        for change in &analysis.batch.changes {
            let mut current = change.clone();
            let mut hops = 0;
            while let Some(link) = current.caused_by.clone() {
                current = analysis.batch.get(&link.cause_change_id).unwrap().clone();
                hops += 1;
                assert!(hops <= analysis.batch.len());
            }
        }
    }
}
