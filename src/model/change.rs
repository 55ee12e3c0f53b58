//! Field-level changes and the batch a comparison cycle produces

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::snapshot::numeric_value;

/// Identifier of a single change, `<batch_id>-<seq>`
pub type ChangeId = String;

/// Identifier of a comparison cycle's batch
pub type BatchId = String;

/// Category a detector is responsible for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeCategory {
    /// Character level, experience, class levels
    Progression,
    /// The six ability scores
    AbilityScores,
    /// Feats gained or lost
    Feats,
    /// Class and racial features
    Features,
    /// AC, initiative, hit points, speed, bonuses
    CombatStats,
    /// Spellcasting stats, slots and known spells
    Spellcasting,
    /// Items, quantities, equipped state
    Inventory,
    /// Skill, save, language, tool, armor and weapon proficiencies
    Proficiencies,
    /// Traits, ideals, bonds, flaws, backstory, alignment
    Personality,
    /// Name, race, background and other descriptive data
    Metadata,
}

impl ChangeCategory {
    /// Every category, in detector registration order
    pub const ALL: [ChangeCategory; 10] = [
        ChangeCategory::Progression,
        ChangeCategory::AbilityScores,
        ChangeCategory::Feats,
        ChangeCategory::Features,
        ChangeCategory::CombatStats,
        ChangeCategory::Spellcasting,
        ChangeCategory::Inventory,
        ChangeCategory::Proficiencies,
        ChangeCategory::Personality,
        ChangeCategory::Metadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeCategory::Progression => "progression",
            ChangeCategory::AbilityScores => "ability-scores",
            ChangeCategory::Feats => "feats",
            ChangeCategory::Features => "features",
            ChangeCategory::CombatStats => "combat-stats",
            ChangeCategory::Spellcasting => "spellcasting",
            ChangeCategory::Inventory => "inventory",
            ChangeCategory::Proficiencies => "proficiencies",
            ChangeCategory::Personality => "personality",
            ChangeCategory::Metadata => "metadata",
        }
    }
}

impl fmt::Display for ChangeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        ChangeCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown change category: {}", s))
    }
}

/// How much a change matters to someone following the character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Priority::Low),
            "MEDIUM" => Ok(Priority::Medium),
            "HIGH" => Ok(Priority::High),
            _ => Err(format!("unknown priority: {}", s)),
        }
    }
}

/// Where the two snapshots of a cycle came from and when the cycle ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionContext {
    /// Reference to the older snapshot (version tag, fetch id, file name...)
    pub old_snapshot_ref: String,
    /// Reference to the newer snapshot
    pub new_snapshot_ref: String,
    /// Timestamp of the comparison cycle
    pub cycle_timestamp: DateTime<Utc>,
}

impl DetectionContext {
    pub fn new(
        old_snapshot_ref: impl Into<String>,
        new_snapshot_ref: impl Into<String>,
        cycle_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            old_snapshot_ref: old_snapshot_ref.into(),
            new_snapshot_ref: new_snapshot_ref.into(),
            cycle_timestamp,
        }
    }

    /// Context stamped with the current time
    pub fn now(old_snapshot_ref: impl Into<String>, new_snapshot_ref: impl Into<String>) -> Self {
        Self::new(old_snapshot_ref, new_snapshot_ref, Utc::now())
    }
}

/// One detected difference between two snapshots
///
/// `old_value`/`new_value` are `None` when the field is absent (or null)
/// on that side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub id: ChangeId,
    pub entity_id: String,
    pub category: ChangeCategory,
    /// Dotted path into the snapshot
    pub field_path: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub priority: Priority,
    /// Human-readable, category-specific description
    pub description: String,
    /// Timestamp of the comparison cycle
    pub detected_at: DateTime<Utc>,
}

impl FieldChange {
    /// Path segments of `field_path`
    pub fn path_segments(&self) -> impl Iterator<Item = &str> {
        self.field_path.split('.')
    }

    /// Last segment of the path (`dexterity` for `ability_scores.dexterity`)
    pub fn leaf(&self) -> &str {
        self.field_path
            .rsplit('.')
            .next()
            .unwrap_or(self.field_path.as_str())
    }

    /// True if the field appeared (absent -> value)
    pub fn is_addition(&self) -> bool {
        self.old_value.is_none() && self.new_value.is_some()
    }

    /// True if the field disappeared (value -> absent)
    pub fn is_removal(&self) -> bool {
        self.old_value.is_some() && self.new_value.is_none()
    }

    /// `new - old` when both sides are numeric; an absent side counts as 0
    /// only if the other side is numeric.
    pub fn numeric_delta(&self) -> Option<f64> {
        let old = self.old_value.as_ref().map(numeric_value);
        let new = self.new_value.as_ref().map(numeric_value);
        match (old, new) {
            (Some(Some(o)), Some(Some(n))) => Some(n - o),
            (None, Some(Some(n))) => Some(n),
            (Some(Some(o)), None) => Some(-o),
            _ => None,
        }
    }

    /// The value that names the subject of a set-like change: the added
    /// value for additions, the removed one for removals.
    pub fn subject_value(&self) -> Option<&Value> {
        self.new_value.as_ref().or(self.old_value.as_ref())
    }
}

/// Every change produced by one comparison cycle for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeBatch {
    pub batch_id: BatchId,
    pub entity_id: String,
    pub context: DetectionContext,
    pub changes: Vec<FieldChange>,
    /// Categories whose detector failed; the batch is explicitly incomplete
    /// for them.
    #[serde(default)]
    pub incomplete_categories: Vec<ChangeCategory>,
}

impl ChangeBatch {
    pub fn new(
        batch_id: impl Into<BatchId>,
        entity_id: impl Into<String>,
        context: DetectionContext,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            entity_id: entity_id.into(),
            context,
            changes: Vec::new(),
            incomplete_categories: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, id: &str) -> Option<&FieldChange> {
        self.changes.iter().find(|c| c.id == id)
    }

    /// Whether every detector contributed
    pub fn is_complete(&self) -> bool {
        self.incomplete_categories.is_empty()
    }

    /// Returns the first change id that occurs more than once, if any
    pub fn duplicate_id(&self) -> Option<&str> {
        let mut seen = HashSet::with_capacity(self.changes.len());
        self.changes
            .iter()
            .find(|c| !seen.insert(c.id.as_str()))
            .map(|c| c.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(path: &str, old: Option<Value>, new: Option<Value>) -> FieldChange {
        FieldChange {
            id: "b-0001".into(),
            entity_id: "42".into(),
            category: ChangeCategory::CombatStats,
            field_path: path.into(),
            old_value: old,
            new_value: new,
            priority: Priority::Medium,
            description: String::new(),
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn test_category_round_trips_through_str() {
        for category in ChangeCategory::ALL {
            assert_eq!(category.as_str().parse::<ChangeCategory>().unwrap(), category);
        }
        assert_eq!(
            "ability_scores".parse::<ChangeCategory>().unwrap(),
            ChangeCategory::AbilityScores
        );
        assert!("weather".parse::<ChangeCategory>().is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
    }

    #[test]
    fn test_numeric_delta() {
        let c = change("combat.initiative_bonus", Some(json!(2)), Some(json!(7)));
        assert_eq!(c.numeric_delta(), Some(5.0));

        let c = change("combat.initiative_bonus", Some(json!("+2")), Some(json!(7)));
        assert_eq!(c.numeric_delta(), Some(5.0));

        let c = change("feats.Alert", None, Some(json!("Alert")));
        assert_eq!(c.numeric_delta(), None);
    }

    #[test]
    fn test_leaf_and_addition() {
        let c = change("ability_scores.dexterity", None, Some(json!(14)));
        assert_eq!(c.leaf(), "dexterity");
        assert!(c.is_addition());
        assert!(!c.is_removal());
    }

    #[test]
    fn test_duplicate_id_detection() {
        let mut batch = ChangeBatch::new("b", "42", DetectionContext::now("v1", "v2"));
        batch.changes.push(change("a", None, Some(json!(1))));
        assert!(batch.duplicate_id().is_none());
        batch.changes.push(change("b", None, Some(json!(1))));
        assert_eq!(batch.duplicate_id(), Some("b-0001"));
    }
}
