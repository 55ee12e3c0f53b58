//! Causation links and attributed changes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::change::{BatchId, ChangeBatch, ChangeCategory, ChangeId, DetectionContext, FieldChange};

/// Category of trigger a causation link attributes an effect to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CauseType {
    FeatSelection,
    LevelProgression,
    EquipmentChange,
    AbilityScoreChange,
    Multiclass,
}

impl CauseType {
    pub const ALL: [CauseType; 5] = [
        CauseType::FeatSelection,
        CauseType::LevelProgression,
        CauseType::EquipmentChange,
        CauseType::AbilityScoreChange,
        CauseType::Multiclass,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CauseType::FeatSelection => "feat-selection",
            CauseType::LevelProgression => "level-progression",
            CauseType::EquipmentChange => "equipment-change",
            CauseType::AbilityScoreChange => "ability-score-change",
            CauseType::Multiclass => "multiclass",
        }
    }

    /// Phrase used in human-readable explanations
    pub fn label(&self) -> &'static str {
        match self {
            CauseType::FeatSelection => "feat selection",
            CauseType::LevelProgression => "level progression",
            CauseType::EquipmentChange => "equipment change",
            CauseType::AbilityScoreChange => "ability score change",
            CauseType::Multiclass => "multiclassing",
        }
    }
}

impl fmt::Display for CauseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CauseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        CauseType::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown cause type: {}", s))
    }
}

/// Directed edge asserting that one change triggered another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CausationLink {
    pub cause_change_id: ChangeId,
    pub effect_change_id: ChangeId,
    pub cause_type: CauseType,
    /// Human-meaningful name of the trigger ("Alert", "Fighter 4", "Shield")
    pub cause_name: String,
    /// In [0, 1]
    pub confidence: f64,
    /// Distance from the root cause; root links have depth 0
    pub cascade_depth: u32,
    /// Set when the cause lives in the preceding persisted batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause_batch_id: Option<BatchId>,
}

impl CausationLink {
    pub fn is_cross_cycle(&self) -> bool {
        self.cause_batch_id.is_some()
    }

    /// "feat selection: Alert (95% confidence)"
    pub fn explanation(&self) -> String {
        let mut text = format!(
            "{}: {} ({:.0}% confidence)",
            self.cause_type.label(),
            self.cause_name,
            self.confidence * 100.0
        );
        if self.is_cross_cycle() {
            text.push_str(", from the previous update");
        }
        text
    }
}

/// A change together with its causation links
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributedChange {
    pub change: FieldChange,
    /// The single direct cause of this change, if one was inferred
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<CausationLink>,
    /// Links to the effects this change caused within its own batch
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<CausationLink>,
}

impl AttributedChange {
    pub fn unattributed(change: FieldChange) -> Self {
        Self {
            change,
            caused_by: None,
            causes: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.change.id
    }

    pub fn is_attributed(&self) -> bool {
        self.caused_by.is_some()
    }

    pub fn explanation(&self) -> Option<String> {
        self.caused_by.as_ref().map(CausationLink::explanation)
    }

    /// Terse one-line rendering
    pub fn summary(&self) -> String {
        match &self.caused_by {
            Some(link) => format!("{} (via {})", self.change.description, link.cause_name),
            None => self.change.description.clone(),
        }
    }

    /// Multi-line rendering with values and attribution
    pub fn detail(&self) -> String {
        let mut lines = vec![
            format!(
                "[{}] {}: {}",
                self.change.priority, self.change.category, self.change.description
            ),
            format!(
                "  {}: {} -> {}",
                self.change.field_path,
                render_value(self.change.old_value.as_ref()),
                render_value(self.change.new_value.as_ref())
            ),
        ];
        if let Some(explanation) = self.explanation() {
            lines.push(format!("  caused by {}", explanation));
        }
        if !self.causes.is_empty() {
            lines.push(format!("  led to {} other change(s)", self.causes.len()));
        }
        lines.join("\n")
    }
}

fn render_value(value: Option<&serde_json::Value>) -> String {
    match value {
        None => "(none)".to_string(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// A change batch after the causation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedBatch {
    pub batch_id: BatchId,
    pub entity_id: String,
    pub context: DetectionContext,
    pub changes: Vec<AttributedChange>,
    #[serde(default)]
    pub incomplete_categories: Vec<ChangeCategory>,
}

impl AnnotatedBatch {
    /// Wraps a batch without attaching any links
    pub fn unannotated(batch: ChangeBatch) -> Self {
        Self {
            batch_id: batch.batch_id,
            entity_id: batch.entity_id,
            context: batch.context,
            changes: batch
                .changes
                .into_iter()
                .map(AttributedChange::unattributed)
                .collect(),
            incomplete_categories: batch.incomplete_categories,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, id: &str) -> Option<&AttributedChange> {
        self.changes.iter().find(|c| c.id() == id)
    }

    /// Every link attached in this batch (one per attributed change)
    pub fn links(&self) -> impl Iterator<Item = &CausationLink> {
        self.changes.iter().filter_map(|c| c.caused_by.as_ref())
    }

    pub fn link_count(&self) -> usize {
        self.links().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use crate::model::Priority;

    fn link() -> CausationLink {
        CausationLink {
            cause_change_id: "b-0002".into(),
            effect_change_id: "b-0003".into(),
            cause_type: CauseType::FeatSelection,
            cause_name: "Alert".into(),
            confidence: 0.95,
            cascade_depth: 0,
            cause_batch_id: None,
        }
    }

    fn initiative_change() -> FieldChange {
        FieldChange {
            id: "b-0003".into(),
            entity_id: "42".into(),
            category: ChangeCategory::CombatStats,
            field_path: "combat.initiative_bonus".into(),
            old_value: Some(json!(2)),
            new_value: Some(json!(7)),
            priority: Priority::Medium,
            description: "Initiative bonus increased from +2 to +7".into(),
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn test_explanation_text() {
        assert_eq!(link().explanation(), "feat selection: Alert (95% confidence)");

        let mut cross = link();
        cross.cause_batch_id = Some("prev".into());
        assert!(cross.explanation().ends_with("from the previous update"));
    }

    #[test]
    fn test_renderings() {
        let mut change = AttributedChange::unattributed(initiative_change());
        assert_eq!(change.summary(), "Initiative bonus increased from +2 to +7");
        assert!(change.explanation().is_none());

        change.caused_by = Some(link());
        assert_eq!(change.summary(), "Initiative bonus increased from +2 to +7 (via Alert)");
        let detail = change.detail();
        assert!(detail.contains("[MEDIUM] combat-stats"));
        assert!(detail.contains("combat.initiative_bonus: 2 -> 7"));
        assert!(detail.contains("caused by feat selection: Alert"));
    }

    #[test]
    fn test_cause_type_parse() {
        assert_eq!(
            "feat-selection".parse::<CauseType>().unwrap(),
            CauseType::FeatSelection
        );
        assert_eq!(
            "LEVEL_PROGRESSION".parse::<CauseType>().unwrap(),
            CauseType::LevelProgression
        );
    }

    #[test]
    fn test_link_serialization_omits_same_batch_marker() {
        let json = serde_json::to_value(link()).unwrap();
        assert_eq!(json["causeType"], "feat-selection");
        assert!(json.get("causeBatchId").is_none());
    }
}
