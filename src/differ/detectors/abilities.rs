use crate::differ::detector::{object_section, scalar_change, CategoryDetector, ChangeDraft};
use crate::differ::errors::DetectionResult;
use crate::model::{ChangeCategory, Priority};
use crate::snapshot::Snapshot;

/// The six ability scores, in sheet order
pub const ABILITIES: [&str; 6] = [
    "strength",
    "dexterity",
    "constitution",
    "intelligence",
    "wisdom",
    "charisma",
];

/// Ability modifier for a score: `floor((score - 10) / 2)`
pub fn ability_modifier(score: f64) -> f64 {
    ((score - 10.0) / 2.0).floor()
}

pub struct AbilityScoreDetector;

impl CategoryDetector for AbilityScoreDetector {
    fn category(&self) -> ChangeCategory {
        ChangeCategory::AbilityScores
    }

    fn detect(&self, old: &Snapshot, new: &Snapshot) -> DetectionResult<Vec<ChangeDraft>> {
        object_section(old, "ability_scores")?;
        object_section(new, "ability_scores")?;

        let mut drafts = Vec::new();
        for ability in ABILITIES {
            let path = format!("ability_scores.{}", ability);
            let label = capitalize(ability);
            drafts.extend(scalar_change(
                self.category(),
                &path,
                &label,
                old,
                new,
                Priority::High,
                true,
            )?);
        }
        Ok(drafts)
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
