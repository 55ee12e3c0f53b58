use crate::differ::detector::{object_section, scalar_change, CategoryDetector, ChangeDraft};
use crate::differ::errors::DetectionResult;
use crate::model::{ChangeCategory, Priority};
use crate::snapshot::Snapshot;

/// (key, label, priority, numeric)
const COMBAT_FIELDS: [(&str, &str, Priority, bool); 9] = [
    ("armor_class", "Armor class", Priority::Medium, true),
    ("initiative_bonus", "Initiative bonus", Priority::Medium, true),
    ("max_hp", "Max HP", Priority::Medium, true),
    ("current_hp", "Current HP", Priority::Low, true),
    ("temp_hp", "Temporary HP", Priority::Low, true),
    ("speed", "Speed", Priority::Medium, true),
    ("proficiency_bonus", "Proficiency bonus", Priority::Medium, true),
    ("attack_bonus", "Attack bonus", Priority::Medium, true),
    ("hit_dice", "Hit dice", Priority::Low, false),
];

pub struct CombatStatsDetector;

impl CategoryDetector for CombatStatsDetector {
    fn category(&self) -> ChangeCategory {
        ChangeCategory::CombatStats
    }

    fn detect(&self, old: &Snapshot, new: &Snapshot) -> DetectionResult<Vec<ChangeDraft>> {
        object_section(old, "combat")?;
        object_section(new, "combat")?;

        let mut drafts = Vec::new();
        for (key, label, priority, numeric) in COMBAT_FIELDS {
            let path = format!("combat.{}", key);
            drafts.extend(scalar_change(
                self.category(),
                &path,
                label,
                old,
                new,
                priority,
                numeric,
            )?);
        }
        Ok(drafts)
    }
}
