use crate::differ::detector::{
    name_set, object_section, scalar_change, set_changes, union_keys, value_change,
    CategoryDetector, ChangeDraft,
};
use crate::differ::errors::{DetectionError, DetectionResult};
use crate::model::{ChangeCategory, Priority};
use crate::snapshot::{numeric_value, Snapshot};

/// Spellcasting ability, save DC, attack bonus, slots and known spells
pub struct SpellcastingDetector;

impl CategoryDetector for SpellcastingDetector {
    fn category(&self) -> ChangeCategory {
        ChangeCategory::Spellcasting
    }

    fn detect(&self, old: &Snapshot, new: &Snapshot) -> DetectionResult<Vec<ChangeDraft>> {
        let category = self.category();
        object_section(old, "spellcasting")?;
        object_section(new, "spellcasting")?;

        let mut drafts = Vec::new();
        drafts.extend(scalar_change(
            category,
            "spellcasting.ability",
            "Spellcasting ability",
            old,
            new,
            Priority::Medium,
            false,
        )?);
        drafts.extend(scalar_change(
            category,
            "spellcasting.spell_save_dc",
            "Spell save DC",
            old,
            new,
            Priority::Medium,
            true,
        )?);
        drafts.extend(scalar_change(
            category,
            "spellcasting.spell_attack_bonus",
            "Spell attack bonus",
            old,
            new,
            Priority::Medium,
            true,
        )?);

        let old_slots = object_section(old, "spellcasting.slots")?;
        let new_slots = object_section(new, "spellcasting.slots")?;
        for level in union_keys(old_slots, new_slots) {
            let before = old_slots.and_then(|m| m.get(level)).filter(|v| !v.is_null());
            let after = new_slots.and_then(|m| m.get(level)).filter(|v| !v.is_null());
            let path = format!("spellcasting.slots.{}", level);
            for value in [before, after].into_iter().flatten() {
                if numeric_value(value).is_none() {
                    return Err(DetectionError::malformed(&path, "slot count must be a number"));
                }
            }
            let label = format!("Level {} spell slots", level);
            drafts.extend(value_change(
                category,
                &path,
                &label,
                before,
                after,
                Priority::Medium,
            ));
        }

        let old_spells = name_set(old, "spellcasting.spells")?;
        let new_spells = name_set(new, "spellcasting.spells")?;
        drafts.extend(set_changes(
            category,
            "spellcasting.spells",
            &old_spells,
            &new_spells,
            Priority::Medium,
            "spell",
        ));

        Ok(drafts)
    }
}
