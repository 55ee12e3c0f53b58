use crate::differ::detector::{name_set, object_section, set_changes, CategoryDetector, ChangeDraft};
use crate::differ::errors::DetectionResult;
use crate::model::{ChangeCategory, Priority};
use crate::snapshot::Snapshot;

const LISTS: [(&str, &str); 6] = [
    ("skills", "skill proficiency"),
    ("saving_throws", "saving throw proficiency"),
    ("languages", "language"),
    ("tools", "tool proficiency"),
    ("armor", "armor proficiency"),
    ("weapons", "weapon proficiency"),
];

/// Proficiency lists compared as sets
pub struct ProficiencyDetector;

impl CategoryDetector for ProficiencyDetector {
    fn category(&self) -> ChangeCategory {
        ChangeCategory::Proficiencies
    }

    fn detect(&self, old: &Snapshot, new: &Snapshot) -> DetectionResult<Vec<ChangeDraft>> {
        object_section(old, "proficiencies")?;
        object_section(new, "proficiencies")?;

        let mut drafts = Vec::new();
        for (list, noun) in LISTS {
            let path = format!("proficiencies.{}", list);
            let before = name_set(old, &path)?;
            let after = name_set(new, &path)?;
            drafts.extend(set_changes(
                self.category(),
                &path,
                &before,
                &after,
                Priority::Medium,
                noun,
            ));
        }
        Ok(drafts)
    }
}
