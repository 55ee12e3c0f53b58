//! Descriptive sections: personality and metadata

use serde_json::Value;

use crate::differ::detector::{
    humanize, object_section, union_keys, value_change, CategoryDetector, ChangeDraft,
};
use crate::differ::errors::DetectionResult;
use crate::model::{ChangeCategory, Priority};
use crate::snapshot::Snapshot;

const PERSONALITY_FIELDS: [&str; 6] = ["traits", "ideals", "bonds", "flaws", "backstory", "alignment"];

/// Text longer than this is described as "updated" instead of quoted
const LONG_TEXT: usize = 80;

pub struct PersonalityDetector;

impl CategoryDetector for PersonalityDetector {
    fn category(&self) -> ChangeCategory {
        ChangeCategory::Personality
    }

    fn detect(&self, old: &Snapshot, new: &Snapshot) -> DetectionResult<Vec<ChangeDraft>> {
        object_section(old, "personality")?;
        object_section(new, "personality")?;

        let mut drafts = Vec::new();
        for field in PERSONALITY_FIELDS {
            let path = format!("personality.{}", field);
            drafts.extend(text_change(
                self.category(),
                &path,
                &humanize(field),
                old.get(&path),
                new.get(&path),
            ));
        }
        Ok(drafts)
    }
}

/// Root `name` plus everything under `metadata`
pub struct MetadataDetector;

impl CategoryDetector for MetadataDetector {
    fn category(&self) -> ChangeCategory {
        ChangeCategory::Metadata
    }

    fn detect(&self, old: &Snapshot, new: &Snapshot) -> DetectionResult<Vec<ChangeDraft>> {
        let category = self.category();
        let mut drafts = Vec::new();
        drafts.extend(value_change(
            category,
            "name",
            "Name",
            old.get("name"),
            new.get("name"),
            Priority::Medium,
        ));

        let before = object_section(old, "metadata")?;
        let after = object_section(new, "metadata")?;
        for key in union_keys(before, after) {
            let path = format!("metadata.{}", key);
            drafts.extend(text_change(
                category,
                &path,
                &humanize(key),
                before.and_then(|m| m.get(key)).filter(|v| !v.is_null()),
                after.and_then(|m| m.get(key)).filter(|v| !v.is_null()),
            ));
        }
        Ok(drafts)
    }
}

fn text_change(
    category: ChangeCategory,
    path: &str,
    label: &str,
    old: Option<&Value>,
    new: Option<&Value>,
) -> Option<ChangeDraft> {
    let mut draft = value_change(category, path, label, old, new, Priority::Low)?;
    let long = [old, new].into_iter().flatten().any(|v| match v {
        Value::String(s) => s.chars().count() > LONG_TEXT,
        Value::Array(_) | Value::Object(_) => true,
        _ => false,
    });
    if long {
        draft.description = format!("{} updated", label);
    }
    Some(draft)
}
