use std::collections::BTreeSet;

use serde_json::{json, Value};

use crate::differ::detector::{
    array_section, keyed_items, scalar_change, value_change, CategoryDetector, ChangeDraft,
};
use crate::differ::errors::{DetectionError, DetectionResult};
use crate::model::{ChangeCategory, Priority};
use crate::snapshot::{display_value, numeric_value, Snapshot};

/// Character level, experience and per-class levels
pub struct ProgressionDetector;

impl CategoryDetector for ProgressionDetector {
    fn category(&self) -> ChangeCategory {
        ChangeCategory::Progression
    }

    fn detect(&self, old: &Snapshot, new: &Snapshot) -> DetectionResult<Vec<ChangeDraft>> {
        let category = self.category();
        let mut drafts = Vec::new();

        drafts.extend(scalar_change(category, "level", "Level", old, new, Priority::High, true)?);
        drafts.extend(scalar_change(
            category,
            "experience",
            "Experience",
            old,
            new,
            Priority::Low,
            true,
        )?);

        let old_classes = keyed_items(array_section(old, "classes")?, "classes")?;
        let new_classes = keyed_items(array_section(new, "classes")?, "classes")?;

        let names: BTreeSet<&String> = old_classes.keys().chain(new_classes.keys()).collect();
        for name in names {
            let before = old_classes.get(name).and_then(|items| items.first()).copied();
            let after = new_classes.get(name).and_then(|items| items.first()).copied();
            let path = format!("classes.{}", name);

            match (before, after) {
                (None, Some(class)) => {
                    let normalized = normalize_class(name, class)?;
                    drafts.push(ChangeDraft {
                        category,
                        description: format!("Gained class: {}", class_label(&normalized)),
                        field_path: path,
                        old_value: None,
                        new_value: Some(normalized),
                        priority: Priority::High,
                    });
                }
                (Some(class), None) => {
                    let normalized = normalize_class(name, class)?;
                    drafts.push(ChangeDraft {
                        category,
                        description: format!("Lost class: {}", class_label(&normalized)),
                        field_path: path,
                        old_value: Some(normalized),
                        new_value: None,
                        priority: Priority::High,
                    });
                }
                (Some(a), Some(b)) => {
                    let a = normalize_class(name, a)?;
                    let b = normalize_class(name, b)?;
                    for (field, priority) in [("level", Priority::High), ("subclass", Priority::Medium)] {
                        drafts.extend(value_change(
                            category,
                            &format!("{}.{}", path, field),
                            &format!("{} {}", name, field),
                            a.get(field),
                            b.get(field),
                            priority,
                        ));
                    }
                }
                (None, None) => {}
            }
        }

        Ok(drafts)
    }
}

/// `{name, level, subclass?}` regardless of how the class was written
fn normalize_class(name: &str, item: &Value) -> DetectionResult<Value> {
    let mut class = json!({ "name": name });
    if let Value::Object(map) = item {
        if let Some(level) = map.get("level").filter(|v| !v.is_null()) {
            if numeric_value(level).is_none() {
                return Err(DetectionError::malformed(
                    format!("classes.{}.level", name),
                    "class level must be a number",
                ));
            }
            class["level"] = level.clone();
        }
        if let Some(subclass) = map.get("subclass").filter(|v| !v.is_null()) {
            class["subclass"] = subclass.clone();
        }
    }
    Ok(class)
}

fn class_label(class: &Value) -> String {
    let name = class.get("name").map(display_value).unwrap_or_default();
    match class.get("level") {
        Some(level) => format!("{} (level {})", name, display_value(level)),
        None => name,
    }
}
