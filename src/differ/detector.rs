//! Detector capability and the comparison helpers detectors share

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use super::errors::{DetectionError, DetectionResult};
use crate::model::{ChangeCategory, Priority};
use crate::snapshot::{display_value, numeric_value, values_equal, Snapshot};

/// A change as reported by a detector, before the differ stamps identity
/// and time onto it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeDraft {
    pub category: ChangeCategory,
    pub field_path: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub priority: Priority,
    pub description: String,
}

/// Compares two snapshots for one category.
///
/// Implementations must be pure: they read both snapshots and mutate
/// neither. Results are expected in a deterministic order.
pub trait CategoryDetector: Send + Sync {
    fn category(&self) -> ChangeCategory;

    fn detect(&self, old: &Snapshot, new: &Snapshot) -> DetectionResult<Vec<ChangeDraft>>;
}

/// Reads an optional object section.
pub(crate) fn object_section<'a>(
    snapshot: &'a Snapshot,
    path: &str,
) -> DetectionResult<Option<&'a Map<String, Value>>> {
    match snapshot.get(path) {
        None => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(other) => Err(DetectionError::malformed(
            path,
            format!("expected an object, found {}", type_name(other)),
        )),
    }
}

/// Reads an optional list section.
pub(crate) fn array_section<'a>(
    snapshot: &'a Snapshot,
    path: &str,
) -> DetectionResult<Option<&'a Vec<Value>>> {
    match snapshot.get(path) {
        None => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(other) => Err(DetectionError::malformed(
            path,
            format!("expected a list, found {}", type_name(other)),
        )),
    }
}

/// Collects the names of a list of strings or `{ "name": ... }` objects.
pub(crate) fn name_set(snapshot: &Snapshot, path: &str) -> DetectionResult<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    if let Some(items) = array_section(snapshot, path)? {
        for item in items {
            names.insert(item_name(item).ok_or_else(|| {
                DetectionError::malformed(path, "list entries must be names or objects with a name")
            })?);
        }
    }
    Ok(names)
}

/// Name of a list entry: the string itself, or its `name` field.
pub(crate) fn item_name(item: &Value) -> Option<String> {
    match item {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(map) => map
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

/// Emits one addition/removal per name that is in only one of the sets.
///
/// Paths are `<path>.<name>`; the value is the name itself.
pub(crate) fn set_changes(
    category: ChangeCategory,
    path: &str,
    old: &BTreeSet<String>,
    new: &BTreeSet<String>,
    priority: Priority,
    noun: &str,
) -> Vec<ChangeDraft> {
    let mut drafts = Vec::new();
    for name in old.union(new) {
        let (old_value, new_value, description) = match (old.contains(name), new.contains(name)) {
            (false, true) => (None, Some(name), format!("Gained {}: {}", noun, name)),
            (true, false) => (Some(name), None, format!("Lost {}: {}", noun, name)),
            _ => continue,
        };
        drafts.push(ChangeDraft {
            category,
            field_path: format!("{}.{}", path, name),
            old_value: old_value.map(|n| Value::String(n.clone())),
            new_value: new_value.map(|n| Value::String(n.clone())),
            priority,
            description,
        });
    }
    drafts
}

/// Compares one scalar field; numeric fields must hold numbers.
pub(crate) fn scalar_change(
    category: ChangeCategory,
    path: &str,
    label: &str,
    old: &Snapshot,
    new: &Snapshot,
    priority: Priority,
    numeric: bool,
) -> DetectionResult<Option<ChangeDraft>> {
    let old_value = old.get(path);
    let new_value = new.get(path);
    if numeric {
        for value in [old_value, new_value].into_iter().flatten() {
            if numeric_value(value).is_none() {
                return Err(DetectionError::malformed(
                    path,
                    format!("expected a number, found {}", type_name(value)),
                ));
            }
        }
    }
    Ok(value_change(category, path, label, old_value, new_value, priority))
}

/// Builds a change for two optional values, or `None` if they are equal.
pub(crate) fn value_change(
    category: ChangeCategory,
    path: &str,
    label: &str,
    old_value: Option<&Value>,
    new_value: Option<&Value>,
    priority: Priority,
) -> Option<ChangeDraft> {
    match (old_value, new_value) {
        (None, None) => return None,
        (Some(a), Some(b)) if values_equal(a, b) => return None,
        _ => {}
    }
    Some(ChangeDraft {
        category,
        field_path: path.to_string(),
        old_value: old_value.cloned(),
        new_value: new_value.cloned(),
        priority,
        description: describe_transition(label, old_value, new_value),
    })
}

/// "Armor class increased from 15 to 17", "Alignment set to Lawful Good"
pub(crate) fn describe_transition(label: &str, old: Option<&Value>, new: Option<&Value>) -> String {
    match (old, new) {
        (None, Some(n)) => format!("{} set to {}", label, display_value(n)),
        (Some(o), None) => format!("{} removed (was {})", label, display_value(o)),
        (Some(o), Some(n)) => match (numeric_value(o), numeric_value(n)) {
            (Some(a), Some(b)) if b > a => format!(
                "{} increased from {} to {}",
                label,
                display_value(o),
                display_value(n)
            ),
            (Some(a), Some(b)) if b < a => format!(
                "{} decreased from {} to {}",
                label,
                display_value(o),
                display_value(n)
            ),
            _ => format!(
                "{} changed from {} to {}",
                label,
                display_value(o),
                display_value(n)
            ),
        },
        (None, None) => format!("{} unchanged", label),
    }
}

/// Union of the keys of two optional objects, sorted.
pub(crate) fn union_keys<'a>(
    old: Option<&'a Map<String, Value>>,
    new: Option<&'a Map<String, Value>>,
) -> BTreeSet<&'a str> {
    old.into_iter()
        .chain(new)
        .flat_map(|m| m.keys().map(String::as_str))
        .collect()
}

/// Keyed view of a list of `{ "name": ... }` objects.
pub(crate) fn keyed_items<'a>(
    items: Option<&'a Vec<Value>>,
    path: &str,
) -> DetectionResult<BTreeMap<String, Vec<&'a Value>>> {
    let mut keyed: BTreeMap<String, Vec<&Value>> = BTreeMap::new();
    for item in items.into_iter().flatten() {
        let name = item_name(item).ok_or_else(|| {
            DetectionError::malformed(path, "every entry needs a name")
        })?;
        keyed.entry(name).or_default().push(item);
    }
    Ok(keyed)
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Capitalizes the first letter of a snake_case key: `spell_save_dc` -> `Spell save dc`.
pub(crate) fn humanize(key: &str) -> String {
    let spaced = key.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
