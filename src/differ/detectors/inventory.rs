use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map, Value};

use crate::differ::detector::{array_section, keyed_items, value_change, CategoryDetector, ChangeDraft};
use crate::differ::errors::{DetectionError, DetectionResult};
use crate::model::{ChangeCategory, Priority};
use crate::snapshot::{display_value, numeric_value, Snapshot};

/// Item fields carried into the normalized item value
const BONUS_FIELDS: [&str; 3] = ["ac_bonus", "armor_class", "attack_bonus"];

/// Items, quantities and equipped state.
///
/// Entries sharing a name are merged: quantities add up and the item is
/// equipped if any copy is.
pub struct InventoryDetector;

impl CategoryDetector for InventoryDetector {
    fn category(&self) -> ChangeCategory {
        ChangeCategory::Inventory
    }

    fn detect(&self, old: &Snapshot, new: &Snapshot) -> DetectionResult<Vec<ChangeDraft>> {
        let category = self.category();
        let before = aggregate(array_section(old, "inventory")?)?;
        let after = aggregate(array_section(new, "inventory")?)?;

        let names: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
        let mut drafts = Vec::new();
        for name in names {
            let path = format!("inventory.{}", name);
            match (before.get(name), after.get(name)) {
                (None, Some(item)) => drafts.push(ChangeDraft {
                    category,
                    description: format!("Added item: {}", item_label(name, item)),
                    field_path: path,
                    old_value: None,
                    new_value: Some(item.clone()),
                    priority: Priority::Medium,
                }),
                (Some(item), None) => drafts.push(ChangeDraft {
                    category,
                    description: format!("Removed item: {}", item_label(name, item)),
                    field_path: path,
                    old_value: Some(item.clone()),
                    new_value: None,
                    priority: Priority::Medium,
                }),
                (Some(a), Some(b)) => {
                    drafts.extend(value_change(
                        category,
                        &format!("{}.quantity", path),
                        &format!("{} quantity", name),
                        a.get("quantity"),
                        b.get("quantity"),
                        Priority::Low,
                    ));
                    let was = a.get("equipped").and_then(Value::as_bool).unwrap_or(false);
                    let is = b.get("equipped").and_then(Value::as_bool).unwrap_or(false);
                    if was != is {
                        drafts.push(ChangeDraft {
                            category,
                            field_path: format!("{}.equipped", path),
                            old_value: Some(Value::Bool(was)),
                            new_value: Some(Value::Bool(is)),
                            priority: Priority::Medium,
                            description: if is {
                                format!("Equipped {}", name)
                            } else {
                                format!("Unequipped {}", name)
                            },
                        });
                    }
                }
                (None, None) => {}
            }
        }
        Ok(drafts)
    }
}

fn aggregate(items: Option<&Vec<Value>>) -> DetectionResult<BTreeMap<String, Value>> {
    let mut merged = BTreeMap::new();
    for (name, copies) in keyed_items(items, "inventory")? {
        let mut quantity = 0.0;
        let mut equipped = false;
        let mut item = Map::new();
        item.insert("name".to_string(), Value::String(name.clone()));

        for copy in copies {
            let fields = copy.as_object();
            quantity += match fields.and_then(|f| f.get("quantity")).filter(|v| !v.is_null()) {
                Some(q) => numeric_value(q).ok_or_else(|| {
                    DetectionError::malformed(
                        format!("inventory.{}.quantity", name),
                        "quantity must be a number",
                    )
                })?,
                None => 1.0,
            };
            equipped |= fields
                .and_then(|f| f.get("equipped"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            for key in BONUS_FIELDS {
                if let Some(bonus) = fields.and_then(|f| f.get(key)).filter(|v| !v.is_null()) {
                    item.entry(key.to_string()).or_insert_with(|| bonus.clone());
                }
            }
        }

        item.insert("quantity".to_string(), json!(quantity_value(quantity)));
        item.insert("equipped".to_string(), Value::Bool(equipped));
        merged.insert(name, Value::Object(item));
    }
    Ok(merged)
}

/// Whole quantities stay integers in the recorded value
fn quantity_value(quantity: f64) -> Value {
    if quantity.fract() == 0.0 && quantity.abs() < 1e15 {
        json!(quantity as i64)
    } else {
        json!(quantity)
    }
}

fn item_label(name: &str, item: &Value) -> String {
    match item.get("quantity").and_then(numeric_value) {
        Some(q) if q != 1.0 => format!("{} (x{})", name, display_value(&quantity_value(q))),
        _ => name.to_string(),
    }
}
