//! Structured snapshots of a tracked character
//!
//! A snapshot is a JSON document addressed by dotted path
//! (`combat.initiative_bonus`, `classes.0.level`). Missing fields and
//! explicit `null` are both treated as absent.
//!
//! Numbers compare by value, not formatting: `5`, `5.0` and `"+5"` are
//! equal.

mod value;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use value::{display_value, numeric_value, values_equal};

/// Fields that must be present for a snapshot to be attributable
pub const IDENTITY_FIELD: &str = "id";

/// One complete structured representation of an entity at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    root: Value,
}

impl Snapshot {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    /// Parses a snapshot from JSON text.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json).map(Self::new)
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Looks up a value by dotted path. Returns `None` for missing or null
    /// values.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.root;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }

    /// Numeric value at `path`, if present and numeric
    pub fn number(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(numeric_value)
    }

    /// String value at `path`, if present and a string
    pub fn string(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Identity of the snapshot's entity, rendered as a string.
    ///
    /// Returns `None` when the identity field is missing, null, empty or of
    /// a non-scalar type.
    pub fn identity(&self) -> Option<String> {
        match self.get(IDENTITY_FIELD)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl From<Value> for Snapshot {
    fn from(root: Value) -> Self {
        Self::new(root)
    }
}
