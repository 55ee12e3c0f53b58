//! Value comparison helpers shared by the detectors

use serde_json::Value;

const EPSILON: f64 = 1e-9;

/// Interprets a JSON value as a number.
///
/// Numbers are taken as-is; strings are accepted when they parse as a
/// number after trimming and dropping a leading `+` ("+5", " 12 ").
pub fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
            if unsigned.is_empty() || !unsigned.chars().any(|c| c.is_ascii_digit()) {
                return None;
            }
            unsigned.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

/// Compares two values by meaning rather than by formatting.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (numeric_value(a), numeric_value(b)) {
        return (x - y).abs() < EPSILON;
    }
    match (a, b) {
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map(|y| values_equal(x, y)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Renders a value for descriptions: strings unquoted, whole numbers
/// without a fractional part.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::Null => "none".to_string(),
        other => other.to_string(),
    }
}
