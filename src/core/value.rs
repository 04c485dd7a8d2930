// Scalar cell values plus field inference (load) and rendering (save).
use std::fmt;

use serde_json::Value as JsonValue;

/// One cell of the table.
///
/// `Null` stands for a missing value: an empty field on load, a column the row
/// never supplied, or a column added to the schema after the row was inserted.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    /// Infers a typed value from a raw field.
    ///
    /// Numbers and booleans are only recognised when rendering them back yields
    /// the exact field text, so a load/save cycle never rewrites a value.
    /// Non-finite spellings (`NaN`, `inf`) stay strings.
    pub fn infer(field: &str) -> Self {
        if field.is_empty() {
            return Self::Null;
        }
        match field {
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            _ => {}
        }
        if let Ok(n) = field.parse::<i64>() {
            if n.to_string() == field {
                return Self::Int(n);
            }
        }
        if let Ok(f) = field.parse::<f64>() {
            if f.is_finite() && render_float(f) == field {
                return Self::Float(f);
            }
        }
        Self::Str(field.to_string())
    }

    /// Uninterpreted field: empty is still `Null`, everything else a string.
    pub fn raw(field: &str) -> Self {
        if field.is_empty() {
            Self::Null
        } else {
            Self::Str(field.to_string())
        }
    }

    /// Text written to the backing file for this cell.
    pub fn render(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(n) => n.to_string(),
            Self::Float(f) => render_float(*f),
            Self::Str(s) => s.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Int(n) => JsonValue::from(*n),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Str(s) => JsonValue::String(s.clone()),
        }
    }

    /// Converts JSON into a cell; arrays and objects are kept as their JSON text.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Self::Str(s.clone()),
            other => Self::Str(other.to_string()),
        }
    }
}

fn render_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            other => write!(f, "{}", other.render()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::Value;
    use serde_json::json;

    #[test]
    fn infer_recognises_canonical_scalars() {
        assert_eq!(Value::infer(""), Value::Null);
        assert_eq!(Value::infer("true"), Value::Bool(true));
        assert_eq!(Value::infer("42"), Value::Int(42));
        assert_eq!(Value::infer("-7"), Value::Int(-7));
        assert_eq!(Value::infer("36.0"), Value::Float(36.0));
        assert_eq!(Value::infer("1.5"), Value::Float(1.5));
        assert_eq!(Value::infer("Alice"), Value::Str("Alice".to_string()));
    }

    #[test]
    fn infer_keeps_non_canonical_numbers_as_text() {
        for field in ["007", "+3", "1e5", "1.50", "True", " 4"] {
            assert_eq!(Value::infer(field), Value::Str(field.to_string()), "{field}");
        }
    }

    #[test]
    fn infer_keeps_non_finite_as_text() {
        for field in ["NaN", "inf", "-inf", "infinity"] {
            assert_eq!(Value::infer(field), Value::Str(field.to_string()), "{field}");
        }
        assert_eq!(Value::infer("NaN"), Value::infer("NaN"));
    }

    #[test]
    fn inferred_values_render_back_unchanged() {
        for field in ["", "false", "0", "-12", "3.25", "100.0", "x,y", "007"] {
            assert_eq!(Value::infer(field).render(), field);
        }
    }

    #[test]
    fn raw_only_maps_empty_to_null() {
        assert_eq!(Value::raw(""), Value::Null);
        assert_eq!(Value::raw("42"), Value::Str("42".to_string()));
    }

    #[test]
    fn json_conversion_keeps_numeric_kind() {
        assert_eq!(Value::from_json(&json!(3)), Value::Int(3));
        assert_eq!(Value::from_json(&json!(3.5)), Value::Float(3.5));
        assert_eq!(Value::from_json(&json!([1, 2])), Value::Str("[1,2]".to_string()));
        assert_eq!(Value::Int(36).to_json(), json!(36));
        assert_eq!(Value::Float(f64::NAN).to_json(), json!(null));
    }

    #[test]
    fn option_into_value() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Str("x".to_string()));
    }
}
