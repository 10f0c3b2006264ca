//! Value - the universal payload of attributes and tree leaves.
//!
//! A `Value` is a tagged union over bool, integer, real, string and nested
//! sequences. Conversions are best effort: asking for a type the value cannot
//! represent yields that type's default rather than an error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An ordered sequence of values.
pub type Values = Vec<Value>;

/// The kind of data held by a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Boolean,
    Integer,
    Real,
    String,
    Values,
}

impl ValueType {
    /// Wire/type character for this kind.
    pub fn as_char(self) -> char {
        match self {
            ValueType::Boolean => 'b',
            ValueType::Integer => 'i',
            ValueType::Real => 'r',
            ValueType::String => 's',
            ValueType::Values => 'v',
        }
    }
}

/// Check a declared type character against the actual type of a value.
///
/// `'n'` declares a numeric argument and accepts both integers and reals.
pub fn type_char_matches(declared: char, actual: char) -> bool {
    match declared {
        'n' => actual == 'i' || actual == 'r',
        other => other == actual,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
enum Data {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    String(String),
    Values(Values),
}

/// A tagged scalar or nested sequence, optionally carrying a name.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    data: Data,
    name: Option<String>,
}

impl Default for Value {
    fn default() -> Self {
        Value::from(0i64)
    }
}

impl Value {
    /// Attach a name to a value, e.g. a field of a media-info record.
    pub fn named(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut value = value.into();
        value.name = Some(name.into());
        value
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn value_type(&self) -> ValueType {
        match self.data {
            Data::Boolean(_) => ValueType::Boolean,
            Data::Integer(_) => ValueType::Integer,
            Data::Real(_) => ValueType::Real,
            Data::String(_) => ValueType::String,
            Data::Values(_) => ValueType::Values,
        }
    }

    pub fn type_char(&self) -> char {
        self.value_type().as_char()
    }

    /// 1 for scalars, element count for sequences.
    pub fn size(&self) -> usize {
        match &self.data {
            Data::Values(values) => values.len(),
            _ => 1,
        }
    }

    pub fn is_values(&self) -> bool {
        matches!(self.data, Data::Values(_))
    }

    pub fn as_bool(&self) -> bool {
        match &self.data {
            Data::Boolean(b) => *b,
            Data::Integer(i) => *i != 0,
            Data::Real(r) => *r != 0.0,
            Data::String(s) => matches!(s.trim(), "true" | "1"),
            Data::Values(v) if v.len() == 1 => v[0].as_bool(),
            Data::Values(_) => false,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match &self.data {
            Data::Boolean(b) => i64::from(*b),
            Data::Integer(i) => *i,
            Data::Real(r) => *r as i64,
            Data::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|r| r as i64))
                    .unwrap_or_default()
            }
            Data::Values(v) if v.len() == 1 => v[0].as_i64(),
            Data::Values(_) => 0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match &self.data {
            Data::Boolean(b) => f64::from(u8::from(*b)),
            Data::Integer(i) => *i as f64,
            Data::Real(r) => *r,
            Data::String(s) => s.trim().parse().unwrap_or_default(),
            Data::Values(v) if v.len() == 1 => v[0].as_f64(),
            Data::Values(_) => 0.0,
        }
    }

    pub fn as_string(&self) -> String {
        match &self.data {
            Data::Boolean(b) => b.to_string(),
            Data::Integer(i) => i.to_string(),
            Data::Real(r) => r.to_string(),
            Data::String(s) => s.clone(),
            Data::Values(values) => {
                let inner: Vec<String> = values.iter().map(Value::as_string).collect();
                format!("[{}]", inner.join(", "))
            }
        }
    }

    /// Sequences are returned as-is, scalars are wrapped in a one-element sequence.
    pub fn as_values(&self) -> Values {
        match &self.data {
            Data::Values(values) => values.clone(),
            _ => {
                let mut scalar = self.clone();
                scalar.name = None;
                vec![scalar]
            }
        }
    }

    /// Borrow the nested sequence, if this is one.
    pub fn values(&self) -> Option<&Values> {
        match &self.data {
            Data::Values(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.data {
            Data::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{}: ", name)?;
        }
        f.write_str(&self.as_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value { data: Data::Boolean(v), name: None }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value { data: Data::Integer(v), name: None }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::from(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::from(i64::from(v))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::from(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value { data: Data::Real(v), name: None }
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::from(f64::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value { data: Data::String(v), name: None }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::from(v.to_string())
    }
}

impl From<Values> for Value {
    fn from(v: Values) -> Self {
        Value { data: Data::Values(v), name: None }
    }
}

// Named values serialize as a single-entry map so JSON configs stay readable.
impl Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        match &self.name {
            Some(name) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(name, &self.data)?;
                map.end()
            }
            None => self.data.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        from_json(json).map_err(serde::de::Error::custom)
    }
}

fn from_json(json: serde_json::Value) -> Result<Value, String> {
    use serde_json::Value as Json;
    match json {
        Json::Bool(b) => Ok(Value::from(b)),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::from(i)),
            None => n
                .as_f64()
                .map(Value::from)
                .ok_or_else(|| format!("unrepresentable number {}", n)),
        },
        Json::String(s) => Ok(Value::from(s)),
        Json::Array(items) => items
            .into_iter()
            .map(from_json)
            .collect::<Result<Values, _>>()
            .map(Value::from),
        Json::Object(map) if map.len() == 1 => {
            let Some((name, inner)) = map.into_iter().next() else {
                return Err("empty object".to_string());
            };
            Ok(Value::named(name, from_json(inner)?))
        }
        Json::Object(_) => Err("a named value must be an object with exactly one key".to_string()),
        Json::Null => Err("null is not a value".to_string()),
    }
}

/// Build a `Values` from heterogeneous literals: `values![1, "two", 3.0]`.
#[macro_export]
macro_rules! values {
    () => { $crate::value::Values::new() };
    ($($item:expr),+ $(,)?) => {
        vec![$($crate::value::Value::from($item)),+]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_chars() {
        assert_eq!(Value::from(true).type_char(), 'b');
        assert_eq!(Value::from(3).type_char(), 'i');
        assert_eq!(Value::from(3.5).type_char(), 'r');
        assert_eq!(Value::from("x").type_char(), 's');
        assert_eq!(Value::from(values![1, 2]).type_char(), 'v');
    }

    #[test]
    fn numeric_declaration_accepts_both_kinds() {
        assert!(type_char_matches('n', 'i'));
        assert!(type_char_matches('n', 'r'));
        assert!(!type_char_matches('n', 's'));
        assert!(!type_char_matches('i', 'r'));
    }

    #[test]
    fn best_effort_coercion() {
        assert_eq!(Value::from("42").as_i64(), 42);
        assert_eq!(Value::from("4.5").as_f64(), 4.5);
        assert_eq!(Value::from("nope").as_i64(), 0);
        assert_eq!(Value::from(2.9).as_i64(), 2);
        assert_eq!(Value::from(7).as_string(), "7");
        assert_eq!(Value::from(values![1, 2]).as_i64(), 0);
        assert_eq!(Value::from(values![5]).as_i64(), 5);
        assert_eq!(Value::from(values![1, "a"]).as_string(), "[1, a]");
        assert_eq!(Value::from(3).as_values(), values![3]);
    }

    #[test]
    fn size_and_equality() {
        let nested = Value::from(values![1, values![2.0, "three"], true]);
        assert_eq!(nested.size(), 3);
        assert_eq!(Value::from("x").size(), 1);
        assert_eq!(nested.clone(), nested);
        assert_ne!(Value::from(1), Value::from(1.0));
        assert_ne!(Value::from(1), Value::named("a", 1));
    }

    #[test]
    fn json_roundtrip_keeps_names() {
        let value = Value::from(values![Value::named("width", 1920), "codec", 0.5]);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"[{"width":1920},"codec",0.5]"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
