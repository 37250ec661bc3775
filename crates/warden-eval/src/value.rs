//! The `Value` model (C1, spec.md §3/§4.1).
//!
//! A closed tagged sum plus two sentinel variants that are not JSON-representable.
//! Every constructor/accessor here is total: nothing in this module panics.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use warden_core::source::SourceLocation;

/// A value flowing through expression evaluation.
///
/// `Object` is a `BTreeMap` rather than an insertion-ordered map: canonical
/// (lexical) key order satisfies spec.md's "ordered map" requirement while
/// keeping the representation as simple as `tenor-eval`'s own `Record(BTreeMap<..>)`
/// (`tenor-eval/src/types/values.rs`).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(Decimal),
    Text(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    /// The absence of a value. Not serialisable to JSON; omitted from objects on output.
    Undefined,
    /// A total-evaluation sentinel. Equal to another `Error` iff message and location match.
    Error(String, Option<SourceLocation>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Number(_) => "Number",
            Value::Text(_) => "Text",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
            Value::Undefined => "Undefined",
            Value::Error(..) => "Error",
        }
    }

    pub fn error(message: impl Into<String>) -> Value {
        Value::Error(message.into(), None)
    }

    pub fn error_at(message: impl Into<String>, location: SourceLocation) -> Value {
        Value::Error(message.into(), Some(location))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(..))
    }

    pub fn text(s: impl Into<String>) -> Value {
        Value::Text(s.into())
    }

    pub fn number_from_str(s: &str) -> Value {
        match Decimal::from_str(s) {
            Ok(d) => Value::Number(d),
            Err(_) => Value::error(format!("invalid number literal '{}'", s)),
        }
    }

    // -- convenience constants (spec.md §3) --------------------------------

    pub const fn empty_array() -> Value {
        Value::Array(Vec::new())
    }

    /// `truthy(v) -> Boolean|Error`: `True`/`False` pass through; anything else
    /// is `Error("boolean required")` (§4.1).
    pub fn truthy(&self) -> Value {
        match self {
            Value::Boolean(b) => Value::Boolean(*b),
            Value::Error(..) => self.clone(),
            _ => Value::error("boolean required"),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Deep structural equality (§3/§4.1). `Undefined` holes in objects are ignored
    /// when comparing two objects (a key mapped to `Undefined` is as if absent);
    /// `Undefined == Undefined` is `true` but `undefined == 1` (handled one level up
    /// in the expression compiler's `==` lowering) must not reach here as a naive
    /// `false` from type mismatch -- see `compiler::expr` for the `==`-specific rule.
    pub fn deep_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Undefined, Value::Undefined) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.deep_equals(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                let present = |m: &BTreeMap<String, Value>| {
                    m.iter().filter(|(_, v)| !matches!(v, Value::Undefined)).count()
                };
                if present(a) != present(b) {
                    return false;
                }
                a.iter()
                    .filter(|(_, v)| !matches!(v, Value::Undefined))
                    .all(|(k, v)| b.get(k).map(|bv| v.deep_equals(bv)).unwrap_or(false))
            }
            (Value::Error(m1, l1), Value::Error(m2, l2)) => m1 == m2 && l1 == l2,
            _ => false,
        }
    }

    // -- JSON marshalling ----------------------------------------------------

    /// `Undefined` is dropped from object fields; serialising a bare `Undefined`
    /// (e.g. as an array element) degrades to `null` since JSON has no such hole.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Undefined => J::Null,
            Value::Boolean(b) => J::Bool(*b),
            Value::Number(d) => {
                // Prefer a numeric JSON value when it round-trips cleanly, falling back
                // to a string for values serde_json::Number cannot represent exactly.
                let text = d.normalize().to_string();
                serde_json::Number::from_str(&text)
                    .map(J::Number)
                    .unwrap_or(J::String(text))
            }
            Value::Text(s) => J::String(s.clone()),
            Value::Array(items) => J::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(fields) => {
                let mut map = serde_json::Map::new();
                for (k, v) in fields {
                    if matches!(v, Value::Undefined) {
                        continue;
                    }
                    map.insert(k.clone(), v.to_json());
                }
                J::Object(map)
            }
            Value::Error(msg, loc) => {
                let mut map = serde_json::Map::new();
                map.insert("error".to_string(), J::String(msg.clone()));
                if let Some(loc) = loc {
                    map.insert("location".to_string(), serde_json::to_value(loc).unwrap_or(J::Null));
                }
                J::Object(map)
            }
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => Value::number_from_str(&n.to_string()),
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(fields) => {
                Value::Object(fields.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from_json(&json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_for_representable_values() {
        let v = Value::Object(BTreeMap::from([
            ("a".to_string(), Value::Number(Decimal::from(1))),
            ("b".to_string(), Value::Array(vec![Value::Boolean(true), Value::Null])),
        ]));
        let json = v.to_json();
        let back = Value::from_json(&json);
        assert!(v.deep_equals(&back));
    }

    #[test]
    fn undefined_object_fields_are_omitted_on_serialization() {
        let v = Value::Object(BTreeMap::from([
            ("present".to_string(), Value::Boolean(true)),
            ("missing".to_string(), Value::Undefined),
        ]));
        let json = v.to_json();
        assert!(json.get("present").is_some());
        assert!(json.get("missing").is_none());
    }

    #[test]
    fn deep_equals_ignores_undefined_holes_in_objects() {
        let a = Value::Object(BTreeMap::from([("x".to_string(), Value::Undefined)]));
        let b = Value::Object(BTreeMap::new());
        assert!(a.deep_equals(&b));
    }

    #[test]
    fn undefined_equals_undefined() {
        assert!(Value::Undefined.deep_equals(&Value::Undefined));
    }

    #[test]
    fn numbers_compare_by_mathematical_value_regardless_of_scale() {
        assert!(Value::Number(Decimal::from_str("1.0").unwrap())
            .deep_equals(&Value::Number(Decimal::from_str("1.00").unwrap())));
    }

    #[test]
    fn errors_equal_only_when_message_and_location_match() {
        let e1 = Value::error("boom");
        let e2 = Value::error("boom");
        let e3 = Value::error("bang");
        assert!(e1.deep_equals(&e2));
        assert!(!e1.deep_equals(&e3));
    }

    #[test]
    fn truthy_rejects_non_boolean() {
        assert_eq!(Value::Number(Decimal::from(1)).truthy(), Value::error("boolean required"));
        assert_eq!(Value::Boolean(true).truthy(), Value::Boolean(true));
    }
}
