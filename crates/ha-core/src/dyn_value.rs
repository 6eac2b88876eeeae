//! Dynamically typed values carried by states and event payloads
//!
//! Event data arrives as arbitrary JSON. [`DynValue`] keeps that structure
//! but makes navigation total: looking up a field that does not exist, or a
//! field of something that is not a mapping, yields [`DynValue::Null`]
//! instead of an error. This lets rule predicates be written as plain
//! chains like `data["sensor"]["battery"].as_f64()`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

static NULL: DynValue = DynValue::Null;

/// A JSON-like tagged union with chain-safe field access
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DynValue {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<DynValue>),
    Map(BTreeMap<String, DynValue>),
}

impl DynValue {
    /// Look up a field; absent fields and non-map values give `Null`
    pub fn get(&self, key: &str) -> &DynValue {
        match self {
            DynValue::Map(map) => map.get(key).unwrap_or(&NULL),
            _ => &NULL,
        }
    }

    /// Look up a list element; out of range and non-list values give `Null`
    pub fn at(&self, index: usize) -> &DynValue {
        match self {
            DynValue::List(items) => items.get(index).unwrap_or(&NULL),
            _ => &NULL,
        }
    }

    /// Follow a dotted path such as `attributes.battery.level`
    pub fn path(&self, path: &str) -> &DynValue {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .fold(self, |value, segment| match value {
                DynValue::List(_) => segment
                    .parse::<usize>()
                    .map(|i| value.at(i))
                    .unwrap_or(&NULL),
                _ => value.get(segment),
            })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DynValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DynValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DynValue::Number(n) => n.as_f64(),
            DynValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DynValue::Number(n) => n.as_i64(),
            DynValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, DynValue>> {
        match self {
            DynValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Convert into a `serde_json::Value` for the wire
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::from(self.clone())
    }
}

impl PartialEq for DynValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DynValue::Null, DynValue::Null) => true,
            (DynValue::Bool(a), DynValue::Bool(b)) => a == b,
            // 1 and 1.0 are the same reading
            (DynValue::Number(a), DynValue::Number(b)) => match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => a == b,
                _ => a.as_f64() == b.as_f64(),
            },
            (DynValue::String(a), DynValue::String(b)) => a == b,
            (DynValue::List(a), DynValue::List(b)) => a == b,
            (DynValue::Map(a), DynValue::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl std::ops::Index<&str> for DynValue {
    type Output = DynValue;

    fn index(&self, key: &str) -> &DynValue {
        self.get(key)
    }
}

impl std::ops::Index<usize> for DynValue {
    type Output = DynValue;

    fn index(&self, index: usize) -> &DynValue {
        self.at(index)
    }
}

impl PartialEq<str> for DynValue {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == Some(other)
    }
}

impl PartialEq<&str> for DynValue {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

impl fmt::Display for DynValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DynValue::Null => f.write_str("null"),
            DynValue::Bool(b) => write!(f, "{b}"),
            DynValue::Number(n) => write!(f, "{n}"),
            DynValue::String(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<serde_json::Value> for DynValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => DynValue::Null,
            serde_json::Value::Bool(b) => DynValue::Bool(b),
            serde_json::Value::Number(n) => DynValue::Number(n),
            serde_json::Value::String(s) => DynValue::String(s),
            serde_json::Value::Array(items) => {
                DynValue::List(items.into_iter().map(DynValue::from).collect())
            }
            serde_json::Value::Object(map) => {
                DynValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<DynValue> for serde_json::Value {
    fn from(value: DynValue) -> Self {
        match value {
            DynValue::Null => serde_json::Value::Null,
            DynValue::Bool(b) => serde_json::Value::Bool(b),
            DynValue::Number(n) => serde_json::Value::Number(n),
            DynValue::String(s) => serde_json::Value::String(s),
            DynValue::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            DynValue::Map(map) => {
                serde_json::Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<&str> for DynValue {
    fn from(s: &str) -> Self {
        DynValue::String(s.to_string())
    }
}

impl From<String> for DynValue {
    fn from(s: String) -> Self {
        DynValue::String(s)
    }
}

impl From<bool> for DynValue {
    fn from(b: bool) -> Self {
        DynValue::Bool(b)
    }
}

impl From<i64> for DynValue {
    fn from(n: i64) -> Self {
        DynValue::Number(n.into())
    }
}

impl From<i32> for DynValue {
    fn from(n: i32) -> Self {
        DynValue::Number(n.into())
    }
}

impl From<f64> for DynValue {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n)
            .map(DynValue::Number)
            .unwrap_or(DynValue::Null)
    }
}

impl<T: Into<DynValue>> From<Option<T>> for DynValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(DynValue::Null)
    }
}
