//! Attribute values
//!
//! The nested, dynamically shaped values found under `values` in a
//! structured state document.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

/// A dynamically typed attribute value as produced by `terraform show -json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<AttributeValue>),
    Map(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttributeValue]> {
        match self {
            AttributeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, AttributeValue>> {
        match self {
            AttributeValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.as_map()?.get(key)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Short type name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            AttributeValue::Null => "null",
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Number(_) => "number",
            AttributeValue::String(_) => "string",
            AttributeValue::List(_) => "list",
            AttributeValue::Map(_) => "map",
        }
    }
}

impl Default for AttributeValue {
    fn default() -> Self {
        AttributeValue::Null
    }
}

impl From<serde_json::Value> for AttributeValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => AttributeValue::Null,
            serde_json::Value::Bool(b) => AttributeValue::Bool(b),
            serde_json::Value::Number(n) => AttributeValue::Number(n),
            serde_json::Value::String(s) => AttributeValue::String(s),
            serde_json::Value::Array(items) => {
                AttributeValue::List(items.into_iter().map(AttributeValue::from).collect())
            }
            serde_json::Value::Object(entries) => AttributeValue::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, AttributeValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Create a map value with the given attributes
pub fn make_map(attrs: Vec<(&str, AttributeValue)>) -> AttributeValue {
    AttributeValue::Map(
        attrs
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
    )
}

/// Create a string value
pub fn string_value(s: impl Into<String>) -> AttributeValue {
    AttributeValue::String(s.into())
}

/// Create a number value from i64
pub fn int_value(n: i64) -> AttributeValue {
    AttributeValue::Number(serde_json::Number::from(n))
}

/// Create a number value from f64
pub fn float_value(n: f64) -> AttributeValue {
    serde_json::Number::from_f64(n)
        .map(AttributeValue::Number)
        .unwrap_or(AttributeValue::Null)
}

/// Create a bool value
pub fn bool_value(b: bool) -> AttributeValue {
    AttributeValue::Bool(b)
}

/// Create a list value
pub fn list_value(items: Vec<AttributeValue>) -> AttributeValue {
    AttributeValue::List(items)
}
