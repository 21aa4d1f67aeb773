//! Secret payloads as read from and written to a store

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key/value payload of a single secret, ordered by key.
pub type SecretData = BTreeMap<String, Value>;

/// A single value stored under a secret key.
///
/// Stores speak JSON, so this mirrors the JSON data model with explicit variants instead of an
/// open-ended dynamic map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value.into())
    }
}

/// A secret read from the source store.
#[derive(Debug, Clone, PartialEq)]
pub struct Secret {
    /// full store path, e.g. `secret/data/apps/db`
    pub path: String,
    pub data: SecretData,
    /// version metadata reported by versioned engines, if any
    pub metadata: Option<SecretData>,
}

impl Secret {
    pub fn new(path: impl Into<String>, data: SecretData) -> Self {
        Self {
            path: path.into(),
            data,
            metadata: None,
        }
    }
}
