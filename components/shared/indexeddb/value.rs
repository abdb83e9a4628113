/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Metadata exposed by `Blob` and `File` values. Only these fields are
/// visible to key paths, the payload itself lives outside the engine.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BlobInfo {
    pub size: u64,
    pub type_: String,
    /// Present for `File` values only.
    pub name: Option<String>,
    /// Milliseconds since the epoch, present for `File` values only.
    pub last_modified: Option<f64>,
}

/// The output of the structured clone algorithm, as far as the engine is
/// concerned. This is what gets stored in object stores and what key paths
/// are evaluated against.
///
/// Values form an owned tree, so a value can never contain itself.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub enum StructuredValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Milliseconds since the epoch, possibly NaN for an invalid date.
    Date(f64),
    /// An `ArrayBuffer` or the bytes viewed by a buffer source.
    Binary(#[serde(with = "serde_bytes")] Vec<u8>),
    Blob(BlobInfo),
    Array(Vec<StructuredValue>),
    Object(IndexMap<String, StructuredValue>),
}

impl StructuredValue {
    /// An empty plain object.
    pub fn object() -> StructuredValue {
        StructuredValue::Object(IndexMap::new())
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, StructuredValue::Null | StructuredValue::Undefined)
    }

    /// Looks up an own property of a plain object.
    pub fn get(&self, property: &str) -> Option<&StructuredValue> {
        match self {
            StructuredValue::Object(properties) => properties.get(property),
            _ => None,
        }
    }

    /// Builder-style setter used to assemble objects; non-objects are left
    /// untouched.
    pub fn with(mut self, property: &str, value: impl Into<StructuredValue>) -> StructuredValue {
        if let StructuredValue::Object(properties) = &mut self {
            properties.insert(property.to_owned(), value.into());
        }
        self
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            StructuredValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StructuredValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Serializes the value for the storage backend.
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<StructuredValue, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

impl From<f64> for StructuredValue {
    fn from(n: f64) -> Self {
        StructuredValue::Number(n)
    }
}

impl From<i32> for StructuredValue {
    fn from(n: i32) -> Self {
        StructuredValue::Number(n.into())
    }
}

impl From<bool> for StructuredValue {
    fn from(b: bool) -> Self {
        StructuredValue::Bool(b)
    }
}

impl From<&str> for StructuredValue {
    fn from(s: &str) -> Self {
        StructuredValue::String(s.to_owned())
    }
}

impl From<String> for StructuredValue {
    fn from(s: String) -> Self {
        StructuredValue::String(s)
    }
}

impl From<Vec<StructuredValue>> for StructuredValue {
    fn from(values: Vec<StructuredValue>) -> Self {
        StructuredValue::Array(values)
    }
}

#[cfg(test)]
mod tests {
    use super::StructuredValue;

    #[test]
    fn test_builder_and_lookup() {
        let value = StructuredValue::object()
            .with("id", 7)
            .with("name", "seven");
        assert_eq!(value.get("id"), Some(&StructuredValue::Number(7.0)));
        assert_eq!(value.get("name").and_then(|v| v.as_str()), Some("seven"));
        assert_eq!(value.get("missing"), None);
        assert_eq!(StructuredValue::Number(1.0).get("id"), None);
    }

    #[test]
    fn test_serialization_preserves_property_order() {
        let value = StructuredValue::object()
            .with("b", 1)
            .with("a", StructuredValue::Binary(vec![1, 2, 3]))
            .with("nested", StructuredValue::object().with("d", StructuredValue::Date(5.0)));
        let bytes = value.serialize().unwrap();
        let decoded = StructuredValue::deserialize(&bytes).unwrap();
        assert_eq!(decoded, value);
        let StructuredValue::Object(properties) = decoded else {
            panic!("expected an object");
        };
        let keys: Vec<&str> = properties.keys().map(String::as_str).collect();
        assert_eq!(keys, ["b", "a", "nested"]);
    }
}
