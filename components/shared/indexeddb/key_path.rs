/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::key::{
    ConversionResult, IndexedDBKeyType, key_type_to_value, value_to_key, value_to_multi_entry_key,
};
use crate::value::StructuredValue;

/// <https://w3c.github.io/IndexedDB/#key-path-construct>
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum KeyPath {
    String(String),
    Sequence(Vec<String>),
}

impl KeyPath {
    /// <https://w3c.github.io/IndexedDB/#valid-key-path>
    pub fn is_valid(&self) -> bool {
        match self {
            KeyPath::String(path) => is_valid_path_string(path),
            KeyPath::Sequence(paths) => {
                !paths.is_empty() && paths.iter().all(|path| is_valid_path_string(path))
            },
        }
    }

    /// The single path of a string key path. Sequences cannot be used for
    /// key injection.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            KeyPath::String(path) => Some(path),
            KeyPath::Sequence(_) => None,
        }
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::String(path.to_owned())
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(paths: Vec<&str>) -> Self {
        KeyPath::Sequence(paths.into_iter().map(str::to_owned).collect())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let is_start = |c: char| c == '$' || c == '_' || c.is_alphabetic();
    let is_part =
        |c: char| is_start(c) || c.is_alphanumeric() || c == '\u{200C}' || c == '\u{200D}';
    is_start(first) && chars.all(is_part)
}

fn is_valid_path_string(path: &str) -> bool {
    path.is_empty() || path.split('.').all(is_identifier)
}

/// Length of a string as seen by script, in UTF-16 code units.
fn utf16_length(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Looks up a single identifier on a value. `None` when the value does not
/// expose the property or the property is undefined.
fn get_property<'a>(value: &'a StructuredValue, identifier: &str) -> Option<PropertyValue<'a>> {
    let found = match (value, identifier) {
        (StructuredValue::String(s), "length") => {
            PropertyValue::Owned(StructuredValue::Number(utf16_length(s) as f64))
        },
        (StructuredValue::Array(items), "length") => {
            PropertyValue::Owned(StructuredValue::Number(items.len() as f64))
        },
        (StructuredValue::Blob(blob), "size") => {
            PropertyValue::Owned(StructuredValue::Number(blob.size as f64))
        },
        (StructuredValue::Blob(blob), "type") => {
            PropertyValue::Owned(StructuredValue::String(blob.type_.clone()))
        },
        (StructuredValue::Blob(blob), "name") => {
            PropertyValue::Owned(StructuredValue::String(blob.name.clone()?))
        },
        (StructuredValue::Blob(blob), "lastModified") => {
            PropertyValue::Owned(StructuredValue::Number(blob.last_modified?))
        },
        (StructuredValue::Object(properties), _) => {
            PropertyValue::Borrowed(properties.get(identifier)?)
        },
        _ => return None,
    };
    if matches!(found.as_value(), StructuredValue::Undefined) {
        return None;
    }
    Some(found)
}

enum PropertyValue<'a> {
    Borrowed(&'a StructuredValue),
    Owned(StructuredValue),
}

impl PropertyValue<'_> {
    fn as_value(&self) -> &StructuredValue {
        match self {
            PropertyValue::Borrowed(value) => value,
            PropertyValue::Owned(value) => value,
        }
    }

    fn into_owned(self) -> StructuredValue {
        match self {
            PropertyValue::Borrowed(value) => value.clone(),
            PropertyValue::Owned(value) => value,
        }
    }
}

fn evaluate_path_string(value: &StructuredValue, path: &str) -> Option<StructuredValue> {
    // Step 3: If keyPath is the empty string, return value and skip the remaining steps.
    if path.is_empty() {
        return Some(value.clone());
    }

    // Step 4: Let identifiers be the result of strictly splitting keyPath on U+002E FULL STOP
    // characters (.).
    // Step 5: For each identifier of identifiers, jump to the appropriate step below.
    let mut identifiers = path.split('.');
    let first = identifiers.next()?;
    let mut current = get_property(value, first)?;
    for identifier in identifiers {
        current = match current {
            PropertyValue::Borrowed(value) => get_property(value, identifier)?,
            // Synthesized properties are primitives and expose nothing further
            // except a string's length.
            PropertyValue::Owned(value) => {
                PropertyValue::Owned(get_property(&value, identifier)?.into_owned())
            },
        };
    }

    // Step 6: Return value.
    Some(current.into_owned())
}

/// <https://w3c.github.io/IndexedDB/#evaluate-a-key-path-on-a-value>
///
/// `None` signals that the key path does not resolve on the value.
pub fn evaluate_key_path_on_value(
    value: &StructuredValue,
    key_path: &KeyPath,
) -> Option<StructuredValue> {
    match key_path {
        // Step 1: If keyPath is a list of strings, then:
        KeyPath::Sequence(paths) => {
            // Step 1.1: Let result be a new Array object.
            // Step 1.2: For each item of keyPath, evaluate it and fail if any of them fails.
            paths
                .iter()
                .map(|path| evaluate_path_string(value, path))
                .collect::<Option<Vec<_>>>()
                .map(StructuredValue::Array)
        },
        KeyPath::String(path) => evaluate_path_string(value, path),
    }
}

/// Outcome of extracting a key from a value. `Invalid` means the key path
/// resolved to something that is not a key; `Failure` means it did not
/// resolve at all.
#[derive(Clone, Debug, PartialEq)]
pub enum ExtractionResult {
    Key(IndexedDBKeyType),
    Invalid,
    Failure,
}

/// <https://w3c.github.io/IndexedDB/#extract-a-key-from-a-value-using-a-key-path>
pub fn extract_key_from_value_using_key_path(
    value: &StructuredValue,
    key_path: &KeyPath,
    multi_entry: bool,
) -> ExtractionResult {
    // Step 1: Let r be the result of evaluating a key path on a value with value and keyPath.
    // Step 2: If r is failure, return failure.
    let Some(r) = evaluate_key_path_on_value(value, key_path) else {
        return ExtractionResult::Failure;
    };

    // Step 3: Let key be the result of converting a value to a key with r if the multiEntry
    // flag is false, and the result of converting a value to a multiEntry key with r otherwise.
    let key = if multi_entry {
        value_to_multi_entry_key(&r)
    } else {
        value_to_key(&r)
    };

    // Step 4: If key is invalid, return invalid.
    // Step 5: Return key.
    match key {
        ConversionResult::Valid(key) => ExtractionResult::Key(key),
        ConversionResult::Invalid => ExtractionResult::Invalid,
    }
}

/// <https://w3c.github.io/IndexedDB/#check-that-a-key-could-be-injected-into-a-value>
pub fn check_key_can_be_injected_into_value(value: &StructuredValue, key_path: &str) -> bool {
    // Step 1: Let identifiers be the result of strictly splitting keyPath on U+002E FULL STOP
    // characters (.).
    // Step 2: Assert: identifiers is not empty.
    // Step 3: Remove the last item of identifiers.
    let mut identifiers: Vec<&str> = key_path.split('.').collect();
    identifiers.pop();

    // Step 4: For each remaining identifier of identifiers, if any:
    let mut current = value;
    for identifier in identifiers {
        // Step 4.1: If value is not an Object or an Array, return false.
        let StructuredValue::Object(properties) = current else {
            return false;
        };
        // Step 4.2: Let hop be ! HasOwnProperty(value, identifier).
        // Step 4.3: If hop is false, return true.
        // Step 4.4: Let value be ! Get(value, identifier).
        match properties.get(identifier) {
            None | Some(StructuredValue::Undefined) => return true,
            Some(next) => current = next,
        }
    }

    // Step 5: Return true if value is an Object or an Array, or false otherwise.
    // Arrays never accept a named property as a record key here.
    matches!(current, StructuredValue::Object(_))
}

/// <https://w3c.github.io/IndexedDB/#inject-a-key-into-a-value-using-a-key-path>
///
/// Only call this after [`check_key_can_be_injected_into_value`] returned
/// true; otherwise the value is left untouched.
pub fn inject_key_into_value_using_key_path(
    value: &mut StructuredValue,
    key: &IndexedDBKeyType,
    key_path: &str,
) {
    // Step 1: Let identifiers be the result of strictly splitting keyPath on U+002E FULL STOP
    // characters (.).
    let mut identifiers: Vec<&str> = key_path.split('.').collect();
    // Step 2: Assert: identifiers is not empty.
    // Step 3: Let last be the last item of identifiers and remove it from the list.
    let Some(last) = identifiers.pop() else {
        return;
    };

    // Step 4: For each remaining identifier of identifiers:
    let mut current = value;
    for identifier in identifiers {
        let StructuredValue::Object(properties) = current else {
            return;
        };
        // Step 4.1: Assert: value is an Object or an Array.
        // Step 4.2: Let hop be ! HasOwnProperty(value, identifier).
        // Step 4.3: If hop is false, then create an empty object and define it on value.
        let entry = properties
            .entry(identifier.to_owned())
            .or_insert_with(StructuredValue::object);
        if matches!(entry, StructuredValue::Undefined) {
            *entry = StructuredValue::Object(IndexMap::new());
        }
        // Step 4.4: Let value be ! Get(value, identifier).
        current = entry;
    }

    // Step 5: Assert: value is an Object or an Array.
    // Step 6: Let keyValue be the result of converting a key to a value with key.
    // Step 7: Let status be CreateDataProperty(value, last, keyValue).
    if let StructuredValue::Object(properties) = current {
        properties.insert(last.to_owned(), key_type_to_value(key));
    }
}
