/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Fallible};
use crate::value::StructuredValue;

/// <https://w3c.github.io/IndexedDB/#key-construct>
///
/// Equality and ordering only ever go through [`compare_two_keys`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum IndexedDBKeyType {
    Number(f64),
    String(String),
    Binary(#[serde(with = "serde_bytes")] Vec<u8>),
    Date(f64),
    Array(Vec<IndexedDBKeyType>),
}

impl IndexedDBKeyType {
    /// Rank of the key type in the cross-type ordering.
    fn type_rank(&self) -> u8 {
        match self {
            IndexedDBKeyType::Number(_) => 0,
            IndexedDBKeyType::Date(_) => 1,
            IndexedDBKeyType::String(_) => 2,
            IndexedDBKeyType::Binary(_) => 3,
            IndexedDBKeyType::Array(_) => 4,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            IndexedDBKeyType::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl PartialEq for IndexedDBKeyType {
    fn eq(&self, other: &Self) -> bool {
        compare_two_keys(self, other) == Ordering::Equal
    }
}

impl Eq for IndexedDBKeyType {}

impl PartialOrd for IndexedDBKeyType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexedDBKeyType {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_two_keys(self, other)
    }
}

impl From<f64> for IndexedDBKeyType {
    fn from(n: f64) -> Self {
        IndexedDBKeyType::Number(n)
    }
}

impl From<&str> for IndexedDBKeyType {
    fn from(s: &str) -> Self {
        IndexedDBKeyType::String(s.to_owned())
    }
}

fn compare_numbers(a: f64, b: f64) -> Ordering {
    // Keys never hold NaN, but fall back to a total order rather than lying.
    a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b))
}

/// <https://w3c.github.io/IndexedDB/#compare-two-keys>
pub fn compare_two_keys(a: &IndexedDBKeyType, b: &IndexedDBKeyType) -> Ordering {
    // Step 1-4: keys of different types are ordered
    // array > binary > string > date > number.
    let (rank_a, rank_b) = (a.type_rank(), b.type_rank());
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }

    // Step 5: Compare the values.
    match (a, b) {
        (IndexedDBKeyType::Number(a), IndexedDBKeyType::Number(b)) |
        (IndexedDBKeyType::Date(a), IndexedDBKeyType::Date(b)) => compare_numbers(*a, *b),
        // Rust strings compare by UTF-8 bytes, which is code point order.
        (IndexedDBKeyType::String(a), IndexedDBKeyType::String(b)) => a.cmp(b),
        (IndexedDBKeyType::Binary(a), IndexedDBKeyType::Binary(b)) => a.cmp(b),
        (IndexedDBKeyType::Array(a), IndexedDBKeyType::Array(b)) => {
            for (left, right) in a.iter().zip(b.iter()) {
                match compare_two_keys(left, right) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            a.len().cmp(&b.len())
        },
        _ => unreachable!("keys of different types have different ranks"),
    }
}

/// Outcome of converting a value to a key. `Invalid` is the "not a valid
/// key" signal; it is not an error by itself, callers decide what it means.
#[derive(Clone, Debug, PartialEq)]
pub enum ConversionResult {
    Valid(IndexedDBKeyType),
    Invalid,
}

impl ConversionResult {
    pub fn into_result(self) -> Fallible<IndexedDBKeyType> {
        match self {
            ConversionResult::Valid(key) => Ok(key),
            ConversionResult::Invalid => Err(Error::Data(Some(
                "The value is not a valid key".to_owned(),
            ))),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ConversionResult::Valid(_))
    }
}

/// <https://w3c.github.io/IndexedDB/#convert-value-to-key>
pub fn value_to_key(input: &StructuredValue) -> ConversionResult {
    match input {
        StructuredValue::Number(n) if n.is_nan() => ConversionResult::Invalid,
        StructuredValue::Number(n) => ConversionResult::Valid(IndexedDBKeyType::Number(*n)),
        StructuredValue::Date(ms) if ms.is_nan() => ConversionResult::Invalid,
        StructuredValue::Date(ms) => ConversionResult::Valid(IndexedDBKeyType::Date(*ms)),
        StructuredValue::String(s) => ConversionResult::Valid(IndexedDBKeyType::String(s.clone())),
        StructuredValue::Binary(bytes) => {
            ConversionResult::Valid(IndexedDBKeyType::Binary(bytes.clone()))
        },
        StructuredValue::Array(items) => {
            let mut keys = Vec::with_capacity(items.len());
            for item in items {
                match value_to_key(item) {
                    ConversionResult::Valid(key) => keys.push(key),
                    ConversionResult::Invalid => return ConversionResult::Invalid,
                }
            }
            ConversionResult::Valid(IndexedDBKeyType::Array(keys))
        },
        _ => ConversionResult::Invalid,
    }
}

/// <https://w3c.github.io/IndexedDB/#convert-a-value-to-a-multientry-key>
pub fn value_to_multi_entry_key(input: &StructuredValue) -> ConversionResult {
    let StructuredValue::Array(items) = input else {
        return value_to_key(input);
    };
    let mut keys: Vec<IndexedDBKeyType> = Vec::with_capacity(items.len());
    for item in items {
        // Invalid entries are skipped rather than poisoning the whole array.
        if let ConversionResult::Valid(key) = value_to_key(item) {
            if !keys.iter().any(|existing| existing == &key) {
                keys.push(key);
            }
        }
    }
    ConversionResult::Valid(IndexedDBKeyType::Array(keys))
}

/// <https://w3c.github.io/IndexedDB/#convert-a-key-to-a-value>
pub fn key_type_to_value(key: &IndexedDBKeyType) -> StructuredValue {
    match key {
        IndexedDBKeyType::Number(n) => StructuredValue::Number(*n),
        IndexedDBKeyType::String(s) => StructuredValue::String(s.clone()),
        IndexedDBKeyType::Binary(bytes) => StructuredValue::Binary(bytes.clone()),
        IndexedDBKeyType::Date(ms) => StructuredValue::Date(*ms),
        IndexedDBKeyType::Array(keys) => {
            StructuredValue::Array(keys.iter().map(key_type_to_value).collect())
        },
    }
}

/// <https://w3c.github.io/IndexedDB/#dom-idbfactory-cmp>
pub fn cmp(first: &StructuredValue, second: &StructuredValue) -> Fallible<Ordering> {
    let a = value_to_key(first).into_result()?;
    let b = value_to_key(second).into_result()?;
    Ok(compare_two_keys(&a, &b))
}
