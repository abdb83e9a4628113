/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Fallible};
use crate::key::{IndexedDBKeyType, compare_two_keys, value_to_key};
use crate::value::StructuredValue;

/// <https://w3c.github.io/IndexedDB/#range-construct>
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct IndexedDBKeyRange {
    pub lower: Option<IndexedDBKeyType>,
    pub upper: Option<IndexedDBKeyType>,
    pub lower_open: bool,
    pub upper_open: bool,
}

impl IndexedDBKeyRange {
    pub fn new(
        lower: Option<IndexedDBKeyType>,
        upper: Option<IndexedDBKeyType>,
        lower_open: bool,
        upper_open: bool,
    ) -> Self {
        IndexedDBKeyRange {
            lower,
            upper,
            lower_open,
            upper_open,
        }
    }

    /// The range containing every key.
    pub fn unbounded() -> Self {
        IndexedDBKeyRange::default()
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbkeyrange-only>
    pub fn only(key: IndexedDBKeyType) -> Self {
        Self::new(Some(key.clone()), Some(key), false, false)
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbkeyrange-lowerbound>
    pub fn lower_bound(key: IndexedDBKeyType, open: bool) -> Self {
        Self::new(Some(key), None, open, true)
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbkeyrange-upperbound>
    pub fn upper_bound(key: IndexedDBKeyType, open: bool) -> Self {
        Self::new(None, Some(key), true, open)
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbkeyrange-bound>
    pub fn bound(
        lower: IndexedDBKeyType,
        upper: IndexedDBKeyType,
        lower_open: bool,
        upper_open: bool,
    ) -> Fallible<Self> {
        match compare_two_keys(&lower, &upper) {
            Ordering::Greater => Err(Error::Data(Some(
                "The lower bound is greater than the upper bound".to_owned(),
            ))),
            Ordering::Equal if lower_open || upper_open => Err(Error::Data(Some(
                "The bounds are equal and one of them is open".to_owned(),
            ))),
            _ => Ok(Self::new(Some(lower), Some(upper), lower_open, upper_open)),
        }
    }

    /// A range that contains only one key.
    pub fn is_singleton(&self) -> bool {
        self.as_singleton().is_some()
    }

    pub fn as_singleton(&self) -> Option<&IndexedDBKeyType> {
        if self.lower_open || self.upper_open {
            return None;
        }
        match (self.lower.as_ref(), self.upper.as_ref()) {
            (Some(lower), Some(upper)) if lower == upper => Some(lower),
            _ => None,
        }
    }

    /// <https://w3c.github.io/IndexedDB/#in>
    pub fn contains(&self, key: &IndexedDBKeyType) -> bool {
        let lower_ok = match &self.lower {
            Some(lower) => match compare_two_keys(lower, key) {
                Ordering::Less => true,
                Ordering::Equal => !self.lower_open,
                Ordering::Greater => false,
            },
            None => true,
        };
        let upper_ok = match &self.upper {
            Some(upper) => match compare_two_keys(key, upper) {
                Ordering::Less => true,
                Ordering::Equal => !self.upper_open,
                Ordering::Greater => false,
            },
            None => true,
        };
        lower_ok && upper_ok
    }
}

/// What callers may pass wherever a key or a key range is accepted.
#[derive(Clone, Debug, PartialEq)]
pub enum KeyRangeInput {
    KeyRange(IndexedDBKeyRange),
    Value(StructuredValue),
}

impl From<IndexedDBKeyRange> for KeyRangeInput {
    fn from(range: IndexedDBKeyRange) -> Self {
        KeyRangeInput::KeyRange(range)
    }
}

impl From<StructuredValue> for KeyRangeInput {
    fn from(value: StructuredValue) -> Self {
        KeyRangeInput::Value(value)
    }
}

impl From<IndexedDBKeyType> for KeyRangeInput {
    fn from(key: IndexedDBKeyType) -> Self {
        KeyRangeInput::Value(crate::key::key_type_to_value(&key))
    }
}

/// <https://w3c.github.io/IndexedDB/#convert-a-value-to-a-key-range>
///
/// A missing input is treated like `undefined`.
pub fn value_to_key_range(
    input: Option<&KeyRangeInput>,
    null_disallowed: bool,
) -> Fallible<IndexedDBKeyRange> {
    let value = match input {
        // Step 1: If value is a key range, return value.
        Some(KeyRangeInput::KeyRange(range)) => return Ok(range.clone()),
        Some(KeyRangeInput::Value(value)) => Some(value),
        None => None,
    };

    // Step 2: If value is undefined or is null, then throw a "DataError" DOMException if
    // null disallowed flag is true, or return an unbounded key range otherwise.
    if value.is_none_or(StructuredValue::is_null_or_undefined) {
        if null_disallowed {
            return Err(Error::Data(Some("A key or key range is required".to_owned())));
        }
        return Ok(IndexedDBKeyRange::unbounded());
    }

    // Step 3: Let key be the result of converting a value to a key with value.
    // Rethrow any exceptions.
    // Step 4: If key is invalid, throw a "DataError" DOMException.
    let key = value
        .map(value_to_key)
        .map_or(Err(Error::Data(None)), |result| result.into_result())?;

    // Step 5: Return a key range containing only key.
    Ok(IndexedDBKeyRange::only(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(n: f64) -> IndexedDBKeyType {
        IndexedDBKeyType::Number(n)
    }

    #[test]
    fn test_closed_singleton_contains_only_its_key() {
        let range = IndexedDBKeyRange::only(number(5.0));
        assert!(range.contains(&number(5.0)));
        assert!(!range.contains(&number(4.999)));
        assert!(!range.contains(&number(5.001)));
        assert!(!range.contains(&IndexedDBKeyType::Date(5.0)));
        assert!(range.is_singleton());
    }

    #[test]
    fn test_open_and_closed_bounds() {
        let range = IndexedDBKeyRange::bound(number(1.0), number(3.0), true, false).unwrap();
        assert!(!range.contains(&number(1.0)));
        assert!(range.contains(&number(2.0)));
        assert!(range.contains(&number(3.0)));
        assert!(!range.is_singleton());

        let lower = IndexedDBKeyRange::lower_bound(number(1.0), false);
        assert!(lower.contains(&number(1.0)));
        assert!(lower.contains(&IndexedDBKeyType::String("x".into())));
        assert!(!lower.contains(&number(0.0)));

        let upper = IndexedDBKeyRange::upper_bound(number(1.0), true);
        assert!(!upper.contains(&number(1.0)));
        assert!(upper.contains(&number(f64::NEG_INFINITY)));

        assert!(IndexedDBKeyRange::unbounded().contains(&IndexedDBKeyType::Array(vec![])));
    }

    #[test]
    fn test_bound_rejects_inverted_ranges() {
        assert!(matches!(
            IndexedDBKeyRange::bound(number(2.0), number(1.0), false, false),
            Err(Error::Data(_))
        ));
        assert!(matches!(
            IndexedDBKeyRange::bound(number(1.0), number(1.0), true, false),
            Err(Error::Data(_))
        ));
        assert!(IndexedDBKeyRange::bound(number(1.0), number(1.0), false, false).is_ok());
    }

    #[test]
    fn test_value_to_key_range() {
        let range = IndexedDBKeyRange::lower_bound(number(1.0), true);
        assert_eq!(
            value_to_key_range(Some(&KeyRangeInput::KeyRange(range.clone())), true),
            Ok(range)
        );
        assert_eq!(
            value_to_key_range(Some(&StructuredValue::Number(4.0).into()), true),
            Ok(IndexedDBKeyRange::only(number(4.0)))
        );
        assert_eq!(
            value_to_key_range(None, false),
            Ok(IndexedDBKeyRange::unbounded())
        );
        assert_eq!(
            value_to_key_range(Some(&StructuredValue::Null.into()), false),
            Ok(IndexedDBKeyRange::unbounded())
        );
        assert!(matches!(
            value_to_key_range(Some(&StructuredValue::Undefined.into()), true),
            Err(Error::Data(_))
        ));
        assert!(matches!(
            value_to_key_range(Some(&StructuredValue::Bool(true).into()), false),
            Err(Error::Data(_))
        ));
    }
}
