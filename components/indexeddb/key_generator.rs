/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use indexeddb_traits::{Error, Fallible, IndexedDBKeyType};

/// The largest key a generator hands out, 2^53.
pub const MAX_GENERATED_KEY: u64 = 1 << 53;

/// <https://w3c.github.io/IndexedDB/#key-generator-construct>
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KeyGenerator {
    /// <https://w3c.github.io/IndexedDB/#key-generator-current-number>
    current: u64,
}

impl Default for KeyGenerator {
    fn default() -> Self {
        KeyGenerator { current: 1 }
    }
}

impl KeyGenerator {
    pub fn with_current(current: u64) -> Self {
        KeyGenerator { current }
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    /// <https://w3c.github.io/IndexedDB/#generate-a-key>
    pub fn generate_key(&mut self) -> Fallible<IndexedDBKeyType> {
        // Step 1: Let generator be store's key generator.
        // Step 2: Let key be generator's current number.
        let key = self.current;

        // Step 3: If key is greater than 2^53 (9007199254740992), then return failure.
        if key > MAX_GENERATED_KEY {
            return Err(Error::Constraint(Some(
                "The key generator has run out of keys".to_owned(),
            )));
        }

        // Step 4: Increase generator's current number by 1.
        self.current += 1;

        // Step 5: Return key.
        Ok(IndexedDBKeyType::Number(key as f64))
    }

    /// <https://w3c.github.io/IndexedDB/#possibly-update-the-key-generator>
    pub fn possibly_update(&mut self, key: &IndexedDBKeyType) {
        // Step 1: If the type of key is not number, abort these steps.
        let Some(value) = key.as_number() else {
            return;
        };

        // Step 2: Let value be the value of key.
        // Step 3: Set value to the minimum of value and 2^53 (9007199254740992).
        // Step 4: Set value to the largest integer not greater than value.
        let value = value.min(MAX_GENERATED_KEY as f64).floor();

        // Step 5: Let generator be store's key generator.
        // Step 6: If value is greater than or equal to generator's current number,
        // then set generator's current number to value + 1.
        if value >= self.current as f64 {
            self.current = value as u64 + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(n: f64) -> IndexedDBKeyType {
        IndexedDBKeyType::Number(n)
    }

    #[test]
    fn test_explicit_key_bumps_generator() {
        let mut generator = KeyGenerator::default();
        assert_eq!(generator.generate_key(), Ok(number(1.0)));
        assert_eq!(generator.generate_key(), Ok(number(2.0)));
        assert_eq!(generator.generate_key(), Ok(number(3.0)));
        generator.possibly_update(&number(10.0));
        assert_eq!(generator.generate_key(), Ok(number(11.0)));
    }

    #[test]
    fn test_smaller_and_non_numeric_keys_are_ignored() {
        let mut generator = KeyGenerator::with_current(5);
        generator.possibly_update(&number(2.0));
        generator.possibly_update(&number(-7.5));
        generator.possibly_update(&number(f64::NEG_INFINITY));
        generator.possibly_update(&IndexedDBKeyType::String("100".into()));
        generator.possibly_update(&IndexedDBKeyType::Date(100.0));
        assert_eq!(generator.current(), 5);

        generator.possibly_update(&number(7.9));
        assert_eq!(generator.current(), 8);
    }

    #[test]
    fn test_generator_exhaustion() {
        let mut generator = KeyGenerator::default();
        generator.possibly_update(&number(f64::INFINITY));
        assert_eq!(generator.current(), MAX_GENERATED_KEY + 1);
        assert!(matches!(generator.generate_key(), Err(Error::Constraint(_))));

        let mut generator = KeyGenerator::with_current(MAX_GENERATED_KEY);
        assert_eq!(
            generator.generate_key(),
            Ok(number(MAX_GENERATED_KEY as f64))
        );
        assert!(matches!(generator.generate_key(), Err(Error::Constraint(_))));
    }
}
