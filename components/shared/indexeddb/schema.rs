/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::key_path::KeyPath;

/// <https://w3c.github.io/IndexedDB/#transaction-mode>
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum IndexedDBTxnMode {
    Readonly,
    Readwrite,
    Versionchange,
}

impl fmt::Display for IndexedDBTxnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexedDBTxnMode::Readonly => "readonly",
            IndexedDBTxnMode::Readwrite => "readwrite",
            IndexedDBTxnMode::Versionchange => "versionchange",
        })
    }
}

/// <https://w3c.github.io/IndexedDB/#transaction-durability-hint>
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum TransactionDurability {
    #[default]
    Default,
    Strict,
    Relaxed,
}

/// <https://w3c.github.io/IndexedDB/#cursor-direction>
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum IDBCursorDirection {
    #[default]
    Next,
    Nextunique,
    Prev,
    Prevunique,
}

impl IDBCursorDirection {
    pub fn is_forward(self) -> bool {
        matches!(self, IDBCursorDirection::Next | IDBCursorDirection::Nextunique)
    }

    pub fn is_unique(self) -> bool {
        matches!(
            self,
            IDBCursorDirection::Nextunique | IDBCursorDirection::Prevunique
        )
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum CreateObjectResult {
    Created,
    AlreadyExists,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum PutItemResult {
    Success,
    /// A record with the same key exists and overwriting was not allowed.
    CannotOverwrite,
    /// Storing the record would break the named unique index.
    IndexConstraint(String),
}

/// <https://w3c.github.io/IndexedDB/#index-construct>
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct IndexedDBIndex {
    pub name: String,
    pub key_path: KeyPath,
    pub unique: bool,
    pub multi_entry: bool,
}

/// <https://w3c.github.io/IndexedDB/#object-store-construct>
///
/// The schema of a store as the backend persists it.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct IndexedDBObjectStore {
    pub name: String,
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
    /// Next key the generator hands out, meaningful when `auto_increment`.
    pub key_generator_current: u64,
    pub indexes: Vec<IndexedDBIndex>,
}

impl IndexedDBObjectStore {
    pub fn index(&self, name: &str) -> Option<&IndexedDBIndex> {
        self.indexes.iter().find(|index| index.name == name)
    }
}
