/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::path::PathBuf;

use indexeddb_traits::{
    BackendResult, CreateObjectResult, IDBCursorDirection, IndexedDBIndex, IndexedDBKeyRange,
    IndexedDBKeyType, IndexedDBObjectStore, KeyPath, PutItemResult,
};
use uuid::Uuid;

pub use self::sqlite::SqliteEngine;

mod sqlite;

/// A key used to track databases.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct IndexedDBDescription {
    pub origin: String,
    pub name: String,
}

impl IndexedDBDescription {
    // randomly generated namespace for our purposes
    const NAMESPACE_SERVO_IDB: &uuid::Uuid = &Uuid::from_bytes([
        0x37, 0x9e, 0x56, 0xb0, 0x1a, 0x76, 0x44, 0xc2, 0xa0, 0xdb, 0xe2, 0x18, 0xc5, 0xc8, 0xa3,
        0x5d,
    ]);

    pub fn new(origin: &str, name: &str) -> Self {
        IndexedDBDescription {
            origin: origin.to_owned(),
            name: name.to_owned(),
        }
    }

    /// The folder, relative to the base directory, holding this database.
    /// Both components are uuid v5, so the same description always maps to
    /// the same folder.
    pub fn as_path(&self) -> PathBuf {
        let mut path = PathBuf::new();
        let origin_uuid = Uuid::new_v5(Self::NAMESPACE_SERVO_IDB, self.origin.as_bytes());
        let db_name_uuid = Uuid::new_v5(Self::NAMESPACE_SERVO_IDB, self.name.as_bytes());
        path.push(origin_uuid.to_string());
        path.push(db_name_uuid.to_string());
        path
    }

    /// A stable identifier for the database, used by the connection registry.
    pub fn id(&self) -> Uuid {
        Uuid::new_v5(
            Self::NAMESPACE_SERVO_IDB,
            format!("{}\u{0}{}", self.origin, self.name).as_bytes(),
        )
    }
}

/// The index keys of one record for one index. Multi-entry indexes can
/// contribute several keys per record.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexKeys {
    pub index_name: String,
    pub keys: Vec<IndexedDBKeyType>,
}

/// One step of a cursor, as the backend sees it.
///
/// <https://w3c.github.io/IndexedDB/#iterate-a-cursor>
#[derive(Clone, Debug)]
pub struct IterationParam {
    /// `None` when the cursor walks the object store itself.
    pub index_name: Option<String>,
    pub range: IndexedDBKeyRange,
    pub direction: IDBCursorDirection,
    /// The cursor's position; the index key for index cursors.
    pub position: Option<IndexedDBKeyType>,
    /// The primary key the cursor is at, index cursors only.
    pub object_store_position: Option<IndexedDBKeyType>,
    /// Target key requested by `continue`.
    pub key: Option<IndexedDBKeyType>,
    /// Target primary key requested by `continuePrimaryKey`.
    pub primary_key: Option<IndexedDBKeyType>,
    pub key_only: bool,
}

/// The record a cursor step landed on.
#[derive(Clone, Debug, PartialEq)]
pub struct IterationRecord {
    /// The index key for index cursors, the primary key otherwise.
    pub key: IndexedDBKeyType,
    pub primary_key: IndexedDBKeyType,
    /// Serialized record, absent for key-only cursors.
    pub value: Option<Vec<u8>>,
}

/// The storage backend of one database.
///
/// Stores are addressed by name. Methods taking an `index` argument read
/// through that index when it is set and from the store otherwise. A
/// `count` of 0 means no limit.
pub trait KvsEngine {
    fn version(&self) -> BackendResult<u64>;
    fn set_version(&self, version: u64) -> BackendResult<()>;

    /// Starts the schema changes of a version change transaction.
    fn begin_upgrade(&self) -> BackendResult<()>;
    fn commit_upgrade(&self) -> BackendResult<()>;
    /// Undoes every change made since `begin_upgrade`.
    fn rollback_upgrade(&self) -> BackendResult<()>;

    fn object_stores(&self) -> BackendResult<Vec<IndexedDBObjectStore>>;
    fn create_store(
        &self,
        store_name: &str,
        key_path: Option<&KeyPath>,
        auto_increment: bool,
    ) -> BackendResult<CreateObjectResult>;
    fn delete_store(&self, store_name: &str) -> BackendResult<()>;
    fn rename_store(&self, store_name: &str, new_name: &str) -> BackendResult<()>;
    fn set_key_generator_current(&self, store_name: &str, current: u64) -> BackendResult<()>;

    fn create_index(
        &self,
        store_name: &str,
        index: &IndexedDBIndex,
    ) -> BackendResult<CreateObjectResult>;
    fn delete_index(&self, store_name: &str, index_name: &str) -> BackendResult<()>;
    fn rename_index(&self, store_name: &str, index_name: &str, new_name: &str)
    -> BackendResult<()>;
    /// Adds `(index key, primary key)` pairs to an index, enforcing its
    /// uniqueness.
    fn add_index_entries(
        &self,
        store_name: &str,
        index_name: &str,
        entries: Vec<(IndexedDBKeyType, IndexedDBKeyType)>,
    ) -> BackendResult<PutItemResult>;

    /// Stores a record and replaces its index entries.
    fn put_item(
        &self,
        store_name: &str,
        key: &IndexedDBKeyType,
        value: Vec<u8>,
        index_keys: Vec<IndexKeys>,
        should_overwrite: bool,
    ) -> BackendResult<PutItemResult>;
    fn delete_items(&self, store_name: &str, range: &IndexedDBKeyRange) -> BackendResult<()>;
    fn clear(&self, store_name: &str) -> BackendResult<()>;

    fn get_item(
        &self,
        store_name: &str,
        index: Option<&str>,
        range: &IndexedDBKeyRange,
    ) -> BackendResult<Option<Vec<u8>>>;
    /// The primary key of the first matching record.
    fn get_key(
        &self,
        store_name: &str,
        index: Option<&str>,
        range: &IndexedDBKeyRange,
    ) -> BackendResult<Option<IndexedDBKeyType>>;
    fn get_all_items(
        &self,
        store_name: &str,
        index: Option<&str>,
        range: &IndexedDBKeyRange,
        count: u32,
    ) -> BackendResult<Vec<Vec<u8>>>;
    /// Primary keys of the matching records.
    fn get_all_keys(
        &self,
        store_name: &str,
        index: Option<&str>,
        range: &IndexedDBKeyRange,
        count: u32,
    ) -> BackendResult<Vec<IndexedDBKeyType>>;
    fn count(
        &self,
        store_name: &str,
        index: Option<&str>,
        range: &IndexedDBKeyRange,
    ) -> BackendResult<u64>;

    /// Moves a cursor one step. `None` once it runs off the range.
    fn iterate(
        &self,
        store_name: &str,
        param: &IterationParam,
    ) -> BackendResult<Option<IterationRecord>>;
}
