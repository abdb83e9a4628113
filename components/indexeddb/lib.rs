/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A transactional, indexed key/value engine following the IndexedDB
//! processing model.
//!
//! All handles are single-threaded (`Rc` based). Transactions run their
//! requests on a worker task spawned with [`tokio::task::spawn_local`], so
//! every transaction must be created from within a [`tokio::task::LocalSet`].

pub mod connection;
pub mod cursor;
pub mod database;
pub mod engines;
pub mod event;
pub mod index;
pub mod key_generator;
pub mod object_store;
pub mod prefs;
pub mod request;
pub mod transaction;

pub use indexeddb_traits::{
    Error, Fallible, IDBCursorDirection, IndexedDBKeyRange, IndexedDBKeyType, IndexedDBTxnMode,
    KeyPath, KeyRangeInput, StructuredValue, TransactionDurability,
};

pub use crate::cursor::{IDBCursor, ObjectStoreOrIndex};
pub use crate::database::IDBDatabase;
pub use crate::engines::{IndexedDBDescription, KvsEngine, SqliteEngine};
pub use crate::event::{EventDispatcher, EventTarget, EventType, NoopDispatcher};
pub use crate::index::IDBIndex;
pub use crate::key_generator::KeyGenerator;
pub use crate::object_store::IDBObjectStore;
pub use crate::prefs::IndexedDBPrefs;
pub use crate::request::{IDBRequest, IDBRequestReadyState, RequestResult};
pub use crate::transaction::{IDBTransaction, TransactionState};
