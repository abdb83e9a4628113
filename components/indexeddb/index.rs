/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use indexeddb_traits::{
    Error, Fallible, IDBCursorDirection, IndexedDBIndex, IndexedDBKeyRange, IndexedDBTxnMode,
    KeyPath, KeyRangeInput, value_to_key_range,
};
use log::debug;

use crate::cursor::ObjectStoreOrIndex;
use crate::object_store::{IDBObjectStore, backend_count, decode_value, open_cursor_on};
use crate::request::{IDBRequest, RequestResult};

/// <https://w3c.github.io/IndexedDB/#index-handle-construct>
pub struct IDBIndex {
    object_store: Rc<IDBObjectStore>,
    /// <https://w3c.github.io/IndexedDB/#index-handle-name>
    name: RefCell<String>,
    key_path: KeyPath,
    unique: bool,
    multi_entry: bool,
}

impl IDBIndex {
    pub(crate) fn new(object_store: Rc<IDBObjectStore>, index: &IndexedDBIndex) -> Rc<IDBIndex> {
        Rc::new(IDBIndex {
            object_store,
            name: RefCell::new(index.name.clone()),
            key_path: index.key_path.clone(),
            unique: index.unique,
            multi_entry: index.multi_entry,
        })
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbindex-name>
    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbindex-objectstore>
    pub fn object_store(&self) -> &Rc<IDBObjectStore> {
        &self.object_store
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbindex-keypath>
    pub fn key_path(&self) -> &KeyPath {
        &self.key_path
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbindex-unique>
    pub fn unique(&self) -> bool {
        self.unique
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbindex-multientry>
    pub fn multi_entry(&self) -> bool {
        self.multi_entry
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.object_store
            .schema()
            .is_none_or(|store| store.index(&self.name.borrow()).is_none())
    }

    fn source(self: &Rc<Self>) -> ObjectStoreOrIndex {
        ObjectStoreOrIndex::Index(self.clone())
    }

    /// Checks every read operation starts with, then converts `query`.
    fn read_range(
        &self,
        query: Option<&KeyRangeInput>,
        null_disallowed: bool,
    ) -> Fallible<IndexedDBKeyRange> {
        // If index or index's object store has been deleted, throw an "InvalidStateError"
        // DOMException.
        if self.is_deleted() {
            return Err(Error::InvalidState(Some(format!(
                "Index {} has been deleted",
                self.name.borrow()
            ))));
        }
        // If transaction's state is not active, then throw a "TransactionInactiveError"
        // DOMException.
        if !self.object_store.transaction().is_active() {
            return Err(Error::TransactionInactive);
        }
        // Let range be the result of converting a value to a key range with query. Rethrow any
        // exceptions.
        value_to_key_range(query, null_disallowed)
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbindex-get>
    pub fn get(self: &Rc<Self>, query: &KeyRangeInput) -> Fallible<Rc<IDBRequest>> {
        let range = self.read_range(Some(query), true)?;
        let index = self.clone();
        let operation = async move {
            let engine = index.object_store.transaction().db().engine().clone();
            let found = engine.get_item(
                &index.object_store.name(),
                Some(&index.name()),
                &range,
            )?;
            match found {
                Some(bytes) => Ok(RequestResult::Value(decode_value(&bytes)?)),
                None => Ok(RequestResult::Undefined),
            }
        };
        Ok(self.execute(operation))
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbindex-getkey>
    pub fn get_key(self: &Rc<Self>, query: &KeyRangeInput) -> Fallible<Rc<IDBRequest>> {
        let range = self.read_range(Some(query), true)?;
        let index = self.clone();
        let operation = async move {
            let engine = index.object_store.transaction().db().engine().clone();
            Ok(engine
                .get_key(&index.object_store.name(), Some(&index.name()), &range)?
                .map_or(RequestResult::Undefined, RequestResult::Key))
        };
        Ok(self.execute(operation))
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbindex-getall>
    pub fn get_all(
        self: &Rc<Self>,
        query: Option<&KeyRangeInput>,
        count: Option<u32>,
    ) -> Fallible<Rc<IDBRequest>> {
        let range = self.read_range(query, false)?;
        let index = self.clone();
        let operation = async move {
            let engine = index.object_store.transaction().db().engine().clone();
            let values = engine
                .get_all_items(
                    &index.object_store.name(),
                    Some(&index.name()),
                    &range,
                    backend_count(count),
                )?
                .iter()
                .map(|bytes| decode_value(bytes))
                .collect::<Fallible<Vec<_>>>()?;
            Ok(RequestResult::Values(values))
        };
        Ok(self.execute(operation))
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbindex-getallkeys>
    pub fn get_all_keys(
        self: &Rc<Self>,
        query: Option<&KeyRangeInput>,
        count: Option<u32>,
    ) -> Fallible<Rc<IDBRequest>> {
        let range = self.read_range(query, false)?;
        let index = self.clone();
        let operation = async move {
            let engine = index.object_store.transaction().db().engine().clone();
            Ok(RequestResult::Keys(engine.get_all_keys(
                &index.object_store.name(),
                Some(&index.name()),
                &range,
                backend_count(count),
            )?))
        };
        Ok(self.execute(operation))
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbindex-count>
    pub fn count(self: &Rc<Self>, query: Option<&KeyRangeInput>) -> Fallible<Rc<IDBRequest>> {
        let range = self.read_range(query, false)?;
        let index = self.clone();
        let operation = async move {
            let engine = index.object_store.transaction().db().engine().clone();
            Ok(RequestResult::Count(engine.count(
                &index.object_store.name(),
                Some(&index.name()),
                &range,
            )?))
        };
        Ok(self.execute(operation))
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbindex-opencursor>
    pub fn open_cursor(
        self: &Rc<Self>,
        query: Option<&KeyRangeInput>,
        direction: IDBCursorDirection,
    ) -> Fallible<Rc<IDBRequest>> {
        let range = self.read_range(query, false)?;
        Ok(open_cursor_on(
            self.object_store.transaction(),
            self.source(),
            range,
            direction,
            false,
        ))
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbindex-openkeycursor>
    pub fn open_key_cursor(
        self: &Rc<Self>,
        query: Option<&KeyRangeInput>,
        direction: IDBCursorDirection,
    ) -> Fallible<Rc<IDBRequest>> {
        let range = self.read_range(query, false)?;
        Ok(open_cursor_on(
            self.object_store.transaction(),
            self.source(),
            range,
            direction,
            true,
        ))
    }

    fn execute(
        self: &Rc<Self>,
        operation: impl Future<Output = Fallible<RequestResult>> + 'static,
    ) -> Rc<IDBRequest> {
        self.object_store
            .transaction()
            .execute_async(self.source(), operation)
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbindex-name>
    pub fn set_name(&self, name: &str) -> Fallible<()> {
        let transaction = self.object_store.transaction();

        // Step 4: If transaction is not an upgrade transaction, throw an "InvalidStateError"
        // DOMException.
        if transaction.mode() != IndexedDBTxnMode::Versionchange {
            return Err(Error::InvalidState(Some(
                "Only a version change transaction can rename an index".to_owned(),
            )));
        }
        // Step 5: If transaction's state is not active, then throw a "TransactionInactiveError"
        // DOMException.
        if !transaction.is_active() {
            return Err(Error::TransactionInactive);
        }
        // Step 6: If index or index's object store has been deleted, throw an
        // "InvalidStateError" DOMException.
        if self.is_deleted() {
            return Err(Error::InvalidState(Some(format!(
                "Index {} has been deleted",
                self.name.borrow()
            ))));
        }

        // Step 7: If index's name is equal to name, terminate these steps.
        let old_name = self.name();
        if old_name == name {
            return Ok(());
        }

        // Step 8: If an index named name already exists in index's object store, throw a
        // "ConstraintError" DOMException.
        let store_name = self.object_store.name();
        if self
            .object_store
            .schema()
            .is_some_and(|store| store.index(name).is_some())
        {
            return Err(Error::Constraint(Some(format!(
                "Index {name} already exists on {store_name}"
            ))));
        }

        // Step 9: Set index's name to name.
        // Step 10: Set this's name to name.
        let db = transaction.db();
        db.engine().rename_index(&store_name, &old_name, name)?;
        db.rename_index_schema(&store_name, &old_name, name);
        self.object_store.rename_index_handle(&old_name, name);
        *self.name.borrow_mut() = name.to_owned();
        debug!("Renamed index {old_name} to {name} on {store_name}");
        Ok(())
    }
}
