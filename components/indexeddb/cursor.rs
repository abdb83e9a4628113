/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::{Rc, Weak};

use indexeddb_traits::{
    Error, ExtractionResult, Fallible, IDBCursorDirection, IndexedDBKeyRange, IndexedDBKeyType,
    IndexedDBTxnMode, StructuredValue, compare_two_keys, extract_key_from_value_using_key_path,
    value_to_key,
};
use log::debug;

use crate::engines::IterationParam;
use crate::index::IDBIndex;
use crate::object_store::{IDBObjectStore, store_a_record};
use crate::request::{IDBRequest, RequestResult};
use crate::transaction::IDBTransaction;

/// The source of a request or of a cursor.
#[derive(Clone)]
pub enum ObjectStoreOrIndex {
    ObjectStore(Rc<IDBObjectStore>),
    Index(Rc<IDBIndex>),
}

impl ObjectStoreOrIndex {
    /// <https://w3c.github.io/IndexedDB/#cursor-effective-object-store>
    pub fn object_store(&self) -> &Rc<IDBObjectStore> {
        match self {
            ObjectStoreOrIndex::ObjectStore(store) => store,
            ObjectStoreOrIndex::Index(index) => index.object_store(),
        }
    }

    pub fn index_name(&self) -> Option<String> {
        match self {
            ObjectStoreOrIndex::ObjectStore(_) => None,
            ObjectStoreOrIndex::Index(index) => Some(index.name()),
        }
    }

    pub(crate) fn is_deleted(&self) -> bool {
        match self {
            ObjectStoreOrIndex::ObjectStore(store) => store.is_deleted(),
            ObjectStoreOrIndex::Index(index) => index.is_deleted(),
        }
    }
}

impl fmt::Debug for ObjectStoreOrIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectStoreOrIndex::ObjectStore(store) => write!(f, "ObjectStore({})", store.name()),
            ObjectStoreOrIndex::Index(index) => write!(
                f,
                "Index({}.{})",
                index.object_store().name(),
                index.name()
            ),
        }
    }
}

/// <https://w3c.github.io/IndexedDB/#cursor-construct>
pub struct IDBCursor {
    /// <https://w3c.github.io/IndexedDB/#cursor-transaction>
    transaction: Rc<IDBTransaction>,
    /// <https://w3c.github.io/IndexedDB/#cursor-source>
    source: ObjectStoreOrIndex,
    /// <https://w3c.github.io/IndexedDB/#cursor-range>
    range: IndexedDBKeyRange,
    /// <https://w3c.github.io/IndexedDB/#cursor-direction>
    direction: IDBCursorDirection,
    /// <https://w3c.github.io/IndexedDB/#cursor-position>
    position: RefCell<Option<IndexedDBKeyType>>,
    /// <https://w3c.github.io/IndexedDB/#cursor-object-store-position>
    object_store_position: RefCell<Option<IndexedDBKeyType>>,
    /// <https://w3c.github.io/IndexedDB/#cursor-key>
    key: RefCell<Option<IndexedDBKeyType>>,
    /// <https://w3c.github.io/IndexedDB/#cursor-value>
    value: RefCell<Option<StructuredValue>>,
    /// <https://w3c.github.io/IndexedDB/#cursor-got-value-flag>
    got_value: Cell<bool>,
    /// <https://w3c.github.io/IndexedDB/#cursor-key-only-flag>
    key_only: bool,
    /// <https://w3c.github.io/IndexedDB/#cursor-request>
    request: RefCell<Weak<IDBRequest>>,
}

impl fmt::Debug for IDBCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IDBCursor")
            .field("transaction", &self.transaction.serial_number())
            .field("source", &self.source)
            .field("direction", &self.direction)
            .field("key", &self.key.borrow())
            .field("primary_key", &self.primary_key())
            .field("got_value", &self.got_value.get())
            .field("key_only", &self.key_only)
            .finish()
    }
}

impl IDBCursor {
    pub(crate) fn new(
        transaction: Rc<IDBTransaction>,
        source: ObjectStoreOrIndex,
        range: IndexedDBKeyRange,
        direction: IDBCursorDirection,
        key_only: bool,
    ) -> Rc<IDBCursor> {
        Rc::new(IDBCursor {
            transaction,
            source,
            range,
            direction,
            position: Default::default(),
            object_store_position: Default::default(),
            key: Default::default(),
            value: Default::default(),
            got_value: Cell::new(false),
            key_only,
            request: Default::default(),
        })
    }

    pub(crate) fn set_request(&self, request: &Rc<IDBRequest>) {
        *self.request.borrow_mut() = Rc::downgrade(request);
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbcursor-source>
    pub fn source(&self) -> &ObjectStoreOrIndex {
        &self.source
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbcursor-direction>
    pub fn direction(&self) -> IDBCursorDirection {
        self.direction
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbcursor-key>
    pub fn key(&self) -> Option<IndexedDBKeyType> {
        self.key.borrow().clone()
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbcursor-primarykey>
    pub fn primary_key(&self) -> Option<IndexedDBKeyType> {
        self.effective_key()
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbcursorwithvalue-value>
    ///
    /// Always `None` for cursors opened with `open_key_cursor`.
    pub fn value(&self) -> Option<StructuredValue> {
        self.value.borrow().clone()
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbcursor-request>
    pub fn request(&self) -> Option<Rc<IDBRequest>> {
        self.request.borrow().upgrade()
    }

    pub fn got_value(&self) -> bool {
        self.got_value.get()
    }

    pub fn is_key_only(&self) -> bool {
        self.key_only
    }

    /// <https://w3c.github.io/IndexedDB/#cursor-effective-key>
    fn effective_key(&self) -> Option<IndexedDBKeyType> {
        match self.source {
            ObjectStoreOrIndex::ObjectStore(_) => self.position.borrow().clone(),
            ObjectStoreOrIndex::Index(_) => self.object_store_position.borrow().clone(),
        }
    }

    /// <https://w3c.github.io/IndexedDB/#iterate-a-cursor>
    pub(crate) async fn iterate(
        self: Rc<Self>,
        count: u32,
        key: Option<IndexedDBKeyType>,
        primary_key: Option<IndexedDBKeyType>,
    ) -> Fallible<RequestResult> {
        // Step 1: Let source be cursor's source.
        let store = self.source.object_store().clone();
        let store_name = store.name();
        let engine = self.transaction.db().engine().clone();
        let is_index = matches!(self.source, ObjectStoreOrIndex::Index(_));

        // Step 2: Let direction be cursor's direction.
        // Step 3: Assert: if primaryKey is given, source is an index and direction is "next" or
        // "prev".
        // Step 4: Let records be the list of records in source.
        // Step 5: Let range be cursor's range.
        // Step 6: Let position be cursor's position.
        // Step 7: Let object store position be cursor's object store position.
        let mut param = IterationParam {
            index_name: self.source.index_name(),
            range: self.range.clone(),
            direction: self.direction,
            position: self.position.borrow().clone(),
            object_store_position: self.object_store_position.borrow().clone(),
            key,
            primary_key,
            key_only: self.key_only,
        };

        // Step 8: If count is not given, let count be 1.
        // Step 9: While count is greater than 0:
        let mut found = None;
        for _ in 0..count.max(1) {
            // Step 9.1: Switch on direction, finding the first record in records that satisfies
            // the direction's requirements.
            // Step 9.2: If found record is not defined, then:
            let Some(record) = engine.iterate(&store_name, &param)? else {
                found = None;
                break;
            };

            // Step 9.3: Let position be found record's key.
            // Step 9.4: If source is an index, let object store position be found record's value.
            param.position = Some(record.key.clone());
            if is_index {
                param.object_store_position = Some(record.primary_key.clone());
            }
            // Only the first step honors the requested key.
            param.key = None;
            param.primary_key = None;

            // Step 9.5: Decrease count by 1.
            found = Some(record);
        }

        let Some(record) = found else {
            // Step 9.2.1: Set cursor's key to undefined.
            *self.key.borrow_mut() = None;
            // Step 9.2.2: If source is an index, set cursor's object store position to undefined.
            if is_index {
                *self.object_store_position.borrow_mut() = None;
            }
            // Step 9.2.3: If cursor's key only flag is false, set cursor's value to undefined.
            if !self.key_only {
                *self.value.borrow_mut() = None;
            }
            // Step 9.2.4: Return null.
            debug!("Cursor on {:?} ran off its range", self.source);
            return Ok(RequestResult::Cursor(None));
        };

        // Step 10: Let found record be the last record found.
        // Step 11: Set cursor's position to position.
        *self.position.borrow_mut() = Some(record.key.clone());
        // Step 12: If source is an index, set cursor's object store position to object store
        // position.
        if is_index {
            *self.object_store_position.borrow_mut() = Some(record.primary_key.clone());
        }
        // Step 13: Set cursor's key to found record's key.
        *self.key.borrow_mut() = Some(record.key);

        // Step 14: If cursor's key only flag is false, then:
        if !self.key_only {
            // Step 14.1: Let serialized be found record's referenced value if source is an index,
            // or found record's value otherwise.
            // Step 14.2: Set cursor's value to ! StructuredDeserialize(serialized, targetRealm).
            let value = match record.value {
                Some(bytes) => Some(
                    StructuredValue::deserialize(&bytes)
                        .map_err(|err| Error::Backend(err.into()))?,
                ),
                None => None,
            };
            *self.value.borrow_mut() = value;
        }

        // Step 15: Set cursor's got value flag to true.
        self.got_value.set(true);

        // Step 16: Return cursor.
        Ok(RequestResult::Cursor(Some(self)))
    }

    /// Queues another iteration on the cursor's request.
    fn resubmit(
        self: &Rc<Self>,
        count: u32,
        key: Option<IndexedDBKeyType>,
        primary_key: Option<IndexedDBKeyType>,
    ) {
        // Set this's got value flag to false.
        self.got_value.set(false);

        // Let request be this's request. Set request's processed flag to false and its done
        // flag to false.
        // Run asynchronously execute a request with this's source, operation and request.
        let operation = self.clone().iterate(count, key, primary_key);
        let existing = self.request.borrow().upgrade();
        match existing {
            Some(request) => self.transaction.reexecute_async(&request, operation),
            None => {
                let request = self.transaction.execute_async(self.source.clone(), operation);
                self.set_request(&request);
            },
        }
    }

    fn check_active(&self) -> Fallible<()> {
        if !self.transaction.is_active() {
            return Err(Error::TransactionInactive);
        }
        Ok(())
    }

    fn check_source_not_deleted(&self) -> Fallible<()> {
        if self.source.is_deleted() {
            return Err(Error::InvalidState(Some(
                "The cursor's source has been deleted".to_owned(),
            )));
        }
        Ok(())
    }

    fn check_got_value(&self) -> Fallible<()> {
        if !self.got_value.get() {
            return Err(Error::InvalidState(Some(
                "The cursor is being iterated or has iterated past its end".to_owned(),
            )));
        }
        Ok(())
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbcursor-advance>
    pub fn advance(self: &Rc<Self>, count: u32) -> Fallible<()> {
        // Step 1: If count is 0 (zero), throw a TypeError.
        if count == 0 {
            return Err(Error::Type("count must be positive".to_owned()));
        }
        // Step 2: Let transaction be this's transaction.
        // Step 3: If transaction's state is not active, then throw a "TransactionInactiveError"
        // DOMException.
        self.check_active()?;
        // Step 4: If this's source or effective object store has been deleted, throw an
        // "InvalidStateError" DOMException.
        self.check_source_not_deleted()?;
        // Step 5: If this's got value flag is false, indicating that the cursor is being iterated
        // or has iterated past its end, throw an "InvalidStateError" DOMException.
        self.check_got_value()?;

        // Steps 6 to 9.
        self.resubmit(count, None, None);
        Ok(())
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbcursor-continue>
    pub fn continue_(self: &Rc<Self>, key: Option<&StructuredValue>) -> Fallible<()> {
        // Step 1: Let transaction be this's transaction.
        // Step 2: If transaction's state is not active, then throw a "TransactionInactiveError"
        // DOMException.
        self.check_active()?;
        // Step 3: If this's source or effective object store has been deleted, throw an
        // "InvalidStateError" DOMException.
        self.check_source_not_deleted()?;
        // Step 4: If this's got value flag is false, throw an "InvalidStateError" DOMException.
        self.check_got_value()?;

        // Step 5: If key is given, then:
        let key = match key.filter(|key| !matches!(key, StructuredValue::Undefined)) {
            Some(value) => {
                // Step 5.1: Let r be the result of converting a value to a key with key.
                // Step 5.2: If r is invalid, throw a "DataError" DOMException.
                let key = value_to_key(value).into_result()?;

                // Step 5.4: If key is less than or equal to this's position and this's direction
                // is "next" or "nextunique", then throw a "DataError" DOMException.
                // Step 5.5: If key is greater than or equal to this's position and this's direction
                // is "prev" or "prevunique", then throw a "DataError" DOMException.
                if let Some(position) = self.position.borrow().as_ref() {
                    let ordering = compare_two_keys(&key, position);
                    let ahead = if self.direction.is_forward() {
                        ordering == Ordering::Greater
                    } else {
                        ordering == Ordering::Less
                    };
                    if !ahead {
                        return Err(Error::Data(Some(
                            "The key is not ahead of the cursor's position".to_owned(),
                        )));
                    }
                }
                Some(key)
            },
            None => None,
        };

        // Steps 6 to 9.
        self.resubmit(1, key, None);
        Ok(())
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbcursor-continueprimarykey>
    pub fn continue_primary_key(
        self: &Rc<Self>,
        key: &StructuredValue,
        primary_key: &StructuredValue,
    ) -> Fallible<()> {
        // Step 1: Let transaction be this's transaction.
        // Step 2: If transaction's state is not active, then throw a "TransactionInactiveError"
        // DOMException.
        self.check_active()?;
        // Step 3: If this's source or effective object store has been deleted, throw an
        // "InvalidStateError" DOMException.
        self.check_source_not_deleted()?;
        // Step 4: If this's source is not an index throw an "InvalidAccessError" DOMException.
        if !matches!(self.source, ObjectStoreOrIndex::Index(_)) {
            return Err(Error::InvalidAccess(Some(
                "continuePrimaryKey needs an index cursor".to_owned(),
            )));
        }
        // Step 5: If this's direction is not "next" or "prev", throw an "InvalidAccessError"
        // DOMException.
        if self.direction.is_unique() {
            return Err(Error::InvalidAccess(Some(
                "continuePrimaryKey cannot be used with a unique direction".to_owned(),
            )));
        }
        // Step 6: If this's got value flag is false, throw an "InvalidStateError" DOMException.
        self.check_got_value()?;

        // Step 7: Let r be the result of converting a value to a key with key.
        // Step 8: If r is invalid, throw a "DataError" DOMException.
        let key = value_to_key(key).into_result()?;
        // Step 10: Let r be the result of converting a value to a key with primaryKey.
        // Step 11: If r is invalid, throw a "DataError" DOMException.
        let primary_key = value_to_key(primary_key).into_result()?;

        // Step 13: If key is less than this's position and this's direction is "next", throw a
        // "DataError" DOMException.
        // Step 14: If key is greater than this's position and this's direction is "prev", throw a
        // "DataError" DOMException.
        // Step 15: If key is equal to this's position and primaryKey is less than or equal to
        // this's object store position and this's direction is "next", throw a "DataError"
        // DOMException.
        // Step 16: If key is equal to this's position and primaryKey is greater than or equal to
        // this's object store position and this's direction is "prev", throw a "DataError"
        // DOMException.
        let position = self.position.borrow().clone();
        let object_store_position = self.object_store_position.borrow().clone();
        if let (Some(position), Some(object_store_position)) = (position, object_store_position) {
            let behind = match compare_two_keys(&key, &position) {
                Ordering::Equal => {
                    let ordering = compare_two_keys(&primary_key, &object_store_position);
                    if self.direction.is_forward() {
                        ordering != Ordering::Greater
                    } else {
                        ordering != Ordering::Less
                    }
                },
                Ordering::Less => self.direction.is_forward(),
                Ordering::Greater => !self.direction.is_forward(),
            };
            if behind {
                return Err(Error::Data(Some(
                    "The key is not ahead of the cursor's position".to_owned(),
                )));
            }
        }

        // Steps 17 to 20.
        self.resubmit(1, Some(key), Some(primary_key));
        Ok(())
    }

    /// Checks shared by `update` and `delete`.
    fn check_writable(&self) -> Fallible<IndexedDBKeyType> {
        // Step 1: Let transaction be this's transaction.
        // Step 2: If transaction's state is not active, then throw a "TransactionInactiveError"
        // DOMException.
        self.check_active()?;
        // Step 3: If transaction is a read-only transaction, throw a "ReadOnlyError" DOMException.
        if self.transaction.mode() == IndexedDBTxnMode::Readonly {
            return Err(Error::ReadOnly);
        }
        // Step 4: If this's source or effective object store has been deleted, throw an
        // "InvalidStateError" DOMException.
        self.check_source_not_deleted()?;
        // Step 5: If this's got value flag is false, indicating that the cursor is being iterated
        // or has iterated past its end, throw an "InvalidStateError" DOMException.
        self.check_got_value()?;
        // Step 6: If this's key only flag is true, throw an "InvalidStateError" DOMException.
        if self.key_only {
            return Err(Error::InvalidState(Some(
                "A key cursor cannot modify records".to_owned(),
            )));
        }
        self.effective_key().ok_or_else(|| {
            Error::InvalidState(Some("The cursor is not positioned on a record".to_owned()))
        })
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbcursor-update>
    pub fn update(self: &Rc<Self>, value: StructuredValue) -> Fallible<Rc<IDBRequest>> {
        // Steps 1 to 6.
        let effective_key = self.check_writable()?;

        // Step 7: Let targetRealm be a user-agent defined Realm.
        // Step 8: Let clone be a clone of value in targetRealm during transaction.
        let store = self.source.object_store().clone();

        // Step 9: If this's effective object store uses in-line keys, then:
        if let Some(key_path) = store.key_path() {
            // Step 9.1: Let kpk be the result of extracting a key from a value using a key path
            // with clone and the key path of this's effective object store.
            // Step 9.2: If kpk is failure, invalid, or not equal to this's effective key, throw a
            // "DataError" DOMException.
            let matches = match extract_key_from_value_using_key_path(&value, &key_path, false) {
                ExtractionResult::Key(kpk) => kpk == effective_key,
                ExtractionResult::Invalid | ExtractionResult::Failure => false,
            };
            if !matches {
                return Err(Error::Data(Some(
                    "The value's key does not match the cursor's key".to_owned(),
                )));
            }
        }

        // Step 10: Let operation be an algorithm to run store a record into an object store with
        // this's effective object store, clone, this's effective key, and false.
        // Step 11: Let request be the result of running asynchronously execute a request with
        // this, operation.
        let operation = store_a_record(store, value, Some(effective_key), false);
        Ok(self
            .transaction
            .execute_async(self.source.clone(), operation))
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbcursor-delete>
    pub fn delete(self: &Rc<Self>) -> Fallible<Rc<IDBRequest>> {
        // Steps 1 to 6.
        let effective_key = self.check_writable()?;

        // Step 7: Let operation be an algorithm to run delete records from an object store with
        // this's effective object store and this's effective key.
        let store = self.source.object_store().clone();
        let operation = async move {
            let store_name = store.name();
            store
                .transaction()
                .db()
                .engine()
                .delete_items(&store_name, &IndexedDBKeyRange::only(effective_key))?;
            Ok(RequestResult::Undefined)
        };

        // Step 8: Let request be the result of running asynchronously execute a request with this
        // and operation.
        Ok(self
            .transaction
            .execute_async(self.source.clone(), operation))
    }
}
