/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use indexeddb_traits::{
    CreateObjectResult, Error, ExtractionResult, Fallible, IDBCursorDirection, IndexedDBIndex,
    IndexedDBKeyRange, IndexedDBKeyType, IndexedDBObjectStore, IndexedDBTxnMode, KeyPath,
    KeyRangeInput, PutItemResult, StructuredValue, check_key_can_be_injected_into_value,
    extract_key_from_value_using_key_path, inject_key_into_value_using_key_path, value_to_key,
    value_to_key_range,
};
use log::{debug, warn};
use rustc_hash::FxHashMap;

use crate::cursor::{IDBCursor, ObjectStoreOrIndex};
use crate::engines::{IndexKeys, KvsEngine};
use crate::index::IDBIndex;
use crate::request::{IDBRequest, RequestResult};
use crate::transaction::IDBTransaction;

pub(crate) fn decode_value(bytes: &[u8]) -> Fallible<StructuredValue> {
    StructuredValue::deserialize(bytes).map_err(|err| Error::Backend(err.into()))
}

/// A `count` argument as the backend takes it, where 0 means no limit.
pub(crate) fn backend_count(count: Option<u32>) -> u32 {
    count.unwrap_or(0)
}

/// The keys `index` holds for `value`. Values the index key path does not
/// resolve on, or resolves to an invalid key, are not indexed.
pub(crate) fn index_keys_for_value(
    index: &IndexedDBIndex,
    value: &StructuredValue,
) -> Vec<IndexedDBKeyType> {
    match extract_key_from_value_using_key_path(value, &index.key_path, index.multi_entry) {
        ExtractionResult::Key(IndexedDBKeyType::Array(keys)) if index.multi_entry => keys,
        ExtractionResult::Key(key) => vec![key],
        ExtractionResult::Invalid | ExtractionResult::Failure => vec![],
    }
}

/// <https://w3c.github.io/IndexedDB/#object-store-handle-construct>
pub struct IDBObjectStore {
    /// <https://w3c.github.io/IndexedDB/#object-store-handle-name>
    name: RefCell<String>,
    key_path: Option<KeyPath>,
    auto_increment: bool,
    transaction: Rc<IDBTransaction>,
    index_handles: RefCell<FxHashMap<String, Weak<IDBIndex>>>,
}

impl IDBObjectStore {
    pub(crate) fn new(name: &str, transaction: Rc<IDBTransaction>) -> Rc<IDBObjectStore> {
        let schema = transaction.db().object_store_schema(name);
        Rc::new(IDBObjectStore {
            name: RefCell::new(name.to_owned()),
            key_path: schema.as_ref().and_then(|store| store.key_path.clone()),
            auto_increment: schema.as_ref().is_some_and(|store| store.auto_increment),
            transaction,
            index_handles: Default::default(),
        })
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-name>
    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-keypath>
    pub fn key_path(&self) -> Option<KeyPath> {
        self.key_path.clone()
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-autoincrement>
    pub fn auto_increment(&self) -> bool {
        self.auto_increment
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-transaction>
    pub fn transaction(&self) -> &Rc<IDBTransaction> {
        &self.transaction
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-indexnames>
    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .schema()
            .map(|store| store.indexes.into_iter().map(|index| index.name).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub(crate) fn schema(&self) -> Option<IndexedDBObjectStore> {
        self.transaction.db().object_store_schema(&self.name.borrow())
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.schema().is_none()
    }

    fn check_not_deleted(&self) -> Fallible<()> {
        if self.is_deleted() {
            return Err(Error::InvalidState(Some(format!(
                "Object store {} has been deleted",
                self.name.borrow()
            ))));
        }
        Ok(())
    }

    fn check_active(&self) -> Fallible<()> {
        if !self.transaction.is_active() {
            return Err(Error::TransactionInactive);
        }
        Ok(())
    }

    fn check_writable(&self) -> Fallible<()> {
        if self.transaction.mode() == IndexedDBTxnMode::Readonly {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    fn check_upgrade_transaction(&self) -> Fallible<()> {
        if self.transaction.mode() != IndexedDBTxnMode::Versionchange {
            return Err(Error::InvalidState(Some(
                "Only a version change transaction can change the schema".to_owned(),
            )));
        }
        Ok(())
    }

    fn source(self: &Rc<Self>) -> ObjectStoreOrIndex {
        ObjectStoreOrIndex::ObjectStore(self.clone())
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-put>
    pub fn put(
        self: &Rc<Self>,
        value: StructuredValue,
        key: Option<&StructuredValue>,
    ) -> Fallible<Rc<IDBRequest>> {
        self.add_or_put(value, key, false)
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-add>
    pub fn add(
        self: &Rc<Self>,
        value: StructuredValue,
        key: Option<&StructuredValue>,
    ) -> Fallible<Rc<IDBRequest>> {
        self.add_or_put(value, key, true)
    }

    /// <https://w3c.github.io/IndexedDB/#add-or-put>
    fn add_or_put(
        self: &Rc<Self>,
        value: StructuredValue,
        key: Option<&StructuredValue>,
        no_overwrite: bool,
    ) -> Fallible<Rc<IDBRequest>> {
        let key = key.filter(|key| !matches!(key, StructuredValue::Undefined));

        // Step 1: Let transaction be handle's transaction.
        // Step 2: Let store be handle's object store.
        // Step 3: If store has been deleted, throw an "InvalidStateError" DOMException.
        self.check_not_deleted()?;

        // Step 4: If transaction's state is not active, then throw a "TransactionInactiveError"
        // DOMException.
        self.check_active()?;

        // Step 5: If transaction is a read-only transaction, throw a "ReadOnlyError" DOMException.
        self.check_writable()?;

        // Step 6: If store uses in-line keys and key was given, throw a "DataError" DOMException.
        if self.key_path.is_some() && key.is_some() {
            return Err(Error::Data(Some(
                "A key was given for a store with in-line keys".to_owned(),
            )));
        }

        // Step 7: If store uses out-of-line keys and has no key generator and key was not given,
        // throw a "DataError" DOMException.
        if self.key_path.is_none() && !self.auto_increment && key.is_none() {
            return Err(Error::Data(Some(
                "A key is required for a store with out-of-line keys".to_owned(),
            )));
        }

        // Step 8: If key was given, then:
        // Step 8.1: Let r be the result of converting a value to a key with key.
        // Step 8.2: If r is invalid, throw a "DataError" DOMException.
        // Step 8.3: Let key be r.
        let mut key = key.map(|key| value_to_key(key).into_result()).transpose()?;

        // Step 9: Let targetRealm be a user-agent defined Realm.
        // Step 10: Let clone be a clone of value in targetRealm during transaction.

        // Step 11: If store uses in-line keys, then:
        if let Some(key_path) = self.key_path.as_ref() {
            // Step 11.1: Let kpk be the result of extracting a key from a value using a key path
            // with clone and store's key path.
            match extract_key_from_value_using_key_path(&value, key_path, false) {
                // Step 11.2: If kpk is invalid, throw a "DataError" DOMException.
                ExtractionResult::Invalid => {
                    return Err(Error::Data(Some(
                        "The key path yields an invalid key".to_owned(),
                    )));
                },
                // Step 11.3: If kpk is not failure, let key be kpk.
                ExtractionResult::Key(kpk) => key = Some(kpk),
                // Step 11.4: Otherwise (kpk is failure):
                ExtractionResult::Failure => {
                    // Step 11.4.1: If store does not have a key generator, throw a "DataError"
                    // DOMException.
                    // Step 11.4.2: Otherwise, if check that a key could be injected into a value
                    // with clone and store's key path return false, throw a "DataError"
                    // DOMException.
                    let injectable = key_path
                        .as_string()
                        .is_some_and(|path| check_key_can_be_injected_into_value(&value, path));
                    if !self.auto_increment || !injectable {
                        return Err(Error::Data(Some(
                            "No key could be derived from the value".to_owned(),
                        )));
                    }
                },
            }
        }

        // Step 12: Let operation be an algorithm to run store a record into an object store with
        // store, clone, key, and no-overwrite flag.
        let operation = store_a_record(self.clone(), value, key, no_overwrite);

        // Step 13: Return the result (an IDBRequest) of running asynchronously execute a request
        // with handle and operation.
        Ok(self.transaction.execute_async(self.source(), operation))
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-delete>
    pub fn delete(self: &Rc<Self>, query: &KeyRangeInput) -> Fallible<Rc<IDBRequest>> {
        // Step 3: If store has been deleted, throw an "InvalidStateError" DOMException.
        self.check_not_deleted()?;
        // Step 4: If transaction's state is not active, then throw a "TransactionInactiveError"
        // DOMException.
        self.check_active()?;
        // Step 5: If transaction is a read-only transaction, throw a "ReadOnlyError" DOMException.
        self.check_writable()?;
        // Step 6: Let range be the result of converting a value to a key range with query and
        // true. Rethrow any exceptions.
        let range = value_to_key_range(Some(query), true)?;

        // Step 7: Let operation be an algorithm to run delete records from an object store with
        // store and range.
        let store = self.clone();
        let operation = async move {
            let engine = store.transaction.db().engine().clone();
            engine.delete_items(&store.name(), &range)?;
            Ok(RequestResult::Undefined)
        };

        // Step 8: Return the result (an IDBRequest) of running asynchronously execute a request
        // with this and operation.
        Ok(self.transaction.execute_async(self.source(), operation))
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-clear>
    pub fn clear(self: &Rc<Self>) -> Fallible<Rc<IDBRequest>> {
        self.check_not_deleted()?;
        self.check_active()?;
        self.check_writable()?;

        let store = self.clone();
        let operation = async move {
            let engine = store.transaction.db().engine().clone();
            engine.clear(&store.name())?;
            Ok(RequestResult::Undefined)
        };
        Ok(self.transaction.execute_async(self.source(), operation))
    }

    /// Validation shared by the read operations: the store must exist and
    /// the transaction be active, then the query is converted.
    fn read_range(
        &self,
        query: Option<&KeyRangeInput>,
        null_disallowed: bool,
    ) -> Fallible<IndexedDBKeyRange> {
        self.check_not_deleted()?;
        self.check_active()?;
        value_to_key_range(query, null_disallowed)
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-get>
    pub fn get(self: &Rc<Self>, query: &KeyRangeInput) -> Fallible<Rc<IDBRequest>> {
        let range = self.read_range(Some(query), true)?;
        let store = self.clone();
        let operation = async move {
            let engine = store.transaction.db().engine().clone();
            match engine.get_item(&store.name(), None, &range)? {
                Some(bytes) => Ok(RequestResult::Value(decode_value(&bytes)?)),
                None => Ok(RequestResult::Undefined),
            }
        };
        Ok(self.transaction.execute_async(self.source(), operation))
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-getkey>
    pub fn get_key(self: &Rc<Self>, query: &KeyRangeInput) -> Fallible<Rc<IDBRequest>> {
        let range = self.read_range(Some(query), true)?;
        let store = self.clone();
        let operation = async move {
            let engine = store.transaction.db().engine().clone();
            Ok(engine
                .get_key(&store.name(), None, &range)?
                .map_or(RequestResult::Undefined, RequestResult::Key))
        };
        Ok(self.transaction.execute_async(self.source(), operation))
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-getall>
    pub fn get_all(
        self: &Rc<Self>,
        query: Option<&KeyRangeInput>,
        count: Option<u32>,
    ) -> Fallible<Rc<IDBRequest>> {
        let range = self.read_range(query, false)?;
        let store = self.clone();
        let operation = async move {
            let engine = store.transaction.db().engine().clone();
            let values = engine
                .get_all_items(&store.name(), None, &range, backend_count(count))?
                .iter()
                .map(|bytes| decode_value(bytes))
                .collect::<Fallible<Vec<_>>>()?;
            Ok(RequestResult::Values(values))
        };
        Ok(self.transaction.execute_async(self.source(), operation))
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-getallkeys>
    pub fn get_all_keys(
        self: &Rc<Self>,
        query: Option<&KeyRangeInput>,
        count: Option<u32>,
    ) -> Fallible<Rc<IDBRequest>> {
        let range = self.read_range(query, false)?;
        let store = self.clone();
        let operation = async move {
            let engine = store.transaction.db().engine().clone();
            Ok(RequestResult::Keys(engine.get_all_keys(
                &store.name(),
                None,
                &range,
                backend_count(count),
            )?))
        };
        Ok(self.transaction.execute_async(self.source(), operation))
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-count>
    pub fn count(self: &Rc<Self>, query: Option<&KeyRangeInput>) -> Fallible<Rc<IDBRequest>> {
        let range = self.read_range(query, false)?;
        let store = self.clone();
        let operation = async move {
            let engine = store.transaction.db().engine().clone();
            Ok(RequestResult::Count(engine.count(&store.name(), None, &range)?))
        };
        Ok(self.transaction.execute_async(self.source(), operation))
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-opencursor>
    pub fn open_cursor(
        self: &Rc<Self>,
        query: Option<&KeyRangeInput>,
        direction: IDBCursorDirection,
    ) -> Fallible<Rc<IDBRequest>> {
        self.open_cursor_with(query, direction, false)
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-openkeycursor>
    pub fn open_key_cursor(
        self: &Rc<Self>,
        query: Option<&KeyRangeInput>,
        direction: IDBCursorDirection,
    ) -> Fallible<Rc<IDBRequest>> {
        self.open_cursor_with(query, direction, true)
    }

    fn open_cursor_with(
        self: &Rc<Self>,
        query: Option<&KeyRangeInput>,
        direction: IDBCursorDirection,
        key_only: bool,
    ) -> Fallible<Rc<IDBRequest>> {
        // Steps 1 to 5: Check the store and the transaction, then convert query to a key range.
        let range = self.read_range(query, false)?;
        Ok(open_cursor_on(
            &self.transaction,
            self.source(),
            range,
            direction,
            key_only,
        ))
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-index>
    pub fn index(self: &Rc<Self>, name: &str) -> Fallible<Rc<IDBIndex>> {
        // Step 3: If store has been deleted, throw an "InvalidStateError" DOMException.
        self.check_not_deleted()?;
        // Step 4: If transaction's state is finished, then throw an "InvalidStateError"
        // DOMException.
        if self.transaction.is_finished() {
            return Err(Error::InvalidState(Some(
                "The transaction has finished".to_owned(),
            )));
        }
        // Step 5: Let index be the index named name in this's index set if one exists, or throw a
        // "NotFoundError" DOMException otherwise.
        let schema = self
            .schema()
            .and_then(|store| store.index(name).cloned())
            .ok_or_else(|| Error::NotFound(Some(format!("No index named {name}"))))?;

        // Step 6: Return an index handle associated with index and this.
        if let Some(index) = self
            .index_handles
            .borrow()
            .get(name)
            .and_then(Weak::upgrade)
        {
            return Ok(index);
        }
        let index = IDBIndex::new(self.clone(), &schema);
        self.index_handles
            .borrow_mut()
            .insert(name.to_owned(), Rc::downgrade(&index));
        Ok(index)
    }

    pub(crate) fn rename_index_handle(&self, name: &str, new_name: &str) {
        let mut handles = self.index_handles.borrow_mut();
        if let Some(handle) = handles.remove(name) {
            handles.insert(new_name.to_owned(), handle);
        }
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-createindex>
    pub fn create_index(
        self: &Rc<Self>,
        name: &str,
        key_path: KeyPath,
        unique: bool,
        multi_entry: bool,
    ) -> Fallible<Rc<IDBIndex>> {
        // Step 1: Let transaction be this's transaction.
        // Step 2: Let store be this's object store.
        // Step 3: If transaction is not an upgrade transaction, throw an "InvalidStateError"
        // DOMException.
        self.check_upgrade_transaction()?;

        // Step 4: If store has been deleted, throw an "InvalidStateError" DOMException.
        self.check_not_deleted()?;

        // Step 5: If transaction's state is not active, then throw a "TransactionInactiveError"
        // DOMException.
        self.check_active()?;

        // Step 6: If an index named name already exists in store, throw a "ConstraintError"
        // DOMException.
        let store_name = self.name();
        if self
            .schema()
            .is_some_and(|store| store.index(name).is_some())
        {
            return Err(Error::Constraint(Some(format!(
                "Index {name} already exists on {store_name}"
            ))));
        }

        // Step 7: If keyPath is not a valid key path, throw a "SyntaxError" DOMException.
        if !key_path.is_valid() {
            return Err(Error::Syntax(Some(format!("{key_path:?} is not a valid key path"))));
        }

        // Step 8: Let unique be options's unique member.
        // Step 9: Let multiEntry be options's multiEntry member.
        // Step 10: If keyPath is a sequence and multiEntry is true, throw an "InvalidAccessError"
        // DOMException.
        if matches!(key_path, KeyPath::Sequence(_)) && multi_entry {
            return Err(Error::InvalidAccess(Some(
                "A multiEntry index cannot use a sequence key path".to_owned(),
            )));
        }

        // Step 11: Let index be a new index in store.
        let index = IndexedDBIndex {
            name: name.to_owned(),
            key_path,
            unique,
            multi_entry,
        };
        let db = self.transaction.db().clone();
        let engine = db.engine().clone();
        if engine.create_index(&store_name, &index)? == CreateObjectResult::AlreadyExists {
            return Err(Error::Constraint(Some(format!(
                "Index {name} already exists on {store_name}"
            ))));
        }
        db.add_index_schema(&store_name, index.clone());

        // Step 12: Populate the index with the records already in store. If that breaks the
        // uniqueness constraint, abort transaction with a "ConstraintError" DOMException.
        if let Err(error) = populate_index(&*engine, &store_name, &index) {
            warn!("Populating index {name} on {store_name} failed: {error}");
            self.transaction.queue_abort(error);
        }

        // Step 13: Return a new index handle associated with index and this.
        self.index(name)
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-deleteindex>
    pub fn delete_index(self: &Rc<Self>, name: &str) -> Fallible<()> {
        // Step 3: If transaction is not an upgrade transaction, throw an "InvalidStateError"
        // DOMException.
        self.check_upgrade_transaction()?;
        // Step 4: If store has been deleted, throw an "InvalidStateError" DOMException.
        self.check_not_deleted()?;
        // Step 5: If transaction's state is not active, then throw a "TransactionInactiveError"
        // DOMException.
        self.check_active()?;
        // Step 6: Let index be the index named name in store if one exists, or throw a
        // "NotFoundError" DOMException otherwise.
        let store_name = self.name();
        if self
            .schema()
            .is_none_or(|store| store.index(name).is_none())
        {
            return Err(Error::NotFound(Some(format!("No index named {name}"))));
        }

        // Step 7: Remove index from this's index set.
        // Step 8: Destroy index.
        let db = self.transaction.db();
        db.engine().delete_index(&store_name, name)?;
        db.remove_index_schema(&store_name, name);
        self.index_handles.borrow_mut().remove(name);
        Ok(())
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbobjectstore-name>
    pub fn set_name(&self, name: &str) -> Fallible<()> {
        // Step 4: If store has been deleted, throw an "InvalidStateError" DOMException.
        self.check_not_deleted()?;
        // Step 5: If transaction is not an upgrade transaction, throw an "InvalidStateError"
        // DOMException.
        self.check_upgrade_transaction()?;
        // Step 6: If transaction's state is not active, throw a "TransactionInactiveError"
        // DOMException.
        self.check_active()?;

        // Step 7: If store's name is equal to name, terminate these steps.
        let old_name = self.name();
        if old_name == name {
            return Ok(());
        }

        // Step 8: If an object store named name already exists in store's database, throw a
        // "ConstraintError" DOMException.
        let db = self.transaction.db();
        if db.object_store_schema(name).is_some() {
            return Err(Error::Constraint(Some(format!(
                "Object store {name} already exists"
            ))));
        }

        // Step 9: Set store's name to name.
        // Step 10: Set this's name to name.
        db.engine().rename_store(&old_name, name)?;
        db.rename_store_schema(&old_name, name);
        self.transaction.rename_in_scope(&old_name, name);
        *self.name.borrow_mut() = name.to_owned();
        debug!("Renamed object store {old_name} to {name}");
        Ok(())
    }
}

/// Creates a cursor over `source` and queues its first iteration.
pub(crate) fn open_cursor_on(
    transaction: &Rc<IDBTransaction>,
    source: ObjectStoreOrIndex,
    range: IndexedDBKeyRange,
    direction: IDBCursorDirection,
    key_only: bool,
) -> Rc<IDBRequest> {
    // Step 6: Let cursor be a new cursor with its source handle set to this, undefined position,
    // direction set to direction, got value flag set to false, undefined key and value, range set
    // to range, and key only flag set to key_only.
    let cursor = IDBCursor::new(transaction.clone(), source.clone(), range, direction, key_only);

    // Step 7: Let operation be an algorithm to run iterate a cursor with the current Realm
    // record and cursor.
    let operation = cursor.clone().iterate(1, None, None);

    // Step 8: Let request be the result of running asynchronously execute a request with this
    // and operation.
    let request = transaction.execute_async(source, operation);

    // Step 9: Set cursor's request to request.
    cursor.set_request(&request);

    // Step 10: Return request.
    request
}

fn populate_index(
    engine: &dyn KvsEngine,
    store_name: &str,
    index: &IndexedDBIndex,
) -> Fallible<()> {
    let range = IndexedDBKeyRange::unbounded();
    let keys = engine.get_all_keys(store_name, None, &range, 0)?;
    let values = engine.get_all_items(store_name, None, &range, 0)?;
    let mut entries = vec![];
    for (primary_key, bytes) in keys.into_iter().zip(values) {
        let value = decode_value(&bytes)?;
        entries.extend(
            index_keys_for_value(index, &value)
                .into_iter()
                .map(|index_key| (index_key, primary_key.clone())),
        );
    }
    match engine.add_index_entries(store_name, &index.name, entries)? {
        PutItemResult::Success => Ok(()),
        PutItemResult::CannotOverwrite | PutItemResult::IndexConstraint(_) => {
            Err(Error::Constraint(Some(format!(
                "Existing records break the uniqueness of index {}",
                index.name
            ))))
        },
    }
}

/// <https://w3c.github.io/IndexedDB/#store-a-record-into-an-object-store>
pub(crate) async fn store_a_record(
    store: Rc<IDBObjectStore>,
    mut value: StructuredValue,
    key: Option<IndexedDBKeyType>,
    no_overwrite: bool,
) -> Fallible<RequestResult> {
    let db = store.transaction.db().clone();
    let store_name = store.name();
    let schema = db.object_store_schema(&store_name).ok_or_else(|| {
        Error::InvalidState(Some(format!("Object store {store_name} has been deleted")))
    })?;

    // Step 1: If store uses a key generator, then:
    let mut generator = db.key_generator(&store_name);
    let key = match (key, generator.as_mut()) {
        // Step 1.1: If key is undefined, then:
        (None, Some(generator)) => {
            // Step 1.1.1: Let key be the result of generating a key for store.
            // Step 1.1.2: If key is failure, then this operation failed with a "ConstraintError"
            // DOMException. Abort this algorithm without taking any further steps.
            let key = generator.generate_key()?;

            // Step 1.1.3: If store also uses in-line keys, then run inject a key into a value
            // using a key path with value, key and store's key path.
            if let Some(path) = schema.key_path.as_ref().and_then(KeyPath::as_string) {
                inject_key_into_value_using_key_path(&mut value, &key, path);
            }
            key
        },
        // Step 1.2: Otherwise, run possibly update the key generator for store with key.
        (Some(key), Some(generator)) => {
            generator.possibly_update(&key);
            key
        },
        (Some(key), None) => key,
        (None, None) => {
            return Err(Error::Data(Some(
                "A record needs a key or a key generator".to_owned(),
            )));
        },
    };

    // Step 2: If the no-overwrite flag was given to these steps and is true, and a record
    // already exists in store with its key equal to key, then this operation failed with a
    // "ConstraintError" DOMException.
    // Step 3: If a record already exists in store with its key equal to key, then remove the
    // record from store using delete records from an object store.
    // Step 4: Store a record in store containing key as its key and
    // ! StructuredSerializeForStorage(value) as its value.
    // Step 5: For each index which references store, add the index keys of the record. If an
    // index is unique and already holds one of them, this operation failed with a
    // "ConstraintError" DOMException.
    let index_keys = schema
        .indexes
        .iter()
        .map(|index| IndexKeys {
            index_name: index.name.clone(),
            keys: index_keys_for_value(index, &value),
        })
        .filter(|index_keys| !index_keys.keys.is_empty())
        .collect();
    let serialized = value
        .serialize()
        .map_err(|err| Error::Backend(err.into()))?;
    let engine = db.engine().clone();
    match engine.put_item(&store_name, &key, serialized, index_keys, !no_overwrite)? {
        PutItemResult::Success => {},
        PutItemResult::CannotOverwrite => {
            return Err(Error::Constraint(Some(
                "A record with this key already exists".to_owned(),
            )));
        },
        PutItemResult::IndexConstraint(index_name) => {
            return Err(Error::Constraint(Some(format!(
                "The record breaks the uniqueness of index {index_name}"
            ))));
        },
    }

    if let Some(generator) = generator {
        db.update_key_generator(&store_name, &generator)?;
    }

    // Step 6: Return key.
    Ok(RequestResult::Key(key))
}
