/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexeddb_traits::{
    CreateObjectResult, Error, Fallible, IndexedDBIndex, IndexedDBObjectStore, IndexedDBTxnMode,
    KeyPath, TransactionDurability,
};
use indexmap::IndexMap;
use log::{debug, error};
use uuid::Uuid;

use crate::connection;
use crate::engines::KvsEngine;
use crate::event::EventDispatcher;
use crate::key_generator::KeyGenerator;
use crate::object_store::IDBObjectStore;
use crate::transaction::IDBTransaction;

type Schema = IndexMap<String, IndexedDBObjectStore>;

/// <https://w3c.github.io/IndexedDB/#connection>
pub struct IDBDatabase {
    id: Uuid,
    /// <https://w3c.github.io/IndexedDB/#database-name>
    name: String,
    /// <https://w3c.github.io/IndexedDB/#database-version>
    version: Cell<u64>,
    engine: Rc<dyn KvsEngine>,
    dispatcher: Rc<dyn EventDispatcher>,
    /// <https://w3c.github.io/IndexedDB/#connection-object-store-set>
    schema: RefCell<Schema>,
    /// <https://w3c.github.io/IndexedDB/#database-upgrade-transaction>
    upgrade_transaction: RefCell<Weak<IDBTransaction>>,
    /// Version and schema to go back to if the upgrade transaction aborts.
    schema_snapshot: RefCell<Option<(u64, Schema)>>,
    /// <https://w3c.github.io/IndexedDB/#connection-close-pending-flag>
    close_pending: Cell<bool>,
    transaction_counter: Cell<u64>,
}

impl IDBDatabase {
    /// <https://w3c.github.io/IndexedDB/#open-a-database-connection>
    ///
    /// When `version` is newer than the stored one, `upgrade` is called with
    /// the new connection, its version change transaction and the old
    /// version. The transaction is active during the call.
    pub async fn open<F>(
        engine: Rc<dyn KvsEngine>,
        name: &str,
        version: Option<u64>,
        dispatcher: Rc<dyn EventDispatcher>,
        upgrade: F,
    ) -> Fallible<Rc<IDBDatabase>>
    where
        F: FnOnce(&Rc<IDBDatabase>, &Rc<IDBTransaction>, u64),
    {
        // If version is 0 (zero), throw a TypeError.
        if version == Some(0) {
            return Err(Error::Type("The version must be positive".to_owned()));
        }

        // Let db be the database named name.
        let db_version = engine.version()?;

        // If version is undefined, let version be 1 if db was newly created or db's version
        // otherwise.
        let version = version.unwrap_or(db_version.max(1));

        // If db's version is greater than version, return a newly created "VersionError"
        // DOMException and abort these steps.
        if db_version > version {
            return Err(Error::Version);
        }

        // Let connection be a new connection to db.
        let schema = engine
            .object_stores()?
            .into_iter()
            .map(|store| (store.name.clone(), store))
            .collect();
        let db = Rc::new(IDBDatabase {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            version: Cell::new(db_version),
            engine,
            dispatcher,
            schema: RefCell::new(schema),
            upgrade_transaction: Default::default(),
            schema_snapshot: Default::default(),
            close_pending: Cell::new(false),
            transaction_counter: Cell::new(0),
        });
        connection::register(db.id);
        debug!("Opened connection {} to {} (version {})", db.id, name, db_version);

        // If db's version is less than version, then run upgrade a database using connection,
        // version and request.
        if db_version < version {
            db.run_upgrade(version, upgrade).await?;
        }

        // Return connection.
        Ok(db)
    }

    /// <https://w3c.github.io/IndexedDB/#upgrade-a-database>
    async fn run_upgrade<F>(self: &Rc<Self>, version: u64, upgrade: F) -> Fallible<()>
    where
        F: FnOnce(&Rc<IDBDatabase>, &Rc<IDBTransaction>, u64),
    {
        // Step 1: Let db be connection's database.
        // Step 2: Let transaction be a new upgrade transaction with connection used as connection.
        // Step 3: Set transaction's scope to connection's object store set.
        let scope = self.schema.borrow().keys().cloned().collect();
        let old_version = self.version.get();
        if let Err(err) = self.engine.begin_upgrade() {
            self.close();
            return Err(err.into());
        }
        *self.schema_snapshot.borrow_mut() = Some((old_version, self.schema.borrow().clone()));

        // Step 6: Set db's version to version. This change is considered part of the transaction,
        // and so if the transaction is aborted, this change is reverted.
        if let Err(err) = self.engine.set_version(version) {
            self.rollback_upgrade();
            self.close();
            return Err(err.into());
        }
        self.version.set(version);

        // Step 4: Set db's upgrade transaction to transaction.
        // Step 5: Set transaction's state to inactive.
        let transaction = IDBTransaction::new(
            self,
            self.next_serial_number(),
            scope,
            IndexedDBTxnMode::Versionchange,
            TransactionDurability::Default,
        );
        *self.upgrade_transaction.borrow_mut() = Rc::downgrade(&transaction);
        debug!(
            "Upgrading {} from version {} to {}",
            self.name, old_version, version
        );

        // Step 10: Let didThrow be the result of firing a version change event named
        // upgradeneeded at request with old version and version.
        upgrade(self, &transaction, old_version);

        // Step 11: Wait for transaction to finish.
        transaction.done().await;

        // If the upgrade transaction was aborted, run the steps to close a database connection
        // with connection, return a newly created "AbortError" DOMException and abort these
        // steps.
        if transaction.was_aborted() {
            self.close();
            return Err(Error::Abort);
        }
        Ok(())
    }

    fn next_serial_number(&self) -> u64 {
        let serial_number = self.transaction_counter.get();
        self.transaction_counter.set(serial_number + 1);
        serial_number
    }

    /// Identifies the connection in the registry of open connections.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbdatabase-name>
    pub fn name(&self) -> &str {
        &self.name
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbdatabase-version>
    pub fn version(&self) -> u64 {
        self.version.get()
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbdatabase-objectstorenames>
    pub fn object_store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schema.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_closed(&self) -> bool {
        self.close_pending.get()
    }

    pub(crate) fn engine(&self) -> &Rc<dyn KvsEngine> {
        &self.engine
    }

    pub(crate) fn dispatcher(&self) -> &Rc<dyn EventDispatcher> {
        &self.dispatcher
    }

    /// The upgrade transaction, while it has not finished.
    fn live_upgrade_transaction(&self) -> Option<Rc<IDBTransaction>> {
        self.upgrade_transaction
            .borrow()
            .upgrade()
            .filter(|transaction| !transaction.is_finished())
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbdatabase-transaction>
    pub fn transaction(
        self: &Rc<Self>,
        store_names: &[&str],
        mode: IndexedDBTxnMode,
        durability: TransactionDurability,
    ) -> Fallible<Rc<IDBTransaction>> {
        // Step 1: If a live upgrade transaction is associated with the connection, throw an
        // "InvalidStateError" DOMException.
        if self.live_upgrade_transaction().is_some() {
            return Err(Error::InvalidState(Some(
                "A version change transaction is running".to_owned(),
            )));
        }

        // Step 2: If this's close pending flag is true, then throw an "InvalidStateError"
        // DOMException.
        if self.close_pending.get() || !connection::is_open(self.id) {
            return Err(Error::InvalidState(Some(
                "The connection is closed".to_owned(),
            )));
        }

        // Step 3: Let scope be the set of unique strings in storeNames.
        let mut scope: Vec<String> = vec![];
        for name in store_names {
            if !scope.iter().any(|existing| existing == name) {
                scope.push((*name).to_owned());
            }
        }

        // Step 4: If any string in scope is not the name of an object store in the connected
        // database, throw a "NotFoundError" DOMException.
        if let Some(missing) = scope
            .iter()
            .find(|name| !self.schema.borrow().contains_key(name.as_str()))
        {
            return Err(Error::NotFound(Some(format!(
                "No object store named {missing}"
            ))));
        }

        // Step 5: If scope is empty, throw an "InvalidAccessError" DOMException.
        if scope.is_empty() {
            return Err(Error::InvalidAccess(Some(
                "A transaction needs at least one object store".to_owned(),
            )));
        }

        // Step 6: If mode is not "readonly" or "readwrite", throw a TypeError.
        if mode == IndexedDBTxnMode::Versionchange {
            return Err(Error::Type(
                "Version change transactions are only started by open".to_owned(),
            ));
        }

        // Step 7: Let transaction be a newly created transaction with this connection, mode,
        // options' durability member, and the set of object stores named in scope.
        // Step 8: Set transaction's cleanup event loop to the current event loop.
        // Step 9: Return an IDBTransaction object representing transaction.
        Ok(IDBTransaction::new(
            self,
            self.next_serial_number(),
            scope,
            mode,
            durability,
        ))
    }

    /// The upgrade transaction, provided it is active.
    fn active_upgrade_transaction(&self) -> Fallible<Rc<IDBTransaction>> {
        // Let transaction be database's upgrade transaction if it is not null, or throw an
        // "InvalidStateError" DOMException otherwise.
        let transaction = self.live_upgrade_transaction().ok_or_else(|| {
            Error::InvalidState(Some(
                "The schema can only change during a version change transaction".to_owned(),
            ))
        })?;
        // If transaction's state is not active, then throw a "TransactionInactiveError"
        // DOMException.
        if !transaction.is_active() {
            return Err(Error::TransactionInactive);
        }
        Ok(transaction)
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbdatabase-createobjectstore>
    pub fn create_object_store(
        &self,
        name: &str,
        key_path: Option<KeyPath>,
        auto_increment: bool,
    ) -> Fallible<Rc<IDBObjectStore>> {
        // Step 1: Let database be this's associated database.
        // Step 2: Let transaction be database's upgrade transaction if it is not null, or throw
        // an "InvalidStateError" DOMException otherwise.
        // Step 3: If transaction's state is not active, then throw a "TransactionInactiveError"
        // DOMException.
        let transaction = self.active_upgrade_transaction()?;

        // Step 4: Let keyPath be options's keyPath member.
        // Step 5: If keyPath is not null and is not a valid key path, throw a "SyntaxError"
        // DOMException.
        if let Some(key_path) = key_path.as_ref().filter(|key_path| !key_path.is_valid()) {
            return Err(Error::Syntax(Some(format!(
                "{key_path:?} is not a valid key path"
            ))));
        }

        // Step 6: If an object store named name already exists in database throw a
        // "ConstraintError" DOMException.
        if self.schema.borrow().contains_key(name) {
            return Err(Error::Constraint(Some(format!(
                "Object store {name} already exists"
            ))));
        }

        // Step 7: Let autoIncrement be options's autoIncrement member.
        // Step 8: If autoIncrement is true and keyPath is an empty string or any sequence (empty
        // or otherwise), throw an "InvalidAccessError" DOMException.
        let unusable_key_path = match key_path.as_ref() {
            Some(KeyPath::String(path)) => path.is_empty(),
            Some(KeyPath::Sequence(_)) => true,
            None => false,
        };
        if auto_increment && unusable_key_path {
            return Err(Error::InvalidAccess(Some(
                "A key generator needs a non-empty string key path".to_owned(),
            )));
        }

        // Step 9: Let store be a new object store in database. Set the created object store's
        // name to name. If autoIncrement is true, then the created object store uses a key
        // generator. If keyPath is not null, set the created object store's key path to keyPath.
        if self
            .engine
            .create_store(name, key_path.as_ref(), auto_increment)? ==
            CreateObjectResult::AlreadyExists
        {
            return Err(Error::Constraint(Some(format!(
                "Object store {name} already exists"
            ))));
        }
        self.schema.borrow_mut().insert(
            name.to_owned(),
            IndexedDBObjectStore {
                name: name.to_owned(),
                key_path,
                auto_increment,
                key_generator_current: KeyGenerator::default().current(),
                indexes: vec![],
            },
        );
        transaction.add_to_scope(name);
        debug!("Created object store {name} in {}", self.name);

        // Step 10: Return a new object store handle associated with store and transaction.
        transaction.object_store(name)
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbdatabase-deleteobjectstore>
    pub fn delete_object_store(&self, name: &str) -> Fallible<()> {
        // Step 1: Let database be this's associated database.
        // Step 2: Let transaction be database's upgrade transaction if it is not null, or throw
        // an "InvalidStateError" DOMException otherwise.
        // Step 3: If transaction's state is not active, then throw a "TransactionInactiveError"
        // DOMException.
        let transaction = self.active_upgrade_transaction()?;

        // Step 4: Let store be the object store named name in database, or throw a
        // "NotFoundError" DOMException if none.
        if !self.schema.borrow().contains_key(name) {
            return Err(Error::NotFound(Some(format!(
                "No object store named {name}"
            ))));
        }

        // Step 5: Remove store from this's object store set.
        // Step 6: If there is an object store handle associated with store and transaction,
        // remove all entries from its index set.
        // Step 7: Destroy store.
        self.engine.delete_store(name)?;
        self.schema.borrow_mut().shift_remove(name);
        transaction.remove_from_scope(name);
        debug!("Deleted object store {name} from {}", self.name);
        Ok(())
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbdatabase-close>
    pub fn close(&self) {
        // Step 1: Run close a database connection with this connection.
        // Step 1.1: Set connection's close pending flag to true.
        self.close_pending.set(true);
        if connection::unregister(self.id) {
            debug!("Closed connection {} to {}", self.id, self.name);
        }
    }

    pub(crate) fn object_store_schema(&self, name: &str) -> Option<IndexedDBObjectStore> {
        self.schema.borrow().get(name).cloned()
    }

    pub(crate) fn rename_store_schema(&self, name: &str, new_name: &str) {
        let mut schema = self.schema.borrow_mut();
        let Some(index) = schema.get_index_of(name) else {
            return;
        };
        if let Some((_, mut store)) = schema.shift_remove_index(index) {
            store.name = new_name.to_owned();
            schema.insert(new_name.to_owned(), store);
        }
    }

    pub(crate) fn add_index_schema(&self, store_name: &str, index: IndexedDBIndex) {
        if let Some(store) = self.schema.borrow_mut().get_mut(store_name) {
            store.indexes.push(index);
        }
    }

    pub(crate) fn remove_index_schema(&self, store_name: &str, index_name: &str) {
        if let Some(store) = self.schema.borrow_mut().get_mut(store_name) {
            store.indexes.retain(|index| index.name != index_name);
        }
    }

    pub(crate) fn rename_index_schema(&self, store_name: &str, index_name: &str, new_name: &str) {
        if let Some(store) = self.schema.borrow_mut().get_mut(store_name) {
            for index in store.indexes.iter_mut().filter(|index| index.name == index_name) {
                index.name = new_name.to_owned();
            }
        }
    }

    /// The key generator of a store, if it has one.
    pub(crate) fn key_generator(&self, store_name: &str) -> Option<KeyGenerator> {
        self.schema
            .borrow()
            .get(store_name)
            .filter(|store| store.auto_increment)
            .map(|store| KeyGenerator::with_current(store.key_generator_current))
    }

    pub(crate) fn update_key_generator(
        &self,
        store_name: &str,
        generator: &KeyGenerator,
    ) -> Fallible<()> {
        let current = generator.current();
        let changed = self
            .schema
            .borrow()
            .get(store_name)
            .is_some_and(|store| store.key_generator_current != current);
        if !changed {
            return Ok(());
        }
        self.engine.set_key_generator_current(store_name, current)?;
        if let Some(store) = self.schema.borrow_mut().get_mut(store_name) {
            store.key_generator_current = current;
        }
        Ok(())
    }

    /// Undoes the upgrade transaction: backend changes, the schema and the
    /// version.
    pub(crate) fn rollback_upgrade(&self) {
        if let Err(err) = self.engine.rollback_upgrade() {
            error!("Failed to roll back the upgrade of {}: {err}", self.name);
        }
        if let Some((version, schema)) = self.schema_snapshot.borrow_mut().take() {
            debug!("Restoring {} to version {version}", self.name);
            self.version.set(version);
            *self.schema.borrow_mut() = schema;
        }
        *self.upgrade_transaction.borrow_mut() = Weak::new();
    }

    pub(crate) fn commit_upgrade(&self) -> Fallible<()> {
        self.engine.commit_upgrade()?;
        self.schema_snapshot.borrow_mut().take();
        *self.upgrade_transaction.borrow_mut() = Weak::new();
        Ok(())
    }
}

impl Drop for IDBDatabase {
    fn drop(&mut self) {
        if connection::unregister(self.id) {
            debug!("Dropped open connection {} to {}", self.id, self.name);
        }
    }
}
