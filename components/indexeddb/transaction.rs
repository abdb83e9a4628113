/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::rc::{Rc, Weak};

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use indexeddb_traits::{Error, Fallible, IndexedDBTxnMode, TransactionDurability};
use log::{debug, warn};
use rustc_hash::FxHashMap;
use tokio::sync::{Notify, mpsc};

use crate::cursor::ObjectStoreOrIndex;
use crate::database::IDBDatabase;
use crate::event::{EventTarget, EventType};
use crate::object_store::IDBObjectStore;
use crate::request::{IDBRequest, RequestResult};

/// <https://w3c.github.io/IndexedDB/#transaction-state>
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionState {
    Active,
    Inactive,
    Committing,
    Finished,
}

type Operation = LocalBoxFuture<'static, Fallible<RequestResult>>;

/// Work for the task driving a transaction, handled in the order sent.
enum Job {
    /// The turn that created the transaction is over.
    Deactivate,
    Execute {
        request: Rc<IDBRequest>,
        operation: Operation,
    },
    /// Sent when commit starts, so it runs after every request queued before.
    Commit,
    /// Abort once the jobs sent before are handled.
    Abort(Error),
    /// The transaction was aborted from outside of its task.
    Shutdown,
}

/// <https://w3c.github.io/IndexedDB/#transaction-construct>
pub struct IDBTransaction {
    serial_number: u64,
    db: Rc<IDBDatabase>,
    mode: IndexedDBTxnMode,
    durability: TransactionDurability,
    /// <https://w3c.github.io/IndexedDB/#transaction-scope>
    scope: RefCell<Vec<String>>,
    state: Cell<TransactionState>,
    /// <https://w3c.github.io/IndexedDB/#transaction-request-list>
    /// Only holds requests that were not processed yet.
    requests: RefCell<VecDeque<Rc<IDBRequest>>>,
    error: RefCell<Option<Error>>,
    store_handles: RefCell<FxHashMap<String, Weak<IDBObjectStore>>>,
    sender: mpsc::UnboundedSender<Job>,
    done: Notify,
    aborted: Cell<bool>,
    next_request_id: Cell<u64>,
}

impl IDBTransaction {
    /// Creates an active transaction and spawns the task processing its
    /// requests. Must be called from within a `LocalSet`.
    pub(crate) fn new(
        db: &Rc<IDBDatabase>,
        serial_number: u64,
        scope: Vec<String>,
        mode: IndexedDBTxnMode,
        durability: TransactionDurability,
    ) -> Rc<IDBTransaction> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let transaction = Rc::new(IDBTransaction {
            serial_number,
            db: db.clone(),
            mode,
            durability,
            scope: RefCell::new(scope),
            state: Cell::new(TransactionState::Active),
            requests: Default::default(),
            error: Default::default(),
            store_handles: Default::default(),
            sender,
            done: Notify::new(),
            aborted: Cell::new(false),
            next_request_id: Cell::new(0),
        });
        debug!(
            "Created {} transaction {} on {}",
            mode,
            serial_number,
            db.name()
        );
        transaction.send(Job::Deactivate);
        tokio::task::spawn_local(transaction.clone().run(receiver));
        transaction
    }

    async fn run(self: Rc<Self>, mut receiver: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = receiver.recv().await {
            match job {
                Job::Deactivate => self.deactivate(),
                Job::Execute { request, operation } => {
                    self.execute_request(request, operation).await
                },
                Job::Commit => self.finish_commit(),
                Job::Abort(error) => self.abort_transaction(Some(error), None),
                Job::Shutdown => {},
            }
            if self.state.get() == TransactionState::Finished {
                break;
            }
        }
        debug!("Transaction {} is done", self.serial_number);
    }

    fn send(&self, job: Job) {
        if self.sender.send(job).is_err() {
            warn!(
                "Transaction {} no longer processes requests",
                self.serial_number
            );
        }
    }

    pub fn serial_number(&self) -> u64 {
        self.serial_number
    }

    pub fn db(&self) -> &Rc<IDBDatabase> {
        &self.db
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbtransaction-mode>
    pub fn mode(&self) -> IndexedDBTxnMode {
        self.mode
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbtransaction-durability>
    pub fn durability(&self) -> TransactionDurability {
        self.durability
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbtransaction-error>
    pub fn error(&self) -> Option<Error> {
        self.error.borrow().clone()
    }

    pub fn state(&self) -> TransactionState {
        self.state.get()
    }

    pub fn is_active(&self) -> bool {
        self.state.get() == TransactionState::Active
    }

    pub fn is_finished(&self) -> bool {
        self.state.get() == TransactionState::Finished
    }

    /// Whether the transaction finished by aborting rather than committing.
    pub fn was_aborted(&self) -> bool {
        self.aborted.get()
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbtransaction-objectstorenames>
    pub fn object_store_names(&self) -> Vec<String> {
        let mut names = self.scope.borrow().clone();
        names.sort();
        names
    }

    /// Resolves once the transaction is finished.
    pub async fn done(&self) {
        loop {
            let notified = self.done.notified();
            if self.state.get() == TransactionState::Finished {
                return;
            }
            notified.await;
        }
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbtransaction-objectstore>
    pub fn object_store(self: &Rc<Self>, name: &str) -> Fallible<Rc<IDBObjectStore>> {
        // Step 1: If this's state is finished, then throw an "InvalidStateError" DOMException.
        if self.state.get() == TransactionState::Finished {
            return Err(Error::InvalidState(Some(
                "The transaction has finished".to_owned(),
            )));
        }

        // Step 2: Let store be the object store named name in this's scope, or throw a
        // "NotFoundError" DOMException if none.
        if !self.scope.borrow().iter().any(|store_name| store_name == name) {
            return Err(Error::NotFound(Some(format!(
                "No object store named {name} in this transaction"
            ))));
        }

        // Step 3: Return an object store handle associated with store and this. Each call with
        // the same name returns the same handle.
        if let Some(store) = self
            .store_handles
            .borrow()
            .get(name)
            .and_then(Weak::upgrade)
        {
            return Ok(store);
        }
        let store = IDBObjectStore::new(name, self.clone());
        self.store_handles
            .borrow_mut()
            .insert(name.to_owned(), Rc::downgrade(&store));
        Ok(store)
    }

    pub(crate) fn add_to_scope(&self, name: &str) {
        self.scope.borrow_mut().push(name.to_owned());
    }

    pub(crate) fn remove_from_scope(&self, name: &str) {
        self.scope.borrow_mut().retain(|store_name| store_name != name);
        self.store_handles.borrow_mut().remove(name);
    }

    pub(crate) fn rename_in_scope(&self, name: &str, new_name: &str) {
        for store_name in self.scope.borrow_mut().iter_mut() {
            if store_name == name {
                *store_name = new_name.to_owned();
            }
        }
        let mut handles = self.store_handles.borrow_mut();
        if let Some(handle) = handles.remove(name) {
            handles.insert(new_name.to_owned(), handle);
        }
    }

    /// <https://w3c.github.io/IndexedDB/#asynchronously-execute-a-request>
    ///
    /// Callers check that the transaction is active first.
    pub(crate) fn execute_async(
        self: &Rc<Self>,
        source: ObjectStoreOrIndex,
        operation: impl Future<Output = Fallible<RequestResult>> + 'static,
    ) -> Rc<IDBRequest> {
        // Step 1: Let transaction be the transaction associated with source.
        // Step 2: Assert: transaction's state is active.
        debug_assert!(self.is_active());

        // Step 3: If request was not given, let request be a new request with source as source.
        let id = self.next_request_id.get();
        self.next_request_id.set(id + 1);
        let request = IDBRequest::new(id, source, self.clone());

        // Step 4: Add request to the end of transaction's request list.
        // Step 5: Run these steps in parallel.
        self.queue_request(request.clone(), operation.boxed_local());

        // Step 6: Return request.
        request
    }

    /// Runs `operation` again on an existing request, as cursors do.
    pub(crate) fn reexecute_async(
        self: &Rc<Self>,
        request: &Rc<IDBRequest>,
        operation: impl Future<Output = Fallible<RequestResult>> + 'static,
    ) {
        debug_assert!(self.is_active());
        request.reset();
        self.queue_request(request.clone(), operation.boxed_local());
    }

    fn queue_request(&self, request: Rc<IDBRequest>, operation: Operation) {
        self.requests.borrow_mut().push_back(request.clone());
        self.send(Job::Execute { request, operation });
    }

    /// Aborts the transaction with `error` after the jobs already queued,
    /// before any commit those jobs start.
    pub(crate) fn queue_abort(&self, error: Error) {
        self.send(Job::Abort(error));
    }

    fn deactivate(self: &Rc<Self>) {
        if self.state.get() == TransactionState::Active {
            debug!("Transaction {} is now inactive", self.serial_number);
            self.state.set(TransactionState::Inactive);
        }
        if self.state.get() == TransactionState::Inactive && self.requests.borrow().is_empty() {
            self.commit_transaction();
        }
    }

    /// Steps 5.2 to 5.8 of
    /// <https://w3c.github.io/IndexedDB/#asynchronously-execute-a-request>
    async fn execute_request(self: &Rc<Self>, request: Rc<IDBRequest>, operation: Operation) {
        tokio::task::yield_now().await;
        if self.state.get() == TransactionState::Finished || request.is_done() {
            return;
        }

        // Step 5.2: Let result be the result of performing operation.
        let result = operation.await;
        if self.state.get() == TransactionState::Finished {
            return;
        }

        // Step 5.3: If result is an error and transaction's state is committing, then run abort
        // a transaction with transaction and result, and terminate these steps.
        if let (TransactionState::Committing, Err(error)) = (self.state.get(), &result) {
            self.abort_transaction(Some(error.clone()), None);
            return;
        }

        // Step 5.4: If result is an error, then revert all changes made by operation.
        // Backend operations are atomic, a failed one left nothing behind.

        // Step 5.5: Set request's processed flag to true.
        self.requests
            .borrow_mut()
            .retain(|queued| !Rc::ptr_eq(queued, &request));

        // Step 5.6: Queue a database task to run these steps:
        // Step 5.6.1: Remove request from transaction's request list.
        // Step 5.6.2: Set request's done flag to true.
        // Step 5.6.3: If result is an error, set request's result to undefined and its error to
        // result; otherwise set its result to result and its error to undefined.
        let failed = result.is_err();
        request.settle(result);

        // Step 5.6.4: Fire a success event or an error event at request.
        let canceled = self.fire_request_event(&request, failed).await;

        if failed && !canceled && self.state.get() != TransactionState::Finished {
            debug!(
                "Request {} of transaction {} failed, aborting",
                request.id(),
                self.serial_number
            );
            let error = request.error().ok().flatten();
            self.abort_transaction(error, Some(request));
            return;
        }

        if self.state.get() == TransactionState::Inactive && self.requests.borrow().is_empty() {
            self.commit_transaction();
        }
    }

    /// <https://w3c.github.io/IndexedDB/#fire-a-success-event>
    /// <https://w3c.github.io/IndexedDB/#fire-an-error-event>
    ///
    /// Returns whether a listener canceled the error event.
    async fn fire_request_event(&self, request: &Rc<IDBRequest>, failed: bool) -> bool {
        // Step: If transaction's state is inactive, then set transaction's state to active.
        if self.state.get() == TransactionState::Inactive {
            self.state.set(TransactionState::Active);
        }

        // Step: Let legacyOutputDidListenersThrowFlag be false.
        // Step: Dispatch event at request.
        let target = EventTarget::Request(request.clone());
        let event = if failed {
            EventType::Error
        } else {
            EventType::Success
        };
        let canceled = self.db.dispatcher().dispatch(&target, event) && failed;
        request.notify_waiters();

        // Tasks awaiting the request run before the transaction goes back to
        // inactive, so they can queue follow-up requests.
        tokio::task::yield_now().await;

        // Step: If transaction's state is active, then set transaction's state to inactive.
        if self.state.get() == TransactionState::Active {
            self.state.set(TransactionState::Inactive);
        }
        canceled
    }

    /// <https://w3c.github.io/IndexedDB/#abort-a-transaction>
    ///
    /// `trigger` is the request whose failure caused the abort; it is settled
    /// with an `AbortError` along with the ones still queued.
    pub(crate) fn abort_transaction(
        self: &Rc<Self>,
        error: Option<Error>,
        trigger: Option<Rc<IDBRequest>>,
    ) {
        if self.state.get() == TransactionState::Finished {
            return;
        }
        debug!(
            "Aborting transaction {} ({:?})",
            self.serial_number,
            error.as_ref().map(Error::name)
        );

        // Step 1: All the changes made to the database by transaction are reverted. For upgrade
        // transactions this includes changes to the set of object stores and indexes, as well
        // as the change to the version.
        if self.mode == IndexedDBTxnMode::Versionchange {
            self.db.rollback_upgrade();
        }

        // Step 3: Set transaction's state to finished.
        self.state.set(TransactionState::Finished);
        self.aborted.set(true);

        // Step 4: If error is not null, set transaction's error to error.
        if let Some(error) = error {
            *self.error.borrow_mut() = Some(error);
        }

        // Step 5: For each request of transaction's request list, abort the steps to
        // asynchronously execute a request for request, set request's processed flag to true,
        // and queue a database task to run these steps:
        let swept: Vec<Rc<IDBRequest>> = trigger
            .into_iter()
            .chain(self.requests.borrow_mut().drain(..))
            .collect();
        for request in swept {
            // Step 5.1: Set request's done flag to true.
            // Step 5.2: Set request's result to undefined.
            // Step 5.3: Set request's error to a newly created "AbortError" DOMException.
            request.settle_aborted();
            // Step 5.4: Fire an event named error at request with its bubbles and cancelable
            // attributes initialized to true.
            self.db
                .dispatcher()
                .dispatch(&EventTarget::Request(request.clone()), EventType::Error);
            request.notify_waiters();
        }

        // Step 6: Queue a database task to run these steps:
        // Step 6.1: If transaction is an upgrade transaction, then set transaction's connection's
        // associated database's upgrade transaction to null.
        // Step 6.2: Fire an event named abort at transaction with its bubbles attribute
        // initialized to true.
        self.db
            .dispatcher()
            .dispatch(&EventTarget::Transaction(self.clone()), EventType::Abort);
        self.done.notify_waiters();
        self.send(Job::Shutdown);
    }

    /// <https://w3c.github.io/IndexedDB/#commit-a-transaction>
    pub(crate) fn commit_transaction(self: &Rc<Self>) {
        // Step 1: Set transaction's state to committing.
        debug!("Committing transaction {}", self.serial_number);
        self.state.set(TransactionState::Committing);

        // Step 2: Run the following steps in parallel:
        // Step 2.1: Wait until every item in transaction's request list is processed.
        self.send(Job::Commit);
    }

    fn finish_commit(self: &Rc<Self>) {
        // Step 2.2: If transaction's state is no longer committing, then terminate these steps.
        if self.state.get() != TransactionState::Committing {
            return;
        }

        // Step 2.3: Attempt to write any outstanding changes made by transaction to the database.
        // Step 2.4: If an error occurs while writing the changes to the database, then run abort a
        // transaction with transaction and an appropriate type for the error.
        if self.mode == IndexedDBTxnMode::Versionchange {
            if let Err(error) = self.db.commit_upgrade() {
                self.abort_transaction(Some(error), None);
                return;
            }
        }

        // Step 2.5: Queue a database task to run these steps:
        // Step 2.5.1: If transaction is an upgrade transaction, then set transaction's connection's
        // associated database's upgrade transaction to null.
        // Step 2.5.2: Set transaction's state to finished.
        self.state.set(TransactionState::Finished);
        self.requests.borrow_mut().clear();

        // Step 2.5.3: Fire an event named complete at transaction.
        self.db
            .dispatcher()
            .dispatch(&EventTarget::Transaction(self.clone()), EventType::Complete);
        self.done.notify_waiters();
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbtransaction-commit>
    pub fn commit(self: &Rc<Self>) -> Fallible<()> {
        // Step 1: If this's state is not active, then throw an "InvalidStateError" DOMException.
        if self.state.get() != TransactionState::Active {
            return Err(Error::InvalidState(Some(
                "Only an active transaction can be committed".to_owned(),
            )));
        }
        // Step 2: Run commit a transaction with this.
        self.commit_transaction();
        Ok(())
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbtransaction-abort>
    pub fn abort(self: &Rc<Self>) -> Fallible<()> {
        // Step 1: If this's state is committing or finished, then throw an "InvalidStateError"
        // DOMException.
        if matches!(
            self.state.get(),
            TransactionState::Committing | TransactionState::Finished
        ) {
            return Err(Error::InvalidState(Some(
                "The transaction is already committing or finished".to_owned(),
            )));
        }
        // Step 2: Set this's state to inactive and run abort a transaction with this and null.
        self.state.set(TransactionState::Inactive);
        self.abort_transaction(None, None);
        Ok(())
    }
}
