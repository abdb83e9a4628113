/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexeddb_traits::{Error, Fallible, IndexedDBKeyType, StructuredValue};
use tokio::sync::Notify;

use crate::cursor::{IDBCursor, ObjectStoreOrIndex};
use crate::transaction::IDBTransaction;

/// <https://w3c.github.io/IndexedDB/#dom-idbrequest-readystate>
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IDBRequestReadyState {
    Pending,
    Done,
}

/// What a successful request produces.
#[derive(Clone, Debug, Default)]
pub enum RequestResult {
    #[default]
    Undefined,
    Value(StructuredValue),
    Key(IndexedDBKeyType),
    Keys(Vec<IndexedDBKeyType>),
    Values(Vec<StructuredValue>),
    Count(u64),
    /// `None` once the cursor ran past the end of its range.
    Cursor(Option<Rc<IDBCursor>>),
}

impl RequestResult {
    pub fn is_undefined(&self) -> bool {
        matches!(self, RequestResult::Undefined)
    }

    pub fn value(&self) -> Option<&StructuredValue> {
        match self {
            RequestResult::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn key(&self) -> Option<&IndexedDBKeyType> {
        match self {
            RequestResult::Key(key) => Some(key),
            _ => None,
        }
    }

    pub fn keys(&self) -> Option<&[IndexedDBKeyType]> {
        match self {
            RequestResult::Keys(keys) => Some(keys),
            _ => None,
        }
    }

    pub fn values(&self) -> Option<&[StructuredValue]> {
        match self {
            RequestResult::Values(values) => Some(values),
            _ => None,
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            RequestResult::Count(count) => Some(*count),
            _ => None,
        }
    }

    pub fn cursor(&self) -> Option<Rc<IDBCursor>> {
        match self {
            RequestResult::Cursor(cursor) => cursor.clone(),
            _ => None,
        }
    }
}

/// <https://w3c.github.io/IndexedDB/#request-construct>
pub struct IDBRequest {
    id: u64,
    source: ObjectStoreOrIndex,
    transaction: Rc<IDBTransaction>,
    /// <https://w3c.github.io/IndexedDB/#request-processed-flag>
    processed: Cell<bool>,
    /// <https://w3c.github.io/IndexedDB/#request-done-flag>
    done: Cell<bool>,
    result: RefCell<RequestResult>,
    error: RefCell<Option<Error>>,
    notify: Notify,
}

impl IDBRequest {
    pub(crate) fn new(
        id: u64,
        source: ObjectStoreOrIndex,
        transaction: Rc<IDBTransaction>,
    ) -> Rc<IDBRequest> {
        Rc::new(IDBRequest {
            id,
            source,
            transaction,
            processed: Cell::new(false),
            done: Cell::new(false),
            result: Default::default(),
            error: Default::default(),
            notify: Notify::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source(&self) -> &ObjectStoreOrIndex {
        &self.source
    }

    pub fn transaction(&self) -> &Rc<IDBTransaction> {
        &self.transaction
    }

    pub fn ready_state(&self) -> IDBRequestReadyState {
        if self.done.get() {
            IDBRequestReadyState::Done
        } else {
            IDBRequestReadyState::Pending
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.get()
    }

    pub fn is_processed(&self) -> bool {
        self.processed.get()
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbrequest-result>
    pub fn result(&self) -> Fallible<RequestResult> {
        // Step 1: If this's done flag is false, then throw an "InvalidStateError" DOMException.
        if !self.done.get() {
            return Err(Error::InvalidState(Some(
                "The request has not finished".to_owned(),
            )));
        }
        // Step 2: Otherwise, return this's result, or undefined if the request
        // resulted in an error.
        Ok(self.result.borrow().clone())
    }

    /// <https://w3c.github.io/IndexedDB/#dom-idbrequest-error>
    pub fn error(&self) -> Fallible<Option<Error>> {
        // Step 1: If this's done flag is false, then throw an "InvalidStateError" DOMException.
        if !self.done.get() {
            return Err(Error::InvalidState(Some(
                "The request has not finished".to_owned(),
            )));
        }
        // Step 2: Otherwise, return this's error, or null if no error occurred.
        Ok(self.error.borrow().clone())
    }

    /// Resolves once the request is done, with its result or its error.
    pub async fn wait(&self) -> Fallible<RequestResult> {
        loop {
            // Registered before checking the flag so a settle in between is
            // not missed.
            let notified = self.notify.notified();
            if self.done.get() {
                return match self.error.borrow().clone() {
                    Some(error) => Err(error),
                    None => Ok(self.result.borrow().clone()),
                };
            }
            notified.await;
        }
    }

    /// Prepares the request for another run, as cursor iteration does.
    pub(crate) fn reset(&self) {
        self.processed.set(false);
        self.done.set(false);
        *self.result.borrow_mut() = RequestResult::Undefined;
        *self.error.borrow_mut() = None;
    }

    pub(crate) fn settle(&self, outcome: Fallible<RequestResult>) {
        self.processed.set(true);
        self.done.set(true);
        match outcome {
            Ok(result) => {
                *self.result.borrow_mut() = result;
                *self.error.borrow_mut() = None;
            },
            Err(error) => {
                *self.result.borrow_mut() = RequestResult::Undefined;
                *self.error.borrow_mut() = Some(error);
            },
        }
    }

    pub(crate) fn settle_aborted(&self) {
        self.settle(Err(Error::Abort));
    }

    pub(crate) fn notify_waiters(&self) {
        self.notify.notify_waiters();
    }
}
