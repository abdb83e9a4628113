/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use indexeddb::{
    EventDispatcher, EventTarget, EventType, IDBDatabase, IDBRequest, IDBTransaction,
    IndexedDBDescription, IndexedDBPrefs, KvsEngine, RequestResult, SqliteEngine,
    StructuredValue,
};
use tempfile::TempDir;
use tokio::task::LocalSet;

/// Runs a test body as a task of a fresh `LocalSet`, the way the engine
/// expects its callers to run.
pub async fn run(test: impl Future<Output = ()> + 'static) {
    let _ = env_logger::builder().is_test(true).try_init();
    LocalSet::new()
        .run_until(async move {
            tokio::task::spawn_local(test)
                .await
                .expect("test task panicked");
        })
        .await;
}

pub fn engine(dir: &TempDir) -> Rc<dyn KvsEngine> {
    let description = IndexedDBDescription::new("https://example.com", "library");
    Rc::new(
        SqliteEngine::new(dir.path(), &description, &IndexedDBPrefs::default())
            .expect("Failed to open database"),
    )
}

/// One event handed to the dispatcher.
#[derive(Clone, Debug, PartialEq)]
pub struct Recorded {
    pub transaction: u64,
    /// `None` for events fired at the transaction itself.
    pub request: Option<u64>,
    pub event: EventType,
}

#[derive(Default)]
pub struct RecordingDispatcher {
    events: RefCell<Vec<Recorded>>,
    cancel_errors: Cell<bool>,
}

impl RecordingDispatcher {
    pub fn new() -> Rc<RecordingDispatcher> {
        Rc::new(RecordingDispatcher::default())
    }

    /// Makes every listener cancel the error events it receives.
    pub fn cancel_errors(&self) {
        self.cancel_errors.set(true);
    }

    pub fn events_for(&self, transaction: &IDBTransaction) -> Vec<Recorded> {
        self.events
            .borrow()
            .iter()
            .filter(|recorded| recorded.transaction == transaction.serial_number())
            .cloned()
            .collect()
    }

    pub fn count(&self, transaction: &IDBTransaction, event: EventType) -> usize {
        self.events_for(transaction)
            .iter()
            .filter(|recorded| recorded.request.is_none() && recorded.event == event)
            .count()
    }
}

impl EventDispatcher for RecordingDispatcher {
    fn dispatch(&self, target: &EventTarget, event: EventType) -> bool {
        let (transaction, request) = match target {
            EventTarget::Request(request) => {
                (request.transaction().serial_number(), Some(request.id()))
            },
            EventTarget::Transaction(transaction) => (transaction.serial_number(), None),
        };
        self.events.borrow_mut().push(Recorded {
            transaction,
            request,
            event,
        });
        event == EventType::Error && self.cancel_errors.get()
    }
}

/// Opens the database, running `upgrade` when `version` is newer than the
/// stored version.
pub async fn open(
    dir: &TempDir,
    dispatcher: Rc<dyn EventDispatcher>,
    version: u64,
    upgrade: impl FnOnce(&Rc<IDBDatabase>, &Rc<IDBTransaction>, u64),
) -> Rc<IDBDatabase> {
    IDBDatabase::open(engine(dir), "library", Some(version), dispatcher, upgrade)
        .await
        .expect("Failed to open database")
}

pub fn book(id: i32, title: &str, author: &str) -> StructuredValue {
    StructuredValue::object()
        .with("id", id)
        .with("title", title)
        .with("author", author)
}

pub async fn result(request: &Rc<IDBRequest>) -> RequestResult {
    request.wait().await.expect("request failed")
}
