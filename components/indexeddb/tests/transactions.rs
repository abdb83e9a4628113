/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use indexeddb::{
    Error, EventType, IndexedDBKeyType, IndexedDBTxnMode, KeyRangeInput, RequestResult,
    StructuredValue, TransactionDurability, TransactionState,
};

use crate::common::{self, Recorded, RecordingDispatcher};

fn number(n: f64) -> StructuredValue {
    StructuredValue::Number(n)
}

#[tokio::test]
async fn test_drained_transaction_completes_once() {
    common::run(async {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = RecordingDispatcher::new();
        let db = common::open(&dir, dispatcher.clone(), 1, |db, _, _| {
            db.create_object_store("books", None, false).unwrap();
        })
        .await;

        let transaction = db
            .transaction(
                &["books"],
                IndexedDBTxnMode::Readwrite,
                TransactionDurability::Default,
            )
            .unwrap();
        assert_eq!(transaction.state(), TransactionState::Active);
        let store = transaction.object_store("books").unwrap();
        let first = store.put(number(1.0), Some(&number(1.0))).unwrap();
        let second = store.put(number(2.0), Some(&number(2.0))).unwrap();
        transaction.done().await;

        assert_eq!(transaction.state(), TransactionState::Finished);
        assert!(!transaction.was_aborted());
        assert_eq!(transaction.error(), None);
        assert_eq!(
            first.result().unwrap().key(),
            Some(&IndexedDBKeyType::Number(1.0))
        );
        assert_eq!(
            second.result().unwrap().key(),
            Some(&IndexedDBKeyType::Number(2.0))
        );
        assert_eq!(dispatcher.count(&transaction, EventType::Complete), 1);
        assert_eq!(dispatcher.count(&transaction, EventType::Abort), 0);
        assert_eq!(
            dispatcher.events_for(&transaction),
            vec![
                Recorded {
                    transaction: transaction.serial_number(),
                    request: Some(first.id()),
                    event: EventType::Success,
                },
                Recorded {
                    transaction: transaction.serial_number(),
                    request: Some(second.id()),
                    event: EventType::Success,
                },
                Recorded {
                    transaction: transaction.serial_number(),
                    request: None,
                    event: EventType::Complete,
                },
            ]
        );
    })
    .await;
}

#[tokio::test]
async fn test_transaction_without_requests_commits() {
    common::run(async {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = RecordingDispatcher::new();
        let db = common::open(&dir, dispatcher.clone(), 1, |db, _, _| {
            db.create_object_store("books", None, false).unwrap();
        })
        .await;

        let transaction = db
            .transaction(
                &["books"],
                IndexedDBTxnMode::Readonly,
                TransactionDurability::Relaxed,
            )
            .unwrap();
        transaction.done().await;
        assert_eq!(dispatcher.count(&transaction, EventType::Complete), 1);
        assert_eq!(transaction.durability(), TransactionDurability::Relaxed);
    })
    .await;
}

#[tokio::test]
async fn test_failed_request_aborts_transaction() {
    common::run(async {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = RecordingDispatcher::new();
        let db = common::open(&dir, dispatcher.clone(), 1, |db, _, _| {
            db.create_object_store("books", None, false).unwrap();
        })
        .await;

        let transaction = db
            .transaction(
                &["books"],
                IndexedDBTxnMode::Readwrite,
                TransactionDurability::Default,
            )
            .unwrap();
        let store = transaction.object_store("books").unwrap();
        let a = store.add(number(1.0), Some(&number(1.0))).unwrap();
        let b = store.add(number(2.0), Some(&number(1.0))).unwrap();
        let c = store.add(number(3.0), Some(&number(3.0))).unwrap();
        transaction.done().await;

        assert!(transaction.was_aborted());
        assert!(matches!(transaction.error(), Some(Error::Constraint(_))));
        assert!(a.result().unwrap().key().is_some());
        assert_eq!(a.error().unwrap(), None);
        assert_eq!(b.error().unwrap(), Some(Error::Abort));
        assert_eq!(c.error().unwrap(), Some(Error::Abort));
        assert!(c.result().unwrap().is_undefined());
        assert_eq!(dispatcher.count(&transaction, EventType::Complete), 0);
        assert_eq!(dispatcher.count(&transaction, EventType::Abort), 1);
        let c_errors = dispatcher
            .events_for(&transaction)
            .into_iter()
            .filter(|recorded| recorded.request == Some(c.id()))
            .map(|recorded| recorded.event)
            .collect::<Vec<_>>();
        assert_eq!(c_errors, vec![EventType::Error]);

        // The first record was written before the failure and stays.
        let transaction = db
            .transaction(
                &["books"],
                IndexedDBTxnMode::Readonly,
                TransactionDurability::Default,
            )
            .unwrap();
        let store = transaction.object_store("books").unwrap();
        let first = store.get(&KeyRangeInput::from(number(1.0))).unwrap();
        let count = store.count(None).unwrap();
        assert_eq!(
            common::result(&first).await.value(),
            Some(&StructuredValue::Number(1.0))
        );
        assert_eq!(common::result(&count).await.count(), Some(1));
    })
    .await;
}

#[tokio::test]
async fn test_canceled_error_does_not_abort() {
    common::run(async {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = RecordingDispatcher::new();
        let db = common::open(&dir, dispatcher.clone(), 1, |db, _, _| {
            db.create_object_store("books", None, false).unwrap();
        })
        .await;
        dispatcher.cancel_errors();

        let transaction = db
            .transaction(
                &["books"],
                IndexedDBTxnMode::Readwrite,
                TransactionDurability::Default,
            )
            .unwrap();
        let store = transaction.object_store("books").unwrap();
        store.add(number(1.0), Some(&number(1.0))).unwrap();
        let duplicate = store.add(number(2.0), Some(&number(1.0))).unwrap();
        let last = store.add(number(3.0), Some(&number(3.0))).unwrap();
        transaction.done().await;

        assert!(!transaction.was_aborted());
        assert!(matches!(
            duplicate.error().unwrap(),
            Some(Error::Constraint(_))
        ));
        assert_eq!(last.error().unwrap(), None);
        assert_eq!(dispatcher.count(&transaction, EventType::Complete), 1);
        assert_eq!(dispatcher.count(&transaction, EventType::Abort), 0);
    })
    .await;
}

#[tokio::test]
async fn test_explicit_abort() {
    common::run(async {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = RecordingDispatcher::new();
        let db = common::open(&dir, dispatcher.clone(), 1, |db, _, _| {
            db.create_object_store("books", None, false).unwrap();
        })
        .await;

        let transaction = db
            .transaction(
                &["books"],
                IndexedDBTxnMode::Readwrite,
                TransactionDurability::Default,
            )
            .unwrap();
        let store = transaction.object_store("books").unwrap();
        let pending = store.put(number(1.0), Some(&number(1.0))).unwrap();
        transaction.abort().unwrap();

        assert_eq!(transaction.state(), TransactionState::Finished);
        assert_eq!(transaction.error(), None);
        assert_eq!(pending.error().unwrap(), Some(Error::Abort));
        assert!(matches!(
            transaction.abort(),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            transaction.commit(),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            transaction.object_store("books"),
            Err(Error::InvalidState(_))
        ));
        assert_eq!(
            store.put(number(2.0), Some(&number(2.0))).err(),
            Some(Error::TransactionInactive)
        );
        transaction.done().await;
        assert_eq!(dispatcher.count(&transaction, EventType::Abort), 1);
        assert_eq!(dispatcher.count(&transaction, EventType::Complete), 0);

        // Nothing reached the backend.
        let transaction = db
            .transaction(
                &["books"],
                IndexedDBTxnMode::Readonly,
                TransactionDurability::Default,
            )
            .unwrap();
        let count = transaction.object_store("books").unwrap().count(None).unwrap();
        assert_eq!(common::result(&count).await.count(), Some(0));
    })
    .await;
}

#[tokio::test]
async fn test_explicit_commit() {
    common::run(async {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = RecordingDispatcher::new();
        let db = common::open(&dir, dispatcher.clone(), 1, |db, _, _| {
            db.create_object_store("books", None, false).unwrap();
        })
        .await;

        let transaction = db
            .transaction(
                &["books"],
                IndexedDBTxnMode::Readwrite,
                TransactionDurability::Default,
            )
            .unwrap();
        let store = transaction.object_store("books").unwrap();
        let put = store.put(number(1.0), Some(&number(1.0))).unwrap();
        transaction.commit().unwrap();
        assert_eq!(transaction.state(), TransactionState::Committing);
        assert!(matches!(
            transaction.commit(),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(transaction.abort(), Err(Error::InvalidState(_))));
        assert_eq!(
            store.put(number(2.0), Some(&number(2.0))).err(),
            Some(Error::TransactionInactive)
        );

        transaction.done().await;
        assert!(!transaction.was_aborted());
        assert!(matches!(put.result().unwrap(), RequestResult::Key(_)));
        assert_eq!(dispatcher.count(&transaction, EventType::Complete), 1);
    })
    .await;
}

#[tokio::test]
async fn test_failed_request_while_committing_aborts() {
    common::run(async {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = RecordingDispatcher::new();
        let db = common::open(&dir, dispatcher.clone(), 1, |db, _, _| {
            db.create_object_store("books", None, false).unwrap();
        })
        .await;

        let transaction = db
            .transaction(
                &["books"],
                IndexedDBTxnMode::Readwrite,
                TransactionDurability::Default,
            )
            .unwrap();
        let store = transaction.object_store("books").unwrap();
        store.add(number(1.0), Some(&number(1.0))).unwrap();
        let duplicate = store.add(number(2.0), Some(&number(1.0))).unwrap();
        transaction.commit().unwrap();
        transaction.done().await;

        assert!(transaction.was_aborted());
        assert!(matches!(transaction.error(), Some(Error::Constraint(_))));
        assert_eq!(duplicate.error().unwrap(), Some(Error::Abort));
        let duplicate_events: Vec<EventType> = dispatcher
            .events_for(&transaction)
            .into_iter()
            .filter(|recorded| recorded.request == Some(duplicate.id()))
            .map(|recorded| recorded.event)
            .collect();
        assert_eq!(duplicate_events, vec![EventType::Error]);
        assert_eq!(dispatcher.count(&transaction, EventType::Complete), 0);
        assert_eq!(dispatcher.count(&transaction, EventType::Abort), 1);
    })
    .await;
}

#[tokio::test]
async fn test_follow_up_requests_keep_transaction_alive() {
    common::run(async {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = RecordingDispatcher::new();
        let db = common::open(&dir, dispatcher.clone(), 1, |db, _, _| {
            db.create_object_store("counters", None, false).unwrap();
        })
        .await;

        let transaction = db
            .transaction(
                &["counters"],
                IndexedDBTxnMode::Readwrite,
                TransactionDurability::Default,
            )
            .unwrap();
        let store = transaction.object_store("counters").unwrap();
        let key = StructuredValue::from("hits");
        common::result(&store.put(number(1.0), Some(&key)).unwrap()).await;

        // The transaction is active again while a request's result is handled.
        assert!(transaction.is_active());
        let current = common::result(&store.get(&KeyRangeInput::from(key.clone())).unwrap()).await;
        let next = current.value().and_then(StructuredValue::as_number).unwrap() + 1.0;
        common::result(&store.put(number(next), Some(&key)).unwrap()).await;
        transaction.done().await;
        assert_eq!(dispatcher.count(&transaction, EventType::Complete), 1);

        let transaction = db
            .transaction(
                &["counters"],
                IndexedDBTxnMode::Readonly,
                TransactionDurability::Default,
            )
            .unwrap();
        let get = transaction
            .object_store("counters")
            .unwrap()
            .get(&KeyRangeInput::from(key))
            .unwrap();
        assert_eq!(common::result(&get).await.value(), Some(&number(2.0)));
    })
    .await;
}

#[tokio::test]
async fn test_transaction_becomes_inactive() {
    common::run(async {
        let dir = tempfile::tempdir().unwrap();
        let db = common::open(&dir, RecordingDispatcher::new(), 1, |db, _, _| {
            db.create_object_store("books", None, false).unwrap();
        })
        .await;

        let transaction = db
            .transaction(
                &["books"],
                IndexedDBTxnMode::Readwrite,
                TransactionDurability::Default,
            )
            .unwrap();
        let store = transaction.object_store("books").unwrap();
        let put = store.put(number(1.0), Some(&number(1.0))).unwrap();
        // The turn that created the transaction ends here.
        tokio::task::yield_now().await;
        assert!(!transaction.is_active());
        assert_eq!(
            store.put(number(2.0), Some(&number(2.0))).err(),
            Some(Error::TransactionInactive)
        );
        common::result(&put).await;
        transaction.done().await;
    })
    .await;
}
