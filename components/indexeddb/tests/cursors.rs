/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::rc::Rc;

use indexeddb::{
    Error, IDBCursor, IDBCursorDirection, IDBDatabase, IDBRequest, IDBTransaction,
    IndexedDBKeyRange, IndexedDBKeyType, IndexedDBTxnMode, KeyPath, KeyRangeInput,
    NoopDispatcher, StructuredValue, TransactionDurability,
};
use tempfile::TempDir;

use crate::common;

fn number(n: f64) -> IndexedDBKeyType {
    IndexedDBKeyType::Number(n)
}

fn string(s: &str) -> IndexedDBKeyType {
    IndexedDBKeyType::String(s.to_owned())
}

/// A `books` store keyed by `id` with a non-unique `by_author` index, and a
/// `shelf` store with out-of-line keys 1 to 5.
async fn library(dir: &TempDir) -> Rc<IDBDatabase> {
    common::open(dir, Rc::new(NoopDispatcher), 1, |db, _, _| {
        let books = db
            .create_object_store("books", Some(KeyPath::from("id")), false)
            .unwrap();
        books
            .create_index("by_author", KeyPath::from("author"), false, false)
            .unwrap();
        for (id, title, author) in [
            (1, "Dune", "Herbert"),
            (2, "Solaris", "Lem"),
            (3, "Children of Dune", "Herbert"),
            (4, "Ubik", "Dick"),
        ] {
            books.put(common::book(id, title, author), None).unwrap();
        }

        let shelf = db.create_object_store("shelf", None, false).unwrap();
        for key in 1..=5 {
            shelf
                .put(
                    StructuredValue::from(key * 10),
                    Some(&StructuredValue::from(key)),
                )
                .unwrap();
        }
    })
    .await
}

fn begin(db: &Rc<IDBDatabase>, store: &str, mode: IndexedDBTxnMode) -> Rc<IDBTransaction> {
    db.transaction(&[store], mode, TransactionDurability::Default)
        .unwrap()
}

async fn cursor(request: &Rc<IDBRequest>) -> Option<Rc<IDBCursor>> {
    common::result(request).await.cursor()
}

/// Walks the cursor to its end with `continue`, collecting
/// `(key, primary key)` pairs.
async fn collect(request: &Rc<IDBRequest>) -> Vec<(IndexedDBKeyType, IndexedDBKeyType)> {
    let mut seen = vec![];
    while let Some(current) = cursor(request).await {
        seen.push((current.key().unwrap(), current.primary_key().unwrap()));
        current.continue_(None).unwrap();
    }
    seen
}

#[tokio::test]
async fn test_store_cursor_directions() {
    common::run(async {
        let dir = tempfile::tempdir().unwrap();
        let db = library(&dir).await;
        let transaction = begin(&db, "shelf", IndexedDBTxnMode::Readonly);
        let store = transaction.object_store("shelf").unwrap();

        let forward = store.open_cursor(None, IDBCursorDirection::Next).unwrap();
        let keys: Vec<_> = collect(&forward).await.into_iter().map(|(key, _)| key).collect();
        assert_eq!(keys, [1.0, 2.0, 3.0, 4.0, 5.0].map(number));

        let range = IndexedDBKeyRange::bound(number(2.0), number(4.0), false, true).unwrap();
        let backward = store
            .open_cursor(
                Some(&KeyRangeInput::from(range)),
                IDBCursorDirection::Prev,
            )
            .unwrap();
        let keys: Vec<_> = collect(&backward).await.into_iter().map(|(key, _)| key).collect();
        assert_eq!(keys, [3.0, 2.0].map(number));
        transaction.done().await;
    })
    .await;
}

#[tokio::test]
async fn test_cursor_exposes_values() {
    common::run(async {
        let dir = tempfile::tempdir().unwrap();
        let db = library(&dir).await;
        let transaction = begin(&db, "shelf", IndexedDBTxnMode::Readonly);
        let store = transaction.object_store("shelf").unwrap();

        let request = store.open_cursor(None, IDBCursorDirection::Next).unwrap();
        let with_value = cursor(&request).await.unwrap();
        assert!(Rc::ptr_eq(&with_value.request().unwrap(), &request));
        assert!(with_value.got_value());
        assert_eq!(with_value.value(), Some(StructuredValue::from(10)));
        assert_eq!(with_value.direction(), IDBCursorDirection::Next);
        with_value.advance(4).unwrap();
        assert!(!with_value.got_value());
        let last = cursor(&request).await.unwrap();
        assert_eq!(last.value(), Some(StructuredValue::from(50)));

        let request = store.open_key_cursor(None, IDBCursorDirection::Next).unwrap();
        let key_only = cursor(&request).await.unwrap();
        assert!(key_only.is_key_only());
        assert_eq!(key_only.key(), Some(number(1.0)));
        assert_eq!(key_only.value(), None);
        transaction.done().await;
    })
    .await;
}

#[tokio::test]
async fn test_advance_and_continue_to_key() {
    common::run(async {
        let dir = tempfile::tempdir().unwrap();
        let db = library(&dir).await;
        let transaction = begin(&db, "shelf", IndexedDBTxnMode::Readonly);
        let store = transaction.object_store("shelf").unwrap();

        let request = store.open_cursor(None, IDBCursorDirection::Next).unwrap();
        let cursor_at_1 = cursor(&request).await.unwrap();
        assert!(matches!(cursor_at_1.advance(0), Err(Error::Type(_))));
        cursor_at_1.advance(2).unwrap();
        // Iteration is under way until the request is done again.
        assert!(matches!(
            cursor_at_1.continue_(None),
            Err(Error::InvalidState(_))
        ));

        let cursor_at_3 = cursor(&request).await.unwrap();
        assert_eq!(cursor_at_3.key(), Some(number(3.0)));
        assert!(matches!(
            cursor_at_3.continue_(Some(&StructuredValue::from(3))),
            Err(Error::Data(_))
        ));
        assert!(matches!(
            cursor_at_3.continue_(Some(&StructuredValue::from(1))),
            Err(Error::Data(_))
        ));
        assert!(matches!(
            cursor_at_3.continue_(Some(&StructuredValue::Bool(true))),
            Err(Error::Data(_))
        ));
        cursor_at_3
            .continue_(Some(&StructuredValue::from(5)))
            .unwrap();

        let cursor_at_5 = cursor(&request).await.unwrap();
        assert_eq!(cursor_at_5.key(), Some(number(5.0)));
        cursor_at_5.advance(1).unwrap();
        assert!(cursor(&request).await.is_none());
        assert_eq!(cursor_at_5.key(), None);
        assert_eq!(cursor_at_5.value(), None);
        assert!(matches!(
            cursor_at_5.advance(1),
            Err(Error::InvalidState(_))
        ));
        transaction.done().await;
        assert!(matches!(
            cursor_at_5.advance(1),
            Err(Error::TransactionInactive)
        ));
    })
    .await;
}

#[tokio::test]
async fn test_index_cursor_directions() {
    common::run(async {
        let dir = tempfile::tempdir().unwrap();
        let db = library(&dir).await;
        let transaction = begin(&db, "books", IndexedDBTxnMode::Readonly);
        let index = transaction
            .object_store("books")
            .unwrap()
            .index("by_author")
            .unwrap();

        let next = index.open_cursor(None, IDBCursorDirection::Next).unwrap();
        assert_eq!(
            collect(&next).await,
            vec![
                (string("Dick"), number(4.0)),
                (string("Herbert"), number(1.0)),
                (string("Herbert"), number(3.0)),
                (string("Lem"), number(2.0)),
            ]
        );

        let prev = index.open_key_cursor(None, IDBCursorDirection::Prev).unwrap();
        assert_eq!(
            collect(&prev).await,
            vec![
                (string("Lem"), number(2.0)),
                (string("Herbert"), number(3.0)),
                (string("Herbert"), number(1.0)),
                (string("Dick"), number(4.0)),
            ]
        );

        let next_unique = index
            .open_cursor(None, IDBCursorDirection::Nextunique)
            .unwrap();
        assert_eq!(
            collect(&next_unique).await,
            vec![
                (string("Dick"), number(4.0)),
                (string("Herbert"), number(1.0)),
                (string("Lem"), number(2.0)),
            ]
        );

        let prev_unique = index
            .open_cursor(None, IDBCursorDirection::Prevunique)
            .unwrap();
        assert_eq!(
            collect(&prev_unique).await,
            vec![
                (string("Lem"), number(2.0)),
                (string("Herbert"), number(1.0)),
                (string("Dick"), number(4.0)),
            ]
        );
        transaction.done().await;
    })
    .await;
}

#[tokio::test]
async fn test_continue_primary_key() {
    common::run(async {
        let dir = tempfile::tempdir().unwrap();
        let db = library(&dir).await;
        let transaction = begin(&db, "books", IndexedDBTxnMode::Readonly);
        let store = transaction.object_store("books").unwrap();
        let index = store.index("by_author").unwrap();
        let herbert = StructuredValue::from("Herbert");

        let store_cursor = cursor(&store.open_cursor(None, IDBCursorDirection::Next).unwrap())
            .await
            .unwrap();
        assert!(matches!(
            store_cursor.continue_primary_key(&StructuredValue::from(2), &StructuredValue::from(2)),
            Err(Error::InvalidAccess(_))
        ));

        let unique_cursor = cursor(
            &index
                .open_cursor(None, IDBCursorDirection::Nextunique)
                .unwrap(),
        )
        .await
        .unwrap();
        assert!(matches!(
            unique_cursor.continue_primary_key(&herbert, &StructuredValue::from(1)),
            Err(Error::InvalidAccess(_))
        ));

        let request = index.open_cursor(None, IDBCursorDirection::Next).unwrap();
        let at_dick = cursor(&request).await.unwrap();
        assert_eq!(at_dick.key(), Some(string("Dick")));
        assert!(matches!(
            at_dick.continue_primary_key(&StructuredValue::from("Dick"), &StructuredValue::from(4)),
            Err(Error::Data(_))
        ));
        assert!(matches!(
            at_dick.continue_primary_key(&StructuredValue::from("Ahab"), &StructuredValue::from(9)),
            Err(Error::Data(_))
        ));
        assert!(matches!(
            at_dick.continue_primary_key(&herbert, &StructuredValue::Null),
            Err(Error::Data(_))
        ));
        at_dick
            .continue_primary_key(&herbert, &StructuredValue::from(2))
            .unwrap();

        let at_children = cursor(&request).await.unwrap();
        assert_eq!(at_children.key(), Some(string("Herbert")));
        assert_eq!(at_children.primary_key(), Some(number(3.0)));
        assert_eq!(
            at_children
                .value()
                .and_then(|value| value.get("title").cloned()),
            Some(StructuredValue::from("Children of Dune"))
        );
        transaction.done().await;
    })
    .await;
}

#[tokio::test]
async fn test_update_through_cursor() {
    common::run(async {
        let dir = tempfile::tempdir().unwrap();
        let db = library(&dir).await;
        let transaction = begin(&db, "books", IndexedDBTxnMode::Readwrite);
        let store = transaction.object_store("books").unwrap();

        let request = store.open_cursor(None, IDBCursorDirection::Next).unwrap();
        let at_dune = cursor(&request).await.unwrap();
        assert_eq!(at_dune.primary_key(), Some(number(1.0)));

        // The key path yields a key other than the cursor's.
        assert!(matches!(
            at_dune.update(common::book(7, "Dune", "Herbert")),
            Err(Error::Data(_))
        ));
        assert!(matches!(
            at_dune.update(StructuredValue::object().with("title", "Dune")),
            Err(Error::Data(_))
        ));

        let update = at_dune
            .update(common::book(1, "Dune Messiah", "Herbert"))
            .unwrap();
        assert_eq!(common::result(&update).await.key(), Some(&number(1.0)));
        let get = store.get(&KeyRangeInput::from(number(1.0))).unwrap();
        assert_eq!(
            common::result(&get).await.value(),
            Some(&common::book(1, "Dune Messiah", "Herbert"))
        );

        at_dune.continue_(None).unwrap();
        let at_solaris = cursor(&request).await.unwrap();
        assert_eq!(at_solaris.primary_key(), Some(number(2.0)));
        let delete = at_solaris.delete().unwrap();
        assert!(common::result(&delete).await.is_undefined());
        let count = store.count(None).unwrap();
        assert_eq!(common::result(&count).await.count(), Some(3));
        transaction.done().await;
    })
    .await;
}

#[tokio::test]
async fn test_cursor_mutations_need_permission() {
    common::run(async {
        let dir = tempfile::tempdir().unwrap();
        let db = library(&dir).await;

        let transaction = begin(&db, "books", IndexedDBTxnMode::Readonly);
        let store = transaction.object_store("books").unwrap();
        let read_only = cursor(&store.open_cursor(None, IDBCursorDirection::Next).unwrap())
            .await
            .unwrap();
        assert_eq!(
            read_only.update(common::book(1, "Dune", "Herbert")).err(),
            Some(Error::ReadOnly)
        );
        assert_eq!(read_only.delete().err(), Some(Error::ReadOnly));
        transaction.done().await;

        let transaction = begin(&db, "books", IndexedDBTxnMode::Readwrite);
        let store = transaction.object_store("books").unwrap();
        let key_only = cursor(&store.open_key_cursor(None, IDBCursorDirection::Next).unwrap())
            .await
            .unwrap();
        assert!(matches!(
            key_only.update(common::book(1, "Dune", "Herbert")),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(key_only.delete(), Err(Error::InvalidState(_))));
        transaction.done().await;
    })
    .await;
}
