/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use std::path::{Path, PathBuf};

use indexeddb_traits::encoding::{decode_key, encode_key};
use indexeddb_traits::{
    BackendError, BackendResult, CreateObjectResult, IDBCursorDirection, IndexedDBIndex,
    IndexedDBKeyRange, IndexedDBKeyType, IndexedDBObjectStore, KeyPath, PutItemResult,
};
use log::{debug, error, info, warn};
use rusqlite::{Connection, Error, ErrorCode, Row, params};
use rustc_hash::FxHashMap;
use sea_query::{
    Condition, Expr, ExprTrait, Func, IntoColumnRef, Order, Query, SelectStatement,
    SqliteQueryBuilder,
};
use sea_query_rusqlite::RusqliteBinder;

use crate::engines::{IndexKeys, IndexedDBDescription, IterationParam, IterationRecord, KvsEngine};
use crate::prefs::IndexedDBPrefs;

mod create;
mod index_data_model;
mod object_data_model;
mod object_store_index_model;
mod object_store_model;

use self::index_data_model::Column as IndexData;
use self::object_data_model::Column as ObjectData;
use self::object_store_index_model::Column as ObjectStoreIndex;
use self::object_store_model::Column as ObjectStore;

fn is_sqlite_disk_full_error(err: &Error) -> bool {
    matches!(err, Error::SqliteFailure(failure, _) if failure.code == ErrorCode::DiskFull)
}

pub(crate) fn backend_error_from_sqlite_error(err: Error) -> BackendError {
    if is_sqlite_disk_full_error(&err) {
        BackendError::QuotaExceeded
    } else {
        BackendError::DbErr(format!("{err:?}"))
    }
}

fn sql<T>(result: Result<T, Error>) -> BackendResult<T> {
    result.map_err(backend_error_from_sqlite_error)
}

/// Restricts `column`, holding encoded keys, to the keys in `range`.
fn range_to_query<C>(column: C, range: &IndexedDBKeyRange) -> Condition
where
    C: IntoColumnRef + Copy,
{
    // Special case for optimization
    if let Some(singleton) = range.as_singleton() {
        return Condition::all().add(Expr::col(column).eq(encode_key(singleton)));
    }
    let mut condition = Condition::all();
    if let Some(lower) = range.lower.as_ref() {
        condition = condition.add(past(column, encode_key(lower), true, !range.lower_open));
    }
    if let Some(upper) = range.upper.as_ref() {
        condition = condition.add(past(column, encode_key(upper), false, !range.upper_open));
    }
    condition
}

/// `column` lies beyond `bound` when walking forward, or before it when
/// walking backward.
fn past<C>(column: C, bound: Vec<u8>, forward: bool, inclusive: bool) -> Expr
where
    C: IntoColumnRef + Copy,
{
    match (forward, inclusive) {
        (true, true) => Expr::col(column).gte(bound),
        (true, false) => Expr::col(column).gt(bound),
        (false, true) => Expr::col(column).lte(bound),
        (false, false) => Expr::col(column).lt(bound),
    }
}

fn order_for(direction: IDBCursorDirection) -> Order {
    if direction.is_forward() {
        Order::Asc
    } else {
        Order::Desc
    }
}

const UPGRADE_SAVEPOINT: &str = "upgrade";
const WRITE_SAVEPOINT: &str = "kvs_write";

pub struct SqliteEngine {
    db_path: PathBuf,
    connection: Connection,
}

impl SqliteEngine {
    pub fn new(
        base_dir: &Path,
        db_info: &IndexedDBDescription,
        prefs: &IndexedDBPrefs,
    ) -> BackendResult<Self> {
        let mut db_path = PathBuf::new();
        db_path.push(base_dir);
        db_path.push(db_info.as_path());
        let db_parent = db_path.clone();
        db_path.push("db.sqlite");

        if !db_path.exists() {
            std::fs::create_dir_all(&db_parent)
                .map_err(|err| BackendError::DbErr(format!("{err:?}")))?;
        }
        let connection = sql(Self::init_db(&db_path, db_info, prefs))?;

        for stmt in prefs.connection_pragmas() {
            if let Err(err) = connection.execute_batch(&stmt) {
                warn!("Failed to apply {stmt}: {err:?}");
            }
        }

        Ok(Self {
            connection,
            db_path,
        })
    }

    fn init_db(
        path: &Path,
        db_info: &IndexedDBDescription,
        prefs: &IndexedDBPrefs,
    ) -> Result<Connection, Error> {
        let connection = Connection::open(path)?;
        let initialized: bool = connection.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'database')",
            [],
            |row| row.get(0),
        )?;
        if initialized {
            return Ok(connection);
        }
        info!("Initializing indexeddb database at {:?}", path);
        for stmt in prefs.init_pragmas() {
            // journal_mode answers with a row, which `execute` rejects.
            if let Err(err) = connection.execute_batch(&stmt) {
                warn!("Failed to apply {stmt}: {err:?}");
            }
        }
        create::create_tables(&connection)?;
        connection.execute(
            "INSERT INTO database (name, origin, version) VALUES (?, ?, 0)",
            params![db_info.name, db_info.origin],
        )?;
        Ok(connection)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Closes the connection and removes every file of the database.
    pub fn delete_database(self) -> BackendResult<()> {
        // attempt to close the connection first
        if let Err((_, err)) = self.connection.close() {
            warn!("Failed to close {:?} before deletion: {err:?}", self.db_path);
        }
        if let Some(parent) = self.db_path.parent().filter(|_| self.db_path.exists()) {
            if let Err(err) = std::fs::remove_dir_all(parent) {
                error!("Failed to delete database: {:?}", err);
                return Err(BackendError::DbErr(format!("{err:?}")));
            }
        }
        Ok(())
    }

    /// Runs `write` inside a savepoint, undoing its effects when it fails.
    fn with_savepoint<T>(&self, write: impl FnOnce() -> BackendResult<T>) -> BackendResult<T> {
        sql(self
            .connection
            .execute_batch(&format!("SAVEPOINT {WRITE_SAVEPOINT};")))?;
        match write() {
            Ok(value) => {
                sql(self
                    .connection
                    .execute_batch(&format!("RELEASE {WRITE_SAVEPOINT};")))?;
                Ok(value)
            },
            Err(err) => {
                if let Err(rollback_err) = self.connection.execute_batch(&format!(
                    "ROLLBACK TO {WRITE_SAVEPOINT}; RELEASE {WRITE_SAVEPOINT};"
                )) {
                    error!("Failed to roll back a failed write: {rollback_err:?}");
                }
                Err(err)
            },
        }
    }

    fn query_rows<T>(
        &self,
        query: &SelectStatement,
        map: impl FnMut(&Row<'_>) -> Result<T, Error>,
    ) -> BackendResult<Vec<T>> {
        let (sql_text, values) = query.build_rusqlite(SqliteQueryBuilder);
        let mut stmt = sql(self.connection.prepare(&sql_text))?;
        let rows = sql(stmt.query_map(&*values.as_params(), map))?;
        sql(rows.collect())
    }

    fn object_store_model(&self, store_name: &str) -> BackendResult<object_store_model::Model> {
        let query = Query::select()
            .columns(ObjectStore::COLUMNS)
            .from(ObjectStore::Table)
            .and_where(Expr::col(ObjectStore::Name).eq(store_name))
            .to_owned();
        self.query_rows(&query, |row| object_store_model::Model::try_from(row))?
            .into_iter()
            .next()
            .ok_or(BackendError::StoreNotFound)
    }

    fn index_model(
        &self,
        store: &object_store_model::Model,
        index_name: &str,
    ) -> BackendResult<object_store_index_model::Model> {
        let query = Query::select()
            .columns(ObjectStoreIndex::COLUMNS)
            .from(ObjectStoreIndex::Table)
            .cond_where(
                Condition::all()
                    .add(Expr::col(ObjectStoreIndex::ObjectStoreId).eq(store.id))
                    .add(Expr::col(ObjectStoreIndex::Name).eq(index_name)),
            )
            .to_owned();
        self.query_rows(&query, |row| object_store_index_model::Model::try_from(row))?
            .into_iter()
            .next()
            .ok_or(BackendError::IndexNotFound)
    }

    fn record_data(&self, store_id: i64, key: &[u8]) -> BackendResult<Vec<u8>> {
        let query = Query::select()
            .column(ObjectData::Data)
            .from(ObjectData::Table)
            .cond_where(
                Condition::all()
                    .add(Expr::col(ObjectData::ObjectStoreId).eq(store_id))
                    .add(Expr::col(ObjectData::Key).eq(key.to_vec())),
            )
            .to_owned();
        self.query_rows(&query, |row| row.get(0))?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::DbErr("index entry without a record".to_owned()))
    }

    /// Whether another record already holds `value` in a unique index.
    fn unique_value_taken(&self, index_id: i64, value: &[u8], key: &[u8]) -> BackendResult<bool> {
        sql(self
            .connection
            .prepare_cached(
                "SELECT 1 FROM index_data WHERE index_id = ? AND value = ? AND object_data_key != ?",
            )
            .and_then(|mut stmt| stmt.exists(params![index_id, value, key])))
    }

    /// Encoded primary keys of the records selected through `index`, in
    /// index order.
    fn select_primary_keys(
        &self,
        store: &object_store_model::Model,
        index: Option<&str>,
        range: &IndexedDBKeyRange,
        count: u32,
    ) -> BackendResult<Vec<Vec<u8>>> {
        let mut query = match index {
            None => Query::select()
                .column(ObjectData::Key)
                .from(ObjectData::Table)
                .cond_where(
                    Condition::all()
                        .add(Expr::col(ObjectData::ObjectStoreId).eq(store.id))
                        .add(range_to_query(ObjectData::Key, range)),
                )
                .order_by(ObjectData::Key, Order::Asc)
                .to_owned(),
            Some(index_name) => {
                let index = self.index_model(store, index_name)?;
                Query::select()
                    .column(IndexData::ObjectDataKey)
                    .from(IndexData::Table)
                    .cond_where(
                        Condition::all()
                            .add(Expr::col(IndexData::IndexId).eq(index.id))
                            .add(range_to_query(IndexData::Value, range)),
                    )
                    .order_by(IndexData::Value, Order::Asc)
                    .order_by(IndexData::ObjectDataKey, Order::Asc)
                    .to_owned()
            },
        };
        if count > 0 {
            query.limit(count.into());
        }
        self.query_rows(&query, |row| row.get(0))
    }

    fn delete_index_data_for_keys(
        &self,
        store: &object_store_model::Model,
        range: &IndexedDBKeyRange,
    ) -> BackendResult<()> {
        let (sql_text, values) = Query::delete()
            .from_table(IndexData::Table)
            .cond_where(
                Condition::all()
                    .add(Expr::col(IndexData::ObjectStoreId).eq(store.id))
                    .add(range_to_query(IndexData::ObjectDataKey, range)),
            )
            .build_rusqlite(SqliteQueryBuilder);
        sql(self.connection.execute(&sql_text, &*values.as_params()))?;
        Ok(())
    }

    fn iterate_index(
        &self,
        store: &object_store_model::Model,
        index_name: &str,
        param: &IterationParam,
    ) -> BackendResult<Option<(Vec<u8>, Vec<u8>)>> {
        let index = self.index_model(store, index_name)?;
        let forward = param.direction.is_forward();
        let unique = param.direction.is_unique();
        let order = order_for(param.direction);

        let mut condition = Condition::all()
            .add(Expr::col(IndexData::IndexId).eq(index.id))
            .add(range_to_query(IndexData::Value, &param.range));
        if let Some(key) = param.key.as_ref().map(encode_key) {
            condition = condition.add(past(IndexData::Value, key.clone(), forward, true));
            if let Some(primary_key) = param.primary_key.as_ref().filter(|_| !unique) {
                condition = condition.add(
                    Condition::any()
                        .add(
                            Condition::all()
                                .add(Expr::col(IndexData::Value).eq(key.clone()))
                                .add(past(
                                    IndexData::ObjectDataKey,
                                    encode_key(primary_key),
                                    forward,
                                    true,
                                )),
                        )
                        .add(past(IndexData::Value, key, forward, false)),
                );
            }
        }
        if let Some(position) = param.position.as_ref().map(encode_key) {
            condition = match param.object_store_position.as_ref().filter(|_| !unique) {
                Some(object_store_position) => condition.add(
                    Condition::any()
                        .add(
                            Condition::all()
                                .add(Expr::col(IndexData::Value).eq(position.clone()))
                                .add(past(
                                    IndexData::ObjectDataKey,
                                    encode_key(object_store_position),
                                    forward,
                                    false,
                                )),
                        )
                        .add(past(IndexData::Value, position, forward, false)),
                ),
                None => condition.add(past(IndexData::Value, position, forward, false)),
            };
        }

        let query = Query::select()
            .columns([IndexData::Value, IndexData::ObjectDataKey])
            .from(IndexData::Table)
            .cond_where(condition)
            .order_by(IndexData::Value, order.clone())
            .order_by(IndexData::ObjectDataKey, order)
            .limit(1)
            .to_owned();
        let found: Option<(Vec<u8>, Vec<u8>)> = self
            .query_rows(&query, |row| Ok((row.get(0)?, row.get(1)?)))?
            .into_iter()
            .next();
        let Some((value, primary_key)) = found else {
            return Ok(None);
        };

        if param.direction != IDBCursorDirection::Prevunique {
            return Ok(Some((value, primary_key)));
        }

        // A unique cursor walking backward still lands on the first record
        // of the index key it found.
        let query = Query::select()
            .column(IndexData::ObjectDataKey)
            .from(IndexData::Table)
            .cond_where(
                Condition::all()
                    .add(Expr::col(IndexData::IndexId).eq(index.id))
                    .add(Expr::col(IndexData::Value).eq(value.clone())),
            )
            .order_by(IndexData::ObjectDataKey, Order::Asc)
            .limit(1)
            .to_owned();
        let lowest = self
            .query_rows(&query, |row| row.get(0))?
            .into_iter()
            .next()
            .unwrap_or(primary_key);
        Ok(Some((value, lowest)))
    }

    fn iterate_store(
        &self,
        store: &object_store_model::Model,
        param: &IterationParam,
    ) -> BackendResult<Option<(Vec<u8>, Vec<u8>)>> {
        let forward = param.direction.is_forward();
        let mut condition = Condition::all()
            .add(Expr::col(ObjectData::ObjectStoreId).eq(store.id))
            .add(range_to_query(ObjectData::Key, &param.range));
        if let Some(key) = param.key.as_ref() {
            condition = condition.add(past(ObjectData::Key, encode_key(key), forward, true));
        }
        if let Some(position) = param.position.as_ref() {
            condition = condition.add(past(ObjectData::Key, encode_key(position), forward, false));
        }
        let query = Query::select()
            .column(ObjectData::Key)
            .from(ObjectData::Table)
            .cond_where(condition)
            .order_by(ObjectData::Key, order_for(param.direction))
            .limit(1)
            .to_owned();
        Ok(self
            .query_rows(&query, |row| row.get::<_, Vec<u8>>(0))?
            .into_iter()
            .next()
            .map(|key| (key.clone(), key)))
    }
}

impl KvsEngine for SqliteEngine {
    fn version(&self) -> BackendResult<u64> {
        let version: i64 = sql(self.connection.query_row(
            "SELECT version FROM database LIMIT 1",
            [],
            |row| row.get(0),
        ))?;
        Ok(u64::from_ne_bytes(version.to_ne_bytes()))
    }

    fn set_version(&self, version: u64) -> BackendResult<()> {
        let rows_affected = sql(self.connection.execute(
            "UPDATE database SET version = ?",
            params![i64::from_ne_bytes(version.to_ne_bytes())],
        ))?;
        if rows_affected == 0 {
            return Err(BackendError::DbNotFound);
        }
        Ok(())
    }

    fn begin_upgrade(&self) -> BackendResult<()> {
        debug!("Beginning upgrade of {:?}", self.db_path);
        sql(self
            .connection
            .execute_batch(&format!("SAVEPOINT {UPGRADE_SAVEPOINT};")))
    }

    fn commit_upgrade(&self) -> BackendResult<()> {
        sql(self
            .connection
            .execute_batch(&format!("RELEASE {UPGRADE_SAVEPOINT};")))
    }

    fn rollback_upgrade(&self) -> BackendResult<()> {
        debug!("Rolling back upgrade of {:?}", self.db_path);
        sql(self.connection.execute_batch(&format!(
            "ROLLBACK TO {UPGRADE_SAVEPOINT}; RELEASE {UPGRADE_SAVEPOINT};"
        )))
    }

    fn object_stores(&self) -> BackendResult<Vec<IndexedDBObjectStore>> {
        let stores = self.query_rows(
            &Query::select()
                .columns(ObjectStore::COLUMNS)
                .from(ObjectStore::Table)
                .order_by(ObjectStore::Id, Order::Asc)
                .to_owned(),
            |row| object_store_model::Model::try_from(row),
        )?;
        let indexes = self.query_rows(
            &Query::select()
                .columns(ObjectStoreIndex::COLUMNS)
                .from(ObjectStoreIndex::Table)
                .order_by(ObjectStoreIndex::Id, Order::Asc)
                .to_owned(),
            |row| object_store_index_model::Model::try_from(row),
        )?;

        let mut indexes_by_store: FxHashMap<i64, Vec<IndexedDBIndex>> = FxHashMap::default();
        for index in indexes {
            indexes_by_store
                .entry(index.object_store_id)
                .or_default()
                .push(IndexedDBIndex {
                    name: index.name,
                    key_path: bincode::deserialize(&index.key_path)?,
                    unique: index.unique_index,
                    multi_entry: index.multi_entry_index,
                });
        }

        stores
            .into_iter()
            .map(|store| -> BackendResult<IndexedDBObjectStore> {
                Ok(IndexedDBObjectStore {
                    key_path: store
                        .key_path
                        .as_deref()
                        .map(bincode::deserialize)
                        .transpose()?,
                    auto_increment: store.auto_increment,
                    key_generator_current: u64::try_from(store.key_generator_current)
                        .unwrap_or(1),
                    indexes: indexes_by_store.remove(&store.id).unwrap_or_default(),
                    name: store.name,
                })
            })
            .collect()
    }

    fn create_store(
        &self,
        store_name: &str,
        key_path: Option<&KeyPath>,
        auto_increment: bool,
    ) -> BackendResult<CreateObjectResult> {
        let exists = sql(self
            .connection
            .prepare("SELECT 1 FROM object_store WHERE name = ?")
            .and_then(|mut stmt| stmt.exists(params![store_name])))?;
        if exists {
            // Store already exists
            return Ok(CreateObjectResult::AlreadyExists);
        }
        let key_path = key_path.map(bincode::serialize).transpose()?;
        sql(self.connection.execute(
            "INSERT INTO object_store (name, key_path, auto_increment) VALUES (?, ?, ?)",
            params![store_name, key_path, auto_increment],
        ))?;
        Ok(CreateObjectResult::Created)
    }

    fn delete_store(&self, store_name: &str) -> BackendResult<()> {
        let store = self.object_store_model(store_name)?;
        self.with_savepoint(|| {
            sql(self.connection.execute(
                "DELETE FROM index_data WHERE object_store_id = ?",
                params![store.id],
            ))?;
            sql(self.connection.execute(
                "DELETE FROM object_store_index WHERE object_store_id = ?",
                params![store.id],
            ))?;
            sql(self.connection.execute(
                "DELETE FROM object_data WHERE object_store_id = ?",
                params![store.id],
            ))?;
            sql(self
                .connection
                .execute("DELETE FROM object_store WHERE id = ?", params![store.id]))?;
            Ok(())
        })
    }

    fn rename_store(&self, store_name: &str, new_name: &str) -> BackendResult<()> {
        let rows_affected = sql(self.connection.execute(
            "UPDATE object_store SET name = ? WHERE name = ?",
            params![new_name, store_name],
        ))?;
        if rows_affected == 0 {
            return Err(BackendError::StoreNotFound);
        }
        Ok(())
    }

    fn set_key_generator_current(&self, store_name: &str, current: u64) -> BackendResult<()> {
        let rows_affected = sql(self.connection.execute(
            "UPDATE object_store SET key_generator_current = ? WHERE name = ?",
            params![i64::try_from(current).unwrap_or(i64::MAX), store_name],
        ))?;
        if rows_affected == 0 {
            return Err(BackendError::StoreNotFound);
        }
        Ok(())
    }

    fn create_index(
        &self,
        store_name: &str,
        index: &IndexedDBIndex,
    ) -> BackendResult<CreateObjectResult> {
        let object_store = self.object_store_model(store_name)?;

        let index_exists: bool = sql(self.connection.query_row(
            "SELECT EXISTS(SELECT 1 FROM object_store_index WHERE name = ? AND object_store_id = ?)",
            params![index.name, object_store.id],
            |row| row.get(0),
        ))?;
        if index_exists {
            return Ok(CreateObjectResult::AlreadyExists);
        }

        sql(self.connection.execute(
            "INSERT INTO object_store_index (object_store_id, name, key_path, unique_index, multi_entry_index)\
            VALUES (?, ?, ?, ?, ?)",
            params![
                object_store.id,
                index.name,
                bincode::serialize(&index.key_path)?,
                index.unique,
                index.multi_entry,
            ],
        ))?;
        Ok(CreateObjectResult::Created)
    }

    fn delete_index(&self, store_name: &str, index_name: &str) -> BackendResult<()> {
        let object_store = self.object_store_model(store_name)?;
        let index = self.index_model(&object_store, index_name)?;
        self.with_savepoint(|| {
            sql(self
                .connection
                .execute("DELETE FROM index_data WHERE index_id = ?", params![index.id]))?;
            sql(self.connection.execute(
                "DELETE FROM object_store_index WHERE id = ?",
                params![index.id],
            ))?;
            Ok(())
        })
    }

    fn rename_index(
        &self,
        store_name: &str,
        index_name: &str,
        new_name: &str,
    ) -> BackendResult<()> {
        let object_store = self.object_store_model(store_name)?;
        let index = self.index_model(&object_store, index_name)?;
        sql(self.connection.execute(
            "UPDATE object_store_index SET name = ? WHERE id = ?",
            params![new_name, index.id],
        ))?;
        Ok(())
    }

    fn add_index_entries(
        &self,
        store_name: &str,
        index_name: &str,
        entries: Vec<(IndexedDBKeyType, IndexedDBKeyType)>,
    ) -> BackendResult<PutItemResult> {
        let object_store = self.object_store_model(store_name)?;
        let index = self.index_model(&object_store, index_name)?;
        let entries: Vec<(Vec<u8>, Vec<u8>)> = entries
            .iter()
            .map(|(value, key)| (encode_key(value), encode_key(key)))
            .collect();

        if index.unique_index {
            let mut owners: FxHashMap<&[u8], &[u8]> = FxHashMap::default();
            for (value, key) in &entries {
                let clashes_in_batch = owners
                    .insert(value, key)
                    .is_some_and(|owner| owner != key.as_slice());
                if clashes_in_batch || self.unique_value_taken(index.id, value, key)? {
                    return Ok(PutItemResult::IndexConstraint(index.name));
                }
            }
        }

        self.with_savepoint(|| {
            for (value, key) in &entries {
                sql(self.connection.execute(
                    "INSERT OR IGNORE INTO index_data (index_id, value, object_data_key, object_store_id) \
                    VALUES (?, ?, ?, ?)",
                    params![index.id, value, key, object_store.id],
                ))?;
            }
            Ok(PutItemResult::Success)
        })
    }

    fn put_item(
        &self,
        store_name: &str,
        key: &IndexedDBKeyType,
        value: Vec<u8>,
        index_keys: Vec<IndexKeys>,
        should_overwrite: bool,
    ) -> BackendResult<PutItemResult> {
        let object_store = self.object_store_model(store_name)?;
        let serialized_key = encode_key(key);

        let existing_item = sql(self
            .connection
            .prepare_cached("SELECT 1 FROM object_data WHERE object_store_id = ? AND key = ?")
            .and_then(|mut stmt| stmt.exists(params![object_store.id, serialized_key])))?;
        if existing_item && !should_overwrite {
            return Ok(PutItemResult::CannotOverwrite);
        }

        let mut index_rows = vec![];
        for IndexKeys { index_name, keys } in index_keys {
            let index = self.index_model(&object_store, &index_name)?;
            for index_key in keys {
                let index_value = encode_key(&index_key);
                if index.unique_index &&
                    self.unique_value_taken(index.id, &index_value, &serialized_key)?
                {
                    return Ok(PutItemResult::IndexConstraint(index_name));
                }
                index_rows.push((index.id, index_value));
            }
        }

        self.with_savepoint(|| {
            sql(self.connection.execute(
                "DELETE FROM index_data WHERE object_store_id = ? AND object_data_key = ?",
                params![object_store.id, serialized_key],
            ))?;
            sql(self.connection.execute(
                "INSERT OR REPLACE INTO object_data (object_store_id, key, data) VALUES (?, ?, ?)",
                params![object_store.id, serialized_key, value],
            ))?;
            for (index_id, index_value) in &index_rows {
                sql(self.connection.execute(
                    "INSERT OR IGNORE INTO index_data (index_id, value, object_data_key, object_store_id) \
                    VALUES (?, ?, ?, ?)",
                    params![index_id, index_value, serialized_key, object_store.id],
                ))?;
            }
            Ok(PutItemResult::Success)
        })
    }

    fn delete_items(&self, store_name: &str, range: &IndexedDBKeyRange) -> BackendResult<()> {
        let object_store = self.object_store_model(store_name)?;
        self.with_savepoint(|| {
            self.delete_index_data_for_keys(&object_store, range)?;
            let (sql_text, values) = Query::delete()
                .from_table(ObjectData::Table)
                .cond_where(
                    Condition::all()
                        .add(Expr::col(ObjectData::ObjectStoreId).eq(object_store.id))
                        .add(range_to_query(ObjectData::Key, range)),
                )
                .build_rusqlite(SqliteQueryBuilder);
            sql(self.connection.execute(&sql_text, &*values.as_params()))?;
            Ok(())
        })
    }

    fn clear(&self, store_name: &str) -> BackendResult<()> {
        let object_store = self.object_store_model(store_name)?;
        self.with_savepoint(|| {
            sql(self.connection.execute(
                "DELETE FROM index_data WHERE object_store_id = ?",
                params![object_store.id],
            ))?;
            sql(self.connection.execute(
                "DELETE FROM object_data WHERE object_store_id = ?",
                params![object_store.id],
            ))?;
            Ok(())
        })
    }

    fn get_item(
        &self,
        store_name: &str,
        index: Option<&str>,
        range: &IndexedDBKeyRange,
    ) -> BackendResult<Option<Vec<u8>>> {
        let object_store = self.object_store_model(store_name)?;
        self.select_primary_keys(&object_store, index, range, 1)?
            .first()
            .map(|key| self.record_data(object_store.id, key))
            .transpose()
    }

    fn get_key(
        &self,
        store_name: &str,
        index: Option<&str>,
        range: &IndexedDBKeyRange,
    ) -> BackendResult<Option<IndexedDBKeyType>> {
        let object_store = self.object_store_model(store_name)?;
        self.select_primary_keys(&object_store, index, range, 1)?
            .first()
            .map(|key| decode_key(key))
            .transpose()
    }

    fn get_all_items(
        &self,
        store_name: &str,
        index: Option<&str>,
        range: &IndexedDBKeyRange,
        count: u32,
    ) -> BackendResult<Vec<Vec<u8>>> {
        let object_store = self.object_store_model(store_name)?;
        self.select_primary_keys(&object_store, index, range, count)?
            .iter()
            .map(|key| self.record_data(object_store.id, key))
            .collect()
    }

    fn get_all_keys(
        &self,
        store_name: &str,
        index: Option<&str>,
        range: &IndexedDBKeyRange,
        count: u32,
    ) -> BackendResult<Vec<IndexedDBKeyType>> {
        let object_store = self.object_store_model(store_name)?;
        self.select_primary_keys(&object_store, index, range, count)?
            .iter()
            .map(|key| decode_key(key))
            .collect()
    }

    fn count(
        &self,
        store_name: &str,
        index: Option<&str>,
        range: &IndexedDBKeyRange,
    ) -> BackendResult<u64> {
        let object_store = self.object_store_model(store_name)?;
        let query = match index {
            None => Query::select()
                .expr(Func::count(Expr::col(ObjectData::Key)))
                .from(ObjectData::Table)
                .cond_where(
                    Condition::all()
                        .add(Expr::col(ObjectData::ObjectStoreId).eq(object_store.id))
                        .add(range_to_query(ObjectData::Key, range)),
                )
                .to_owned(),
            Some(index_name) => {
                let index = self.index_model(&object_store, index_name)?;
                Query::select()
                    .expr(Func::count(Expr::col(IndexData::ObjectDataKey)))
                    .from(IndexData::Table)
                    .cond_where(
                        Condition::all()
                            .add(Expr::col(IndexData::IndexId).eq(index.id))
                            .add(range_to_query(IndexData::Value, range)),
                    )
                    .to_owned()
            },
        };
        let count: i64 = self
            .query_rows(&query, |row| row.get(0))?
            .into_iter()
            .next()
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn iterate(
        &self,
        store_name: &str,
        param: &IterationParam,
    ) -> BackendResult<Option<IterationRecord>> {
        let object_store = self.object_store_model(store_name)?;
        let found = match param.index_name.as_deref() {
            Some(index_name) => self.iterate_index(&object_store, index_name, param)?,
            None => self.iterate_store(&object_store, param)?,
        };
        let Some((key, primary_key)) = found else {
            return Ok(None);
        };
        let value = if param.key_only {
            None
        } else {
            Some(self.record_data(object_store.id, &primary_key)?)
        };
        Ok(Some(IterationRecord {
            key: decode_key(&key)?,
            primary_key: decode_key(&primary_key)?,
            value,
        }))
    }
}
