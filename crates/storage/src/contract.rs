//! The pluggable storage contract (Component I). A concrete backend
//! (e.g. `storage-postgres`) implements `Storage`; every other component
//! in this workspace depends only on this trait, never on a specific
//! engine.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convert::Convertor;
use diagnostics::Diagnostics;
use row::{Row, Rows, Value};
use schema::Table;

use crate::query_result::QueryResult;

/// DDL, namespace, CRUD, transaction, key/value and lock operations a
/// storage backend must provide. All failures surface as `Diagnostics`
/// rather than panicking; callers decide whether to ignore them per the
/// `OnSaveResult`/`OnPullTable` ignore policy.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn table_create(&self, namespace: &str, table: &Table) -> Diagnostics;

    async fn tables_create(&self, namespace: &str, tables: &[Table]) -> Diagnostics {
        let mut diags = Diagnostics::new();
        for table in tables {
            diags.merge(self.table_create(namespace, table).await);
        }
        diags
    }

    async fn table_drop(&self, namespace: &str, table_name: &str) -> Diagnostics;

    async fn tables_drop(&self, namespace: &str, table_names: &[String]) -> Diagnostics {
        let mut diags = Diagnostics::new();
        for name in table_names {
            diags.merge(self.table_drop(namespace, name).await);
        }
        diags
    }

    async fn table_list(&self, namespace: &str) -> Result<Vec<String>, Diagnostics>;

    async fn namespace_list(&self) -> Result<Vec<String>, Diagnostics>;
    async fn namespace_create(&self, namespace: &str) -> Diagnostics;
    async fn namespace_drop(&self, namespace: &str) -> Diagnostics;

    async fn query(&self, sql: &str, args: &[Value]) -> Result<QueryResult, Diagnostics>;
    async fn exec(&self, sql: &str, args: &[Value]) -> Diagnostics;

    /// Insert every row of `rows` into `namespace.table_name` in one
    /// batch. Implementations decide batching strategy; callers only
    /// need the 1-to-1 row/result relationship to hold afterward.
    async fn insert(&self, namespace: &str, table_name: &str, rows: &Rows) -> Diagnostics;

    async fn begin(&self) -> Result<Box<dyn Transaction>, Diagnostics>;

    async fn set_key(&self, key: &str, value: &str) -> Diagnostics;
    async fn get_value(&self, key: &str) -> Result<Option<String>, Diagnostics>;
    async fn delete_key(&self, key: &str) -> Diagnostics;
    async fn list_key(&self, prefix: &str) -> Result<Vec<(String, String)>, Diagnostics>;

    /// Insert `key` with `value` iff absent. `Ok(false)` means the key
    /// already exists; this is the expected outcome of a lost race, not
    /// a failure, so callers retry instead of surfacing it.
    async fn kv_insert_if_absent(&self, key: &str, value: &str) -> Result<bool, Diagnostics>;

    /// Update `key` to `new_value` iff its current value equals
    /// `expected`. `Ok(false)` means the value had already changed.
    async fn kv_compare_and_set(&self, key: &str, expected: &str, new_value: &str) -> Result<bool, Diagnostics>;

    /// Delete `key` iff its current value equals `expected`.
    async fn kv_compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, Diagnostics>;

    /// The backend's own clock. The distributed lock stamps lease
    /// expiry from this rather than the caller's local clock so that
    /// skew between application hosts cannot shorten or extend a lease.
    async fn get_time(&self) -> Result<DateTime<Utc>, Diagnostics>;

    /// Backend-specific type convertor, if this storage engine needs
    /// coercions the default convertor doesn't cover. `None` means the
    /// caller should fall back to `convert::DefaultConvertor`.
    fn convertor(&self) -> Option<Arc<dyn Convertor>> {
        None
    }
}

/// A transaction handle returned by `Storage::begin`. Consuming
/// `commit`/`rollback` (`self: Box<Self>`) makes double-commit a
/// compile error rather than a runtime one.
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn query(&self, sql: &str, args: &[Value]) -> Result<QueryResult, Diagnostics>;
    async fn exec(&self, sql: &str, args: &[Value]) -> Diagnostics;
    async fn insert(&self, namespace: &str, table_name: &str, rows: &Rows) -> Diagnostics;

    async fn commit(self: Box<Self>) -> Diagnostics;
    async fn rollback(self: Box<Self>) -> Diagnostics;
}

/// Convenience used by in-memory/test backends: build an empty `Rows`
/// result set with no columns, useful as a neutral query response.
pub fn empty_rows() -> Rows {
    Rows::new()
}

/// Convenience constructor matching how most call sites build a single
/// result row before appending it to a `Rows`.
pub fn single_row_result(row: Row) -> Rows {
    Rows::from_row(row)
}
