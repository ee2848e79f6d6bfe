//! A nested transactional executor returned by `PostgresStorage::begin`
//! (spec §4.10 `Begin/Commit/Rollback`). `sqlx::Transaction` needs `&mut
//! self` for every statement; the `storage::Transaction` contract hands
//! out `&self`, so the handle is wrapped in a mutex the way the pool
//! wraps a single connection per call.

use async_trait::async_trait;
use diagnostics::Diagnostics;
use row::{Rows, Value as RowValue};
use tokio::sync::Mutex;

use storage::{QueryResult, Transaction};

use crate::{bind_args, rows_from_pg};

pub struct PgTransaction {
    inner: Mutex<Option<sqlx::Transaction<'static, sqlx::Postgres>>>,
}

impl PgTransaction {
    pub fn new(tx: sqlx::Transaction<'static, sqlx::Postgres>) -> Self {
        PgTransaction { inner: Mutex::new(Some(tx)) }
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn query(&self, sql: &str, args: &[RowValue]) -> Result<QueryResult, Diagnostics> {
        let mut guard = self.inner.lock().await;
        let tx = guard
            .as_mut()
            .ok_or_else(|| Diagnostics::from_error("transaction already committed or rolled back"))?;
        let query = bind_args(sqlx::query(sql), args);
        let pg_rows = query
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| Diagnostics::from_error(format!("query failed: {e}")))?;
        Ok(QueryResult::new(rows_from_pg(pg_rows)))
    }

    async fn exec(&self, sql: &str, args: &[RowValue]) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let mut guard = self.inner.lock().await;
        let Some(tx) = guard.as_mut() else {
            diags.error("transaction already committed or rolled back");
            return diags;
        };
        let query = bind_args(sqlx::query(sql), args);
        if let Err(e) = query.execute(&mut **tx).await {
            diags.error(format!("exec failed: {e}"));
        }
        diags
    }

    async fn insert(&self, namespace: &str, table_name: &str, rows: &Rows) -> Diagnostics {
        let mut diags = Diagnostics::new();
        if rows.is_empty() {
            return diags;
        }

        let mut guard = self.inner.lock().await;
        let Some(tx) = guard.as_mut() else {
            diags.error("transaction already committed or rolled back");
            return diags;
        };

        let column_names = rows.column_names().to_vec();
        let stmt = crate::ddl::insert_statement(namespace, table_name, &column_names, rows.len());
        let values: Vec<RowValue> = rows
            .rows()
            .iter()
            .flat_map(|row| column_names.iter().map(move |c| row.get(c).cloned().unwrap_or(RowValue::Null)))
            .collect();

        let query = bind_args(sqlx::query(&stmt), &values);
        if let Err(e) = query.execute(&mut **tx).await {
            diags.error(format!("insert failed: {e}"));
        }
        diags
    }

    async fn commit(self: Box<Self>) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let Some(tx) = self.inner.into_inner() else {
            diags.error("transaction already committed or rolled back");
            return diags;
        };
        if let Err(e) = tx.commit().await {
            diags.error(format!("commit failed: {e}"));
        }
        diags
    }

    async fn rollback(self: Box<Self>) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let Some(tx) = self.inner.into_inner() else {
            diags.error("transaction already committed or rolled back");
            return diags;
        };
        if let Err(e) = tx.rollback().await {
            diags.error(format!("rollback failed: {e}"));
        }
        diags
    }
}
