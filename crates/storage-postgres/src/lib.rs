//! Reference Postgres storage backend (Component J). Implements the
//! `storage::Storage` contract on top of `sqlx::PgPool`: DDL synthesis
//! (`ddl`), row/value bridging (`value`), and a connection pool that
//! pins each session to a configured `search_path`.

mod ddl;
mod transaction;
mod value;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convert::Convertor;
use diagnostics::Diagnostics;
use row::{Row, Rows, Value as RowValue};
use schema::Table;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Executor, Row as _};
use storage::{QueryResult, Storage, Transaction};

pub use transaction::PgTransaction;

const META_KV_TABLE: &str = "selefra_meta_kv";

/// Connection options for the reference backend (spec §6, storage
/// descriptor `options-bytes`).
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    pub connection_string: String,
    pub search_path: String,
    pub max_connections: u32,
}

impl PostgresOptions {
    pub fn new(connection_string: impl Into<String>) -> Self {
        PostgresOptions {
            connection_string: connection_string.into(),
            search_path: "public".to_string(),
            max_connections: 10,
        }
    }

    pub fn with_search_path(mut self, search_path: impl Into<String>) -> Self {
        self.search_path = search_path.into();
        self
    }
}

pub struct PostgresStorage {
    pool: sqlx::PgPool,
    options: PostgresOptions,
}

impl PostgresStorage {
    pub async fn connect(options: PostgresOptions) -> Result<Self, Diagnostics> {
        let search_path = options.search_path.clone();
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .after_connect(move |conn, _meta| {
                let search_path = search_path.clone();
                Box::pin(async move {
                    conn.execute(format!("SET search_path TO \"{search_path}\"").as_str()).await?;
                    Ok(())
                })
            })
            .connect(&options.connection_string)
            .await
            .map_err(|e| Diagnostics::from_error(format!("failed to connect to postgres: {e}")))?;

        Ok(PostgresStorage { pool, options })
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    async fn ensure_kv_table(&self) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let namespace = &self.options.search_path;
        diags.merge(self.exec(&ddl::create_schema_statement(namespace), &[]).await);
        let stmt = format!(
            "CREATE TABLE IF NOT EXISTS \"{namespace}\".{META_KV_TABLE} (key TEXT PRIMARY KEY, value TEXT NOT NULL)"
        );
        diags.merge(self.exec(&stmt, &[]).await);
        diags
    }

    fn kv_qualified(&self) -> String {
        format!("\"{}\".{META_KV_TABLE}", self.options.search_path)
    }
}

pub(crate) fn rows_from_pg(pg_rows: Vec<PgRow>) -> Vec<Row> {
    pg_rows
        .into_iter()
        .map(|pg_row| {
            let names = value::column_names(&pg_row);
            let mut row = Row::new();
            for (idx, name) in names.into_iter().enumerate() {
                let decoded = value::decode_column(&pg_row, idx).unwrap_or(RowValue::Null);
                row.set(name, decoded);
            }
            row
        })
        .collect()
}

pub(crate) fn bind_args<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    args: &'q [RowValue],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    for arg in args {
        query = value::bind_value(query, arg);
    }
    query
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn table_create(&self, namespace: &str, table: &Table) -> Diagnostics {
        let mut diags = Diagnostics::new();
        diags.merge(self.exec(&ddl::create_schema_statement(namespace), &[]).await);
        diags.merge(self.exec(&ddl::create_table_statement(namespace, table), &[]).await);
        for stmt in ddl::constraint_statements(namespace, table) {
            diags.merge(self.exec(&stmt, &[]).await);
        }
        diags
    }

    async fn table_drop(&self, namespace: &str, table_name: &str) -> Diagnostics {
        self.exec(&ddl::drop_table_statement(namespace, table_name), &[]).await
    }

    async fn table_list(&self, namespace: &str) -> Result<Vec<String>, Diagnostics> {
        let sql = "SELECT table_name FROM information_schema.tables WHERE table_schema = $1";
        let result = self.query(sql, &[RowValue::String(namespace.to_string())]).await?;
        Ok(result
            .rows()
            .iter()
            .filter_map(|r| match r.get("table_name") {
                Some(RowValue::String(s)) => Some(s.clone()),
                _ => None,
            })
            .collect())
    }

    async fn namespace_list(&self) -> Result<Vec<String>, Diagnostics> {
        let sql = "SELECT schema_name FROM information_schema.schemata";
        let result = self.query(sql, &[]).await?;
        Ok(result
            .rows()
            .iter()
            .filter_map(|r| match r.get("schema_name") {
                Some(RowValue::String(s)) => Some(s.clone()),
                _ => None,
            })
            .collect())
    }

    async fn namespace_create(&self, namespace: &str) -> Diagnostics {
        self.exec(&ddl::create_schema_statement(namespace), &[]).await
    }

    async fn namespace_drop(&self, namespace: &str) -> Diagnostics {
        self.exec(&ddl::drop_schema_statement(namespace), &[]).await
    }

    async fn query(&self, sql: &str, args: &[RowValue]) -> Result<QueryResult, Diagnostics> {
        let query = bind_args(sqlx::query(sql), args);
        let pg_rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Diagnostics::from_error(format!("query failed: {e}")))?;
        Ok(QueryResult::new(rows_from_pg(pg_rows)))
    }

    async fn exec(&self, sql: &str, args: &[RowValue]) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let query = bind_args(sqlx::query(sql), args);
        if let Err(e) = query.execute(&self.pool).await {
            diags.error(format!("exec failed: {e}"));
        }
        diags
    }

    async fn insert(&self, namespace: &str, table_name: &str, rows: &Rows) -> Diagnostics {
        let mut diags = Diagnostics::new();
        if rows.is_empty() {
            return diags;
        }

        let column_names = rows.column_names().to_vec();
        let stmt = ddl::insert_statement(namespace, table_name, &column_names, rows.len());
        let values: Vec<RowValue> = rows
            .rows()
            .iter()
            .flat_map(|row| column_names.iter().map(move |c| row.get(c).cloned().unwrap_or(RowValue::Null)))
            .collect();

        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                diags.error(format!("failed to start insert transaction: {e}"));
                return diags;
            }
        };
        if let Err(e) = tx
            .execute("SET TRANSACTION ISOLATION LEVEL READ COMMITTED READ WRITE NOT DEFERRABLE")
            .await
        {
            diags.error(format!("failed to set transaction characteristics: {e}"));
            return diags;
        }

        let query = bind_args(sqlx::query(&stmt), &values);
        if let Err(e) = query.execute(&mut *tx).await {
            diags.error(format!("insert failed: {e}"));
            return diags;
        }

        if let Err(e) = tx.commit().await {
            diags.error(format!("failed to commit insert: {e}"));
        }
        diags
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, Diagnostics> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Diagnostics::from_error(format!("failed to begin transaction: {e}")))?;
        Ok(Box::new(PgTransaction::new(tx)))
    }

    async fn set_key(&self, key: &str, value: &str) -> Diagnostics {
        let mut diags = self.ensure_kv_table().await;
        let stmt = format!(
            "INSERT INTO {} (key, value) VALUES ($1, $2) ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            self.kv_qualified()
        );
        diags.merge(
            self.exec(&stmt, &[RowValue::String(key.to_string()), RowValue::String(value.to_string())])
                .await,
        );
        diags
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, Diagnostics> {
        let stmt = format!("SELECT value FROM {} WHERE key = $1", self.kv_qualified());
        let result = self.query(&stmt, &[RowValue::String(key.to_string())]).await?;
        Ok(result.rows().first().and_then(|r| match r.get("value") {
            Some(RowValue::String(s)) => Some(s.clone()),
            _ => None,
        }))
    }

    async fn delete_key(&self, key: &str) -> Diagnostics {
        let stmt = format!("DELETE FROM {} WHERE key = $1", self.kv_qualified());
        self.exec(&stmt, &[RowValue::String(key.to_string())]).await
    }

    async fn list_key(&self, prefix: &str) -> Result<Vec<(String, String)>, Diagnostics> {
        let stmt = format!("SELECT key, value FROM {} WHERE key LIKE $1", self.kv_qualified());
        let result = self.query(&stmt, &[RowValue::String(format!("{prefix}%"))]).await?;
        Ok(result
            .rows()
            .iter()
            .filter_map(|r| match (r.get("key"), r.get("value")) {
                (Some(RowValue::String(k)), Some(RowValue::String(v))) => Some((k.clone(), v.clone())),
                _ => None,
            })
            .collect())
    }

    async fn kv_insert_if_absent(&self, key: &str, value: &str) -> Result<bool, Diagnostics> {
        self.ensure_kv_table().await;
        let stmt = format!("INSERT INTO {} (key, value) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING", self.kv_qualified());
        let query = bind_args(
            sqlx::query(&stmt),
            &[RowValue::String(key.to_string()), RowValue::String(value.to_string())],
        );
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| Diagnostics::from_error(format!("kv insert-if-absent failed: {e}")))?;
        Ok(result.rows_affected() == 1)
    }

    async fn kv_compare_and_set(&self, key: &str, expected: &str, new_value: &str) -> Result<bool, Diagnostics> {
        let stmt = format!("UPDATE {} SET value = $1 WHERE key = $2 AND value = $3", self.kv_qualified());
        let query = bind_args(
            sqlx::query(&stmt),
            &[
                RowValue::String(new_value.to_string()),
                RowValue::String(key.to_string()),
                RowValue::String(expected.to_string()),
            ],
        );
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| Diagnostics::from_error(format!("kv compare-and-set failed: {e}")))?;
        Ok(result.rows_affected() == 1)
    }

    async fn kv_compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, Diagnostics> {
        let stmt = format!("DELETE FROM {} WHERE key = $1 AND value = $2", self.kv_qualified());
        let query = bind_args(
            sqlx::query(&stmt),
            &[RowValue::String(key.to_string()), RowValue::String(expected.to_string())],
        );
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| Diagnostics::from_error(format!("kv compare-and-delete failed: {e}")))?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_time(&self) -> Result<DateTime<Utc>, Diagnostics> {
        let result = self.query("SELECT NOW() AS now", &[]).await?;
        match result.rows().first().and_then(|r| r.get("now")) {
            Some(RowValue::Timestamp(dt)) => Ok(*dt),
            _ => Err(Diagnostics::from_error("storage clock query returned no rows")),
        }
    }

    fn convertor(&self) -> Option<Arc<dyn Convertor>> {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn options_default_to_public_search_path() {
        let options = PostgresOptions::new("postgres://localhost/test");
        assert_eq!(options.search_path, "public");
    }

    #[test]
    fn with_search_path_overrides_default() {
        let options = PostgresOptions::new("postgres://localhost/test").with_search_path("tenant_a");
        assert_eq!(options.search_path, "tenant_a");
    }
}
