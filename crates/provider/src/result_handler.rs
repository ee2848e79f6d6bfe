//! The concrete `executor::ResultHandler` every provider pull task runs
//! (spec §4.7, Component H). Converts one raw result into transformed,
//! stored rows, preserving the 1-to-1 positional invariant child-task
//! fan-out depends on.

use std::sync::Arc;

use async_trait::async_trait;
use convert::Convertor;
use diagnostics::{catch_panic, Diagnostics, ErrorHandlerMeta, IgnoreKind};
use executor::{DataSourcePullTask, ResultHandler};
use row::Rows;
use schema::ClientHandle;
use serde_json::Value as Raw;
use storage::Storage;
use transform::TransformContext;

use crate::transformer_meta::expand_raw_result;

pub struct ProviderResultHandler {
    pub storage: Arc<dyn Storage>,
    pub convertor: Arc<dyn Convertor>,
    pub error_handler: Arc<ErrorHandlerMeta>,
    pub auto_expand: bool,
    pub namespace: String,
}

#[async_trait]
impl ResultHandler for ProviderResultHandler {
    async fn handle(&self, client: &ClientHandle, task: &DataSourcePullTask, raw_result: &Raw) -> (Rows, Vec<Raw>, Diagnostics) {
        let mut diags = Diagnostics::new();
        let elements = expand_raw_result(raw_result, self.auto_expand);

        let mut saved_rows: Option<Rows> = None;
        let mut saved_results = Vec::new();

        for element in elements {
            let ctx = TransformContext {
                client_meta: task.client_meta.as_ref(),
                client,
                item_bag: &task.item_bag,
                table: task.table.as_ref(),
                parent_table: task.parent_table.as_deref(),
                parent_row: task.parent_row.as_ref(),
                parent_raw_result: task.parent_raw_result.as_ref(),
                convertor: self.convertor.as_ref(),
                error_handler: &self.error_handler,
            };

            let outcome = catch_panic("transform_result", || transform::transform_result(&ctx, &element));
            let (row, transform_diags) = match outcome {
                Ok(pair) => pair,
                Err(panic_diags) => (row::Row::new(), panic_diags),
            };

            if transform_diags.has_error() {
                if self.error_handler.is_ignored(IgnoreKind::OnTransformerRow) {
                    continue;
                }
                if self.error_handler.is_ignored(IgnoreKind::OnSaveResult) {
                    diags.merge(transform_diags);
                    continue;
                }
                diags.merge(transform_diags);
                return (Rows::new(), Vec::new(), diags);
            }

            let single_row = Rows::from_row(row);
            let insert_diags = self.storage.insert(&self.namespace, &task.table.name, &single_row).await;
            if insert_diags.has_error() {
                if self.error_handler.is_ignored(IgnoreKind::OnSaveResult) {
                    diags.merge(insert_diags);
                    continue;
                }
                diags.merge(insert_diags);
                return (Rows::new(), Vec::new(), diags);
            }

            match &mut saved_rows {
                None => saved_rows = Some(single_row),
                Some(accumulated) => {
                    if accumulated.append_rows(single_row).is_err() {
                        tracing::warn!(table = %task.table.name, "row shape mismatch merging result, skipping element");
                        continue;
                    }
                }
            }
            saved_results.push(element);
        }

        (saved_rows.unwrap_or_default(), saved_results, diags)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{TimeZone, Utc};
    use diagnostics::ErrorHandlerMeta;
    use row::Value;
    use schema::{Column, ColumnType, Table};
    use std::sync::Mutex;
    use storage::QueryResult;

    struct RecordingStorage {
        inserted: Mutex<Vec<Rows>>,
        fail_names: Vec<String>,
    }

    #[async_trait]
    impl Storage for RecordingStorage {
        async fn table_create(&self, _namespace: &str, _table: &Table) -> Diagnostics {
            Diagnostics::new()
        }
        async fn table_drop(&self, _namespace: &str, _table_name: &str) -> Diagnostics {
            Diagnostics::new()
        }
        async fn table_list(&self, _namespace: &str) -> Result<Vec<String>, Diagnostics> {
            Ok(Vec::new())
        }
        async fn namespace_list(&self) -> Result<Vec<String>, Diagnostics> {
            Ok(Vec::new())
        }
        async fn namespace_create(&self, _namespace: &str) -> Diagnostics {
            Diagnostics::new()
        }
        async fn namespace_drop(&self, _namespace: &str) -> Diagnostics {
            Diagnostics::new()
        }
        async fn query(&self, _sql: &str, _args: &[Value]) -> Result<QueryResult, Diagnostics> {
            Ok(QueryResult::new(Vec::new()))
        }
        async fn exec(&self, _sql: &str, _args: &[Value]) -> Diagnostics {
            Diagnostics::new()
        }
        async fn insert(&self, _namespace: &str, table_name: &str, rows: &Rows) -> Diagnostics {
            let mut diags = Diagnostics::new();
            if self.fail_names.iter().any(|n| n == table_name) {
                diags.error(format!("insert into {table_name} failed"));
                return diags;
            }
            self.inserted.lock().unwrap().push(rows.clone());
            diags
        }
        async fn begin(&self) -> Result<Box<dyn storage::Transaction>, Diagnostics> {
            Err(Diagnostics::from_error("not supported in test double"))
        }
        async fn set_key(&self, _key: &str, _value: &str) -> Diagnostics {
            Diagnostics::new()
        }
        async fn get_value(&self, _key: &str) -> Result<Option<String>, Diagnostics> {
            Ok(None)
        }
        async fn delete_key(&self, _key: &str) -> Diagnostics {
            Diagnostics::new()
        }
        async fn list_key(&self, _prefix: &str) -> Result<Vec<(String, String)>, Diagnostics> {
            Ok(Vec::new())
        }
        async fn kv_insert_if_absent(&self, _key: &str, _value: &str) -> Result<bool, Diagnostics> {
            Ok(true)
        }
        async fn kv_compare_and_set(&self, _key: &str, _expected: &str, _new_value: &str) -> Result<bool, Diagnostics> {
            Ok(true)
        }
        async fn kv_compare_and_delete(&self, _key: &str, _expected: &str) -> Result<bool, Diagnostics> {
            Ok(true)
        }
        async fn get_time(&self) -> Result<chrono::DateTime<Utc>, Diagnostics> {
            Ok(Utc.timestamp_opt(0, 0).unwrap())
        }
    }

    fn test_table() -> Table {
        let mut table = Table::new("user_test", vec![Column::new("name", ColumnType::String)]);
        table.init_runtime(None).unwrap();
        table
    }

    struct NullClientMeta;
    impl schema::ClientMeta for NullClientMeta {
        fn get_item(&self, _key: &str) -> Option<Raw> {
            None
        }
        fn clients(&self) -> Vec<ClientHandle> {
            vec![ClientHandle::none()]
        }
    }

    fn task_for(table: Arc<Table>) -> DataSourcePullTask {
        let (diag_tx, _diag_rx) = tokio::sync::mpsc::channel(16);
        DataSourcePullTask::root(
            "root".to_string(),
            table,
            Arc::new(NullClientMeta),
            schema::CancelToken::new(),
            diag_tx,
            Arc::new(NoopHandler),
            None,
        )
    }

    struct NoopHandler;
    #[async_trait]
    impl ResultHandler for NoopHandler {
        async fn handle(&self, _client: &ClientHandle, _task: &DataSourcePullTask, _raw: &Raw) -> (Rows, Vec<Raw>, Diagnostics) {
            (Rows::new(), Vec::new(), Diagnostics::new())
        }
    }

    #[tokio::test]
    async fn single_element_is_transformed_and_inserted() {
        let table = Arc::new(test_table());
        let task = task_for(table);
        let storage = Arc::new(RecordingStorage {
            inserted: Mutex::new(Vec::new()),
            fail_names: Vec::new(),
        });
        let handler = ProviderResultHandler {
            storage: storage.clone(),
            convertor: Arc::new(convert::DefaultConvertor::new()),
            error_handler: Arc::new(ErrorHandlerMeta::new()),
            auto_expand: false,
            namespace: "public".to_string(),
        };

        let (rows, results, diags) = handler.handle(&ClientHandle::none(), &task, &serde_json::json!({"name": "Tom"})).await;

        assert!(!diags.has_error());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.rows()[0].get("name"), Some(&Value::String("Tom".into())));
        assert_eq!(results.len(), 1);
        assert_eq!(storage.inserted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn auto_expand_processes_each_array_element() {
        let table = Arc::new(test_table());
        let task = task_for(table);
        let storage = Arc::new(RecordingStorage {
            inserted: Mutex::new(Vec::new()),
            fail_names: Vec::new(),
        });
        let handler = ProviderResultHandler {
            storage: storage.clone(),
            convertor: Arc::new(convert::DefaultConvertor::new()),
            error_handler: Arc::new(ErrorHandlerMeta::new()),
            auto_expand: true,
            namespace: "public".to_string(),
        };

        let raw = serde_json::json!([{"name": "Tom"}, {"name": "Ann"}]);
        let (rows, results, diags) = handler.handle(&ClientHandle::none(), &task, &raw).await;

        assert!(!diags.has_error());
        assert_eq!(rows.len(), 2);
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn insert_failure_without_ignore_discards_the_whole_batch() {
        let table = Arc::new(test_table());
        let task = task_for(table);
        let storage = Arc::new(RecordingStorage {
            inserted: Mutex::new(Vec::new()),
            fail_names: vec!["user_test".to_string()],
        });
        let handler = ProviderResultHandler {
            storage: storage.clone(),
            convertor: Arc::new(convert::DefaultConvertor::new()),
            error_handler: Arc::new(ErrorHandlerMeta::new()),
            auto_expand: false,
            namespace: "public".to_string(),
        };

        let (rows, results, diags) = handler.handle(&ClientHandle::none(), &task, &serde_json::json!({"name": "Tom"})).await;

        assert!(diags.has_error());
        assert!(rows.is_empty());
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn insert_failure_with_ignore_on_save_result_skips_the_element() {
        let table = Arc::new(test_table());
        let task = task_for(table);
        let storage = Arc::new(RecordingStorage {
            inserted: Mutex::new(Vec::new()),
            fail_names: vec!["user_test".to_string()],
        });
        let handler = ProviderResultHandler {
            storage: storage.clone(),
            convertor: Arc::new(convert::DefaultConvertor::new()),
            error_handler: Arc::new(ErrorHandlerMeta::with_ignored([IgnoreKind::OnSaveResult])),
            auto_expand: true,
            namespace: "public".to_string(),
        };

        let raw = serde_json::json!([{"name": "Tom"}]);
        let (rows, results, diags) = handler.handle(&ClientHandle::none(), &task, &raw).await;

        assert!(diags.has_error());
        assert!(rows.is_empty());
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn transform_failure_with_ignore_on_transformer_row_drops_the_row_silently() {
        let mut table = Table::new("empty_test", vec![]);
        table.init_runtime(None).unwrap();
        let task = task_for(Arc::new(table));
        let storage = Arc::new(RecordingStorage {
            inserted: Mutex::new(Vec::new()),
            fail_names: Vec::new(),
        });
        let handler = ProviderResultHandler {
            storage: storage.clone(),
            convertor: Arc::new(convert::DefaultConvertor::new()),
            error_handler: Arc::new(ErrorHandlerMeta::with_ignored([IgnoreKind::OnTransformerRow])),
            auto_expand: false,
            namespace: "public".to_string(),
        };

        let (rows, results, diags) = handler.handle(&ClientHandle::none(), &task, &serde_json::json!({"name": "Tom"})).await;

        assert!(!diags.has_error());
        assert!(rows.is_empty());
        assert!(results.is_empty());
        assert!(storage.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transform_failure_without_ignore_on_transformer_row_aborts_the_batch() {
        let mut table = Table::new("empty_test", vec![]);
        table.init_runtime(None).unwrap();
        let task = task_for(Arc::new(table));
        let storage = Arc::new(RecordingStorage {
            inserted: Mutex::new(Vec::new()),
            fail_names: Vec::new(),
        });
        let handler = ProviderResultHandler {
            storage: storage.clone(),
            convertor: Arc::new(convert::DefaultConvertor::new()),
            error_handler: Arc::new(ErrorHandlerMeta::new()),
            auto_expand: false,
            namespace: "public".to_string(),
        };

        let (rows, results, diags) = handler.handle(&ClientHandle::none(), &task, &serde_json::json!({"name": "Tom"})).await;

        assert!(diags.has_error());
        assert!(rows.is_empty());
        assert!(results.is_empty());
        assert!(storage.inserted.lock().unwrap().is_empty());
    }
}
