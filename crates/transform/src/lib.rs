//! Row transformer (Component F): runs each column's extractor in
//! dependency order, coerces the result through the type convertor, and
//! applies the per-cell ignore policy without ever aborting mid-row.

use convert::Convertor;
use diagnostics::{catch_panic, Diagnostics, ErrorHandlerMeta, IgnoreKind};
use row::Row;
use schema::{ClientHandle, ClientMeta, ExtractContext, ItemBag, Table};
use serde_json::Value as Raw;

/// Everything `transform_result` needs about the task it is running
/// under and the row it is producing.
pub struct TransformContext<'a> {
    pub client_meta: &'a dyn ClientMeta,
    pub client: &'a ClientHandle,
    pub item_bag: &'a dyn ItemBag,
    pub table: &'a Table,
    pub parent_table: Option<&'a Table>,
    pub parent_row: Option<&'a Row>,
    pub parent_raw_result: Option<&'a Raw>,
    pub convertor: &'a dyn Convertor,
    pub error_handler: &'a ErrorHandlerMeta,
}

/// Produce one Row from one raw API result, in `ColumnExtractorSorted`
/// order. Never returns early on a single cell's failure: a failed cell
/// is written as null and either absorbed or recorded, and every later
/// column still runs.
pub fn transform_result(ctx: &TransformContext<'_>, raw_result: &Raw) -> (Row, Diagnostics) {
    let mut diags = Diagnostics::new();
    let mut row = Row::new();

    if ctx.table.columns.is_empty() {
        diags.error(format!("table {:?} has no columns to transform", ctx.table.name));
        return (row, diags);
    }
    if raw_result.is_null() {
        diags.error(format!("table {:?}: raw result is null", ctx.table.name));
        return (row, diags);
    }

    let default_extractor = extract::Default;

    for name in ctx.table.runtime.column_extractor_sorted() {
        let column = match ctx.table.column(name) {
            Some(c) => c,
            None => continue,
        };

        row.reserve_column(name.clone());

        let (raw_value, mut cell_diags) = {
            let extract_ctx = ExtractContext {
                client_meta: ctx.client_meta,
                client: ctx.client,
                item_bag: ctx.item_bag,
                row: &row,
                parent_row: ctx.parent_row,
                parent_raw_result: ctx.parent_raw_result,
                table: ctx.table,
                parent_table: ctx.parent_table,
            };
            let extractor = column.extractor.as_deref();
            let outcome = catch_panic("extractor", || match extractor {
                Some(e) => e.extract(&extract_ctx, column, raw_result),
                None => default_extractor.extract(&extract_ctx, column, raw_result),
            });
            match outcome {
                Ok(pair) => pair,
                Err(panic_diags) => (Raw::Null, panic_diags),
            }
        };

        let (value, convert_diags) = if cell_diags.has_error() {
            (row::Value::Null, Diagnostics::new())
        } else {
            ctx.convertor.convert(ctx.table, column, &raw_value)
        };
        cell_diags.merge(convert_diags);

        if cell_diags.has_error() && ctx.error_handler.is_ignored(IgnoreKind::OnTransformerCell) {
            row.set(name.clone(), row::Value::Null);
        } else {
            row.set(name.clone(), value);
            diags.merge(cell_diags);
        }
    }

    (row, diags)
}

#[cfg(test)]
mod test {
    use super::*;
    use diagnostics::ErrorHandlerMeta;
    use extract::ColumnsValueMd5;
    use schema::{Column, ColumnType, TableOptions};
    use std::sync::Arc;

    struct EmptyClientMeta;
    impl ClientMeta for EmptyClientMeta {
        fn get_item(&self, _key: &str) -> Option<Raw> {
            None
        }
        fn clients(&self) -> Vec<ClientHandle> {
            vec![ClientHandle::none()]
        }
    }

    struct EmptyItemBag;
    impl ItemBag for EmptyItemBag {
        fn get(&self, _key: &str) -> Option<Raw> {
            None
        }
        fn lookup(&self, _key: &str) -> Option<Raw> {
            None
        }
    }

    struct AlwaysPanics;
    impl schema::Extractor for AlwaysPanics {
        fn name(&self) -> &'static str {
            "always_panics"
        }
        fn dependency_column_names(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Vec<String> {
            Vec::new()
        }
        fn validate(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Diagnostics {
            Diagnostics::new()
        }
        fn extract(&self, _ctx: &ExtractContext<'_>, _column: &Column, _raw: &Raw) -> (Raw, Diagnostics) {
            panic!("boom");
        }
    }

    fn user_table() -> Table {
        let mut table = Table::new(
            "user_test",
            vec![
                Column::new("name", ColumnType::String),
                Column::new("age", ColumnType::Int),
                Column::new("passwd", ColumnType::String),
                Column::new("test_id", ColumnType::String)
                    .with_extractor(Arc::new(ColumnsValueMd5::new(["name", "passwd"]))),
            ],
        )
        .with_options(TableOptions::new().with_primary_key(["name"]));
        table.init_runtime(None).unwrap();
        table
    }

    #[test]
    fn single_table_row_matches_concrete_scenario_one() {
        let table = user_table();
        let meta = EmptyClientMeta;
        let bag = EmptyItemBag;
        let client = ClientHandle::none();
        let convertor = convert::DefaultConvertor::new();
        let handler = ErrorHandlerMeta::new();
        let ctx = TransformContext {
            client_meta: &meta,
            client: &client,
            item_bag: &bag,
            table: &table,
            parent_table: None,
            parent_row: None,
            parent_raw_result: None,
            convertor: &convertor,
            error_handler: &handler,
        };

        let raw = serde_json::json!({"Name": "Tom", "Age": 3, "Passwd": "x"});
        let (row, diags) = transform_result(&ctx, &raw);

        assert!(!diags.has_error());
        assert_eq!(row.column_names(), table.runtime.column_extractor_sorted());
        assert_eq!(row.get("name"), Some(&row::Value::String("Tom".into())));
        assert_eq!(row.get("age"), Some(&row::Value::Int(3)));
        let expected_id = format!("{:x}", md5::compute(b"Tom | x"));
        assert_eq!(row.get("test_id"), Some(&row::Value::String(expected_id)));
    }

    #[test]
    fn panicking_extractor_ignored_per_cell_writes_null_and_continues() {
        let mut table = Table::new(
            "t",
            vec![
                Column::new("a", ColumnType::String).with_extractor(Arc::new(AlwaysPanics)),
                Column::new("b", ColumnType::String),
            ],
        );
        table.init_runtime(None).unwrap();

        let meta = EmptyClientMeta;
        let bag = EmptyItemBag;
        let client = ClientHandle::none();
        let convertor = convert::DefaultConvertor::new();
        let handler = ErrorHandlerMeta::with_ignored([IgnoreKind::OnTransformerCell]);
        let ctx = TransformContext {
            client_meta: &meta,
            client: &client,
            item_bag: &bag,
            table: &table,
            parent_table: None,
            parent_row: None,
            parent_raw_result: None,
            convertor: &convertor,
            error_handler: &handler,
        };

        let (row, diags) = transform_result(&ctx, &serde_json::json!({"b": "ok"}));

        assert!(!diags.has_error());
        assert_eq!(row.get("a"), Some(&row::Value::Null));
        assert_eq!(row.get("b"), Some(&row::Value::String("ok".into())));
    }

    #[test]
    fn panicking_extractor_not_ignored_is_recorded_but_row_completes() {
        let mut table = Table::new(
            "t",
            vec![
                Column::new("a", ColumnType::String).with_extractor(Arc::new(AlwaysPanics)),
                Column::new("b", ColumnType::String),
            ],
        );
        table.init_runtime(None).unwrap();

        let meta = EmptyClientMeta;
        let bag = EmptyItemBag;
        let client = ClientHandle::none();
        let convertor = convert::DefaultConvertor::new();
        let handler = ErrorHandlerMeta::new();
        let ctx = TransformContext {
            client_meta: &meta,
            client: &client,
            item_bag: &bag,
            table: &table,
            parent_table: None,
            parent_row: None,
            parent_raw_result: None,
            convertor: &convertor,
            error_handler: &handler,
        };

        let (row, diags) = transform_result(&ctx, &serde_json::json!({"b": "ok"}));

        assert!(diags.has_error());
        assert_eq!(row.get("b"), Some(&row::Value::String("ok".into())));
    }

    #[test]
    fn empty_column_list_is_rejected() {
        let mut table = Table::new("empty", vec![]);
        table.init_runtime(None).unwrap();
        let meta = EmptyClientMeta;
        let bag = EmptyItemBag;
        let client = ClientHandle::none();
        let convertor = convert::DefaultConvertor::new();
        let handler = ErrorHandlerMeta::new();
        let ctx = TransformContext {
            client_meta: &meta,
            client: &client,
            item_bag: &bag,
            table: &table,
            parent_table: None,
            parent_row: None,
            parent_raw_result: None,
            convertor: &convertor,
            error_handler: &handler,
        };

        let (_, diags) = transform_result(&ctx, &serde_json::json!({}));
        assert!(diags.has_error());
    }
}
