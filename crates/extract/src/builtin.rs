use std::sync::Arc;

use diagnostics::Diagnostics;
use schema::{Column, ExtractContext, Extractor, Table};
use serde_json::Value as Raw;
use uuid::Uuid;

use crate::util::{lookup, md5_join, to_camel_case, value_to_display};

fn no_diags() -> Diagnostics {
    Diagnostics::new()
}

/// Reads `column.name` (falling back to its camelCase form) as a top-level
/// field of the raw result.
pub struct Default;

impl Extractor for Default {
    fn name(&self) -> &'static str {
        "default"
    }
    fn dependency_column_names(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Vec<String> {
        Vec::new()
    }
    fn validate(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Diagnostics {
        no_diags()
    }
    fn extract(&self, _ctx: &ExtractContext<'_>, column: &Column, raw_result: &Raw) -> (Raw, Diagnostics) {
        let value = lookup(raw_result, &column.name)
            .or_else(|| lookup(raw_result, &to_camel_case(&column.name)))
            .cloned()
            .unwrap_or(Raw::Null);
        (value, no_diags())
    }
}

/// First non-null of an ordered list of path expressions against the raw
/// result.
pub struct StructSelector {
    pub paths: Vec<String>,
}

impl StructSelector {
    pub fn new(paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        StructSelector {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl Extractor for StructSelector {
    fn name(&self) -> &'static str {
        "struct_selector"
    }
    fn dependency_column_names(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Vec<String> {
        Vec::new()
    }
    fn validate(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Diagnostics {
        let mut diags = no_diags();
        if self.paths.is_empty() {
            diags.error("struct_selector extractor requires at least one path");
        }
        diags
    }
    fn extract(&self, _ctx: &ExtractContext<'_>, _column: &Column, raw_result: &Raw) -> (Raw, Diagnostics) {
        for path in &self.paths {
            if let Some(value) = lookup(raw_result, path) {
                if !value.is_null() {
                    return (value.clone(), no_diags());
                }
            }
        }
        (Raw::Null, no_diags())
    }
}

/// Reads `column` from `task.ParentRow`.
pub struct ParentColumnValue {
    pub column: String,
}

impl ParentColumnValue {
    pub fn new(column: impl Into<String>) -> Self {
        ParentColumnValue { column: column.into() }
    }
}

impl Extractor for ParentColumnValue {
    fn name(&self) -> &'static str {
        "parent_column_value"
    }
    fn dependency_column_names(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Vec<String> {
        Vec::new()
    }
    fn validate(&self, parent_table: Option<&Table>, _table: &Table, _column: &Column) -> Diagnostics {
        let mut diags = no_diags();
        match parent_table {
            Some(parent) if parent.column(&self.column).is_none() => {
                diags.error(format!(
                    "parent_column_value references unknown parent column {:?}",
                    self.column
                ));
            }
            None => diags.error("parent_column_value extractor used on a table with no parent"),
            _ => {}
        }
        diags
    }
    fn extract(&self, ctx: &ExtractContext<'_>, _column: &Column, _raw_result: &Raw) -> (Raw, Diagnostics) {
        let value = ctx
            .parent_row
            .and_then(|row| row.get(&self.column))
            .map(|v| Raw::String(value_to_display(v)))
            .unwrap_or(Raw::Null);
        (value, no_diags())
    }
}

/// Path into `task.ParentRawResult`.
pub struct ParentResultStructSelector {
    pub path: String,
}

impl ParentResultStructSelector {
    pub fn new(path: impl Into<String>) -> Self {
        ParentResultStructSelector { path: path.into() }
    }
}

impl Extractor for ParentResultStructSelector {
    fn name(&self) -> &'static str {
        "parent_result_struct_selector"
    }
    fn dependency_column_names(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Vec<String> {
        Vec::new()
    }
    fn validate(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Diagnostics {
        no_diags()
    }
    fn extract(&self, ctx: &ExtractContext<'_>, _column: &Column, _raw_result: &Raw) -> (Raw, Diagnostics) {
        let value = ctx
            .parent_raw_result
            .and_then(|raw| lookup(raw, &self.path))
            .cloned()
            .unwrap_or(Raw::Null);
        (value, no_diags())
    }
}

/// MD5 of the parent table's primary-key values, joined by `" | "`.
pub struct ParentPrimaryKeysID;

impl Extractor for ParentPrimaryKeysID {
    fn name(&self) -> &'static str {
        "parent_primary_keys_id"
    }
    fn dependency_column_names(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Vec<String> {
        Vec::new()
    }
    fn validate(&self, parent_table: Option<&Table>, _table: &Table, _column: &Column) -> Diagnostics {
        let mut diags = no_diags();
        match parent_table {
            Some(parent) if parent.options.as_ref().map(|o| o.primary_key.is_empty()).unwrap_or(true) => {
                diags.error("parent_primary_keys_id requires the parent table to declare a primary key");
            }
            None => diags.error("parent_primary_keys_id extractor used on a table with no parent"),
            _ => {}
        }
        diags
    }
    fn extract(&self, ctx: &ExtractContext<'_>, _column: &Column, _raw_result: &Raw) -> (Raw, Diagnostics) {
        let Some(parent_table) = ctx.parent_table else {
            return (Raw::Null, Diagnostics::from_error("no parent table in context"));
        };
        let Some(parent_row) = ctx.parent_row else {
            return (Raw::Null, Diagnostics::from_error("no parent row in context"));
        };
        let pk = parent_table.options.as_ref().map(|o| o.primary_key.as_slice()).unwrap_or(&[]);
        let values: Vec<String> = pk
            .iter()
            .map(|name| parent_row.get(name).map(value_to_display).unwrap_or_default())
            .collect();
        (Raw::String(md5_join(&values)), no_diags())
    }
}

/// MD5 of the current table's own primary-key column values, read from the
/// row as extracted so far (those columns must be declared as
/// dependencies, below).
pub struct PrimaryKeysID;

impl Extractor for PrimaryKeysID {
    fn name(&self) -> &'static str {
        "primary_keys_id"
    }
    fn dependency_column_names(&self, _parent: Option<&Table>, table: &Table, _column: &Column) -> Vec<String> {
        table.options.as_ref().map(|o| o.primary_key.clone()).unwrap_or_default()
    }
    fn validate(&self, _parent: Option<&Table>, table: &Table, _column: &Column) -> Diagnostics {
        let mut diags = no_diags();
        if table.options.as_ref().map(|o| o.primary_key.is_empty()).unwrap_or(true) {
            diags.error(format!("primary_keys_id requires table {:?} to declare a primary key", table.name));
        }
        diags
    }
    fn extract(&self, ctx: &ExtractContext<'_>, _column: &Column, _raw_result: &Raw) -> (Raw, Diagnostics) {
        let pk = ctx.table.options.as_ref().map(|o| o.primary_key.as_slice()).unwrap_or(&[]);
        let values: Vec<String> = pk
            .iter()
            .map(|name| ctx.row.get(name).map(value_to_display).unwrap_or_default())
            .collect();
        (Raw::String(md5_join(&values)), no_diags())
    }
}

/// MD5 of the listed own-row columns, which are declared as dependencies
/// so the DAG schedules them first.
pub struct ColumnsValueMd5 {
    pub columns: Vec<String>,
}

impl ColumnsValueMd5 {
    pub fn new(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ColumnsValueMd5 {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

impl Extractor for ColumnsValueMd5 {
    fn name(&self) -> &'static str {
        "columns_value_md5"
    }
    fn dependency_column_names(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Vec<String> {
        self.columns.clone()
    }
    fn validate(&self, _parent: Option<&Table>, table: &Table, _column: &Column) -> Diagnostics {
        let mut diags = no_diags();
        for name in &self.columns {
            if table.column(name).is_none() {
                diags.error(format!("columns_value_md5 references unknown column {name:?}"));
            }
        }
        diags
    }
    fn extract(&self, ctx: &ExtractContext<'_>, _column: &Column, _raw_result: &Raw) -> (Raw, Diagnostics) {
        let values: Vec<String> = self
            .columns
            .iter()
            .map(|name| ctx.row.get(name).map(value_to_display).unwrap_or_default())
            .collect();
        (Raw::String(md5_join(&values)), no_diags())
    }
}

/// Always returns a fixed value.
pub struct Constant {
    pub value: Raw,
}

impl Constant {
    pub fn new(value: Raw) -> Self {
        Constant { value }
    }
}

impl Extractor for Constant {
    fn name(&self) -> &'static str {
        "constant"
    }
    fn dependency_column_names(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Vec<String> {
        Vec::new()
    }
    fn validate(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Diagnostics {
        no_diags()
    }
    fn extract(&self, _ctx: &ExtractContext<'_>, _column: &Column, _raw_result: &Raw) -> (Raw, Diagnostics) {
        (self.value.clone(), no_diags())
    }
}

/// A fresh UUIDv4, optionally without dashes.
pub struct Uuid4 {
    pub without_dashes: bool,
}

impl Uuid4 {
    pub fn new(without_dashes: bool) -> Self {
        Uuid4 { without_dashes }
    }
}

impl Extractor for Uuid4 {
    fn name(&self) -> &'static str {
        "uuid"
    }
    fn dependency_column_names(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Vec<String> {
        Vec::new()
    }
    fn validate(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Diagnostics {
        no_diags()
    }
    fn extract(&self, _ctx: &ExtractContext<'_>, _column: &Column, _raw_result: &Raw) -> (Raw, Diagnostics) {
        let id = Uuid::new_v4();
        let text = if self.without_dashes {
            id.simple().to_string()
        } else {
            id.to_string()
        };
        (Raw::String(text), no_diags())
    }
}

/// Reads `key` from the client-meta key/value bag, falling back to
/// `default` when absent.
pub struct ClientMetaGetItem {
    pub key: String,
    pub default: Raw,
}

impl ClientMetaGetItem {
    pub fn new(key: impl Into<String>, default: Option<Raw>) -> Self {
        ClientMetaGetItem {
            key: key.into(),
            default: default.unwrap_or(Raw::Null),
        }
    }
}

impl Extractor for ClientMetaGetItem {
    fn name(&self) -> &'static str {
        "client_meta_get_item"
    }
    fn dependency_column_names(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Vec<String> {
        Vec::new()
    }
    fn validate(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Diagnostics {
        no_diags()
    }
    fn extract(&self, ctx: &ExtractContext<'_>, _column: &Column, _raw_result: &Raw) -> (Raw, Diagnostics) {
        let value = ctx.client_meta.get_item(&self.key).unwrap_or_else(|| self.default.clone());
        (value, no_diags())
    }
}

/// Always null.
pub struct Nil;

impl Extractor for Nil {
    fn name(&self) -> &'static str {
        "nil"
    }
    fn dependency_column_names(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Vec<String> {
        Vec::new()
    }
    fn validate(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Diagnostics {
        no_diags()
    }
    fn extract(&self, _ctx: &ExtractContext<'_>, _column: &Column, _raw_result: &Raw) -> (Raw, Diagnostics) {
        (Raw::Null, no_diags())
    }
}

type DependencyFn = dyn Fn(Option<&Table>, &Table, &Column) -> Vec<String> + Send + Sync;
type ValidateFn = dyn Fn(Option<&Table>, &Table, &Column) -> Diagnostics + Send + Sync;
type ExtractFn = dyn Fn(&ExtractContext<'_>, &Column, &Raw) -> (Raw, Diagnostics) + Send + Sync;

/// User-supplied closures for each of the four extractor operations, for
/// one-off extraction logic that doesn't warrant its own named type.
pub struct Wrapper {
    pub wrapper_name: &'static str,
    dependency_column_names: Arc<DependencyFn>,
    validate: Arc<ValidateFn>,
    extract: Arc<ExtractFn>,
}

impl Wrapper {
    pub fn new(
        wrapper_name: &'static str,
        dependency_column_names: impl Fn(Option<&Table>, &Table, &Column) -> Vec<String> + Send + Sync + 'static,
        validate: impl Fn(Option<&Table>, &Table, &Column) -> Diagnostics + Send + Sync + 'static,
        extract: impl Fn(&ExtractContext<'_>, &Column, &Raw) -> (Raw, Diagnostics) + Send + Sync + 'static,
    ) -> Self {
        Wrapper {
            wrapper_name,
            dependency_column_names: Arc::new(dependency_column_names),
            validate: Arc::new(validate),
            extract: Arc::new(extract),
        }
    }
}

impl Extractor for Wrapper {
    fn name(&self) -> &'static str {
        self.wrapper_name
    }
    fn dependency_column_names(&self, parent: Option<&Table>, table: &Table, column: &Column) -> Vec<String> {
        (self.dependency_column_names)(parent, table, column)
    }
    fn validate(&self, parent: Option<&Table>, table: &Table, column: &Column) -> Diagnostics {
        (self.validate)(parent, table, column)
    }
    fn extract(&self, ctx: &ExtractContext<'_>, column: &Column, raw_result: &Raw) -> (Raw, Diagnostics) {
        (self.extract)(ctx, column, raw_result)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use row::Row;
    use schema::{ClientHandle, ClientMeta, ItemBag, TableOptions};

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

    #[allow(clippy::too_many_arguments)]
    fn ctx<'a>(
        table: &'a Table,
        parent_table: Option<&'a Table>,
        parent_row: Option<&'a Row>,
        row: &'a Row,
        client: &'a ClientHandle,
        client_meta: &'a dyn ClientMeta,
        item_bag: &'a dyn ItemBag,
    ) -> ExtractContext<'a> {
        ExtractContext {
            client_meta,
            client,
            item_bag,
            row,
            parent_row,
            parent_raw_result: None,
            table,
            parent_table,
        }
    }

    #[test]
    fn default_extractor_falls_back_to_camel_case() {
        let table = Table::new("t", vec![]);
        let row = Row::new();
        let client = ClientHandle::none();
        let meta = EmptyClientMeta;
        let bag = EmptyItemBag;
        let c = ctx(&table, None, None, &row, &client, &meta, &bag);
        let column = Column::new("test_id", schema::ColumnType::String);
        let (value, _) = Default.extract(&c, &column, &serde_json::json!({"testId": "abc"}));
        assert_eq!(value, Raw::String("abc".into()));
    }

    #[test]
    fn struct_selector_returns_first_non_null() {
        let table = Table::new("t", vec![]);
        let row = Row::new();
        let client = ClientHandle::none();
        let meta = EmptyClientMeta;
        let bag = EmptyItemBag;
        let c = ctx(&table, None, None, &row, &client, &meta, &bag);
        let column = Column::new("a", schema::ColumnType::String);
        let extractor = StructSelector::new(["/missing", "/present"]);
        let (value, _) = extractor.extract(&c, &column, &serde_json::json!({"present": "hit"}));
        assert_eq!(value, Raw::String("hit".into()));
    }

    #[test]
    fn primary_keys_id_hashes_own_row_pk_values() {
        let table = Table::new("t", vec![Column::new("name", schema::ColumnType::String)])
            .with_options(TableOptions::new().with_primary_key(["name"]));
        let mut row = Row::new();
        row.set("name", row::Value::String("Tom".into()));
        let client = ClientHandle::none();
        let meta = EmptyClientMeta;
        let bag = EmptyItemBag;
        let c = ctx(&table, None, None, &row, &client, &meta, &bag);
        let column = Column::new("id", schema::ColumnType::String);
        let (value, diags) = PrimaryKeysID.extract(&c, &column, &Raw::Null);
        assert!(!diags.has_error());
        let expected = format!("{:x}", md5::compute(b"Tom"));
        assert_eq!(value, Raw::String(expected));
    }

    #[test]
    fn uuid_without_dashes_has_no_hyphens() {
        let table = Table::new("t", vec![]);
        let row = Row::new();
        let client = ClientHandle::none();
        let meta = EmptyClientMeta;
        let bag = EmptyItemBag;
        let c = ctx(&table, None, None, &row, &client, &meta, &bag);
        let column = Column::new("id", schema::ColumnType::String);
        let (value, _) = Uuid4::new(true).extract(&c, &column, &Raw::Null);
        let Raw::String(s) = value else { panic!("expected string") };
        assert!(!s.contains('-'));
    }
}
