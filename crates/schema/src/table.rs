use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use diagnostics::Diagnostics;

use crate::column::{Column, ColumnType, MAX_COLUMN_NAME_LEN};
use crate::data_source::DataSource;
use crate::table_options::TableOptions;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("cycle in column dependencies for table {table}")]
    CycleInColumnDependencies { table: String },
}

/// Derived, built-at-init state for a table (spec §3, "Table runtime" /
/// §4.1).
#[derive(Debug, Clone, Default)]
pub struct TableRuntime {
    columns_by_name: HashMap<String, usize>,
    /// Topological order over columns with extractor dependencies,
    /// produced by Kahn's algorithm with declaration-order tie-break.
    column_extractor_sorted: Vec<String>,
    /// Multi-tenant storage layout assignment. Convention-only: nothing
    /// requires it non-empty, and its relationship to a storage backend's
    /// `search_path` is a convention, not an invariant (spec §9 Open
    /// Question; decided in DESIGN.md).
    pub namespace: String,
}

impl TableRuntime {
    pub fn column_extractor_sorted(&self) -> &[String] {
        &self.column_extractor_sorted
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns_by_name.get(name).copied()
    }
}

/// A table: schema + data source + children (spec §3, "Table").
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub options: Option<TableOptions>,
    pub data_source: Option<Arc<dyn DataSource>>,
    pub children: Vec<Table>,
    /// Strictly increases on any schema change (spec §3 invariant).
    pub version: u64,
    pub runtime: TableRuntime,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("columns", &self.columns)
            .field("options", &self.options)
            .field("children", &self.children)
            .field("version", &self.version)
            .finish()
    }
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Table {
            name: name.into(),
            columns,
            options: None,
            data_source: None,
            children: Vec::new(),
            version: 1,
            runtime: TableRuntime::default(),
        }
    }

    pub fn with_options(mut self, options: TableOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_data_source(mut self, data_source: Arc<dyn DataSource>) -> Self {
        self.data_source = Some(data_source);
        self
    }

    pub fn with_children(mut self, children: Vec<Table>) -> Self {
        self.children = children;
        self
    }

    /// Bump the schema version, asserting the monotonicity invariant in
    /// debug builds (spec §3 invariant; SPEC_FULL supplemented feature 3).
    pub fn bump_version(&mut self) {
        let next = self.version + 1;
        debug_assert!(next > self.version, "table version must strictly increase");
        self.version = next;
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.options
            .as_ref()
            .map(|o| o.primary_key.iter().any(|c| c == column))
            .unwrap_or(false)
    }

    /// Column-level `unique` flag, or a member of a singleton PK/unique
    /// index (spec §4.1, `IsUniq`).
    pub fn is_uniq(&self, column: &str) -> bool {
        if let Some(col) = self.column(column) {
            if col.unique {
                return true;
            }
        }
        if let Some(opts) = &self.options {
            if opts.primary_key.len() == 1 && opts.primary_key[0] == column {
                return true;
            }
            if opts
                .indexes
                .iter()
                .any(|idx| idx.unique && idx.columns.len() == 1 && idx.columns[0] == column)
            {
                return true;
            }
        }
        false
    }

    /// Explicit `not_null` flag OR PK membership (spec §4.1, `IsNotNull`).
    pub fn is_not_null(&self, column: &str) -> bool {
        if self.is_primary_key(column) {
            return true;
        }
        self.column(column).map(|c| c.not_null).unwrap_or(false)
    }

    /// PK prefix, unique, or declared-index prefix (spec §4.1, `IsIndexed`).
    pub fn is_indexed(&self, column: &str) -> bool {
        if self.is_uniq(column) {
            return true;
        }
        if let Some(opts) = &self.options {
            if opts.primary_key.first().map(|c| c == column).unwrap_or(false) {
                return true;
            }
            if opts
                .indexes
                .iter()
                .any(|idx| idx.columns.first().map(|c| c == column).unwrap_or(false))
            {
                return true;
            }
        }
        false
    }

    /// The composite PK/unique-index containing `column`, if any (spec
    /// §4.1, `FindUniqGroup`).
    pub fn find_uniq_group(&self, column: &str) -> Option<Vec<String>> {
        let opts = self.options.as_ref()?;
        if opts.primary_key.len() > 1 && opts.primary_key.iter().any(|c| c == column) {
            return Some(opts.primary_key.clone());
        }
        opts.indexes
            .iter()
            .find(|idx| idx.unique && idx.columns.len() > 1 && idx.columns.iter().any(|c| c == column))
            .map(|idx| idx.columns.clone())
    }

    /// Build `runtime` for this table and every descendant (spec §4.1,
    /// `InitTableRuntime`). `parent` is the immediate parent table, used
    /// only to resolve extractor dependency declarations that reference
    /// parent-table columns (the DAG itself never crosses tables, spec §9).
    pub fn init_runtime(&mut self, parent: Option<&Table>) -> Result<(), SchemaError> {
        self.runtime.columns_by_name = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();

        self.runtime.column_extractor_sorted = topological_sort(self, parent)
            .ok_or_else(|| SchemaError::CycleInColumnDependencies {
                table: self.name.clone(),
            })?;

        // Child recursion needs an immutable snapshot of `self` as parent,
        // independent of the `&mut self.children` borrow below.
        let this_name = self.name.clone();
        let parent_snapshot = Table {
            name: this_name,
            columns: self.columns.clone(),
            options: self.options.clone(),
            data_source: None,
            children: Vec::new(),
            version: self.version,
            runtime: self.runtime.clone(),
        };
        for child in &mut self.children {
            child.init_runtime(Some(&parent_snapshot))?;
        }
        Ok(())
    }

    /// Validate this table and every descendant (spec §4.1, `Validate`).
    /// Never fatal on its own; all rules are collected into one
    /// Diagnostics bag.
    pub fn validate(&self, parent: Option<&Table>) -> Diagnostics {
        let mut diags = Diagnostics::new();

        if self.name.trim().is_empty() {
            diags.error("table name must not be empty");
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.clone()) {
                diags.error(format!("duplicate column name {:?} in table {:?}", column.name, self.name));
            }
            validate_column(column, &mut diags, &self.name);
            if let Some(extractor) = &column.extractor {
                diags.merge(extractor.validate(parent, self, column));
            }
        }

        if let Some(opts) = &self.options {
            for name in &opts.primary_key {
                if self.column(name).is_none() {
                    diags.error(format!(
                        "primary key references unknown column {:?} in table {:?}",
                        name, self.name
                    ));
                }
            }
            for idx in &opts.indexes {
                for name in &idx.columns {
                    if self.column(name).is_none() {
                        diags.error(format!(
                            "index references unknown column {:?} in table {:?}",
                            name, self.name
                        ));
                    }
                }
            }
            for fk in &opts.foreign_keys {
                for name in &fk.self_columns {
                    if self.column(name).is_none() {
                        diags.error(format!(
                            "foreign key references unknown column {:?} in table {:?}",
                            name, self.name
                        ));
                    }
                }
            }
        }

        for child in &self.children {
            diags.merge(child.validate(Some(self)));
        }

        diags
    }

    /// Every table name in this table's subtree, including its own.
    pub fn subtree_names(&self) -> Vec<String> {
        let mut names = vec![self.name.clone()];
        for child in &self.children {
            names.extend(child.subtree_names());
        }
        names
    }

    /// The count of this table plus every descendant table.
    pub fn subtree_count(&self) -> usize {
        1 + self.children.iter().map(Table::subtree_count).sum::<usize>()
    }
}

impl Clone for Table {
    fn clone(&self) -> Self {
        Table {
            name: self.name.clone(),
            columns: self.columns.clone(),
            options: self.options.clone(),
            data_source: self.data_source.clone(),
            children: self.children.clone(),
            version: self.version,
            runtime: self.runtime.clone(),
        }
    }
}

fn validate_column(column: &Column, diags: &mut Diagnostics, table_name: &str) {
    if column.name.trim().is_empty() {
        diags.error(format!("column name must not be empty in table {:?}", table_name));
        return;
    }
    if column.name.chars().any(char::is_whitespace) {
        diags.error(format!(
            "column name {:?} in table {:?} must not contain whitespace",
            column.name, table_name
        ));
    }
    if column.name.len() > MAX_COLUMN_NAME_LEN {
        diags.error(format!(
            "column name {:?} in table {:?} exceeds {} characters",
            column.name, table_name, MAX_COLUMN_NAME_LEN
        ));
    }
    if column.column_type == ColumnType::Unassigned {
        diags.error(format!(
            "column {:?} in table {:?} has no assigned type",
            column.name, table_name
        ));
    }
}

/// Kahn's algorithm over the column dependency DAG. Ties are broken by
/// declaration order (spec §4.1). Returns `None` on a cycle.
fn topological_sort(table: &Table, parent: Option<&Table>) -> Option<Vec<String>> {
    let declared_order: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
    let index_of: HashMap<&str, usize> = declared_order.iter().enumerate().map(|(i, n)| (*n, i)).collect();

    // edges[dep] = columns that depend on `dep`
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut indegree: HashMap<&str, usize> = declared_order.iter().map(|n| (*n, 0)).collect();

    for column in &table.columns {
        if let Some(extractor) = &column.extractor {
            for dep in extractor.dependency_column_names(parent, table, column) {
                if let Some(&idx) = index_of.get(dep.as_str()) {
                    let dep_name = declared_order[idx];
                    edges.entry(dep_name).or_default().push(column.name.as_str());
                    *indegree.get_mut(column.name.as_str()).unwrap() += 1;
                }
            }
        }
    }

    let mut ready: VecDeque<&str> = declared_order
        .iter()
        .copied()
        .filter(|n| indegree[n] == 0)
        .collect();

    let mut sorted = Vec::with_capacity(declared_order.len());
    while let Some(name) = pop_stable(&mut ready, &index_of) {
        sorted.push(name.to_string());
        if let Some(dependents) = edges.get(name) {
            for &dependent in dependents {
                let slot = indegree.get_mut(dependent).unwrap();
                *slot -= 1;
                if *slot == 0 {
                    ready.push_back(dependent);
                }
            }
        }
    }

    if sorted.len() == declared_order.len() {
        Some(sorted)
    } else {
        None
    }
}

/// Pop the lowest-declaration-order-index entry from `ready` to keep the
/// sort's tie-break stable regardless of edge discovery order.
fn pop_stable<'a>(ready: &mut VecDeque<&'a str>, index_of: &HashMap<&str, usize>) -> Option<&'a str> {
    let (pos, _) = ready
        .iter()
        .enumerate()
        .min_by_key(|(_, name)| index_of[*name])?;
    ready.remove(pos)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::extractor::{ExtractContext, Extractor};

    struct DependsOn(Vec<String>);
    impl Extractor for DependsOn {
        fn name(&self) -> &'static str {
            "test_depends_on"
        }
        fn dependency_column_names(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Vec<String> {
            self.0.clone()
        }
        fn validate(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Diagnostics {
            Diagnostics::new()
        }
        fn extract(&self, _ctx: &ExtractContext<'_>, _column: &Column, _raw: &serde_json::Value) -> (serde_json::Value, Diagnostics) {
            (serde_json::Value::Null, Diagnostics::new())
        }
    }

    fn col(name: &str, deps: &[&str]) -> Column {
        let mut c = Column::new(name, ColumnType::String);
        if !deps.is_empty() {
            c = c.with_extractor(Arc::new(DependsOn(deps.iter().map(|s| s.to_string()).collect())));
        }
        c
    }

    #[test]
    fn sorted_columns_place_dependencies_before_dependents() {
        let mut table = Table::new(
            "t",
            vec![col("c", &["a", "b"]), col("a", &[]), col("b", &["a"])],
        );
        table.init_runtime(None).unwrap();

        let sorted = table.runtime.column_extractor_sorted().to_vec();
        let pos = |n: &str| sorted.iter().position(|x| x == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn cycle_fails_init_with_single_diagnostic_naming_table() {
        let mut table = Table::new("cyclic", vec![col("a", &["b"]), col("b", &["a"])]);
        let err = table.init_runtime(None).unwrap_err();
        match err {
            SchemaError::CycleInColumnDependencies { table } => assert_eq!(table, "cyclic"),
        }
    }

    #[test]
    fn validate_collects_duplicate_and_unknown_column_errors() {
        let table = Table::new("t", vec![col("a", &[]), col("a", &[])])
            .with_options(TableOptions::new().with_primary_key(["missing"]));
        let diags = table.validate(None);
        assert!(diags.has_error());
        assert!(diags.len() >= 2);
    }
}
