//! The state `Provider::init` builds and every later lifecycle
//! operation reads (spec §4.8). Replaced wholesale by `Init` and
//! `SetProviderConfig`; never mutated field-by-field from the outside.

use std::collections::HashMap;
use std::sync::Arc;

use convert::Convertor;
use diagnostics::Diagnostics;
use schema::{ClientMeta, Table};
use storage::Storage;

pub(crate) struct ProviderRuntime {
    pub workspace: String,
    /// Top-level (root) tables only, keyed by name — matches the
    /// reference implementation's `tableMap`; children are reached
    /// through `Table::children`, not indexed here directly.
    pub table_map: HashMap<String, Arc<Table>>,
    pub root_order: Vec<String>,
    pub storage: Arc<dyn Storage>,
    pub convertor: Arc<dyn Convertor>,
    pub client_meta: Arc<dyn ClientMeta>,
    pub config: serde_json::Value,
    pub config_raw: String,
    pub namespace: String,
}

/// `GetProviderInformation`'s response (spec §4.8 / §6).
#[derive(Clone)]
pub struct ProviderInformation {
    pub name: String,
    pub version: String,
    pub tables: HashMap<String, Arc<Table>>,
    pub default_config_template: Option<String>,
}

/// Build the root table map for a provider from its declared, not-yet-initialized
/// table list: runs `Table::init_runtime` on each (building its column DAG),
/// and rejects duplicate root names.
pub(crate) fn build_table_map(tables: &[Table]) -> Result<(HashMap<String, Arc<Table>>, Vec<String>), Diagnostics> {
    let mut table_map = HashMap::new();
    let mut root_order = Vec::new();

    for table in tables {
        let mut owned = table.clone();
        if let Err(e) = owned.init_runtime(None) {
            return Err(Diagnostics::from_error(e.to_string()));
        }
        if table_map.contains_key(&owned.name) {
            return Err(Diagnostics::from_error(format!("duplicate root table name {:?}", owned.name)));
        }
        root_order.push(owned.name.clone());
        table_map.insert(owned.name.clone(), Arc::new(owned));
    }

    Ok((table_map, root_order))
}

pub(crate) fn validate_all(table_map: &HashMap<String, Arc<Table>>) -> Diagnostics {
    let mut diags = Diagnostics::new();
    for table in table_map.values() {
        diags.merge(table.validate(None));
    }
    diags
}

#[cfg(test)]
mod test {
    use super::*;
    use schema::{Column, ColumnType};

    #[test]
    fn duplicate_root_table_names_are_rejected() {
        let tables = vec![
            Table::new("t", vec![Column::new("id", ColumnType::String)]),
            Table::new("t", vec![Column::new("id", ColumnType::String)]),
        ];
        let err = build_table_map(&tables).unwrap_err();
        assert!(err.has_error());
    }

    #[test]
    fn cycle_in_one_table_is_surfaced_as_an_error() {
        let mut a = Column::new("a", ColumnType::String);
        a = a.with_extractor(std::sync::Arc::new(CyclicExtractor));
        let tables = vec![Table::new("t", vec![a])];
        let err = build_table_map(&tables).unwrap_err();
        assert!(err.has_error());
    }

    struct CyclicExtractor;
    impl schema::Extractor for CyclicExtractor {
        fn name(&self) -> &'static str {
            "cyclic"
        }
        fn dependency_column_names(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Vec<String> {
            vec!["a".to_string()]
        }
        fn validate(&self, _parent: Option<&Table>, _table: &Table, _column: &Column) -> Diagnostics {
            Diagnostics::new()
        }
        fn extract(&self, _ctx: &schema::ExtractContext<'_>, _column: &Column, _raw: &serde_json::Value) -> (serde_json::Value, Diagnostics) {
            (serde_json::Value::Null, Diagnostics::new())
        }
    }
}
