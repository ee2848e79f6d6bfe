//! Pull-request table resolution (spec §4.9). Turns a requested table
//! name list (or the wildcard `"*"`) into the deduplicated set of
//! top-level tables that must become root tasks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use diagnostics::Diagnostics;
use schema::Table;

pub const WILDCARD: &str = "*";

/// Resolve `requested` against `root_order` (the provider's top-level
/// table names, in declaration order) and `table_map` (name -> that
/// root table). A requested child name promotes its root rather than
/// pulling the child in isolation (spec §4.9, "Children cannot be
/// requested without pulling their root").
pub fn resolve_root_tables(table_map: &HashMap<String, Arc<Table>>, root_order: &[String], requested: &[String]) -> (Vec<Arc<Table>>, Diagnostics) {
    let mut diags = Diagnostics::new();

    if requested.iter().any(|name| name == WILDCARD) {
        let roots = root_order.iter().filter_map(|name| table_map.get(name).cloned()).collect();
        return (roots, diags);
    }

    // tableName -> rootTableName, built by flattening every root's subtree.
    let mut table_to_root: HashMap<String, String> = HashMap::new();
    for root_name in root_order {
        if let Some(root) = table_map.get(root_name) {
            for name in root.subtree_names() {
                table_to_root.entry(name).or_insert_with(|| root_name.clone());
            }
        }
    }

    let mut seen_roots = HashSet::new();
    let mut roots = Vec::new();
    for name in requested {
        match table_to_root.get(name) {
            Some(root_name) => {
                if seen_roots.insert(root_name.clone()) {
                    if let Some(root) = table_map.get(root_name) {
                        roots.push(root.clone());
                    }
                }
            }
            None => {
                diags.error(format!("table {name:?} not found"));
            }
        }
    }

    (roots, diags)
}

#[cfg(test)]
mod test {
    use super::*;
    use schema::Column;
    use schema::ColumnType;

    fn provider_tables() -> (HashMap<String, Arc<Table>>, Vec<String>) {
        let child = Table::new("child_of_root1", vec![Column::new("id", ColumnType::String)]);
        let root1 = Arc::new(Table::new("root1", vec![Column::new("id", ColumnType::String)]).with_children(vec![child]));
        let root2 = Arc::new(Table::new("root2", vec![Column::new("id", ColumnType::String)]));
        let root3 = Arc::new(Table::new("root3", vec![Column::new("id", ColumnType::String)]));

        let root_order = vec!["root1".to_string(), "root2".to_string(), "root3".to_string()];
        let mut table_map = HashMap::new();
        table_map.insert("root1".to_string(), root1);
        table_map.insert("root2".to_string(), root2);
        table_map.insert("root3".to_string(), root3);
        (table_map, root_order)
    }

    #[test]
    fn wildcard_resolves_to_every_root() {
        let (table_map, root_order) = provider_tables();
        let (roots, diags) = resolve_root_tables(&table_map, &root_order, &[WILDCARD.to_string()]);
        assert!(!diags.has_error());
        assert_eq!(roots.len(), 3);
    }

    #[test]
    fn requesting_a_child_promotes_its_root() {
        let (table_map, root_order) = provider_tables();
        let (roots, diags) = resolve_root_tables(&table_map, &root_order, &["child_of_root1".to_string()]);
        assert!(!diags.has_error());
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].name, "root1");
    }

    #[test]
    fn unknown_name_is_reported_but_others_still_resolve() {
        let (table_map, root_order) = provider_tables();
        let (roots, diags) = resolve_root_tables(&table_map, &root_order, &["nope".to_string(), "root2".to_string()]);
        assert!(diags.has_error());
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].name, "root2");
    }

    #[test]
    fn duplicate_requests_for_the_same_root_are_deduplicated() {
        let (table_map, root_order) = provider_tables();
        let (roots, _) = resolve_root_tables(&table_map, &root_order, &["root1".to_string(), "child_of_root1".to_string()]);
        assert_eq!(roots.len(), 1);
    }

    #[test]
    fn empty_request_with_no_wildcard_resolves_to_zero_roots() {
        let (table_map, root_order) = provider_tables();
        let (roots, diags) = resolve_root_tables(&table_map, &root_order, &[]);
        assert!(!diags.has_error());
        assert!(roots.is_empty());
    }
}
