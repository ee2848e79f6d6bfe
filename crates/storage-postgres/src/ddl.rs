//! DDL synthesis: column-type mapping, constraint-name generation, and
//! the two-pass table/constraint statement builder described in spec
//! §4.12 (tables first, constraints afterward, so foreign keys can
//! reference tables created later in the same batch).

use schema::{Column, ColumnType, Table};

/// Postgres has no `ADD CONSTRAINT IF NOT EXISTS`; idempotent constraint
/// creation instead swallows the `duplicate_object` exception a repeat
/// run raises.
fn idempotent(statement: String) -> String {
    format!("DO $$ BEGIN {statement}; EXCEPTION WHEN duplicate_object THEN NULL; END $$;")
}

/// Postgres type name for each storage column type (spec §4.12).
pub fn sql_type_name(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Unassigned => "text",
        ColumnType::SmallInt => "smallint",
        ColumnType::Int => "integer",
        ColumnType::BigInt => "bigint",
        ColumnType::Float => "double precision",
        ColumnType::Bool => "boolean",
        ColumnType::String => "text",
        ColumnType::ByteArray => "bytea",
        ColumnType::IntArray => "integer[]",
        ColumnType::StringArray => "text[]",
        ColumnType::Timestamp => "timestamp without time zone",
        ColumnType::Json => "jsonb",
        ColumnType::Ip => "inet",
        ColumnType::IpArray => "inet[]",
        ColumnType::Cidr => "cidr",
        ColumnType::CidrArray => "cidr[]",
        ColumnType::Mac => "macaddr",
        ColumnType::MacArray => "macaddr[]",
    }
}

const MAX_IDENTIFIER_LEN: usize = 63;

/// Build a constraint/index name from its pieces, hashing it down to
/// `fk_<md5>` if the natural name would exceed Postgres's 63-byte
/// identifier limit, regardless of `prefix`.
pub fn constraint_name(prefix: &str, parts: &[&str]) -> String {
    let natural = format!("{prefix}_{}", parts.join("_"));
    if natural.len() <= MAX_IDENTIFIER_LEN {
        natural
    } else {
        format!("fk_{:x}", md5::compute(natural.as_bytes()))
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_qualified(namespace: &str, table_name: &str) -> String {
    format!("{}.{}", quote_ident(namespace), quote_ident(table_name))
}

fn column_definition(column: &Column, table: &Table) -> String {
    let mut def = format!("{} {}", quote_ident(&column.name), sql_type_name(column.column_type));
    if table.is_not_null(&column.name) {
        def.push_str(" NOT NULL");
    }
    if table.is_uniq(&column.name) && table.options.as_ref().map(|o| o.primary_key.len()).unwrap_or(0) != 1 {
        def.push_str(" UNIQUE");
    }
    def
}

/// `CREATE TABLE IF NOT EXISTS` for one table, columns only: no
/// constraints, so this can run for every table before any constraint
/// statement touches a foreign table.
pub fn create_table_statement(namespace: &str, table: &Table) -> String {
    let columns: Vec<String> = table.columns.iter().map(|c| column_definition(c, table)).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_qualified(namespace, &table.name),
        columns.join(", ")
    )
}

/// Constraint statements for one table: primary key, indexes, foreign
/// keys. Run only after every table in the batch has been created.
pub fn constraint_statements(namespace: &str, table: &Table) -> Vec<String> {
    let mut statements = Vec::new();
    let qualified = quote_qualified(namespace, &table.name);

    if let Some(opts) = &table.options {
        if !opts.primary_key.is_empty() {
            let name = constraint_name("pk", &[&table.name, &opts.primary_key.join("_")]);
            let cols: Vec<String> = opts.primary_key.iter().map(|c| quote_ident(c)).collect();
            statements.push(idempotent(format!(
                "ALTER TABLE {qualified} ADD CONSTRAINT {} PRIMARY KEY ({})",
                quote_ident(&name),
                cols.join(", ")
            )));
        }

        for index in &opts.indexes {
            let name = index
                .name
                .clone()
                .unwrap_or_else(|| constraint_name("idx", &[&table.name, &index.columns.join("_")]));
            let cols: Vec<String> = index.columns.iter().map(|c| quote_ident(c)).collect();
            let unique = if index.unique { "UNIQUE " } else { "" };
            statements.push(format!(
                "CREATE {unique}INDEX IF NOT EXISTS {} ON {qualified} ({})",
                quote_ident(&name),
                cols.join(", ")
            ));
        }

        for fk in &opts.foreign_keys {
            let name = fk.name.clone().unwrap_or_else(|| {
                constraint_name(
                    "fk",
                    &[&table.name, &fk.self_columns.join("_"), "to", &fk.ref_table, &fk.ref_columns.join("_")],
                )
            });
            let self_cols: Vec<String> = fk.self_columns.iter().map(|c| quote_ident(c)).collect();
            let ref_cols: Vec<String> = fk.ref_columns.iter().map(|c| quote_ident(c)).collect();
            statements.push(idempotent(format!(
                "ALTER TABLE {qualified} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_ident(&name),
                self_cols.join(", "),
                quote_qualified(namespace, &fk.ref_table),
                ref_cols.join(", ")
            )));
        }
    }

    statements
}

pub fn drop_table_statement(namespace: &str, table_name: &str) -> String {
    format!("DROP TABLE IF EXISTS {} CASCADE", quote_qualified(namespace, table_name))
}

pub fn create_schema_statement(namespace: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(namespace))
}

pub fn drop_schema_statement(namespace: &str) -> String {
    format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(namespace))
}

pub fn insert_statement(namespace: &str, table_name: &str, column_names: &[String], row_count: usize) -> String {
    let columns: Vec<String> = column_names.iter().map(|c| quote_ident(c)).collect();
    let mut value_rows = Vec::with_capacity(row_count);
    let mut next_param = 1;
    for _ in 0..row_count {
        let placeholders: Vec<String> = (0..column_names.len())
            .map(|_| {
                let p = format!("${next_param}");
                next_param += 1;
                p
            })
            .collect();
        value_rows.push(format!("({})", placeholders.join(", ")));
    }
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_qualified(namespace, table_name),
        columns.join(", "),
        value_rows.join(", ")
    )
}
