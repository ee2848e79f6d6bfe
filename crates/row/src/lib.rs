//! Column-ordered tabular values: the storage-medium type system
//! (`Value`), a single ordered row (`Row`), and a matrix view of rows
//! sharing a column set (`Rows`). See spec §3 ("Row", "Rows").

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use macaddr::MacAddr6;

#[derive(Debug, thiserror::Error)]
pub enum RowError {
    #[error("column {0:?} is not present in this row")]
    ColumnNotFound(String),
    #[error("GetValues/SetValues length mismatch: {declared} declared columns, {given} values given")]
    ValuesLengthMismatch { declared: usize, given: usize },
    #[error("row shape mismatch: expected columns {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },
}

pub type Result<T> = std::result::Result<T, RowError>;

/// The closed set of runtime values a cell may hold once coerced by the
/// type convertor (Component D). `Value::Null` stands for SQL NULL and is
/// valid for every column type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    IntArray(Vec<i32>),
    StringArray(Vec<String>),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
    Ip(IpAddr),
    IpArray(Vec<IpAddr>),
    Cidr(IpNetwork),
    CidrArray(Vec<IpNetwork>),
    Mac(MacAddr6),
    MacArray(Vec<MacAddr6>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// An ordered pair of (column names, column name -> value). Column order
/// is the declared order (`Table::column_extractor_sorted`, see the
/// `schema` crate); `get_values`/`set_values` round-trip through that
/// order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    column_names: Vec<String>,
    values: HashMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `name` to the declared column order if not already present, and
    /// set its value. Re-setting an existing column updates the value in
    /// place without changing its position.
    pub fn set(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        let name = name.into();
        if !self.values.contains_key(&name) {
            self.column_names.push(name.clone());
        }
        self.values.insert(name, value);
        self
    }

    /// Register `name` in the declared column order without yet assigning
    /// a value (used by the transformer to reserve a column's position
    /// before its extractor has run, per spec §4.2 step 2).
    pub fn reserve_column(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        if !self.values.contains_key(&name) {
            self.column_names.push(name.clone());
            self.values.insert(name, Value::Null);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Values in declared column order.
    pub fn get_values(&self) -> Vec<Value> {
        self.column_names
            .iter()
            .map(|name| self.values.get(name).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Overwrite all values in declared column order. `values.len()` must
    /// equal `column_names().len()`.
    pub fn set_values(&mut self, values: Vec<Value>) -> Result<()> {
        if values.len() != self.column_names.len() {
            return Err(RowError::ValuesLengthMismatch {
                declared: self.column_names.len(),
                given: values.len(),
            });
        }
        for (name, value) in self.column_names.clone().into_iter().zip(values) {
            self.values.insert(name, value);
        }
        Ok(())
    }
}

/// A matrix view of many `Row` values sharing identical column names, with
/// append-only writes.
#[derive(Debug, Clone, Default)]
pub struct Rows {
    column_names: Vec<String>,
    rows: Vec<Row>,
}

impl Rows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_row(row: Row) -> Self {
        let column_names = row.column_names.clone();
        Rows {
            column_names,
            rows: vec![row],
        }
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append `row` if it shares this matrix's column-name shape (or this
    /// matrix is still empty, in which case it adopts the row's shape).
    pub fn append_row(&mut self, row: Row) -> Result<()> {
        if self.rows.is_empty() && self.column_names.is_empty() {
            self.column_names = row.column_names.clone();
        } else if self.column_names != row.column_names {
            return Err(RowError::ShapeMismatch {
                expected: self.column_names.clone(),
                actual: row.column_names.clone(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Merge another `Rows` of identical shape onto the end of this one.
    pub fn append_rows(&mut self, other: Rows) -> Result<()> {
        for row in other.rows {
            self.append_row(row)?;
        }
        Ok(())
    }

    /// Split into one single-row `Rows` per row, preserving order. Used by
    /// the pull executor (spec §4.6) to pair each produced row 1-to-1 with
    /// its raw result before child-task fan-out.
    pub fn split_row_by_row(&self) -> Vec<Row> {
        self.rows.clone()
    }
}
