use std::sync::Arc;

use crate::extractor::Extractor;

/// The closed enumeration of storage column types (spec §3, Column).
/// `Unassigned` is the zero value produced by `Column::new` before a type
/// is chosen; `Table::validate` rejects any column still carrying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Unassigned,
    SmallInt,
    Int,
    IntArray,
    BigInt,
    Float,
    Bool,
    String,
    StringArray,
    ByteArray,
    Timestamp,
    Json,
    Ip,
    IpArray,
    Cidr,
    CidrArray,
    Mac,
    MacArray,
}

impl ColumnType {
    pub fn is_assigned(self) -> bool {
        self != ColumnType::Unassigned
    }
}

pub const MAX_COLUMN_NAME_LEN: usize = 60;

#[derive(Clone)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub description: String,
    pub extractor: Option<Arc<dyn Extractor>>,
    pub unique: bool,
    pub not_null: bool,
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("name", &self.name)
            .field("column_type", &self.column_type)
            .field("unique", &self.unique)
            .field("not_null", &self.not_null)
            .field("extractor", &self.extractor.as_ref().map(|e| e.name()))
            .finish()
    }
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Column {
            name: name.into(),
            column_type,
            description: String::new(),
            extractor: None,
            unique: false,
            not_null: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}
