/// A foreign-key declaration: this table's `self_columns` reference
/// `ref_table`'s `ref_columns`, positionally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForeignKey {
    pub name: Option<String>,
    pub self_columns: Vec<String>,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
}

/// A declared index over one or more of this table's columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Options attached to a table: primary key, foreign keys, and indexes
/// (spec §3, Table).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableOptions {
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<Index>,
}

impl TableOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_primary_key(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn with_index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }
}
