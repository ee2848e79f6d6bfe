//! The extractor contract (spec §4.3): the per-column value source
//! interface, plus the narrow context types an extractor needs without
//! pulling in the pull-executor or provider crates. Concrete extractor
//! implementations live in the `extract` crate; the `DataSourcePullTask`
//! that implements `ItemBag` lives in the `executor` crate.

use std::any::Any;
use std::sync::Arc;

use diagnostics::Diagnostics;
use row::Row;

use crate::column::Column;
use crate::table::Table;

/// An opaque, type-erased handle to a provider-specific API client. The
/// core never inspects a client's contents; concrete data sources and
/// extractors downcast it to their own client type.
#[derive(Clone)]
pub struct ClientHandle(Option<Arc<dyn Any + Send + Sync>>);

impl ClientHandle {
    pub fn new<T: Any + Send + Sync>(client: T) -> Self {
        ClientHandle(Some(Arc::new(client)))
    }

    /// The "no client" handle used when a provider has no client-meta
    /// entries (spec §4.6 step 1: "or `[null]` if none").
    pub fn none() -> Self {
        ClientHandle(None)
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.as_ref().and_then(|a| a.downcast_ref::<T>())
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClientHandle({})", if self.0.is_some() { "some" } else { "none" })
    }
}

/// Read-only access to the client-meta key/value bag (spec §4.3,
/// `ClientMetaGetItem`) and the set of clients known to a provider (spec
/// §4.6 step 1).
pub trait ClientMeta: Send + Sync {
    fn get_item(&self, key: &str) -> Option<serde_json::Value>;

    /// Every client configured for this provider, or a single `none()`
    /// handle if none are configured.
    fn clients(&self) -> Vec<ClientHandle>;

    /// A correlation-scoped logging handle (provider name / table name
    /// fields attached by the caller) consulted by extractors and data
    /// sources. The default just reuses the ambient span; a provider
    /// runtime that wants per-client structured fields overrides it.
    fn logger(&self) -> tracing::Span {
        tracing::Span::current()
    }
}

/// The per-task key/value bag (spec §3, DataSourcePullTask) with
/// fallback-to-parent lookup (spec §9, "Item bag inheritance").
pub trait ItemBag: Send + Sync {
    /// This task's own entries only.
    fn get(&self, key: &str) -> Option<serde_json::Value>;

    /// This task's entries, then its parent chain's, stopping at the
    /// first hit.
    fn lookup(&self, key: &str) -> Option<serde_json::Value>;
}

/// Everything an `Extractor::extract` call needs about the task and row it
/// is running against.
pub struct ExtractContext<'a> {
    pub client_meta: &'a dyn ClientMeta,
    pub client: &'a ClientHandle,
    pub item_bag: &'a dyn ItemBag,
    /// The row as extracted so far, in `ColumnExtractorSorted` order — only
    /// columns earlier in that order (i.e. declared dependencies) are
    /// populated.
    pub row: &'a Row,
    pub parent_row: Option<&'a Row>,
    pub parent_raw_result: Option<&'a serde_json::Value>,
    pub table: &'a Table,
    pub parent_table: Option<&'a Table>,
}

/// An extractor is a pluggable column-value source (spec §4.3). Built-in
/// variants live in the `extract` crate; users may supply their own.
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Column names (within the same table) this extractor reads via
    /// `ExtractContext::row`. The schema DAG (Component C) schedules
    /// dependencies before dependents based on this declaration; an
    /// extractor that reads other columns without declaring them here
    /// gets no ordering guarantee.
    fn dependency_column_names(&self, parent_table: Option<&Table>, table: &Table, column: &Column) -> Vec<String>;

    fn validate(&self, parent_table: Option<&Table>, table: &Table, column: &Column) -> Diagnostics;

    /// Produce the raw (pre type-convertor) value for `column` given
    /// `raw_result`, the just-pulled API payload for the current table.
    fn extract(
        &self,
        ctx: &ExtractContext<'_>,
        column: &Column,
        raw_result: &serde_json::Value,
    ) -> (serde_json::Value, Diagnostics);
}
