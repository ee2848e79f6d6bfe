//! The `PullTables` request/response shape (spec §6 "Plugin RPC
//! surface"). The actual RPC wire framing is out of scope (spec.md §1);
//! `ProgressSender` is the abstraction a host's streaming transport
//! implements to receive progress without this crate depending on it.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use diagnostics::Diagnostics;

/// One `PullTables` call's input (spec §6): the table-name list (or
/// `["*"]`), the worker-pool size for this request, and an optional
/// deadline.
pub struct PullTablesRequest {
    pub tables: Vec<String>,
    pub max_workers: i64,
    pub timeout: Option<Duration>,
}

impl PullTablesRequest {
    pub fn new(tables: impl IntoIterator<Item = impl Into<String>>) -> Self {
        PullTablesRequest {
            tables: tables.into_iter().map(Into::into).collect(),
            max_workers: 0,
            timeout: None,
        }
    }

    pub fn with_max_workers(mut self, max_workers: i64) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// One streamed progress update (spec §6, `{finishedTables,
/// totalTableCount, currentTable, diagnostics}`). `current_table` is
/// empty for updates carrying only diagnostics drained from in-flight
/// tasks, and set to the table name on a task-completion update.
#[derive(Debug, Clone, Default)]
pub struct PullTablesProgress {
    pub finished_tables: HashMap<String, bool>,
    pub total_table_count: u64,
    pub current_table: String,
    pub diagnostics: Diagnostics,
}

/// The streaming transport a host supplies (spec.md §1: "the core
/// consumes a 'serve a provider object over an RPC' boundary but is
/// independent of the wire protocol"). Transport failures are logged,
/// not surfaced as pull failures (spec §7, "Transport" error kind).
#[async_trait]
pub trait ProgressSender: Send + Sync {
    async fn send(&self, progress: PullTablesProgress) -> anyhow::Result<()>;
}
