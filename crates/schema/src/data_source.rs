//! The data-source contract (spec §3 DataSourcePullTask, §4.6 Execution):
//! a pluggable API-backed source of raw results for a table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::extractor::{ClientHandle, ClientMeta, ItemBag};

/// A cooperative cancellation signal a data source's `pull` must honour
/// (spec §5, "Cancellation & timeout"). Cloning shares the same flag.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The channel a data source pushes raw results onto. Bounded (reference
/// default 10 000, spec §4.6 step 1) so a slow consumer back-pressures the
/// producer.
#[derive(Clone)]
pub struct ResultSender(mpsc::Sender<serde_json::Value>);

impl ResultSender {
    pub fn new(sender: mpsc::Sender<serde_json::Value>) -> Self {
        ResultSender(sender)
    }

    pub async fn send(&self, raw_result: serde_json::Value) -> Result<(), mpsc::error::SendError<serde_json::Value>> {
        self.0.send(raw_result).await
    }
}

pub fn result_channel(capacity: usize) -> (ResultSender, mpsc::Receiver<serde_json::Value>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ResultSender::new(tx), rx)
}

/// Everything a `DataSource::pull` call needs about the task it is
/// executing under, without depending on the `executor` crate's concrete
/// task type.
pub struct PullContext<'a> {
    pub client_meta: &'a dyn ClientMeta,
    pub client: &'a ClientHandle,
    pub item_bag: &'a dyn ItemBag,
    pub parent_row: Option<&'a row::Row>,
    pub parent_raw_result: Option<&'a serde_json::Value>,
    pub cancel: &'a CancelToken,
}

/// A table's API-backed source of raw results. Implementations push zero
/// or more raw JSON results onto `sink` and return once exhausted (or once
/// `ctx.cancel.is_cancelled()`).
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn pull(&self, ctx: PullContext<'_>, sink: ResultSender) -> anyhow::Result<()>;

    /// Optional override of the client list the pull executor computed
    /// for this task (root: every client in the meta; non-root: the
    /// single client inherited from the parent). Returning `None` keeps
    /// that list as-is; a table that needs to multiply or filter clients
    /// before execution returns its own list instead.
    fn expand_client_task(&self, computed_clients: &[ClientHandle]) -> Option<Vec<ClientHandle>> {
        let _ = computed_clients;
        None
    }
}
