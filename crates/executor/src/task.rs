use std::sync::Arc;

use diagnostics::Diagnostics;
use row::Row;
use schema::{CancelToken, ClientHandle, ClientMeta, Table};
use serde_json::Value as Raw;
use tokio::sync::mpsc;

use crate::item_bag::TaskItemBag;
use crate::result_handler::ResultHandler;

pub type TaskId = String;

pub type TaskDoneCallback = Arc<dyn Fn(&DataSourcePullTask) -> Diagnostics + Send + Sync>;

/// A unit of pull-executor work: either a not-yet-expanded task awaiting
/// client attachment, or an expanded task ready to run its table's data
/// source. See the executor crate's `pool` module for the state machine.
#[derive(Clone)]
pub struct DataSourcePullTask {
    pub task_id: TaskId,
    pub parent_task_id: Option<TaskId>,
    pub table: Arc<Table>,
    pub parent_table: Option<Arc<Table>>,
    pub client_meta: Arc<dyn ClientMeta>,
    pub client: ClientHandle,
    pub parent_row: Option<Row>,
    pub parent_raw_result: Option<Raw>,
    pub item_bag: TaskItemBag,
    pub is_root_task: bool,
    pub is_expand_done: bool,
    pub cancel: CancelToken,
    pub diagnostics_tx: mpsc::Sender<Diagnostics>,
    pub result_handler: Arc<dyn ResultHandler>,
    pub task_done_callback: Option<TaskDoneCallback>,
}

impl DataSourcePullTask {
    /// A fresh root task for `table`, not yet expanded.
    #[allow(clippy::too_many_arguments)]
    pub fn root(
        task_id: TaskId,
        table: Arc<Table>,
        client_meta: Arc<dyn ClientMeta>,
        cancel: CancelToken,
        diagnostics_tx: mpsc::Sender<Diagnostics>,
        result_handler: Arc<dyn ResultHandler>,
        task_done_callback: Option<TaskDoneCallback>,
    ) -> Self {
        DataSourcePullTask {
            task_id,
            parent_task_id: None,
            table,
            parent_table: None,
            client_meta,
            client: ClientHandle::none(),
            parent_row: None,
            parent_raw_result: None,
            item_bag: TaskItemBag::new(),
            is_root_task: true,
            is_expand_done: false,
            cancel,
            diagnostics_tx,
            result_handler,
            task_done_callback,
        }
    }

    /// The expansion phase's output for one `(client, index)` pair:
    /// clone of `self`, a fresh task-id suffix, the attached client, and
    /// `is_expand_done` set.
    pub fn expand_for_client(&self, client: ClientHandle, index: usize) -> Self {
        let mut clone = self.clone();
        clone.task_id = format!("{}#{index}", self.task_id);
        clone.client = client;
        clone.is_expand_done = true;
        clone
    }

    /// A child task fanned out from one `(row, raw_result)` pair produced
    /// by this task, targeting `child_table`. Already expanded: child
    /// tasks never re-enter the expansion phase.
    pub fn spawn_child(&self, child_table: Arc<Table>, row: &Row, raw_result: &Raw, fresh_task_id: TaskId) -> Self {
        DataSourcePullTask {
            task_id: fresh_task_id,
            parent_task_id: Some(self.task_id.clone()),
            table: child_table,
            parent_table: Some(self.table.clone()),
            client_meta: self.client_meta.clone(),
            client: self.client.clone(),
            parent_row: Some(row.clone()),
            parent_raw_result: Some(raw_result.clone()),
            item_bag: self.item_bag.child(),
            is_root_task: false,
            is_expand_done: true,
            cancel: self.cancel.clone(),
            diagnostics_tx: self.diagnostics_tx.clone(),
            result_handler: self.result_handler.clone(),
            task_done_callback: self.task_done_callback.clone(),
        }
    }
}
