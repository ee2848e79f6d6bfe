use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use diagnostics::{Diagnostics, ErrorHandlerMeta, IgnoreKind};
use schema::{ClientHandle, PullContext};
use serde_json::Value as Raw;
use tokio::task::JoinHandle;

use crate::queue::TaskQueue;
use crate::task::DataSourcePullTask;

/// Consecutive empty polls, across every worker simultaneously, that
/// signal the pool has run out of work.
const IDLE_THRESHOLD: usize = 3;
const IDLE_SLEEP: Duration = Duration::from_secs(3);
/// Reference result-channel capacity.
const DEFAULT_RESULT_CHANNEL_CAPACITY: usize = 10_000;
const DEFAULT_WORKER_COUNT: usize = 100;

/// A disposable worker pool scoped to one pull request. Constructed
/// fresh per request; terminates on quiescence, not on an explicit stop
/// signal.
pub struct PullExecutor {
    queue: Arc<TaskQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl PullExecutor {
    /// `requested_workers <= 0` falls back to the reference default of
    /// 100.
    pub fn new(requested_workers: i64, error_handler: ErrorHandlerMeta) -> Self {
        Self::with_result_channel_capacity(requested_workers, error_handler, DEFAULT_RESULT_CHANNEL_CAPACITY)
    }

    pub fn with_result_channel_capacity(requested_workers: i64, error_handler: ErrorHandlerMeta, result_channel_capacity: usize) -> Self {
        let worker_count = if requested_workers <= 0 {
            DEFAULT_WORKER_COUNT
        } else {
            requested_workers as usize
        };

        let queue = Arc::new(TaskQueue::new());
        let idle_counts: Arc<Vec<AtomicUsize>> = Arc::new((0..worker_count).map(|_| AtomicUsize::new(0)).collect());
        let shutdown = Arc::new(AtomicBool::new(false));
        let error_handler = Arc::new(error_handler);

        let workers = (0..worker_count)
            .map(|id| {
                let queue = queue.clone();
                let idle_counts = idle_counts.clone();
                let shutdown = shutdown.clone();
                let error_handler = error_handler.clone();
                tokio::spawn(worker_loop(id, queue, idle_counts, shutdown, error_handler, result_channel_capacity))
            })
            .collect();

        PullExecutor { queue, workers }
    }

    /// Never blocks.
    pub fn submit(&self, task: DataSourcePullTask) {
        self.queue.add(task);
    }

    /// Blocks until every worker has observed quiescence and exited.
    pub async fn shutdown_and_await_termination(self) {
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

async fn worker_loop(
    id: usize,
    queue: Arc<TaskQueue>,
    idle_counts: Arc<Vec<AtomicUsize>>,
    shutdown: Arc<AtomicBool>,
    error_handler: Arc<ErrorHandlerMeta>,
    result_channel_capacity: usize,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        match queue.take() {
            Some(task) => {
                idle_counts[id].store(0, Ordering::SeqCst);
                execute_task(task, &queue, &error_handler, result_channel_capacity).await;
            }
            None => {
                let idle = idle_counts[id].fetch_add(1, Ordering::SeqCst) + 1;
                let all_idle = idle >= IDLE_THRESHOLD && idle_counts.iter().all(|c| c.load(Ordering::SeqCst) >= IDLE_THRESHOLD);
                if all_idle {
                    shutdown.store(true, Ordering::SeqCst);
                    return;
                }
                tokio::time::sleep(IDLE_SLEEP).await;
            }
        }
    }
}

async fn execute_task(task: DataSourcePullTask, queue: &Arc<TaskQueue>, error_handler: &Arc<ErrorHandlerMeta>, result_channel_capacity: usize) {
    if !task.is_expand_done {
        expand_task(task, queue).await;
    } else {
        run_expanded_task(task, queue, error_handler, result_channel_capacity).await;
    }
}

fn compute_client_list(task: &DataSourcePullTask) -> Vec<ClientHandle> {
    if task.is_root_task {
        let clients = task.client_meta.clients();
        if clients.is_empty() {
            vec![ClientHandle::none()]
        } else {
            clients
        }
    } else {
        vec![task.client.clone()]
    }
}

async fn expand_task(task: DataSourcePullTask, queue: &Arc<TaskQueue>) {
    let outcome = diagnostics::catch_panic("expand task", || {
        let computed = compute_client_list(&task);
        task.table
            .data_source
            .as_ref()
            .and_then(|ds| ds.expand_client_task(&computed))
            .unwrap_or(computed)
    });

    match outcome {
        Ok(clients) => {
            for (index, client) in clients.into_iter().enumerate() {
                queue.add(task.expand_for_client(client, index));
            }
        }
        Err(diags) => {
            let _ = task.diagnostics_tx.send(diags).await;
        }
    }
}

async fn run_expanded_task(task: DataSourcePullTask, queue: &Arc<TaskQueue>, error_handler: &Arc<ErrorHandlerMeta>, result_channel_capacity: usize) {
    let (sink, receiver) = schema::result_channel(result_channel_capacity);

    let producer_task = task.clone();
    let producer_error_handler = error_handler.clone();
    let producer_handle = tokio::spawn(async move { run_producer(producer_task, sink, producer_error_handler).await });

    let consumer_task = task.clone();
    let consumer_error_handler = error_handler.clone();
    let consumer_queue = queue.clone();
    let consumer_handle = tokio::spawn(async move { run_consumer(consumer_task, receiver, consumer_queue, consumer_error_handler).await });

    let mut diags = Diagnostics::new();
    match producer_handle.await {
        Ok(producer_diags) => diags.merge(producer_diags),
        Err(join_err) => {
            if !error_handler.is_ignored(IgnoreKind::OnPullTable) {
                diags.error(format!("table {:?}: producer panicked: {join_err}", task.table.name));
            }
        }
    }
    match consumer_handle.await {
        Ok(consumer_diags) => diags.merge(consumer_diags),
        Err(join_err) => {
            diags.error(format!("table {:?}: consumer panicked: {join_err}", task.table.name));
        }
    }

    let _ = task.diagnostics_tx.send(diags).await;

    if let Some(callback) = &task.task_done_callback {
        let callback_diags = callback(&task);
        let _ = task.diagnostics_tx.send(callback_diags).await;
    }
}

async fn run_producer(task: DataSourcePullTask, sink: schema::ResultSender, error_handler: Arc<ErrorHandlerMeta>) -> Diagnostics {
    let mut diags = Diagnostics::new();

    let Some(data_source) = task.table.data_source.clone() else {
        return diags;
    };

    let pull_ctx = PullContext {
        client_meta: task.client_meta.as_ref(),
        client: &task.client,
        item_bag: &task.item_bag,
        parent_row: task.parent_row.as_ref(),
        parent_raw_result: task.parent_raw_result.as_ref(),
        cancel: &task.cancel,
    };

    if let Err(err) = data_source.pull(pull_ctx, sink).await {
        tracing::warn!(table = %task.table.name, parent_row = ?task.parent_row, error = %err, "data source pull failed");
        if !error_handler.is_ignored(IgnoreKind::OnPullTable) {
            diags.error(format!("table {:?}: pull failed: {err}", task.table.name));
        }
    }

    diags
}

async fn run_consumer(
    task: DataSourcePullTask,
    mut receiver: tokio::sync::mpsc::Receiver<Raw>,
    queue: Arc<TaskQueue>,
    error_handler: Arc<ErrorHandlerMeta>,
) -> Diagnostics {
    let mut diags = Diagnostics::new();

    while let Some(raw_result) = receiver.recv().await {
        if task.cancel.is_cancelled() {
            break;
        }

        let (rows, matched_results, handler_diags) = task.result_handler.handle(&task.client, &task, &raw_result).await;
        if handler_diags.has_error() {
            if !error_handler.is_ignored(IgnoreKind::OnPullTable) {
                diags.merge(handler_diags);
            }
            continue;
        }

        let row_slice = rows.split_row_by_row();
        if row_slice.len() != matched_results.len() {
            tracing::warn!(
                table = %task.table.name,
                rows = row_slice.len(),
                results = matched_results.len(),
                "row/result count mismatch, skipping child fan-out"
            );
            diags.error(format!(
                "table {:?}: {} rows but {} matched raw results, skipping child fan-out",
                task.table.name,
                row_slice.len(),
                matched_results.len()
            ));
            continue;
        }

        for child_table in &task.table.children {
            let child_arc = Arc::new(child_table.clone());
            for (row, result) in row_slice.iter().zip(matched_results.iter()) {
                let fresh_id = uuid::Uuid::new_v4().to_string();
                queue.add(task.spawn_child(child_arc.clone(), row, result, fresh_id));
            }
        }
    }

    diags
}
